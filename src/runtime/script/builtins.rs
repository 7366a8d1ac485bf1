//! The global environment: `console`, `Math`, `JSON`, `Object`, the error
//! constructors, timers, and the prototype methods of the builtin types.
//!
//! Builtins live in a scope that encloses the global scope, so a snippet may
//! shadow any of them without touching the builtin itself.

use rand::Rng;

use super::eval::{Eval, Interpreter};
use super::heap::{Binding, Callable, Heap, NativeFn, Object, ObjectId, ObjectKind, ScopeId, Scopes};
use super::inspect::inspect;
use super::value::{number_to_string, to_integer, Value};

mod array;
mod json;
mod string;

/// Prototypes the evaluator needs by identity.
#[derive(Debug, Clone)]
pub struct Intrinsics {
    pub object_proto: ObjectId,
    pub function_proto: ObjectId,
    pub array_proto: ObjectId,
    pub string_proto: ObjectId,
    pub number_proto: ObjectId,
    pub boolean_proto: ObjectId,
    /// Error prototypes by name; `Error` comes first.
    pub errors: Vec<(&'static str, ObjectId)>,
}

impl Intrinsics {
    /// The prototype for error `name`, falling back to `Error.prototype`.
    pub fn error_proto(&self, name: &str) -> ObjectId {
        self.errors
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .or_else(|| self.errors.first())
            .map(|(_, id)| *id)
            .unwrap_or(self.object_proto)
    }
}

const ERROR_TYPES: [&str; 5] = ["Error", "TypeError", "ReferenceError", "RangeError", "SyntaxError"];

// ===================================================================================================
// INSTALLATION
// ===================================================================================================

struct Installer<'h> {
    heap: &'h mut Heap,
    object_proto: ObjectId,
    function_proto: ObjectId,
}

impl Installer<'_> {
    fn object(&mut self) -> Option<ObjectId> {
        self.heap
            .alloc(Object::new(ObjectKind::Ordinary, Some(self.object_proto)))
    }

    fn function(&mut self, name: &'static str, func: NativeFn) -> Option<ObjectId> {
        let mut object = Object::new(
            ObjectKind::Function(Callable::Native { name, func }),
            Some(self.function_proto),
        );
        object.define("name", Value::str(name), false);
        self.heap.alloc(object)
    }

    fn method(&mut self, target: ObjectId, name: &'static str, func: NativeFn) -> Option<()> {
        let function = self.function(name, func)?;
        self.heap
            .get_mut(target)
            .define(name, Value::Object(function), false);
        Some(())
    }

    fn constant(&mut self, target: ObjectId, name: &'static str, value: Value) {
        self.heap.get_mut(target).define(name, value, false);
    }

    /// A constructor function whose `prototype` is `proto`.
    fn constructor(&mut self, name: &'static str, func: NativeFn, proto: ObjectId) -> Option<ObjectId> {
        let function = self.function(name, func)?;
        self.constant(function, "prototype", Value::Object(proto));
        self.constant(proto, "constructor", Value::Object(function));
        Some(function)
    }
}

/// Builds the builtin objects and the scope that exposes them.
pub(super) fn install(heap: &mut Heap, scopes: &mut Scopes) -> Option<(Intrinsics, ScopeId)> {
    let object_proto = heap.alloc(Object::new(ObjectKind::Ordinary, None))?;
    let function_proto = heap.alloc(Object::new(ObjectKind::Ordinary, Some(object_proto)))?;
    let mut install = Installer {
        heap,
        object_proto,
        function_proto,
    };
    let array_proto = install.object()?;
    let string_proto = install.object()?;
    let number_proto = install.object()?;
    let boolean_proto = install.object()?;

    let mut globals: Vec<(&'static str, Value)> = Vec::new();

    // Object
    install.method(object_proto, "hasOwnProperty", object_has_own_property)?;
    install.method(object_proto, "toString", object_to_string)?;
    let object = install.constructor("Object", object_construct, object_proto)?;
    install.method(object, "keys", object_keys)?;
    install.method(object, "values", object_values)?;
    install.method(object, "entries", object_entries)?;
    install.method(object, "fromEntries", object_from_entries)?;
    install.method(object, "assign", object_assign)?;
    install.method(object, "create", object_create)?;
    install.method(object, "getPrototypeOf", object_get_prototype_of)?;
    install.method(object, "freeze", object_freeze)?;
    install.method(object, "isFrozen", object_is_frozen)?;
    globals.push(("Object", Value::Object(object)));

    // Function
    install.method(function_proto, "call", function_call)?;
    install.method(function_proto, "apply", function_apply)?;
    install.method(function_proto, "bind", function_bind)?;
    install.method(function_proto, "toString", object_to_string)?;

    // Array
    array::install(&mut install, array_proto)?;
    let array = install.constructor("Array", array::construct, array_proto)?;
    install.method(array, "isArray", array::is_array)?;
    install.method(array, "from", array::from)?;
    install.method(array, "of", array::of)?;
    globals.push(("Array", Value::Object(array)));

    // String
    string::install(&mut install, string_proto)?;
    let string = install.constructor("String", string_construct, string_proto)?;
    globals.push(("String", Value::Object(string)));

    // Number
    install.method(number_proto, "toFixed", number_to_fixed)?;
    install.method(number_proto, "toString", number_to_string_method)?;
    let number = install.constructor("Number", number_construct, number_proto)?;
    install.method(number, "isInteger", number_is_integer)?;
    install.method(number, "isNaN", number_is_nan)?;
    install.method(number, "isFinite", number_is_finite)?;
    install.method(number, "parseFloat", parse_float)?;
    install.method(number, "parseInt", parse_int)?;
    install.constant(number, "MAX_SAFE_INTEGER", Value::Number(9007199254740991.0));
    install.constant(number, "MIN_SAFE_INTEGER", Value::Number(-9007199254740991.0));
    install.constant(number, "EPSILON", Value::Number(f64::EPSILON));
    globals.push(("Number", Value::Object(number)));

    // Boolean
    install.method(boolean_proto, "toString", primitive_to_string)?;
    let boolean = install.constructor("Boolean", boolean_construct, boolean_proto)?;
    globals.push(("Boolean", Value::Object(boolean)));

    // Errors
    let mut errors = Vec::new();
    let mut base_error = None;
    for name in ERROR_TYPES {
        let proto = match base_error {
            None => install.object()?,
            Some(base) => install
                .heap
                .alloc(Object::new(ObjectKind::Ordinary, Some(base)))?,
        };
        install.constant(proto, "name", Value::str(name));
        install.constant(proto, "message", Value::str(""));
        let func: NativeFn = match name {
            "TypeError" => construct_type_error,
            "ReferenceError" => construct_reference_error,
            "RangeError" => construct_range_error,
            "SyntaxError" => construct_syntax_error,
            _ => construct_error,
        };
        let constructor = install.constructor(name, func, proto)?;
        if let Some(base) = base_error {
            let base_constructor = install.heap.lookup(base, "constructor").cloned();
            if let Some(Value::Object(parent)) = base_constructor {
                install.heap.get_mut(constructor).proto = Some(parent);
            }
        } else {
            install.method(proto, "toString", error_to_string)?;
            base_error = Some(proto);
        }
        errors.push((name, proto));
        globals.push((name, Value::Object(constructor)));
    }

    // console
    let console = install.object()?;
    install.method(console, "log", console_log)?;
    install.method(console, "info", console_log)?;
    install.method(console, "debug", console_log)?;
    install.method(console, "warn", console_log)?;
    install.method(console, "error", console_log)?;
    globals.push(("console", Value::Object(console)));

    // Math
    let math = install.object()?;
    install.method(math, "random", math_random)?;
    install.method(math, "floor", math_floor)?;
    install.method(math, "ceil", math_ceil)?;
    install.method(math, "round", math_round)?;
    install.method(math, "trunc", math_trunc)?;
    install.method(math, "abs", math_abs)?;
    install.method(math, "sign", math_sign)?;
    install.method(math, "sqrt", math_sqrt)?;
    install.method(math, "cbrt", math_cbrt)?;
    install.method(math, "pow", math_pow)?;
    install.method(math, "log", math_log)?;
    install.method(math, "exp", math_exp)?;
    install.method(math, "max", math_max)?;
    install.method(math, "min", math_min)?;
    install.constant(math, "PI", Value::Number(std::f64::consts::PI));
    install.constant(math, "E", Value::Number(std::f64::consts::E));
    globals.push(("Math", Value::Object(math)));

    // JSON
    let json = install.object()?;
    install.method(json, "stringify", json::stringify)?;
    install.method(json, "parse", json::parse)?;
    globals.push(("JSON", Value::Object(json)));

    // Free functions
    for (name, func) in [
        ("parseInt", parse_int as NativeFn),
        ("parseFloat", parse_float),
        ("isNaN", global_is_nan),
        ("isFinite", global_is_finite),
        ("setTimeout", set_timeout),
        ("clearTimeout", clear_timer),
        ("setInterval", set_interval),
        ("clearInterval", clear_timer),
    ] {
        let function = install.function(name, func)?;
        globals.push((name, Value::Object(function)));
    }

    let scope = scopes.open(None, true)?;
    for (name, value) in globals {
        scopes.declare(scope, name, Binding::var(value));
    }
    for (name, value) in [
        ("undefined", Value::Undefined),
        ("NaN", Value::Number(f64::NAN)),
        ("Infinity", Value::Number(f64::INFINITY)),
    ] {
        let binding = Binding {
            value: Some(value),
            mutable: false,
            lexical: false,
        };
        scopes.declare(scope, name, binding);
    }

    let intrinsics = Intrinsics {
        object_proto,
        function_proto,
        array_proto,
        string_proto,
        number_proto,
        boolean_proto,
        errors,
    };
    Some((intrinsics, scope))
}

// ===================================================================================================
// ARGUMENT HELPERS
// ===================================================================================================

pub(super) fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn number_arg(interp: &mut Interpreter<'_>, args: &[Value], index: usize) -> Eval<f64> {
    interp.to_number(&arg(args, index))
}

/// Fails with `TypeError` unless `value` can be called.
pub(super) fn require_callable(interp: &mut Interpreter<'_>, value: &Value) -> Eval<()> {
    if interp.is_callable(value) {
        return Ok(());
    }
    let shown = inspect(&interp.ctx.heap, value);
    interp.throw_error("TypeError", format!("{} is not a function", shown))
}

// ===================================================================================================
// CONSOLE
// ===================================================================================================

fn console_log(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let line = format_log(interp, &args)?;
    interp.emit(&line);
    Ok(Value::Undefined)
}

/// Joins console arguments, expanding `%s`-style directives in a leading
/// format string.
fn format_log(interp: &mut Interpreter<'_>, args: &[Value]) -> Eval<String> {
    let mut rest = args.iter().peekable();
    let mut parts = Vec::new();
    if let Some(Value::Str(format)) = args.first() {
        if format.contains('%') && args.len() > 1 {
            rest.next();
            let mut out = String::new();
            let mut chars = format.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '%' {
                    out.push(c);
                    continue;
                }
                match chars.peek().copied() {
                    Some('%') => {
                        chars.next();
                        out.push('%');
                    }
                    Some(directive @ ('s' | 'd' | 'i' | 'f' | 'o' | 'O' | 'j')) if rest.peek().is_some() => {
                        chars.next();
                        let value = rest.next().cloned().unwrap_or_default();
                        let text = match directive {
                            's' => match &value {
                                Value::Str(s) => s.clone(),
                                other => interp.to_string(other)?,
                            },
                            'd' | 'i' => {
                                let n = interp.to_number(&value)?;
                                let n = if directive == 'i' { n.trunc() } else { n };
                                number_to_string(n)
                            }
                            'f' => number_to_string(interp.to_number(&value)?),
                            _ => inspect(&interp.ctx.heap, &value),
                        };
                        out.push_str(&text);
                    }
                    _ => out.push('%'),
                }
            }
            parts.push(out);
        }
    }
    for value in rest {
        parts.push(match value {
            Value::Str(s) => s.clone(),
            other => inspect(&interp.ctx.heap, other),
        });
    }
    Ok(parts.join(" "))
}

// ===================================================================================================
// OBJECT AND FUNCTION
// ===================================================================================================

fn object_construct(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    match arg(&args, 0) {
        value @ Value::Object(_) => Ok(value),
        _ => Ok(Value::Object(interp.new_object()?)),
    }
}

fn object_has_own_property(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let key = interp.to_key(&arg(&args, 0))?;
    let Value::Object(id) = this else {
        return Ok(Value::Bool(false));
    };
    let object = interp.ctx.heap.get(id);
    let own = object.own(&key).is_some()
        || match &object.kind {
            ObjectKind::Array(items) => {
                super::value::array_index(&key).map_or(false, |index| index < items.len())
            }
            _ => false,
        };
    Ok(Value::Bool(own))
}

fn object_to_string(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    match &this {
        Value::Object(id) if interp.is_callable(&this) => {
            let name = interp.function_name(*id);
            Ok(Value::Str(format!("function {}() {{ [native code] }}", name)))
        }
        Value::Object(_) => Ok(Value::str("[object Object]")),
        Value::Undefined => Ok(Value::str("[object Undefined]")),
        Value::Null => Ok(Value::str("[object Null]")),
        other => Ok(Value::Str(interp.to_string(other)?)),
    }
}

fn object_keys(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = require_object_coercible(interp, arg(&args, 0))?;
    let keys = interp
        .own_keys(&target)
        .into_iter()
        .map(Value::Str)
        .collect();
    interp.new_array(keys)
}

fn object_values(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = require_object_coercible(interp, arg(&args, 0))?;
    let values = interp
        .own_entries(&target)?
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    interp.new_array(values)
}

fn object_entries(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = require_object_coercible(interp, arg(&args, 0))?;
    let mut entries = Vec::new();
    for (key, value) in interp.own_entries(&target)? {
        entries.push(interp.new_array(vec![Value::Str(key), value])?);
    }
    interp.new_array(entries)
}

fn object_from_entries(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let entries = interp.iterate(&arg(&args, 0))?;
    let result = interp.new_object()?;
    for entry in entries {
        let key = interp.get(&entry, "0")?;
        let key = interp.to_key(&key)?;
        let value = interp.get(&entry, "1")?;
        interp.ctx.heap.get_mut(result).define(key, value, true);
    }
    Ok(Value::Object(result))
}

fn object_assign(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = require_object_coercible(interp, arg(&args, 0))?;
    for source in args.iter().skip(1) {
        for (key, value) in interp.own_entries(source)? {
            interp.set(&target, &key, value)?;
        }
    }
    Ok(target)
}

fn object_create(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let proto = match arg(&args, 0) {
        Value::Object(id) => Some(id),
        Value::Null => None,
        other => {
            let shown = inspect(&interp.ctx.heap, &other);
            return interp.throw_error(
                "TypeError",
                format!("Object prototype may only be an Object or null: {}", shown),
            );
        }
    };
    let id = interp.alloc(Object::new(ObjectKind::Ordinary, proto))?;
    Ok(Value::Object(id))
}

fn object_get_prototype_of(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = require_object_coercible(interp, arg(&args, 0))?;
    let intrinsics = &interp.ctx.intrinsics;
    let proto = match target {
        Value::Object(id) => interp.ctx.heap.get(id).proto,
        Value::Str(_) => Some(intrinsics.string_proto),
        Value::Number(_) => Some(intrinsics.number_proto),
        Value::Bool(_) => Some(intrinsics.boolean_proto),
        _ => None,
    };
    Ok(proto.map_or(Value::Null, Value::Object))
}

fn object_freeze(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let target = arg(&args, 0);
    if let Value::Object(id) = target {
        interp.ctx.heap.get_mut(id).frozen = true;
    }
    Ok(target)
}

fn object_is_frozen(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(match arg(&args, 0) {
        Value::Object(id) => interp.ctx.heap.get(id).frozen,
        _ => true,
    }))
}

fn require_object_coercible(interp: &mut Interpreter<'_>, value: Value) -> Eval<Value> {
    if value.is_nullish() {
        return interp.throw_error("TypeError", "Cannot convert undefined or null to object");
    }
    Ok(value)
}

fn function_call(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    require_callable(interp, &this)?;
    let mut args = args.into_iter();
    let receiver = args.next().unwrap_or_default();
    interp.call(&this, receiver, args.collect())
}

fn function_apply(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    require_callable(interp, &this)?;
    let receiver = arg(&args, 0);
    let list = match arg(&args, 1) {
        Value::Undefined | Value::Null => Vec::new(),
        other => interp.iterate(&other)?,
    };
    interp.call(&this, receiver, list)
}

fn function_bind(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    require_callable(interp, &this)?;
    let Value::Object(target) = this else {
        return Ok(Value::Undefined);
    };
    let mut args = args.into_iter();
    let bound_this = args.next().unwrap_or_default();
    let name = format!("bound {}", interp.function_name(target));
    let mut object = Object::new(
        ObjectKind::Function(Callable::Bound {
            target,
            this: bound_this,
            args: args.collect(),
        }),
        Some(interp.ctx.intrinsics.function_proto),
    );
    object.define("name", Value::Str(name), false);
    Ok(Value::Object(interp.alloc(object)?))
}

// ===================================================================================================
// PRIMITIVE WRAPPERS
// ===================================================================================================

fn primitive_to_string(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Str(interp.to_string(&this)?))
}

fn string_construct(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    match args.first() {
        None => Ok(Value::str("")),
        Some(Value::Str(s)) => Ok(Value::Str(s.clone())),
        Some(other) => {
            let text = interp.to_string(other)?;
            interp.check_string(text)
        }
    }
}

fn number_construct(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    if args.is_empty() {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::Number(number_arg(interp, &args, 0)?))
}

fn boolean_construct(_interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(arg(&args, 0).truthy()))
}

fn this_number(interp: &mut Interpreter<'_>, this: &Value) -> Eval<f64> {
    match this {
        Value::Number(n) => Ok(*n),
        _ => interp.throw_error("TypeError", "Number.prototype method called on incompatible receiver"),
    }
}

fn number_to_fixed(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let n = this_number(interp, &this)?;
    let digits = to_integer(number_arg(interp, &args, 0)?);
    if !(0.0..=100.0).contains(&digits) {
        return interp.throw_error("RangeError", "toFixed() digits argument must be between 0 and 100");
    }
    Ok(Value::Str(to_fixed(n, digits as usize)))
}

/// Fixed-point formatting with ties rounded away from zero.
pub(super) fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() {
        return number_to_string(n);
    }
    if n.abs() >= 1e21 {
        return number_to_string(n);
    }
    let scale = 10f64.powi(digits as i32);
    let scaled = n.abs() * scale;
    let magnitude = if scaled.fract() == 0.5 && scaled < 9007199254740992.0 {
        format!("{:.*}", digits, (scaled.floor() + 1.0) / scale)
    } else {
        format!("{:.*}", digits, n.abs())
    };
    let is_zero = magnitude.bytes().all(|b| b == b'0' || b == b'.');
    if n < 0.0 && !is_zero {
        format!("-{}", magnitude)
    } else {
        magnitude
    }
}

fn number_to_string_method(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let n = this_number(interp, &this)?;
    let radix = match arg(&args, 0) {
        Value::Undefined => 10,
        other => to_integer(interp.to_number(&other)?) as u32,
    };
    if !(2..=36).contains(&radix) {
        return interp.throw_error("RangeError", "toString() radix must be between 2 and 36");
    }
    if radix == 10 || n.fract() != 0.0 || !n.is_finite() || n.abs() > 9007199254740991.0 {
        return Ok(Value::Str(number_to_string(n)));
    }
    let mut magnitude = n.abs() as u64;
    let mut digits = Vec::new();
    loop {
        let digit = (magnitude % u64::from(radix)) as u32;
        digits.push(std::char::from_digit(digit, radix).unwrap_or('0'));
        magnitude /= u64::from(radix);
        if magnitude == 0 {
            break;
        }
    }
    if n < 0.0 {
        digits.push('-');
    }
    Ok(Value::Str(digits.into_iter().rev().collect()))
}

fn number_is_integer(_interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite() && n.fract() == 0.0)))
}

fn number_is_nan(_interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_nan())))
}

fn number_is_finite(_interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(matches!(arg(&args, 0), Value::Number(n) if n.is_finite())))
}

fn global_is_nan(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(number_arg(interp, &args, 0)?.is_nan()))
}

fn global_is_finite(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(number_arg(interp, &args, 0)?.is_finite()))
}

fn parse_int(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let text = interp.to_string(&arg(&args, 0))?;
    let mut radix = match arg(&args, 1) {
        Value::Undefined => 0,
        other => to_integer(interp.to_number(&other)?) as u32,
    };
    let mut rest = text.trim_start();
    let negative = rest.starts_with('-');
    if negative || rest.starts_with('+') {
        rest = &rest[1..];
    }
    if (radix == 0 || radix == 16) && (rest.starts_with("0x") || rest.starts_with("0X")) {
        rest = &rest[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let digits: String = rest.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return Ok(Value::Number(f64::NAN));
    }
    let mut value = 0f64;
    for c in digits.chars() {
        value = value * f64::from(radix) + f64::from(c.to_digit(radix).unwrap_or(0));
    }
    Ok(Value::Number(if negative { -value } else { value }))
}

fn parse_float(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let text = interp.to_string(&arg(&args, 0))?;
    let trimmed = text.trim_start();
    for prefix in ["Infinity", "+Infinity"] {
        if trimmed.starts_with(prefix) {
            return Ok(Value::Number(f64::INFINITY));
        }
    }
    if trimmed.starts_with("-Infinity") {
        return Ok(Value::Number(f64::NEG_INFINITY));
    }
    // Longest prefix that still reads as a number.
    let mut best = f64::NAN;
    for (index, c) in trimmed.char_indices() {
        if !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
            break;
        }
        if let Ok(parsed) = trimmed[..index + c.len_utf8()].parse::<f64>() {
            best = parsed;
        }
    }
    Ok(Value::Number(best))
}

// ===================================================================================================
// ERRORS
// ===================================================================================================

fn construct_named_error(interp: &mut Interpreter<'_>, name: &str, args: &[Value]) -> Eval<Value> {
    let message = match arg(args, 0) {
        Value::Undefined => String::new(),
        other => interp.to_string(&other)?,
    };
    interp.new_error(name, message)
}

fn construct_error(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    construct_named_error(interp, "Error", &args)
}

fn construct_type_error(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    construct_named_error(interp, "TypeError", &args)
}

fn construct_reference_error(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    construct_named_error(interp, "ReferenceError", &args)
}

fn construct_range_error(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    construct_named_error(interp, "RangeError", &args)
}

fn construct_syntax_error(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    construct_named_error(interp, "SyntaxError", &args)
}

fn error_to_string(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Str(interp.describe_thrown(&this)))
}

// ===================================================================================================
// MATH
// ===================================================================================================

fn math_random(interp: &mut Interpreter<'_>, _this: Value, _args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Number(interp.ctx.rng.gen::<f64>()))
}

fn unary_math(interp: &mut Interpreter<'_>, args: &[Value], f: fn(f64) -> f64) -> Eval<Value> {
    Ok(Value::Number(f(number_arg(interp, args, 0)?)))
}

fn math_floor(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::floor)
}

fn math_ceil(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::ceil)
}

fn math_round(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, |n| (n + 0.5).floor())
}

fn math_trunc(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::trunc)
}

fn math_abs(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::abs)
}

fn math_sign(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, |n| if n == 0.0 || n.is_nan() { n } else { n.signum() })
}

fn math_sqrt(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::sqrt)
}

fn math_cbrt(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::cbrt)
}

fn math_log(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::ln)
}

fn math_exp(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    unary_math(interp, &args, f64::exp)
}

fn math_pow(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let base = number_arg(interp, &args, 0)?;
    let exponent = number_arg(interp, &args, 1)?;
    if exponent.is_nan() {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(base.powf(exponent)))
}

fn math_extreme(interp: &mut Interpreter<'_>, args: &[Value], max: bool) -> Eval<Value> {
    let mut best = if max { f64::NEG_INFINITY } else { f64::INFINITY };
    for value in args {
        let n = interp.to_number(value)?;
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        if (max && n > best) || (!max && n < best) {
            best = n;
        }
    }
    Ok(Value::Number(best))
}

fn math_max(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    math_extreme(interp, &args, true)
}

fn math_min(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    math_extreme(interp, &args, false)
}

// ===================================================================================================
// TIMERS
// ===================================================================================================

/// Pending `setTimeout`/`setInterval` callbacks on a virtual clock.
///
/// Nothing waits in real time: once the main script finishes, callbacks
/// run in due-time order and the clock jumps to each one.
#[derive(Debug, Default)]
pub struct Timers {
    clock: u64,
    next_id: u64,
    next_seq: u64,
    pending: Vec<Timer>,
}

#[derive(Debug, Clone)]
struct Timer {
    id: u64,
    due: u64,
    seq: u64,
    callback: Value,
    args: Vec<Value>,
    interval: Option<u64>,
}

impl Timers {
    fn schedule(&mut self, callback: Value, delay: u64, args: Vec<Value>, repeat: bool) -> u64 {
        self.next_id += 1;
        self.next_seq += 1;
        let delay = delay.max(1);
        self.pending.push(Timer {
            id: self.next_id,
            due: self.clock + delay,
            seq: self.next_seq,
            callback,
            args,
            interval: repeat.then_some(delay),
        });
        self.next_id
    }

    fn cancel(&mut self, id: u64) {
        self.pending.retain(|timer| timer.id != id);
    }

    /// Removes the next due timer, advancing the clock to it.
    fn pop_due(&mut self) -> Option<Timer> {
        let index = self
            .pending
            .iter()
            .enumerate()
            .min_by_key(|(_, timer)| (timer.due, timer.seq))
            .map(|(index, _)| index)?;
        let timer = self.pending.remove(index);
        self.clock = timer.due;
        if let Some(interval) = timer.interval {
            self.next_seq += 1;
            self.pending.push(Timer {
                due: self.clock + interval,
                seq: self.next_seq,
                ..timer.clone()
            });
        }
        Some(timer)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn schedule(interp: &mut Interpreter<'_>, args: Vec<Value>, repeat: bool) -> Eval<Value> {
    let mut args = args.into_iter();
    let callback = args.next().unwrap_or_default();
    require_callable(interp, &callback)?;
    let delay = match args.next() {
        Some(delay) => interp.to_number(&delay)?,
        None => 0.0,
    };
    let delay = if delay.is_finite() && delay > 0.0 {
        delay as u64
    } else {
        0
    };
    let id = interp
        .ctx
        .timers
        .schedule(callback, delay, args.collect(), repeat);
    Ok(Value::Number(id as f64))
}

fn set_timeout(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    schedule(interp, args, false)
}

fn set_interval(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    schedule(interp, args, true)
}

fn clear_timer(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    if let Value::Number(id) = arg(&args, 0) {
        interp.ctx.timers.cancel(id as u64);
    }
    Ok(Value::Undefined)
}

/// Runs pending timers until none remain.
pub(super) fn run_timers(interp: &mut Interpreter<'_>) -> Eval<()> {
    while let Some(timer) = interp.ctx.timers.pop_due() {
        interp.tick()?;
        interp.call(&timer.callback, Value::Undefined, timer.args)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_fixed_rounds_ties_away_from_zero() {
        assert_eq!(to_fixed(2.5, 0), "3");
        assert_eq!(to_fixed(1.005, 2), "1.00");
        assert_eq!(to_fixed(3.14159, 2), "3.14");
        assert_eq!(to_fixed(-1.5, 0), "-2");
        assert_eq!(to_fixed(-0.0001, 2), "0.00");
    }

    #[test]
    fn timers_fire_in_due_order_then_insertion_order() {
        let mut timers = Timers::default();
        timers.schedule(Value::str("late"), 100, vec![], false);
        timers.schedule(Value::str("first"), 0, vec![], false);
        timers.schedule(Value::str("second"), 1, vec![], false);
        let order: Vec<Value> = std::iter::from_fn(|| timers.pop_due())
            .map(|timer| timer.callback)
            .collect();
        assert_eq!(
            order,
            vec![Value::str("first"), Value::str("second"), Value::str("late")]
        );
    }

    #[test]
    fn cancelled_intervals_stop_repeating() {
        let mut timers = Timers::default();
        let id = timers.schedule(Value::Null, 10, vec![], true);
        assert!(timers.pop_due().is_some());
        assert!(!timers.is_empty());
        timers.cancel(id);
        assert!(timers.pop_due().is_none());
    }
}
