//! `Array` and `Array.prototype`.

use super::{arg, require_callable, Installer};
use crate::runtime::script::eval::{Eval, Interpreter, MAX_ARRAY_LENGTH};
use crate::runtime::script::heap::{ObjectId, ObjectKind};
use crate::runtime::script::value::{strict_equals, to_integer, Value};

pub(super) fn install(install: &mut Installer<'_>, proto: ObjectId) -> Option<()> {
    install.method(proto, "push", push)?;
    install.method(proto, "pop", pop)?;
    install.method(proto, "shift", shift)?;
    install.method(proto, "unshift", unshift)?;
    install.method(proto, "slice", slice)?;
    install.method(proto, "splice", splice)?;
    install.method(proto, "concat", concat)?;
    install.method(proto, "join", join)?;
    install.method(proto, "toString", to_string)?;
    install.method(proto, "reverse", reverse)?;
    install.method(proto, "indexOf", index_of)?;
    install.method(proto, "lastIndexOf", last_index_of)?;
    install.method(proto, "includes", includes)?;
    install.method(proto, "at", at)?;
    install.method(proto, "fill", fill)?;
    install.method(proto, "flat", flat)?;
    install.method(proto, "flatMap", flat_map)?;
    install.method(proto, "forEach", for_each)?;
    install.method(proto, "map", map)?;
    install.method(proto, "filter", filter)?;
    install.method(proto, "find", find)?;
    install.method(proto, "findIndex", find_index)?;
    install.method(proto, "findLast", find_last)?;
    install.method(proto, "some", some)?;
    install.method(proto, "every", every)?;
    install.method(proto, "reduce", reduce)?;
    install.method(proto, "reduceRight", reduce_right)?;
    install.method(proto, "sort", sort)?;
    install.method(proto, "keys", keys)?;
    install.method(proto, "entries", entries)?;
    Some(())
}

// ===================================================================================================
// HELPERS
// ===================================================================================================

/// The receiver's id and a snapshot of its items.
fn receiver(interp: &mut Interpreter<'_>, this: &Value) -> Eval<(ObjectId, Vec<Value>)> {
    if let Value::Object(id) = this {
        if let ObjectKind::Array(items) = &interp.ctx.heap.get(*id).kind {
            return Ok((*id, items.clone()));
        }
    }
    interp.throw_error("TypeError", "Array.prototype method called on a non-array")
}

/// Replaces the receiver's items unless it is frozen.
fn store(interp: &mut Interpreter<'_>, id: ObjectId, items: Vec<Value>) -> Eval<()> {
    if items.len() > MAX_ARRAY_LENGTH {
        return interp.throw_error("RangeError", "Invalid array length");
    }
    let object = interp.ctx.heap.get_mut(id);
    if object.frozen {
        return Ok(());
    }
    if let ObjectKind::Array(slot) = &mut object.kind {
        *slot = items;
    }
    Ok(())
}

/// Resolves a relative index argument against `len`.
fn relative_index(interp: &mut Interpreter<'_>, value: &Value, len: usize, default: usize) -> Eval<usize> {
    if *value == Value::Undefined {
        return Ok(default);
    }
    let n = to_integer(interp.to_number(value)?);
    let len = len as f64;
    let resolved = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
    Ok(resolved as usize)
}

fn is_array_value(interp: &Interpreter<'_>, value: &Value) -> bool {
    match value {
        Value::Object(id) => matches!(interp.ctx.heap.get(*id).kind, ObjectKind::Array(_)),
        _ => false,
    }
}

/// Calls `callback(item, index, array)` with the optional `thisArg`.
fn visit(
    interp: &mut Interpreter<'_>,
    callback: &Value,
    args: &[Value],
    item: &Value,
    index: usize,
    array: &Value,
) -> Eval<Value> {
    interp.call(
        callback,
        arg(args, 1),
        vec![item.clone(), Value::Number(index as f64), array.clone()],
    )
}

fn with_callback(interp: &mut Interpreter<'_>, this: &Value, args: &[Value]) -> Eval<(Vec<Value>, Value)> {
    let (_, items) = receiver(interp, this)?;
    let callback = arg(args, 0);
    require_callable(interp, &callback)?;
    Ok((items, callback))
}

// ===================================================================================================
// STATICS
// ===================================================================================================

pub(super) fn construct(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    if let [Value::Number(len)] = args.as_slice() {
        if len.fract() != 0.0 || *len < 0.0 || *len > MAX_ARRAY_LENGTH as f64 {
            return interp.throw_error("RangeError", "Invalid array length");
        }
        return interp.new_array(vec![Value::Undefined; *len as usize]);
    }
    interp.new_array(args)
}

pub(super) fn is_array(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(is_array_value(interp, &arg(&args, 0))))
}

pub(super) fn from(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let source = arg(&args, 0);
    let items = match &source {
        Value::Object(id) if !is_array_value(interp, &source) => {
            // Array-likes: `{ length: n }`.
            let length = interp.get(&source, "length")?;
            let length = to_integer(interp.to_number(&length)?).max(0.0);
            if length > MAX_ARRAY_LENGTH as f64 {
                return interp.throw_error("RangeError", "Invalid array length");
            }
            let object = Value::Object(*id);
            let mut items = Vec::with_capacity(length as usize);
            for index in 0..length as usize {
                items.push(interp.get(&object, &index.to_string())?);
            }
            items
        }
        _ => interp.iterate(&source)?,
    };
    let mapper = arg(&args, 1);
    if mapper == Value::Undefined {
        return interp.new_array(items);
    }
    require_callable(interp, &mapper)?;
    let mut mapped = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        mapped.push(interp.call(&mapper, Value::Undefined, vec![item, Value::Number(index as f64)])?);
    }
    interp.new_array(mapped)
}

pub(super) fn of(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    interp.new_array(args)
}

// ===================================================================================================
// MUTATORS
// ===================================================================================================

fn push(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    items.extend(args);
    let len = items.len();
    store(interp, id, items)?;
    Ok(Value::Number(len as f64))
}

fn pop(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    let last = items.pop().unwrap_or_default();
    store(interp, id, items)?;
    Ok(last)
}

fn shift(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    if items.is_empty() {
        return Ok(Value::Undefined);
    }
    let first = items.remove(0);
    store(interp, id, items)?;
    Ok(first)
}

fn unshift(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, items) = receiver(interp, &this)?;
    let mut combined = args;
    combined.extend(items);
    let len = combined.len();
    store(interp, id, combined)?;
    Ok(Value::Number(len as f64))
}

fn splice(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    let len = items.len();
    let start = relative_index(interp, &arg(&args, 0), len, 0)?;
    let delete = match args.get(1) {
        None => len - start,
        Some(count) => {
            let count = to_integer(interp.to_number(count)?).max(0.0);
            (count as usize).min(len - start)
        }
    };
    let inserted: Vec<Value> = args.into_iter().skip(2).collect();
    let removed: Vec<Value> = items.splice(start..start + delete, inserted).collect();
    store(interp, id, items)?;
    interp.new_array(removed)
}

fn reverse(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    items.reverse();
    store(interp, id, items)?;
    Ok(this)
}

fn fill(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, mut items) = receiver(interp, &this)?;
    let len = items.len();
    let start = relative_index(interp, &arg(&args, 1), len, 0)?;
    let end = relative_index(interp, &arg(&args, 2), len, len)?;
    let value = arg(&args, 0);
    for item in items.iter_mut().take(end).skip(start) {
        *item = value.clone();
    }
    store(interp, id, items)?;
    Ok(this)
}

/// Stable sort; `undefined` always sorts last.
fn sort(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, items) = receiver(interp, &this)?;
    let comparator = arg(&args, 0);
    if comparator != Value::Undefined {
        require_callable(interp, &comparator)?;
    }
    let (defined, undefined): (Vec<Value>, Vec<Value>) =
        items.into_iter().partition(|item| *item != Value::Undefined);

    // Binary insertion keeps equal elements in their original order.
    let mut sorted: Vec<Value> = Vec::with_capacity(defined.len() + undefined.len());
    for item in defined {
        let (mut low, mut high) = (0, sorted.len());
        while low < high {
            interp.tick()?;
            let mid = (low + high) / 2;
            let ordering = compare_items(interp, &comparator, &sorted[mid], &item)?;
            if ordering > 0.0 {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        sorted.insert(low, item);
    }
    sorted.extend(undefined);
    store(interp, id, sorted)?;
    Ok(this)
}

fn compare_items(interp: &mut Interpreter<'_>, comparator: &Value, a: &Value, b: &Value) -> Eval<f64> {
    if *comparator == Value::Undefined {
        let a = interp.to_string(a)?;
        let b = interp.to_string(b)?;
        let a: Vec<u16> = a.encode_utf16().collect();
        let b: Vec<u16> = b.encode_utf16().collect();
        return Ok(match a.cmp(&b) {
            std::cmp::Ordering::Less => -1.0,
            std::cmp::Ordering::Equal => 0.0,
            std::cmp::Ordering::Greater => 1.0,
        });
    }
    let result = interp.call(comparator, Value::Undefined, vec![a.clone(), b.clone()])?;
    let n = interp.to_number(&result)?;
    Ok(if n.is_nan() { 0.0 } else { n })
}

// ===================================================================================================
// ACCESSORS
// ===================================================================================================

fn slice(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let len = items.len();
    let start = relative_index(interp, &arg(&args, 0), len, 0)?;
    let end = relative_index(interp, &arg(&args, 1), len, len)?;
    let slice = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    interp.new_array(slice)
}

fn concat(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, mut items) = receiver(interp, &this)?;
    for value in args {
        if is_array_value(interp, &value) {
            items.extend(interp.iterate(&value)?);
        } else {
            items.push(value);
        }
        if items.len() > MAX_ARRAY_LENGTH {
            return interp.throw_error("RangeError", "Invalid array length");
        }
    }
    interp.new_array(items)
}

fn join(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (id, items) = receiver(interp, &this)?;
    let separator = match arg(&args, 0) {
        Value::Undefined => ",".to_string(),
        other => interp.to_string(&other)?,
    };
    if interp.joining.contains(&id) {
        return Ok(Value::str(""));
    }
    interp.joining.push(id);
    let joined = interp.join_values(&items, &separator);
    interp.joining.pop();
    Ok(Value::Str(joined?))
}

fn to_string(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    join(interp, this, Vec::new())
}

fn index_of(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let start = relative_index(interp, &arg(&args, 1), items.len(), 0)?;
    let needle = arg(&args, 0);
    let found = items
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, item)| strict_equals(item, &needle))
        .map_or(-1.0, |(index, _)| index as f64);
    Ok(Value::Number(found))
}

fn last_index_of(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let needle = arg(&args, 0);
    let found = items
        .iter()
        .rposition(|item| strict_equals(item, &needle))
        .map_or(-1.0, |index| index as f64);
    Ok(Value::Number(found))
}

/// Like `indexOf` but `NaN` finds `NaN`.
fn includes(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let start = relative_index(interp, &arg(&args, 1), items.len(), 0)?;
    let needle = arg(&args, 0);
    let found = items.iter().skip(start).any(|item| match (item, &needle) {
        (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
        _ => strict_equals(item, &needle),
    });
    Ok(Value::Bool(found))
}

fn at(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let n = to_integer(interp.to_number(&arg(&args, 0))?);
    let index = if n < 0.0 { items.len() as f64 + n } else { n };
    if index < 0.0 {
        return Ok(Value::Undefined);
    }
    Ok(items.get(index as usize).cloned().unwrap_or_default())
}

fn flatten_into(interp: &mut Interpreter<'_>, items: Vec<Value>, depth: f64, out: &mut Vec<Value>) -> Eval<()> {
    for item in items {
        if depth >= 1.0 && is_array_value(interp, &item) {
            let inner = interp.iterate(&item)?;
            flatten_into(interp, inner, depth - 1.0, out)?;
        } else {
            out.push(item);
        }
        if out.len() > MAX_ARRAY_LENGTH {
            return interp.throw_error("RangeError", "Invalid array length");
        }
    }
    Ok(())
}

fn flat(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let depth = match arg(&args, 0) {
        Value::Undefined => 1.0,
        other => to_integer(interp.to_number(&other)?),
    };
    let mut out = Vec::new();
    flatten_into(interp, items, depth, &mut out)?;
    interp.new_array(out)
}

fn flat_map(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    let mut mapped = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        mapped.push(visit(interp, &callback, &args, item, index, &this)?);
    }
    let mut out = Vec::new();
    flatten_into(interp, mapped, 1.0, &mut out)?;
    interp.new_array(out)
}

fn keys(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let keys = (0..items.len()).map(|i| Value::Number(i as f64)).collect();
    interp.new_array(keys)
}

fn entries(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let (_, items) = receiver(interp, &this)?;
    let mut pairs = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        pairs.push(interp.new_array(vec![Value::Number(index as f64), item])?);
    }
    interp.new_array(pairs)
}

// ===================================================================================================
// ITERATION
// ===================================================================================================

fn for_each(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    for (index, item) in items.iter().enumerate() {
        visit(interp, &callback, &args, item, index, &this)?;
    }
    Ok(Value::Undefined)
}

fn map(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    let mut mapped = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        mapped.push(visit(interp, &callback, &args, item, index, &this)?);
    }
    interp.new_array(mapped)
}

fn filter(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    let mut kept = Vec::new();
    for (index, item) in items.iter().enumerate() {
        if visit(interp, &callback, &args, item, index, &this)?.truthy() {
            kept.push(item.clone());
        }
    }
    interp.new_array(kept)
}

/// Index of the first item the callback accepts, scanning in `order`.
fn search(
    interp: &mut Interpreter<'_>,
    this: &Value,
    args: &[Value],
    reverse: bool,
) -> Eval<Option<(usize, Value)>> {
    let (items, callback) = with_callback(interp, this, args)?;
    let order: Box<dyn Iterator<Item = (usize, &Value)>> = if reverse {
        Box::new(items.iter().enumerate().rev())
    } else {
        Box::new(items.iter().enumerate())
    };
    for (index, item) in order {
        if visit(interp, &callback, args, item, index, this)?.truthy() {
            return Ok(Some((index, item.clone())));
        }
    }
    Ok(None)
}

fn find(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(search(interp, &this, &args, false)?
        .map(|(_, item)| item)
        .unwrap_or_default())
}

fn find_last(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(search(interp, &this, &args, true)?
        .map(|(_, item)| item)
        .unwrap_or_default())
}

fn find_index(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let found = search(interp, &this, &args, false)?;
    Ok(Value::Number(found.map_or(-1.0, |(index, _)| index as f64)))
}

fn some(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    Ok(Value::Bool(search(interp, &this, &args, false)?.is_some()))
}

fn every(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    for (index, item) in items.iter().enumerate() {
        if !visit(interp, &callback, &args, item, index, &this)?.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn fold(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>, reverse: bool) -> Eval<Value> {
    let (items, callback) = with_callback(interp, &this, &args)?;
    let mut indices: Vec<usize> = (0..items.len()).collect();
    if reverse {
        indices.reverse();
    }
    let mut indices = indices.into_iter();
    let mut accumulator = match args.get(1) {
        Some(initial) => initial.clone(),
        None => match indices.next() {
            Some(first) => items[first].clone(),
            None => {
                return interp.throw_error("TypeError", "Reduce of empty array with no initial value")
            }
        },
    };
    for index in indices {
        accumulator = interp.call(
            &callback,
            Value::Undefined,
            vec![
                accumulator,
                items[index].clone(),
                Value::Number(index as f64),
                this.clone(),
            ],
        )?;
    }
    Ok(accumulator)
}

fn reduce(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    fold(interp, this, args, false)
}

fn reduce_right(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    fold(interp, this, args, true)
}
