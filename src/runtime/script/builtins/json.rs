//! `JSON.stringify` and `JSON.parse`, backed by `serde_json`.

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Number, Serializer};

use super::arg;
use crate::runtime::script::eval::{Eval, Interpreter};
use crate::runtime::script::heap::{ObjectId, ObjectKind};
use crate::runtime::script::value::{to_integer, Value};

/// Largest magnitude printed as an integer rather than a float.
const EXACT_INTEGER: f64 = 9007199254740992.0;

enum Replacer {
    None,
    Keys(Vec<String>),
    Function(Value),
}

struct Stringifier<'i, 'a> {
    interp: &'i mut Interpreter<'a>,
    replacer: Replacer,
    stack: Vec<ObjectId>,
}

impl Stringifier<'_, '_> {
    /// Converts `value` found at `key` of `holder`. `None` means "omit".
    fn convert(&mut self, holder: &Value, key: &str, value: Value) -> Eval<Option<serde_json::Value>> {
        self.interp.tick()?;
        let value = match &self.replacer {
            Replacer::Function(function) => {
                let function = function.clone();
                self.interp
                    .call(&function, holder.clone(), vec![Value::str(key), value])?
            }
            _ => value,
        };
        Ok(Some(match &value {
            Value::Undefined => return Ok(None),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Object(id) => {
                if self.interp.is_callable(&value) {
                    return Ok(None);
                }
                if self.stack.contains(id) {
                    return self
                        .interp
                        .throw_error("TypeError", "Converting circular structure to JSON");
                }
                self.stack.push(*id);
                let converted = self.object(&value);
                self.stack.pop();
                converted?
            }
        }))
    }

    fn object(&mut self, value: &Value) -> Eval<serde_json::Value> {
        let Value::Object(id) = value else {
            return Ok(serde_json::Value::Null);
        };
        if let ObjectKind::Array(items) = &self.interp.ctx.heap.get(*id).kind {
            let items = items.clone();
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let converted = self.convert(value, &index.to_string(), item)?;
                out.push(converted.unwrap_or(serde_json::Value::Null));
            }
            return Ok(serde_json::Value::Array(out));
        }
        let mut map = Map::new();
        for (key, item) in self.interp.own_entries(value)? {
            if let Replacer::Keys(keys) = &self.replacer {
                if !keys.contains(&key) {
                    continue;
                }
            }
            if let Some(converted) = self.convert(value, &key, item)? {
                map.insert(key, converted);
            }
        }
        Ok(serde_json::Value::Object(map))
    }
}

fn number(n: f64) -> serde_json::Value {
    if !n.is_finite() {
        return serde_json::Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < EXACT_INTEGER {
        return serde_json::Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

pub(super) fn stringify(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let replacer = match arg(&args, 1) {
        Value::Object(id) => {
            if let ObjectKind::Array(items) = &interp.ctx.heap.get(id).kind {
                let items = items.clone();
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    keys.push(interp.to_string(&item)?);
                }
                Replacer::Keys(keys)
            } else if interp.is_callable(&Value::Object(id)) {
                Replacer::Function(Value::Object(id))
            } else {
                Replacer::None
            }
        }
        _ => Replacer::None,
    };
    let indent = match arg(&args, 2) {
        Value::Number(n) => " ".repeat(to_integer(n).clamp(0.0, 10.0) as usize),
        Value::Str(s) => s.chars().take(10).collect(),
        _ => String::new(),
    };

    let holder = interp.new_object()?;
    let mut stringifier = Stringifier {
        interp: &mut *interp,
        replacer,
        stack: Vec::new(),
    };
    let Some(tree) = stringifier.convert(&Value::Object(holder), "", arg(&args, 0))? else {
        return Ok(Value::Undefined);
    };

    let text = if indent.is_empty() {
        serde_json::to_string(&tree).unwrap_or_default()
    } else {
        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(indent.as_bytes());
        let mut serializer = Serializer::with_formatter(&mut out, formatter);
        match tree.serialize(&mut serializer) {
            Ok(()) => String::from_utf8(out).unwrap_or_default(),
            Err(err) => return interp.throw_error("TypeError", err.to_string()),
        }
    };
    interp.check_string(text)
}

pub(super) fn parse(interp: &mut Interpreter<'_>, _this: Value, args: Vec<Value>) -> Eval<Value> {
    let text = interp.to_string(&arg(&args, 0))?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(tree) => build(interp, tree),
        Err(err) => interp.throw_error(
            "SyntaxError",
            format!(
                "Unexpected token in JSON at line {} column {}",
                err.line(),
                err.column()
            ),
        ),
    }
}

fn build(interp: &mut Interpreter<'_>, tree: serde_json::Value) -> Eval<Value> {
    Ok(match tree {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(build(interp, item)?);
            }
            interp.new_array(values)?
        }
        serde_json::Value::Object(map) => {
            let id = interp.new_object()?;
            for (key, item) in map {
                let value = build(interp, item)?;
                interp.ctx.heap.get_mut(id).define(key, value, true);
            }
            Value::Object(id)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_numbers_print_without_fraction() {
        assert_eq!(number(3.0).to_string(), "3");
        assert_eq!(number(-0.5).to_string(), "-0.5");
        assert_eq!(number(f64::NAN), serde_json::Value::Null);
        assert_eq!(number(f64::INFINITY), serde_json::Value::Null);
    }
}
