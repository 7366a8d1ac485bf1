//! `String.prototype`. Indices count characters, not bytes.

use super::{arg, Installer};
use crate::runtime::script::eval::{Eval, Interpreter, MAX_STRING_LENGTH};
use crate::runtime::script::heap::ObjectId;
use crate::runtime::script::value::{to_integer, Value};

pub(super) fn install(install: &mut Installer<'_>, proto: ObjectId) -> Option<()> {
    install.method(proto, "toString", to_string)?;
    install.method(proto, "toUpperCase", to_upper_case)?;
    install.method(proto, "toLowerCase", to_lower_case)?;
    install.method(proto, "trim", trim)?;
    install.method(proto, "trimStart", trim_start)?;
    install.method(proto, "trimEnd", trim_end)?;
    install.method(proto, "padStart", pad_start)?;
    install.method(proto, "padEnd", pad_end)?;
    install.method(proto, "repeat", repeat)?;
    install.method(proto, "slice", slice)?;
    install.method(proto, "substring", substring)?;
    install.method(proto, "charAt", char_at)?;
    install.method(proto, "charCodeAt", char_code_at)?;
    install.method(proto, "at", at)?;
    install.method(proto, "indexOf", index_of)?;
    install.method(proto, "lastIndexOf", last_index_of)?;
    install.method(proto, "includes", includes)?;
    install.method(proto, "startsWith", starts_with)?;
    install.method(proto, "endsWith", ends_with)?;
    install.method(proto, "split", split)?;
    install.method(proto, "replace", replace)?;
    install.method(proto, "replaceAll", replace_all)?;
    install.method(proto, "concat", concat)?;
    Some(())
}

fn receiver(interp: &mut Interpreter<'_>, this: &Value) -> Eval<Vec<char>> {
    match this {
        Value::Str(text) => Ok(text.chars().collect()),
        Value::Undefined | Value::Null => {
            interp.throw_error("TypeError", "String.prototype method called on null or undefined")
        }
        other => Ok(interp.to_string(other)?.chars().collect()),
    }
}

fn string_arg(interp: &mut Interpreter<'_>, args: &[Value], index: usize) -> Eval<Vec<char>> {
    Ok(interp.to_string(&arg(args, index))?.chars().collect())
}

fn relative_index(interp: &mut Interpreter<'_>, value: &Value, len: usize, default: usize) -> Eval<usize> {
    if *value == Value::Undefined {
        return Ok(default);
    }
    let n = to_integer(interp.to_number(value)?);
    let len = len as f64;
    let resolved = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
    Ok(resolved as usize)
}

fn clamped_index(interp: &mut Interpreter<'_>, value: &Value, len: usize, default: usize) -> Eval<usize> {
    if *value == Value::Undefined {
        return Ok(default);
    }
    let n = to_integer(interp.to_number(value)?);
    Ok(n.clamp(0.0, len as f64) as usize)
}

fn text(chars: &[char]) -> Value {
    Value::Str(chars.iter().collect())
}

fn find_from(haystack: &[char], needle: &[char], start: usize) -> Option<usize> {
    if needle.is_empty() {
        return (start <= haystack.len()).then_some(start);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    (start..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn to_string(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    Ok(text(&receiver(interp, &this)?))
}

fn to_upper_case(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    Ok(Value::Str(chars.iter().collect::<String>().to_uppercase()))
}

fn to_lower_case(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    Ok(Value::Str(chars.iter().collect::<String>().to_lowercase()))
}

fn trim(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    Ok(Value::str(chars.iter().collect::<String>().trim()))
}

fn trim_start(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    Ok(Value::str(chars.iter().collect::<String>().trim_start()))
}

fn trim_end(interp: &mut Interpreter<'_>, this: Value, _args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    Ok(Value::str(chars.iter().collect::<String>().trim_end()))
}

fn pad(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>, at_start: bool) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let target = to_integer(interp.to_number(&arg(&args, 0))?);
    if target > MAX_STRING_LENGTH as f64 {
        return interp.throw_error("RangeError", "Invalid string length");
    }
    let target = target.max(0.0) as usize;
    let filler = match arg(&args, 1) {
        Value::Undefined => vec![' '],
        other => interp.to_string(&other)?.chars().collect(),
    };
    if target <= chars.len() || filler.is_empty() {
        return Ok(text(&chars));
    }
    let padding: Vec<char> = filler.iter().cycle().take(target - chars.len()).copied().collect();
    let joined: String = if at_start {
        padding.iter().chain(chars.iter()).collect()
    } else {
        chars.iter().chain(padding.iter()).collect()
    };
    Ok(Value::Str(joined))
}

fn pad_start(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    pad(interp, this, args, true)
}

fn pad_end(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    pad(interp, this, args, false)
}

fn repeat(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let count = to_integer(interp.to_number(&arg(&args, 0))?);
    if count < 0.0 || count.is_infinite() {
        return interp.throw_error("RangeError", format!("Invalid count value: {}", count));
    }
    let base: String = chars.iter().collect();
    if base.len() as f64 * count > MAX_STRING_LENGTH as f64 {
        return interp.throw_error("RangeError", "Invalid string length");
    }
    Ok(Value::Str(base.repeat(count as usize)))
}

fn slice(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let start = relative_index(interp, &arg(&args, 0), chars.len(), 0)?;
    let end = relative_index(interp, &arg(&args, 1), chars.len(), chars.len())?;
    Ok(if start < end { text(&chars[start..end]) } else { Value::str("") })
}

fn substring(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let a = clamped_index(interp, &arg(&args, 0), chars.len(), 0)?;
    let b = clamped_index(interp, &arg(&args, 1), chars.len(), chars.len())?;
    Ok(text(&chars[a.min(b)..a.max(b)]))
}

fn char_at(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let index = to_integer(interp.to_number(&arg(&args, 0))?);
    if index < 0.0 {
        return Ok(Value::str(""));
    }
    Ok(chars
        .get(index as usize)
        .map(|c| Value::Str(c.to_string()))
        .unwrap_or_else(|| Value::str("")))
}

fn char_code_at(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let index = to_integer(interp.to_number(&arg(&args, 0))?);
    if index < 0.0 {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(
        chars
            .get(index as usize)
            .map_or(f64::NAN, |c| f64::from(u32::from(*c))),
    ))
}

fn at(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let n = to_integer(interp.to_number(&arg(&args, 0))?);
    let index = if n < 0.0 { chars.len() as f64 + n } else { n };
    if index < 0.0 {
        return Ok(Value::Undefined);
    }
    Ok(chars
        .get(index as usize)
        .map(|c| Value::Str(c.to_string()))
        .unwrap_or_default())
}

fn index_of(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let needle = string_arg(interp, &args, 0)?;
    let start = clamped_index(interp, &arg(&args, 1), chars.len(), 0)?;
    Ok(Value::Number(
        find_from(&chars, &needle, start).map_or(-1.0, |i| i as f64),
    ))
}

fn last_index_of(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let needle = string_arg(interp, &args, 0)?;
    if needle.len() > chars.len() {
        return Ok(Value::Number(-1.0));
    }
    let found = (0..=chars.len() - needle.len())
        .rev()
        .find(|&i| chars[i..].starts_with(&needle));
    Ok(Value::Number(found.map_or(-1.0, |i| i as f64)))
}

fn includes(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let needle = string_arg(interp, &args, 0)?;
    let start = clamped_index(interp, &arg(&args, 1), chars.len(), 0)?;
    Ok(Value::Bool(find_from(&chars, &needle, start).is_some()))
}

fn starts_with(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let needle = string_arg(interp, &args, 0)?;
    let start = clamped_index(interp, &arg(&args, 1), chars.len(), 0)?;
    Ok(Value::Bool(chars[start..].starts_with(&needle)))
}

fn ends_with(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let needle = string_arg(interp, &args, 0)?;
    let end = clamped_index(interp, &arg(&args, 1), chars.len(), chars.len())?;
    Ok(Value::Bool(chars[..end].ends_with(&needle)))
}

fn split(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let whole: String = chars.iter().collect();
    let parts: Vec<Value> = match arg(&args, 0) {
        Value::Undefined => vec![Value::Str(whole)],
        separator => {
            let separator = interp.to_string(&separator)?;
            if separator.is_empty() {
                chars.iter().map(|c| Value::Str(c.to_string())).collect()
            } else {
                whole.split(separator.as_str()).map(Value::str).collect()
            }
        }
    };
    let parts = match arg(&args, 1) {
        Value::Undefined => parts,
        limit => {
            let limit = to_integer(interp.to_number(&limit)?).max(0.0) as usize;
            parts.into_iter().take(limit).collect()
        }
    };
    interp.new_array(parts)
}

/// Substitutes the first (or every) occurrence of a literal pattern.
fn substitute(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>, all: bool) -> Eval<Value> {
    let chars = receiver(interp, &this)?;
    let pattern = string_arg(interp, &args, 0)?;
    let replacement = arg(&args, 1);
    let callable = interp.is_callable(&replacement);
    let mut out = String::new();
    let mut cursor = 0;
    while let Some(found) = find_from(&chars, &pattern, cursor) {
        out.extend(&chars[cursor..found]);
        let matched: String = pattern.iter().collect();
        let piece = if callable {
            let result = interp.call(
                &replacement,
                Value::Undefined,
                vec![Value::Str(matched), Value::Number(found as f64)],
            )?;
            interp.to_string(&result)?
        } else {
            interp.to_string(&replacement)?.replace("$&", &matched)
        };
        out.push_str(&piece);
        cursor = found + pattern.len();
        if pattern.is_empty() {
            if let Some(c) = chars.get(cursor) {
                out.push(*c);
            }
            cursor += 1;
        }
        if !all || cursor > chars.len() || out.len() > MAX_STRING_LENGTH {
            break;
        }
    }
    if cursor < chars.len() {
        out.extend(&chars[cursor..]);
    }
    interp.check_string(out)
}

fn replace(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    substitute(interp, this, args, false)
}

fn replace_all(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    substitute(interp, this, args, true)
}

fn concat(interp: &mut Interpreter<'_>, this: Value, args: Vec<Value>) -> Eval<Value> {
    let mut out: String = receiver(interp, &this)?.into_iter().collect();
    for value in &args {
        out.push_str(&interp.to_string(value)?);
    }
    interp.check_string(out)
}
