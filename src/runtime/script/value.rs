//! Script values.
//!
//! Primitives are stored inline; everything else is an [`ObjectId`] handle
//! into the context's heap.

use super::heap::ObjectId;

/// A value in the scripting subset.
///
/// # Examples
///
/// ```rust
/// use snipcheck::runtime::script::value::Value;
/// assert_eq!(Value::Number(3.0).type_name(), "number");
/// assert!(Value::default().is_nullish());
/// assert!(!Value::Str(String::new()).truthy());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(ObjectId),
}

impl Value {
    /// The `typeof` of a primitive. Objects answer `"object"`; callers that
    /// can see the heap refine that to `"function"`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    /// String conversion of a primitive. `None` for objects, whose
    /// conversion may run script code.
    pub fn primitive_to_string(&self) -> Option<String> {
        Some(match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Object(_) => return None,
        })
    }

    /// Numeric conversion of a primitive. `None` for objects.
    pub fn primitive_to_number(&self) -> Option<f64> {
        Some(match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Object(_) => return None,
        })
    }
}

/// `===` on two values. Objects compare by identity.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => a == b,
    }
}

/// Formats a number the way the console and string conversion do.
///
/// # Examples
///
/// ```rust
/// use snipcheck::runtime::script::value::number_to_string;
/// assert_eq!(number_to_string(42.0), "42");
/// assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
/// assert_eq!(number_to_string(1e21), "1e+21");
/// assert_eq!(number_to_string(f64::NAN), "NaN");
/// ```
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        };
    }
    if n.fract() == 0.0 {
        return format!("{:.0}", n);
    }
    format!("{}", n)
}

/// String-to-number conversion: surrounding whitespace is ignored, the
/// empty string is zero, and anything unparseable is `NaN`.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return i64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) =>
        {
            trimmed.parse::<f64>().unwrap_or(f64::NAN)
        }
        _ => f64::NAN,
    }
}

/// Integer conversion used by indices and bit-free integer arguments.
pub fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Parses `key` as an array index, accepting only its canonical spelling.
pub fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_have_no_fraction() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-12.0), "-12");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
    }

    #[test]
    fn small_and_huge_numbers_use_exponents() {
        assert_eq!(number_to_string(1e-7), "1e-7");
        assert_eq!(number_to_string(1.5e300), "1.5e+300");
        assert_eq!(number_to_string(0.000001), "0.000001");
    }

    #[test]
    fn string_conversion_follows_numeric_rules() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn nan_is_never_strictly_equal() {
        let nan = Value::Number(f64::NAN);
        assert!(!strict_equals(&nan, &nan));
        assert!(strict_equals(&Value::Number(0.0), &Value::Number(-0.0)));
    }

    #[test]
    fn only_canonical_indices_are_indices() {
        assert_eq!(array_index("3"), Some(3));
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("03"), None);
        assert_eq!(array_index("-1"), None);
        assert_eq!(array_index("length"), None);
    }
}
