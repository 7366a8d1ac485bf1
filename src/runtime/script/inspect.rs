//! Console rendering of values.
//!
//! Mirrors the single-line shape of the usual console inspector:
//! `[ 1, 2, 3 ]`, `{ a: 1, b: 'x' }`, `Point { x: 1 }`, `[Function: f]`.
//! Nesting deeper than two levels collapses to `[Object]` / `[Array]`.

use once_cell::sync::Lazy;
use regex::Regex;

use super::heap::{Accessor, Callable, Heap, ObjectId, ObjectKind};
use super::value::{number_to_string, Value};

const MAX_DEPTH: usize = 2;
const MAX_ARRAY_ITEMS: usize = 100;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"));

/// Renders `value` the way the console shows a non-string argument.
///
/// Strings are quoted; `console.log` prints top-level strings raw itself.
pub fn inspect(heap: &Heap, value: &Value) -> String {
    let mut printer = Printer {
        heap,
        path: Vec::new(),
        circular: false,
    };
    let text = printer.value(value, 0);
    if printer.circular {
        format!("<ref *1> {}", text)
    } else {
        text
    }
}

/// Quotes a string with the quote character least likely to need escapes.
pub fn quote(text: &str) -> String {
    let quote = if !text.contains('\'') {
        '\''
    } else if !text.contains('"') {
        '"'
    } else {
        '`'
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

struct Printer<'h> {
    heap: &'h Heap,
    path: Vec<ObjectId>,
    circular: bool,
}

impl Printer<'_> {
    fn value(&mut self, value: &Value, depth: usize) -> String {
        match value {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => "-0".to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => quote(s),
            Value::Object(id) => self.object(*id, depth),
        }
    }

    fn object(&mut self, id: ObjectId, depth: usize) -> String {
        if self.path.contains(&id) {
            self.circular = true;
            return "[Circular *1]".to_string();
        }
        let heap = self.heap;
        let object = heap.get(id);
        match &object.kind {
            ObjectKind::Function(callable) => self.function(id, callable),
            ObjectKind::Error => {
                let text = self.error(id);
                if depth == 0 {
                    text
                } else {
                    format!("[{}]", text)
                }
            }
            ObjectKind::Array(items) => {
                if depth > MAX_DEPTH {
                    return "[Array]".to_string();
                }
                if items.is_empty() {
                    return "[]".to_string();
                }
                self.path.push(id);
                let mut parts: Vec<String> = items
                    .iter()
                    .take(MAX_ARRAY_ITEMS)
                    .map(|item| self.value(item, depth + 1))
                    .collect();
                self.path.pop();
                if items.len() > MAX_ARRAY_ITEMS {
                    let rest = items.len() - MAX_ARRAY_ITEMS;
                    parts.push(format!(
                        "... {} more item{}",
                        rest,
                        if rest == 1 { "" } else { "s" }
                    ));
                }
                format!("[ {} ]", parts.join(", "))
            }
            ObjectKind::Ordinary => {
                let prefix = self.class_prefix(id);
                if depth > MAX_DEPTH {
                    return match prefix {
                        Some(name) => format!("[{}]", name),
                        None => "[Object]".to_string(),
                    };
                }
                let entries: Vec<(String, Value, Option<&'static str>)> = object
                    .properties
                    .iter()
                    .filter(|p| p.enumerable)
                    .map(|p| {
                        let accessor = p.accessor.as_ref().map(Accessor::label);
                        (p.key.clone(), p.value.clone(), accessor)
                    })
                    .collect();
                let lead = prefix.map(|name| format!("{} ", name)).unwrap_or_default();
                if entries.is_empty() {
                    return format!("{}{{}}", lead);
                }
                self.path.push(id);
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(key, value, accessor)| match accessor {
                        Some(label) => format!("{}: {}", format_key(key), label),
                        None => format!("{}: {}", format_key(key), self.value(value, depth + 1)),
                    })
                    .collect();
                self.path.pop();
                format!("{}{{ {} }}", lead, parts.join(", "))
            }
        }
    }

    fn function(&self, id: ObjectId, callable: &Callable) -> String {
        let name = self
            .heap
            .get(id)
            .own("name")
            .and_then(Value::primitive_to_string)
            .unwrap_or_default();
        if let Callable::Script {
            class: Some(_),
            parent,
            ..
        } = callable
        {
            let name = if name.is_empty() {
                "(anonymous)".to_string()
            } else {
                name
            };
            let parent = parent
                .as_ref()
                .and_then(Value::as_object)
                .and_then(|p| self.heap.get(p).own("name"))
                .and_then(Value::primitive_to_string);
            return match parent {
                Some(parent) => format!("[class {} extends {}]", name, parent),
                None => format!("[class {}]", name),
            };
        }
        if name.is_empty() {
            "[Function (anonymous)]".to_string()
        } else {
            format!("[Function: {}]", name)
        }
    }

    fn error(&self, id: ObjectId) -> String {
        let text = |key: &str| {
            self.heap
                .lookup(id, key)
                .and_then(Value::primitive_to_string)
                .unwrap_or_default()
        };
        let name = text("name");
        let message = text("message");
        if message.is_empty() {
            name
        } else {
            format!("{}: {}", name, message)
        }
    }

    /// The constructor name shown before an instance, if it is not `Object`.
    fn class_prefix(&self, id: ObjectId) -> Option<String> {
        let Some(proto) = self.heap.get(id).proto else {
            return Some("[Object: null prototype]".to_string());
        };
        let constructor = self.heap.lookup(proto, "constructor")?.as_object()?;
        let name = self
            .heap
            .get(constructor)
            .own("name")
            .and_then(Value::primitive_to_string)?;
        if name.is_empty() || name == "Object" {
            None
        } else {
            Some(name)
        }
    }
}

fn format_key(key: &str) -> String {
    if IDENTIFIER_RE.is_match(key) {
        key.to_string()
    } else {
        quote(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::script::heap::Object;

    fn array(heap: &mut Heap, items: Vec<Value>) -> Value {
        Value::Object(heap.alloc(Object::new(ObjectKind::Array(items), None)).unwrap())
    }

    #[test]
    fn primitives_render_like_the_console() {
        let heap = Heap::default();
        assert_eq!(inspect(&heap, &Value::Number(-0.0)), "-0");
        assert_eq!(inspect(&heap, &Value::str("hi")), "'hi'");
        assert_eq!(inspect(&heap, &Value::str("it's")), "\"it's\"");
        assert_eq!(inspect(&heap, &Value::Undefined), "undefined");
    }

    #[test]
    fn arrays_are_padded_inside_brackets() {
        let mut heap = Heap::default();
        let empty = array(&mut heap, vec![]);
        let numbers = array(
            &mut heap,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)],
        );
        assert_eq!(inspect(&heap, &empty), "[]");
        assert_eq!(inspect(&heap, &numbers), "[ 1, 2, 3 ]");
    }

    #[test]
    fn object_keys_are_quoted_only_when_needed() {
        let mut heap = Heap::default();
        let mut object = Object::new(ObjectKind::Ordinary, None);
        object.define("name", Value::str("Ada"), true);
        object.define("two words", Value::Bool(true), true);
        object.define("hidden", Value::Null, false);
        let id = heap.alloc(object).unwrap();
        assert_eq!(
            inspect(&heap, &Value::Object(id)),
            "[Object: null prototype] { name: 'Ada', 'two words': true }"
        );
    }

    #[test]
    fn deep_nesting_collapses() {
        let mut heap = Heap::default();
        let innermost = array(&mut heap, vec![Value::Number(4.0)]);
        let third = array(&mut heap, vec![innermost]);
        let second = array(&mut heap, vec![third]);
        let first = array(&mut heap, vec![second]);
        assert_eq!(inspect(&heap, &first), "[ [ [ [Array] ] ] ]");
    }

    #[test]
    fn cycles_are_marked() {
        let mut heap = Heap::default();
        let id = heap.alloc(Object::new(ObjectKind::Array(vec![]), None)).unwrap();
        if let ObjectKind::Array(items) = &mut heap.get_mut(id).kind {
            items.push(Value::Object(id));
        }
        assert_eq!(inspect(&heap, &Value::Object(id)), "<ref *1> [ [Circular *1] ]");
    }
}
