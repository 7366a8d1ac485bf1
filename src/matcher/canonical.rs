//! Canonical stringification of structured renderings.
//!
//! Authors write `[1, 2, 3]`, the console prints `[ 1, 2, 3 ]`; authors
//! write `{ "a": 1, }`, the console prints `{ a: 1 }`. Both sides of a
//! comparison go through [`canonicalize`] so that only structural
//! differences remain.

use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is valid"));

/// `Point { x: 1 }`, `Map(2) {...}`-style renderings prefixed by a name.
static PREFIXED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*(?:\(\d+\))?\s*[\[{]").expect("prefixed pattern is valid")
});

/// Normalizes one expected or captured line for comparison.
///
/// Every line is trimmed. Lines that look like structured values are
/// canonicalized; if that fails they fall back to whitespace-collapsed text.
///
/// # Examples
///
/// ```rust
/// use snipcheck::matcher::canonical::canonicalize;
/// assert_eq!(canonicalize("[1, 2, 3]"), canonicalize("[ 1, 2, 3 ]"));
/// assert_eq!(canonicalize("{ \"a\": 1, }"), canonicalize("{ a: 1 }"));
/// assert_ne!(canonicalize("[1, 2]"), canonicalize("[2, 1]"));
/// ```
pub fn canonicalize(line: &str) -> String {
    let trimmed = line.trim();
    if !looks_structured(trimmed) {
        return trimmed.to_string();
    }
    canonical_structure(trimmed).unwrap_or_else(|| collapse_whitespace(trimmed))
}

pub fn looks_structured(text: &str) -> bool {
    text.starts_with('[') || text.starts_with('{') || PREFIXED_RE.is_match(text)
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

enum Token {
    Str(String),
    Punct(char),
    Word(String),
}

/// `None` when the text is not a well-formed rendering.
fn canonical_structure(text: &str) -> Option<String> {
    let tokens = tokenize(text)?;
    let mut out = String::with_capacity(text.len());
    let mut depth: Vec<char> = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let next = tokens.get(index + 1);
        match token {
            Token::Punct(',') => {
                if matches!(next, Some(Token::Punct(']' | '}')) | None) {
                    continue;
                }
                out.push(',');
            }
            Token::Punct(open @ ('[' | '{')) => {
                depth.push(*open);
                out.push(*open);
            }
            Token::Punct(close @ (']' | '}')) => {
                let expected = if *close == ']' { '[' } else { '{' };
                if depth.pop() != Some(expected) {
                    return None;
                }
                out.push(*close);
            }
            Token::Punct(c) => out.push(*c),
            Token::Str(content) => {
                let is_key = matches!(next, Some(Token::Punct(':')));
                if is_key && IDENTIFIER_RE.is_match(content) {
                    out.push_str(content);
                } else {
                    out.push('"');
                    for c in content.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                }
            }
            Token::Word(word) => {
                if matches!(out.chars().last(), Some(c) if c.is_alphanumeric() || c == '_' || c == '$') {
                    out.push(' ');
                }
                out.push_str(word);
            }
        }
    }
    depth.is_empty().then_some(out)
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '\'' | '"' | '`' => tokens.push(Token::Str(read_string(c, &mut chars)?)),
            '[' | ']' | '{' | '}' | ',' | ':' | '(' | ')' => tokens.push(Token::Punct(c)),
            _ => {
                let mut word = String::new();
                word.push(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || "[]{},:()'\"`".contains(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Some(tokens)
}

/// Reads a quoted string's content, the opening quote already consumed.
fn read_string(quote: char, chars: &mut impl Iterator<Item = char>) -> Option<String> {
    let mut content = String::new();
    loop {
        match chars.next()? {
            '\\' => content.push(match chars.next()? {
                'n' => '\n',
                't' => '\t',
                other => other,
            }),
            c if c == quote => return Some(content),
            c => content.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_spacing_is_insignificant() {
        assert_eq!(canonicalize("[1, 2, 3]"), "[1,2,3]");
        assert_eq!(canonicalize("  [ 1, 2, 3 ]  "), "[1,2,3]");
    }

    #[test]
    fn trailing_commas_are_dropped() {
        assert_eq!(canonicalize("[1, 2,]"), canonicalize("[1, 2]"));
        assert_eq!(canonicalize("{ a: 1, }"), canonicalize("{ a: 1 }"));
    }

    #[test]
    fn quote_styles_and_identifier_keys_unify() {
        assert_eq!(
            canonicalize(r#"{"name": "Ada", "age": 36}"#),
            canonicalize("{ name: 'Ada', age: 36 }")
        );
        assert_eq!(canonicalize("{ 'two words': 1 }"), r#"{"two words":1}"#);
    }

    #[test]
    fn string_contents_keep_their_spaces() {
        assert_ne!(canonicalize("['a b']"), canonicalize("['ab']"));
    }

    #[test]
    fn instance_prefixes_are_structured() {
        assert_eq!(
            canonicalize("Dog {name: 'Rex'}"),
            canonicalize("Dog { name: 'Rex' }")
        );
    }

    #[test]
    fn malformed_structures_fall_back_to_collapsed_text() {
        assert_eq!(canonicalize("[1,   2"), "[1, 2");
        assert_eq!(canonicalize("{ a: 'open }"), "{ a: 'open }");
    }

    #[test]
    fn plain_lines_are_only_trimmed() {
        assert_eq!(canonicalize("  Hello,   world  "), "Hello,   world");
    }
}
