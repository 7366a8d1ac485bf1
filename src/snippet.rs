//! # Snippet Records and Annotation Parsing
//!
//! A snippet is one fenced example lifted out of the document, together with
//! the informal `// ...` comments that say what it prints or throws. This
//! module turns the extractor's raw blocks into immutable [`SnippetRecord`]s.
//!
//! ## Annotation forms
//! - `// ReferenceError: x is not defined`, `// Throws: TypeError`: the
//!   snippet is expected to throw an error with that description.
//! - `// Output: Hello, Bob` (also `Outputs:`, `Prints:`, `Logs:`): the text
//!   is an expected console line, taken verbatim.
//! - `console.log(x); // 42`: a literal echo (number, keyword, quoted string,
//!   bracketed structure) on a line that writes to the console.
//!
//! Anything else is prose. A comment that sits on a console line but is none
//! of the above is ambiguous and the whole snippet asserts nothing.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::errors::VerifyError;

static ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:throws?\s*:?\s*)?(?P<desc>(?:[A-Z][A-Za-z]*)?Error(?::.*)?)$")
        .expect("error annotation pattern is valid")
});

static OUTPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:outputs?|prints?|logs?)\s*:\s*(?P<text>.*)$")
        .expect("output annotation pattern is valid")
});

static CONSOLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bconsole\s*\.\s*(?:log|info|warn|error|debug)\s*\(")
        .expect("console call pattern is valid")
});

static CATCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bcatch\b").expect("catch pattern is valid"));

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[-+]?(?:\d[\d_]*(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?$")
        .expect("number literal pattern is valid")
});

static INSTANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][A-Za-z0-9_$]*\s*\{.*\}$").expect("instance rendering pattern is valid")
});

const KEYWORD_LITERALS: &[&str] = &[
    "NaN",
    "Infinity",
    "-Infinity",
    "true",
    "false",
    "null",
    "undefined",
    "object",
    "function",
    "string",
    "number",
    "boolean",
    "symbol",
    "bigint",
];

// =============================================================================
// CORE TYPES
// =============================================================================

/// Position of a snippet in its document. Unique and monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnippetId(pub usize);

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an isolation group: the unit of shared mutable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// One code block as handed over by the extraction collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSnippet {
    pub code: String,
    /// Continues the previous snippet's isolation group.
    #[serde(default)]
    pub chained: bool,
    /// Named group hint; equal labels on neighbours chain them.
    #[serde(default)]
    pub group: Option<String>,
    /// Uses randomness or timers; only checked for unexpected throws.
    #[serde(default)]
    pub nondeterministic: bool,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub line: Option<usize>,
}

impl RawSnippet {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn chained(mut self) -> Self {
        self.chained = true;
        self
    }

    pub fn nondeterministic(mut self) -> Self {
        self.nondeterministic = true;
        self
    }

    pub fn in_group(mut self, label: impl Into<String>) -> Self {
        self.group = Some(label.into());
        self
    }
}

/// One declared observable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Expected {
    /// A console line.
    Line(String),
    /// A thrown-error description, such as `ReferenceError` or
    /// `TypeError: Assignment to constant variable.`
    Error(String),
}

impl Expected {
    pub fn text(&self) -> &str {
        match self {
            Expected::Line(text) | Expected::Error(text) => text,
        }
    }
}

/// Result of scanning a snippet's comments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expectations {
    pub outputs: Vec<Expected>,
    pub expected_to_throw: bool,
}

/// An extracted example, ready to execute. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnippetRecord {
    pub id: SnippetId,
    pub source_text: String,
    pub expected_outputs: Vec<Expected>,
    pub isolation_group: GroupId,
    pub expected_to_throw: bool,
    pub nondeterministic: bool,
    pub heading: Option<String>,
    pub line: Option<usize>,
    pub fingerprint: String,
    /// Why the annotations were discarded, when they were.
    pub annotation_note: Option<String>,
}

impl SnippetRecord {
    pub fn new(id: SnippetId, isolation_group: GroupId, raw: RawSnippet) -> Self {
        let (expectations, annotation_note) = match try_parse_expectations(&raw.code) {
            Ok(expectations) => (expectations, None),
            Err(err) => {
                warn!(snippet = %id, "{err}; treating snippet as unasserted");
                (Expectations::default(), Some(err.to_string()))
            }
        };
        Self {
            id,
            fingerprint: fingerprint(&raw.code),
            source_text: raw.code,
            expected_outputs: expectations.outputs,
            isolation_group,
            expected_to_throw: expectations.expected_to_throw,
            nondeterministic: raw.nondeterministic,
            heading: raw.heading,
            line: raw.line,
            annotation_note,
        }
    }

    /// True when the snippet asserts nothing at all.
    pub fn is_unasserted(&self) -> bool {
        self.expected_outputs.is_empty() && !self.expected_to_throw
    }

    /// The description an expected throw should contain, if any.
    pub fn expected_error(&self) -> Option<&str> {
        self.expected_outputs.iter().find_map(|e| match e {
            Expected::Error(text) => Some(text.as_str()),
            Expected::Line(_) => None,
        })
    }
}

// =============================================================================
// RECORD CONSTRUCTION
// =============================================================================

/// Assigns ids and isolation groups to raw snippets in document order.
///
/// A snippet joins its predecessor's group iff it is marked `chained` or
/// carries the same group label; otherwise it starts a new group.
pub fn build_records(raw: Vec<RawSnippet>) -> Vec<SnippetRecord> {
    let mut records = Vec::with_capacity(raw.len());
    let mut group = 0usize;
    let mut previous_label: Option<String> = None;

    for (index, snippet) in raw.into_iter().enumerate() {
        let same_label = snippet.group.is_some() && snippet.group == previous_label;
        if index > 0 && !(snippet.chained || same_label) {
            group += 1;
        }
        previous_label = snippet.group.clone();
        records.push(SnippetRecord::new(SnippetId(index), GroupId(group), snippet));
    }
    records
}

/// Short content hash identifying a snippet's source across runs.
pub fn fingerprint(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

// =============================================================================
// ANNOTATION PARSING
// =============================================================================

/// Parses a snippet's annotation comments.
///
/// Ambiguous annotations yield empty expectations; they are never guessed.
pub fn parse_expectations(source_text: &str) -> Expectations {
    try_parse_expectations(source_text).unwrap_or_default()
}

/// Parses annotation comments, reporting the first ambiguity as an error.
pub fn try_parse_expectations(source_text: &str) -> Result<Expectations, VerifyError> {
    let mut expectations = Expectations::default();
    let mut catches = CatchTracker::default();

    for (index, line) in source_text.lines().enumerate() {
        let line_number = index + 1;
        let (code, comment) = match split_line_comment(line) {
            Some((code, comment)) => (code, Some(comment)),
            None => (line, None),
        };

        let in_catch = catches.advance(code);

        let Some(comment) = comment else { continue };
        let text = strip_markers(comment);
        if text.is_empty() {
            continue;
        }
        let ambiguous = || VerifyError::AnnotationParseAmbiguous {
            line: line_number,
            comment: text.to_string(),
        };

        let on_console_line = CONSOLE_RE.is_match(code);
        let expected = classify(text, on_console_line, in_catch).ok_or_else(ambiguous)?;
        let Some(expected) = expected else { continue };

        match &expected {
            Expected::Error(_) if expectations.expected_to_throw => return Err(ambiguous()),
            Expected::Error(_) => expectations.expected_to_throw = true,
            Expected::Line(_) if expectations.expected_to_throw => return Err(ambiguous()),
            Expected::Line(_) => {}
        }
        expectations.outputs.push(expected);
    }
    Ok(expectations)
}

/// `None` means ambiguous; `Some(None)` means prose.
fn classify(text: &str, on_console_line: bool, in_catch: bool) -> Option<Option<Expected>> {
    if let Some(caps) = OUTPUT_RE.captures(text) {
        let body = caps["text"].trim();
        if body.is_empty() {
            return None;
        }
        return Some(Some(Expected::Line(body.to_string())));
    }
    if let Some(caps) = ERROR_RE.captures(text) {
        let desc = caps["desc"].trim().to_string();
        if in_catch {
            return Some(on_console_line.then_some(Expected::Line(desc)));
        }
        return Some(Some(Expected::Error(desc)));
    }
    if !on_console_line {
        return Some(None);
    }
    literal_echo(text).map(|line| Some(Expected::Line(line)))
}

fn literal_echo(text: &str) -> Option<String> {
    if is_scalar_literal(text) {
        return Some(text.to_string());
    }
    if let Some(inner) = unquote(text) {
        return Some(inner.to_string());
    }
    let structured = (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('{') && text.ends_with('}'))
        || INSTANCE_RE.is_match(text);
    if structured {
        return Some(text.to_string());
    }
    let mut tokens = text.split_whitespace().peekable();
    if tokens.peek().is_some() && tokens.all(is_scalar_literal) {
        return Some(text.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    None
}

fn is_scalar_literal(token: &str) -> bool {
    NUMBER_RE.is_match(token) || KEYWORD_LITERALS.contains(&token)
}

fn unquote(text: &str) -> Option<&str> {
    let first = text.chars().next()?;
    if !matches!(first, '"' | '\'' | '`') || text.len() < 2 || !text.ends_with(first) {
        return None;
    }
    Some(&text[1..text.len() - 1])
}

fn strip_markers(comment: &str) -> &str {
    let mut text = comment.trim();
    for marker in ["=>", "->", "→", "⇒"] {
        if let Some(rest) = text.strip_prefix(marker) {
            text = rest.trim_start();
            break;
        }
    }
    text
}

/// Splits `code // comment` at the first `//` outside a string literal.
fn split_line_comment(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => {
                i += 2;
                continue;
            }
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if matches!(b, b'"' | b'\'' | b'`') => quote = Some(b),
            None if b == b'/' && bytes.get(i + 1) == Some(&b'/') => {
                return Some((&line[..i], &line[i + 2..]));
            }
            None => {}
        }
        i += 1;
    }
    None
}

/// Follows brace depth across lines to tell which lines sit in a `catch`.
#[derive(Debug, Default)]
struct CatchTracker {
    depth: i32,
    /// Depth at which each enclosing `catch` keyword stood, innermost last.
    open: Vec<i32>,
}

impl CatchTracker {
    /// Walks one line of code. True when any of it lies inside a catch
    /// clause, including a clause that opens and closes on this line.
    fn advance(&mut self, code: &str) -> bool {
        let mut touched = !self.open.is_empty();
        let keywords: Vec<usize> = CATCH_RE.find_iter(code).map(|m| m.start()).collect();
        for (index, c) in code.char_indices() {
            if keywords.contains(&index) {
                self.open.push(self.depth);
                touched = true;
            }
            match c {
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    while self.open.last().map_or(false, |&open| self.depth <= open) {
                        self.open.pop();
                    }
                }
                _ => {}
            }
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(outputs: &[Expected]) -> Vec<&str> {
        outputs.iter().map(Expected::text).collect()
    }

    #[test]
    fn literal_echoes_on_console_lines() {
        let src = "let a = 1;\nconsole.log(a); // 1\nconsole.log('hi'); // \"hi\"\nconsole.log([1, 2]); // [1, 2]";
        let parsed = parse_expectations(src);
        assert_eq!(lines(&parsed.outputs), vec!["1", "hi", "[1, 2]"]);
        assert!(!parsed.expected_to_throw);
    }

    #[test]
    fn explicit_output_prefix_is_verbatim() {
        let parsed = parse_expectations("greet('Bob');\n// Output: Hello, Bob");
        assert_eq!(parsed.outputs, vec![Expected::Line("Hello, Bob".into())]);
    }

    #[test]
    fn error_echo_sets_expected_to_throw() {
        let parsed = parse_expectations("console.log(x); // ReferenceError: x is not defined\nlet x = 1;");
        assert!(parsed.expected_to_throw);
        assert_eq!(
            parsed.outputs,
            vec![Expected::Error("ReferenceError: x is not defined".into())]
        );
    }

    #[test]
    fn prose_comments_are_ignored() {
        let parsed = parse_expectations("// declare a counter\nlet count = 0; // starts at zero");
        assert!(parsed.outputs.is_empty());
        assert!(!parsed.expected_to_throw);
    }

    #[test]
    fn unrecognized_console_comment_is_ambiguous() {
        let src = "console.log(1); // 1\nconsole.log(greet()); // says hello nicely";
        assert!(matches!(
            try_parse_expectations(src),
            Err(VerifyError::AnnotationParseAmbiguous { line: 2, .. })
        ));
        assert_eq!(parse_expectations(src), Expectations::default());
    }

    #[test]
    fn output_after_throw_point_is_ambiguous() {
        let src = "null.x; // TypeError\nconsole.log(1); // 1";
        assert!(try_parse_expectations(src).is_err());
    }

    #[test]
    fn error_names_inside_catch_are_console_lines() {
        let src = "try {\n  undefinedFn();\n} catch (e) {\n  console.log(e.name); // ReferenceError\n}";
        let parsed = parse_expectations(src);
        assert!(!parsed.expected_to_throw);
        assert_eq!(parsed.outputs, vec![Expected::Line("ReferenceError".into())]);
    }

    #[test]
    fn one_line_catch_closes_on_the_same_line() {
        let src = "try { missing(); } catch (e) { console.log(e.name); } // ReferenceError\nnull.x; // TypeError";
        let parsed = try_parse_expectations(src).unwrap();
        assert!(parsed.expected_to_throw);
        assert_eq!(
            parsed.outputs,
            vec![
                Expected::Line("ReferenceError".into()),
                Expected::Error("TypeError".into()),
            ]
        );
    }

    #[test]
    fn nested_catch_returns_to_the_outer_clause() {
        let src = "try {\n  a();\n} catch (e) {\n  try { b(); } catch (f) {}\n  console.log(e.name); // ReferenceError\n}\nc(); // TypeError";
        let parsed = try_parse_expectations(src).unwrap();
        assert_eq!(
            parsed.outputs,
            vec![
                Expected::Line("ReferenceError".into()),
                Expected::Error("TypeError".into()),
            ]
        );
    }

    #[test]
    fn comment_markers_inside_strings_are_not_comments() {
        let parsed = parse_expectations("console.log('http://x'); // 'http://x'");
        assert_eq!(lines(&parsed.outputs), vec!["http://x"]);
    }

    #[test]
    fn arrow_markers_are_stripped() {
        let parsed = parse_expectations("console.log(2 + 2); // → 4");
        assert_eq!(lines(&parsed.outputs), vec!["4"]);
    }

    #[test]
    fn chained_snippets_share_a_group() {
        let records = build_records(vec![
            RawSnippet::new("let count = 0;"),
            RawSnippet::new("count++;").chained(),
            RawSnippet::new("let other = 1;"),
            RawSnippet::new("a").in_group("closures"),
            RawSnippet::new("b").in_group("closures"),
        ]);
        let groups: Vec<usize> = records.iter().map(|r| r.isolation_group.0).collect();
        assert_eq!(groups, vec![0, 0, 1, 2, 2]);
        let ids: Vec<usize> = records.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn first_snippet_never_chains() {
        let records = build_records(vec![RawSnippet::new("x").chained()]);
        assert_eq!(records[0].isolation_group, GroupId(0));
    }

    #[test]
    fn ambiguity_is_noted_on_the_record() {
        let records = build_records(vec![RawSnippet::new("console.log(f()); // prints stuff")]);
        assert!(records[0].is_unasserted());
        assert!(records[0].annotation_note.is_some());
    }

    #[test]
    fn fingerprint_is_stable() {
        assert_eq!(fingerprint("let a = 1;"), fingerprint("let a = 1;"));
        assert_ne!(fingerprint("let a = 1;"), fingerprint("let a = 2;"));
        assert_eq!(fingerprint("").len(), 12);
    }
}
