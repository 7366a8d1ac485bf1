//! Annotation parsing over realistic teaching-document snippets.

use snipcheck::snippet::{build_records, parse_expectations, Expected, RawSnippet};

fn texts(code: &str) -> Vec<String> {
    parse_expectations(code)
        .outputs
        .iter()
        .map(|expected| expected.text().to_string())
        .collect()
}

#[test]
fn hoisting_example() {
    let code = r#"
console.log(hoisted); // undefined
var hoisted = 'now defined';
console.log(hoisted); // 'now defined'
"#;
    assert_eq!(texts(code), vec!["undefined", "now defined"]);
}

#[test]
fn output_prefixes_are_case_insensitive() {
    let code = "greet('Ann');\n// output: Hello, Ann\nwave();\n// PRINTS: *waves*\n// Logs: done";
    assert_eq!(texts(code), vec!["Hello, Ann", "*waves*", "done"]);
}

#[test]
fn multi_value_console_lines() {
    assert_eq!(texts("console.log(1, 2, 3); // 1 2 3"), vec!["1 2 3"]);
    assert_eq!(
        texts("console.log(typeof 1, typeof 'a'); // number string"),
        vec!["number string"]
    );
}

#[test]
fn instance_renderings_are_literal_echoes() {
    let code = "const p = new Point(1, 2);\nconsole.log(p); // Point { x: 1, y: 2 }";
    assert_eq!(texts(code), vec!["Point { x: 1, y: 2 }"]);
}

#[test]
fn bare_error_and_throws_prefix() {
    let parsed = parse_expectations("throw new Error('nope'); // Error: nope");
    assert!(parsed.expected_to_throw);
    assert_eq!(parsed.outputs, vec![Expected::Error("Error: nope".into())]);

    let parsed = parse_expectations("undefined.prop;\n// Throws: TypeError");
    assert!(parsed.expected_to_throw);
    assert_eq!(parsed.outputs, vec![Expected::Error("TypeError".into())]);
}

#[test]
fn lines_before_a_throw_are_kept() {
    let code = "console.log('start'); // 'start'\nmissing(); // ReferenceError: missing is not defined";
    let parsed = parse_expectations(code);
    assert!(parsed.expected_to_throw);
    assert_eq!(
        parsed.outputs,
        vec![
            Expected::Line("start".into()),
            Expected::Error("ReferenceError: missing is not defined".into()),
        ]
    );
}

#[test]
fn empty_explicit_output_is_ambiguous() {
    let records = build_records(vec![RawSnippet::new("run();\n// Output:")]);
    assert!(records[0].is_unasserted());
    assert!(records[0]
        .annotation_note
        .as_deref()
        .unwrap()
        .contains("ambiguous annotation on line 2"));
}

#[test]
fn parsing_is_deterministic() {
    let code = "console.log([1, 2]); // [1, 2]\n// Output: tail";
    assert_eq!(parse_expectations(code), parse_expectations(code));
}
