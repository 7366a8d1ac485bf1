//! Command-line behaviour of the `snipcheck` binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::tempdir;

const PASSING: &str = r#"
- code: "let count = 0;"
  heading: Counters
- code: "count++;\nconsole.log(count); // 1"
  chained: true
- code: "console.log([1, 2, 3]); // [1, 2, 3]"
"#;

const FAILING: &str = r#"
- code: "console.log(2 + 2); // 5"
  heading: Arithmetic
  line: 12
"#;

fn snipcheck() -> Command {
    let mut cmd = Command::cargo_bin("snipcheck").unwrap();
    cmd.env_remove("RUST_LOG").arg("--no-color");
    cmd
}

#[test]
fn verify_passes_a_clean_document() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("guide.yaml");
    fs::write(&doc, PASSING).unwrap();

    snipcheck()
        .arg("verify")
        .arg(&doc)
        .assert()
        .success()
        .stdout(contains("Summary: total 3, passed 2, failed 0, skipped 1, timed out 0"));
}

#[test]
fn verify_reports_mismatches_and_fails() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("broken.yaml");
    fs::write(&doc, FAILING).unwrap();

    snipcheck()
        .arg("verify")
        .arg(&doc)
        .assert()
        .code(1)
        .stdout(
            contains("FAIL: snippet #0 [Arithmetic, line 12]")
                .and(contains("- expected: 5"))
                .and(contains("+ actual:   4")),
        );
}

#[test]
fn verify_walks_directories_and_emits_json() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.yaml"), PASSING).unwrap();
    fs::write(
        dir.path().join("b.json"),
        r#"[{"code": "console.log('hi'); // 'hi'"}]"#,
    )
    .unwrap();

    let output = snipcheck()
        .arg("verify")
        .arg(dir.path())
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let reports: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 2);
    assert_eq!(reports[0]["summary"]["pass"], 2);
    assert_eq!(reports[1]["entries"][0]["status"], "pass");
}

#[test]
fn timeouts_respect_the_flag() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("slow.yaml");
    fs::write(&doc, "- code: \"for (;;) {}\\n// Output: never\"\n").unwrap();

    snipcheck()
        .args(["verify", "--timeout-ms", "50"])
        .arg(&doc)
        .assert()
        .code(1)
        .stdout(contains("TIME: snippet #0"));
}

#[test]
fn annotations_lists_parsed_expectations() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("guide.yaml");
    fs::write(&doc, PASSING).unwrap();

    snipcheck()
        .arg("annotations")
        .arg(&doc)
        .assert()
        .success()
        .stdout(
            contains("#0 g0 [Counters] no assertion")
                .and(contains("#1 g0"))
                .and(contains("Line(\"1\")"))
                .and(contains("#2 g1")),
        );
}

#[test]
fn run_streams_console_output() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("hello.js");
    fs::write(&script, "const who = 'world';\nconsole.log(`hello ${who}`);").unwrap();

    snipcheck()
        .arg("run")
        .arg(&script)
        .assert()
        .success()
        .stdout(contains("hello world"));
}

#[test]
fn run_reports_uncaught_errors() {
    let dir = tempdir().unwrap();
    let script = dir.path().join("oops.js");
    fs::write(&script, "console.log('before');\nnotAFunction();").unwrap();

    snipcheck()
        .arg("run")
        .arg(&script)
        .assert()
        .code(1)
        .stdout(contains("before"))
        .stderr(contains("Uncaught ReferenceError: notAFunction is not defined"));
}

#[test]
fn malformed_documents_are_diagnostics() {
    let dir = tempdir().unwrap();
    let doc = dir.path().join("bad.yaml");
    fs::write(&doc, "- code: [unclosed\n").unwrap();

    snipcheck()
        .arg("verify")
        .arg(&doc)
        .assert()
        .code(2)
        .stderr(contains("snipcheck::decode"));
}

#[test]
fn missing_paths_are_io_errors() {
    snipcheck()
        .args(["verify", "/no/such/document.yaml"])
        .assert()
        .code(2)
        .stderr(contains("snipcheck::io"));
}
