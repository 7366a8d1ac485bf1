//! End-to-end verification of small documents through the orchestrator.

use snipcheck::config::VerifyConfig;
use snipcheck::errors::VerifyError;
use snipcheck::executor::ExecutionResult;
use snipcheck::matcher::{match_result, SkipReason, Status};
use snipcheck::runtime::script::ScriptRuntime;
use snipcheck::runtime::{Budget, Completion, OutputSink, Runtime};
use snipcheck::snippet::{build_records, Expected, GroupId, RawSnippet};
use snipcheck::{VerificationReport, Verifier};

fn config(jobs: usize) -> VerifyConfig {
    VerifyConfig {
        timeout_ms: 150,
        watchdog_grace_ms: Some(2000),
        jobs,
        step_check_interval: 16,
        ..VerifyConfig::default()
    }
}

fn verify(raw: Vec<RawSnippet>) -> VerificationReport {
    Verifier::new(ScriptRuntime::new(16), &config(1)).verify_snippets(raw)
}

fn statuses(report: &VerificationReport) -> Vec<Status> {
    report.entries.iter().map(|entry| entry.status).collect()
}

// ============================================================================
// DOCUMENT SCENARIOS
// ============================================================================

#[test]
fn chained_counter_passes() {
    let report = verify(vec![
        RawSnippet::new("let count = 0;"),
        RawSnippet::new("count++;\nconsole.log(count); // 1").chained(),
    ]);
    assert_eq!(
        statuses(&report),
        vec![Status::Skipped(SkipReason::NoAssertion), Status::Pass]
    );
    assert!(report.is_success());
}

#[test]
fn expected_reference_error_passes_on_substring() {
    let report = verify(vec![RawSnippet::new(
        "console.log(x); // ReferenceError: x is not defined",
    )]);
    assert_eq!(statuses(&report), vec![Status::Pass]);
}

#[test]
fn expected_error_name_alone_is_enough() {
    let report = verify(vec![RawSnippet::new(
        "const frozen = 1;\nfrozen = 2; // Throws: TypeError",
    )]);
    assert_eq!(statuses(&report), vec![Status::Pass]);
}

#[test]
fn array_spacing_is_insignificant() {
    let report = verify(vec![RawSnippet::new("console.log([1, 2, 3]); // [1, 2, 3]")]);
    assert_eq!(statuses(&report), vec![Status::Pass]);
}

#[test]
fn object_quoting_is_insignificant() {
    let report = verify(vec![RawSnippet::new(
        "const user = { name: 'Ada', langs: ['en'] };\nconsole.log(user); // { \"name\": \"Ada\", \"langs\": [\"en\"] }",
    )]);
    assert_eq!(statuses(&report), vec![Status::Pass]);
}

#[test]
fn wrong_output_fails_with_a_diff() {
    let report = verify(vec![RawSnippet::new("console.log(2 + 2); // 5")]);
    let entry = &report.entries[0];
    assert_eq!(entry.status, Status::Fail);
    let mismatch = entry.mismatch.as_ref().unwrap();
    assert_eq!(mismatch.index, 0);
    assert_eq!(mismatch.expected.as_deref(), Some("5"));
    assert_eq!(mismatch.actual.as_deref(), Some("4"));
    assert!(!report.is_success());
}

#[test]
fn unexpected_throws_fail() {
    let report = verify(vec![RawSnippet::new(
        "console.log(1); // 1\nundefinedFunction();",
    )]);
    let entry = &report.entries[0];
    assert_eq!(entry.status, Status::Fail);
    assert!(entry.diff.as_deref().unwrap().contains("ReferenceError"));
}

#[test]
fn unasserted_snippets_are_always_skipped() {
    let report = verify(vec![
        RawSnippet::new("const quiet = 1;"),
        RawSnippet::new("console.log('chatty');"),
        RawSnippet::new("null.boom;"),
    ]);
    assert!(report
        .entries
        .iter()
        .all(|entry| entry.status == Status::Skipped(SkipReason::NoAssertion)));
    assert_eq!(report.summary.skipped, 3);
    assert!(report.is_success());
}

#[test]
fn ambiguous_annotations_skip_with_a_note() {
    let report = verify(vec![RawSnippet::new(
        "console.log(greet('Bob')); // greets Bob politely",
    )]);
    let entry = &report.entries[0];
    assert_eq!(entry.status, Status::Skipped(SkipReason::NoAssertion));
    assert!(entry.diff.as_deref().unwrap().contains("ambiguous annotation"));
}

#[test]
fn nondeterministic_snippets_only_need_to_not_throw() {
    let report = verify(vec![
        RawSnippet::new("console.log(Math.random()); // 0.5").nondeterministic(),
        RawSnippet::new("console.log(Math.random()); // 0.5\nnope();").nondeterministic(),
    ]);
    assert_eq!(statuses(&report), vec![Status::Pass, Status::Fail]);
}

// ============================================================================
// SCRIPT SYNTAX
// ============================================================================

#[test]
fn return_before_a_line_break_returns_undefined() {
    let report = verify(vec![RawSnippet::new(
        "function f() {\n  return\n  { a: 1 };\n}\nconsole.log(f()); // undefined",
    )]);
    assert_eq!(statuses(&report), vec![Status::Pass]);
}

#[test]
fn statements_sharing_a_line_need_a_semicolon() {
    let report = verify(vec![
        RawSnippet::new("let a = 1 2 // SyntaxError"),
        RawSnippet::new("console.log(1) console.log(2) // SyntaxError"),
        RawSnippet::new("const x = 1\nconst y = 2\nconsole.log(x + y) // 3"),
    ]);
    assert_eq!(
        statuses(&report),
        vec![Status::Pass, Status::Pass, Status::Pass]
    );
}

#[test]
fn class_accessors_run_on_read_and_write() {
    let report = verify(vec![
        RawSnippet::new("class P { get x() { return 7; } }\nconsole.log(new P().x); // 7"),
        RawSnippet::new(
            "class Temp {\n  constructor() { this.c = 0; }\n  get f() { return this.c * 9 / 5 + 32; }\n  set f(v) { this.c = (v - 32) * 5 / 9; }\n}\nconst t = new Temp();\nt.f = 212;\nconsole.log(t.c); // 100\nconsole.log(t.f); // 212",
        ),
        RawSnippet::new(
            "const user = {\n  first: 'Ada',\n  last: 'Lovelace',\n  get full() { return `${this.first} ${this.last}`; },\n};\nconsole.log(user.full); // 'Ada Lovelace'",
        ),
    ]);
    assert_eq!(
        statuses(&report),
        vec![Status::Pass, Status::Pass, Status::Pass]
    );
}

// ============================================================================
// ISOLATION AND CHAINING
// ============================================================================

#[test]
fn groups_never_share_bindings() {
    let report = verify(vec![
        RawSnippet::new("var shared = 'first';\nconsole.log(shared); // 'first'"),
        RawSnippet::new("console.log(typeof shared); // 'undefined'"),
        RawSnippet::new("let shared = 'third';\nconsole.log(shared); // 'third'"),
    ]);
    assert_eq!(statuses(&report), vec![Status::Pass; 3]);
}

#[test]
fn chained_snippets_see_mutations_in_order() {
    let report = verify(vec![
        RawSnippet::new("const list = [];").in_group("list"),
        RawSnippet::new("list.push('a');").in_group("list"),
        RawSnippet::new("list.push('b');\nconsole.log(list); // ['a', 'b']").in_group("list"),
        RawSnippet::new("console.log(typeof list); // 'undefined'").in_group("other"),
    ]);
    assert_eq!(report.entries[2].status, Status::Pass);
    assert_eq!(report.entries[3].status, Status::Pass);
    assert_eq!(report.entries[2].group, report.entries[0].group);
    assert_ne!(report.entries[3].group, report.entries[0].group);
}

#[test]
fn aliasing_stays_inside_the_group() {
    let report = verify(vec![
        RawSnippet::new("const a = { n: 1 };\nconst b = a;\nb.n = 2;\nconsole.log(a.n); // 2"),
        RawSnippet::new("console.log(a === b); // true").chained(),
        RawSnippet::new("const a = { n: 1 };\nconsole.log(a.n); // 1"),
    ]);
    assert_eq!(statuses(&report), vec![Status::Pass; 3]);
}

#[test]
fn timeouts_reset_the_group_context() {
    let report = verify(vec![
        RawSnippet::new("var total = 5;\nconsole.log(total); // 5"),
        RawSnippet::new("while (true) {}\n// Output: never").chained(),
        RawSnippet::new("console.log(typeof total); // 'undefined'").chained(),
    ]);
    assert_eq!(
        statuses(&report),
        vec![Status::Pass, Status::Timeout, Status::Pass]
    );
    assert_eq!(report.summary.timeout, 1);
    assert!(!report.is_success());
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let raw: Vec<RawSnippet> = (0..10)
        .map(|i| {
            let snippet = RawSnippet::new(format!(
                "var n = (typeof n === 'undefined' ? 0 : n) + {i};\nconsole.log(n); // {i}"
            ));
            if i % 3 == 1 {
                snippet.chained()
            } else {
                snippet
            }
        })
        .collect();
    let sequential = Verifier::new(ScriptRuntime::new(16), &config(1)).verify_snippets(raw.clone());
    let parallel = Verifier::new(ScriptRuntime::new(16), &config(4)).verify_snippets(raw);
    assert_eq!(statuses(&sequential), statuses(&parallel));
    assert_eq!(sequential.summary, parallel.summary);
}

// ============================================================================
// MATCHER PROPERTIES
// ============================================================================

#[test]
fn matching_is_idempotent() {
    let expected = vec![Expected::Line("[1, 2]".into()), Expected::Line("done".into())];
    let result = ExecutionResult {
        captured_lines: vec!["[ 1, 3 ]".into(), "done".into()],
        ..ExecutionResult::default()
    };
    let first = match_result(&expected, false, false, &result);
    let second = match_result(&expected, false, false, &result);
    assert_eq!(first, second);
    assert_eq!(first.status, Status::Fail);
}

// ============================================================================
// SUBSTRATE FAULTS
// ============================================================================

/// Prints one line per snippet, but cannot build a context for group 1.
struct FlakyRuntime;

impl Runtime for FlakyRuntime {
    type Context = GroupId;

    fn name(&self) -> &str {
        "flaky"
    }

    fn new_context(&self, group: GroupId, _seed: u64) -> Result<GroupId, VerifyError> {
        if group == GroupId(1) {
            Err(VerifyError::internal("context pool exhausted"))
        } else {
            Ok(group)
        }
    }

    fn evaluate(
        &self,
        _context: &mut GroupId,
        _source: &str,
        output: &mut dyn OutputSink,
        _budget: &Budget,
    ) -> Result<Completion, VerifyError> {
        output.emit("ok");
        Ok(Completion::Normal)
    }
}

#[test]
fn substrate_faults_abort_the_rest_of_the_run() {
    let raw = vec![
        RawSnippet::new("// Output: ok"),
        RawSnippet::new("// Output: ok"),
        RawSnippet::new("// Output: ok").chained(),
        RawSnippet::new("// Output: ok"),
    ];
    let report = Verifier::new(FlakyRuntime, &config(1)).verify(&build_records(raw));
    assert_eq!(
        statuses(&report),
        vec![
            Status::Pass,
            Status::InternalError,
            Status::Skipped(SkipReason::NotReached),
            Status::Skipped(SkipReason::NotReached),
        ]
    );
    assert!(report.aborted());
    assert!(report.entries[1]
        .diff
        .as_deref()
        .unwrap()
        .contains("context pool exhausted"));
}
