//! # Expectation Matcher
//!
//! Compares an [`ExecutionResult`] with what a snippet's annotations
//! declared. The verdict is a pure function of its inputs: matching the same
//! pair twice yields the same status and diff.
//!
//! Rules, in order:
//! 1. a timed-out run is `Timeout`;
//! 2. a snippet that asserts nothing is `Skipped(NoAssertion)`;
//! 3. an expected throw passes iff something was thrown whose description
//!    contains the expected one (or at least its error name);
//! 4. an unexpected throw fails;
//! 5. nondeterministic snippets pass once they did not throw;
//! 6. otherwise expected and captured lines are compared positionally.

use std::fmt;

use serde::Serialize;

use crate::errors::VerifyError;
use crate::executor::ExecutionResult;
use crate::snippet::{Expected, SnippetRecord};

pub mod canonical;

use canonical::canonicalize;

// =============================================================================
// CORE TYPES
// =============================================================================

/// Why a snippet was not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The snippet declares no expected output and no throw.
    NoAssertion,
    /// The run was aborted before this snippet.
    NotReached,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoAssertion => write!(f, "nothing asserted"),
            SkipReason::NotReached => write!(f, "not reached"),
        }
    }
}

/// Verdict for one snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Fail,
    Skipped(SkipReason),
    Timeout,
    /// The evaluation substrate failed; the run stopped here.
    InternalError,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skipped(_) => "SKIP",
            Status::Timeout => "TIME",
            Status::InternalError => "ERROR",
        }
    }

    /// True for statuses that make the run unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Fail | Status::Timeout | Status::InternalError)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Skipped(reason) => write!(f, "{} ({})", self.label(), reason),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// The first differing output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Zero-based position in the output.
    pub index: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Status plus a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    pub status: Status,
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
}

impl MatchOutcome {
    fn new(status: Status, diff: Option<String>) -> Self {
        Self {
            status,
            diff,
            mismatch: None,
        }
    }

    fn fail(diff: String) -> Self {
        Self::new(Status::Fail, Some(diff))
    }
}

// =============================================================================
// MATCHING
// =============================================================================

/// Matches `result` against a record's own expectations.
pub fn match_record(record: &SnippetRecord, result: &ExecutionResult) -> MatchOutcome {
    match_result(
        &record.expected_outputs,
        record.expected_to_throw,
        record.nondeterministic,
        result,
    )
}

/// Compares declared expectations with an execution result.
pub fn match_result(
    expected: &[Expected],
    expected_to_throw: bool,
    nondeterministic: bool,
    result: &ExecutionResult,
) -> MatchOutcome {
    if result.timed_out {
        return MatchOutcome::new(
            Status::Timeout,
            Some(format!(
                "timed out after {} ms",
                result.duration_ticks / 1000
            )),
        );
    }

    if expected.is_empty() && !expected_to_throw {
        let note = result
            .thrown
            .as_ref()
            .map(|thrown| {
                VerifyError::SnippetThrow {
                    description: thrown.clone(),
                }
                .to_string()
            });
        return MatchOutcome::new(Status::Skipped(SkipReason::NoAssertion), note);
    }

    if expected_to_throw {
        let wanted = expected
            .iter()
            .find_map(|e| match e {
                Expected::Error(text) => Some(text.trim()),
                Expected::Line(_) => None,
            })
            .unwrap_or("");
        return match &result.thrown {
            None if wanted.is_empty() => {
                MatchOutcome::fail("expected a throw, completed normally".to_string())
            }
            None => MatchOutcome::fail(format!("expected throw {}, completed normally", wanted)),
            Some(thrown) if throw_matches(wanted, thrown) => MatchOutcome::new(Status::Pass, None),
            Some(thrown) => MatchOutcome::fail(format!(
                "expected throw containing {}, got {}",
                wanted, thrown
            )),
        };
    }

    if let Some(thrown) = &result.thrown {
        let err = VerifyError::UnexpectedThrow {
            description: thrown.clone(),
        };
        return MatchOutcome::fail(err.to_string());
    }

    if nondeterministic {
        return MatchOutcome::new(Status::Pass, None);
    }

    let wanted: Vec<&str> = expected.iter().map(Expected::text).collect();
    match first_mismatch(&wanted, &result.captured_lines) {
        None => MatchOutcome::new(Status::Pass, None),
        Some(mismatch) => MatchOutcome {
            status: Status::Fail,
            diff: Some(describe(&mismatch)),
            mismatch: Some(mismatch),
        },
    }
}

/// Loose containment: the full description, or at least the error name.
fn throw_matches(wanted: &str, thrown: &str) -> bool {
    if wanted.is_empty() || thrown.contains(wanted) {
        return true;
    }
    match wanted.split_once(':') {
        Some((name, _)) => {
            let name = name.trim();
            !name.is_empty() && thrown.split(':').next().map(str::trim) == Some(name)
        }
        None => false,
    }
}

fn first_mismatch(expected: &[&str], actual: &[String]) -> Option<Mismatch> {
    let common = expected.len().min(actual.len());
    for index in 0..common {
        if canonicalize(expected[index]) != canonicalize(&actual[index]) {
            return Some(Mismatch {
                index,
                expected: Some(expected[index].trim().to_string()),
                actual: Some(actual[index].trim().to_string()),
            });
        }
    }
    if expected.len() == actual.len() {
        return None;
    }
    Some(Mismatch {
        index: common,
        expected: expected.get(common).map(|line| line.trim().to_string()),
        actual: actual.get(common).map(|line| line.trim().to_string()),
    })
}

fn describe(mismatch: &Mismatch) -> String {
    let line = mismatch.index + 1;
    match (&mismatch.expected, &mismatch.actual) {
        (Some(expected), Some(actual)) => format!(
            "output line {} differs\n  expected: {}\n  actual:   {}",
            line, expected, actual
        ),
        (Some(expected), None) => format!(
            "output line {} missing\n  expected: {}\n  actual:   <no output>",
            line, expected
        ),
        (None, Some(actual)) => format!(
            "unexpected extra output at line {}\n  expected: <end of output>\n  actual:   {}",
            line, actual
        ),
        (None, None) => format!("output line {} differs", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(lines: &[&str], thrown: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            captured_lines: lines.iter().map(|l| l.to_string()).collect(),
            thrown: thrown.map(str::to_string),
            timed_out: false,
            duration_ticks: 120,
        }
    }

    fn lines(texts: &[&str]) -> Vec<Expected> {
        texts.iter().map(|t| Expected::Line(t.to_string())).collect()
    }

    #[test]
    fn matching_lines_pass() {
        let outcome = match_result(&lines(&["1", "hi"]), false, false, &result(&["1", "hi"], None));
        assert_eq!(outcome.status, Status::Pass);
        assert_eq!(outcome.diff, None);
    }

    #[test]
    fn structural_spacing_is_normalized() {
        let outcome = match_result(&lines(&["[1, 2, 3]"]), false, false, &result(&["[ 1, 2, 3 ]"], None));
        assert_eq!(outcome.status, Status::Pass);
    }

    #[test]
    fn first_difference_is_pinpointed() {
        let outcome = match_result(&lines(&["1", "2", "3"]), false, false, &result(&["1", "5", "9"], None));
        assert_eq!(outcome.status, Status::Fail);
        let mismatch = outcome.mismatch.unwrap();
        assert_eq!(mismatch.index, 1);
        assert_eq!(mismatch.expected.as_deref(), Some("2"));
        assert_eq!(mismatch.actual.as_deref(), Some("5"));
        assert!(outcome.diff.unwrap().starts_with("output line 2 differs"));
    }

    #[test]
    fn missing_and_extra_lines_fail() {
        let short = match_result(&lines(&["a", "b"]), false, false, &result(&["a"], None));
        assert_eq!(short.mismatch.unwrap().actual, None);
        let long = match_result(&lines(&["a"]), false, false, &result(&["a", "b"], None));
        assert_eq!(long.mismatch.unwrap().expected, None);
    }

    #[test]
    fn nothing_asserted_is_skipped_even_when_it_throws() {
        let quiet = match_result(&[], false, false, &result(&["noise"], None));
        assert_eq!(quiet.status, Status::Skipped(SkipReason::NoAssertion));
        let loud = match_result(&[], false, false, &result(&[], Some("Error: boom")));
        assert_eq!(loud.status, Status::Skipped(SkipReason::NoAssertion));
        assert_eq!(loud.diff.as_deref(), Some("snippet threw: Error: boom"));
    }

    #[test]
    fn expected_throw_matches_by_substring() {
        let expected = vec![Expected::Error("ReferenceError".into())];
        let outcome = match_result(&expected, true, false, &result(&[], Some("ReferenceError: x is not defined")));
        assert_eq!(outcome.status, Status::Pass);
    }

    #[test]
    fn expected_throw_tolerates_reworded_messages() {
        let expected = vec![Expected::Error("TypeError: Assignment to constant variable.".into())];
        let outcome = match_result(&expected, true, false, &result(&[], Some("TypeError: cannot assign to const 'x'")));
        assert_eq!(outcome.status, Status::Pass);
        let wrong = match_result(&expected, true, false, &result(&[], Some("RangeError: nope")));
        assert_eq!(wrong.status, Status::Fail);
    }

    #[test]
    fn expected_throw_that_never_happens_fails() {
        let expected = vec![Expected::Error("TypeError".into())];
        let outcome = match_result(&expected, true, false, &result(&["ok"], None));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.diff.as_deref(), Some("expected throw TypeError, completed normally"));
    }

    #[test]
    fn unexpected_throws_fail_with_description() {
        let outcome = match_result(&lines(&["1"]), false, false, &result(&[], Some("TypeError: f is not a function")));
        assert_eq!(outcome.status, Status::Fail);
        assert_eq!(outcome.diff.as_deref(), Some("unexpected throw: TypeError: f is not a function"));
    }

    #[test]
    fn nondeterministic_snippets_only_check_throws() {
        let outcome = match_result(&lines(&["0.123"]), false, true, &result(&["0.987"], None));
        assert_eq!(outcome.status, Status::Pass);
        let threw = match_result(&lines(&["0.123"]), false, true, &result(&[], Some("Error: x")));
        assert_eq!(threw.status, Status::Fail);
    }

    #[test]
    fn timeouts_outrank_everything() {
        let mut timed_out = result(&[], None);
        timed_out.timed_out = true;
        timed_out.duration_ticks = 2_000_000;
        let outcome = match_result(&[], false, false, &timed_out);
        assert_eq!(outcome.status, Status::Timeout);
        assert_eq!(outcome.diff.as_deref(), Some("timed out after 2000 ms"));
    }

    #[test]
    fn matching_is_idempotent() {
        let expected = lines(&["{ a: 1 }", "x"]);
        let observed = result(&["{ a: 2 }"], None);
        assert_eq!(
            match_result(&expected, false, false, &observed),
            match_result(&expected, false, false, &observed)
        );
    }
}
