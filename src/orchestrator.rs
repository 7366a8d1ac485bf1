//! # Verification Orchestrator
//!
//! Drives a whole pass over a document's snippets: resolves each snippet's
//! isolation group to a context, executes, matches, and assembles the
//! [`VerificationReport`] in document order.
//!
//! Groups are independent, so with `jobs > 1` they are spread over scoped
//! worker threads. Each worker returns its groups' entries and the
//! orchestrator merges them afterwards; the report is never shared.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::config::VerifyConfig;
use crate::errors::VerifyError;
use crate::executor::{ContextHandle, IsolationExecutor};
use crate::matcher::{match_record, Mismatch, SkipReason, Status};
use crate::runtime::Runtime;
use crate::snippet::{build_records, GroupId, RawSnippet, SnippetId, SnippetRecord};

// =============================================================================
// REPORT TYPES
// =============================================================================

/// Verdict for one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportEntry {
    pub snippet_id: SnippetId,
    pub group: GroupId,
    pub status: Status,
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<Mismatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub fingerprint: String,
    pub duration_ticks: u64,
}

impl ReportEntry {
    fn for_record(record: &SnippetRecord, status: Status, diff: Option<String>) -> Self {
        Self {
            snippet_id: record.id,
            group: record.isolation_group,
            status,
            diff,
            mismatch: None,
            heading: record.heading.clone(),
            line: record.line,
            fingerprint: record.fingerprint.clone(),
            duration_ticks: 0,
        }
    }

    fn not_reached(record: &SnippetRecord) -> Self {
        Self::for_record(record, Status::Skipped(SkipReason::NotReached), None)
    }

    fn internal(record: &SnippetRecord, err: &VerifyError) -> Self {
        Self::for_record(record, Status::InternalError, Some(err.to_string()))
    }
}

/// Tally of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub pass: usize,
    pub fail: usize,
    pub skipped: usize,
    pub timeout: usize,
    pub internal_error: usize,
}

impl Summary {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let mut summary = Summary::default();
        for entry in entries {
            match entry.status {
                Status::Pass => summary.pass += 1,
                Status::Fail => summary.fail += 1,
                Status::Skipped(_) => summary.skipped += 1,
                Status::Timeout => summary.timeout += 1,
                Status::InternalError => summary.internal_error += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.pass + self.fail + self.skipped + self.timeout + self.internal_error
    }

    /// Skips are informational; everything else must be clean.
    pub fn is_success(&self) -> bool {
        self.fail == 0 && self.timeout == 0 && self.internal_error == 0
    }
}

/// The ordered verdicts of one run plus their tally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub entries: Vec<ReportEntry>,
    pub summary: Summary,
}

impl VerificationReport {
    pub fn new(entries: Vec<ReportEntry>) -> Self {
        let summary = Summary::from_entries(&entries);
        Self { entries, summary }
    }

    pub fn is_success(&self) -> bool {
        self.summary.is_success()
    }

    pub fn entry(&self, id: SnippetId) -> Option<&ReportEntry> {
        self.entries.iter().find(|entry| entry.snippet_id == id)
    }

    /// True when a substrate fault cut the run short.
    pub fn aborted(&self) -> bool {
        self.summary.internal_error > 0
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Runs snippets through an [`IsolationExecutor`] and the matcher.
pub struct Verifier<R: Runtime> {
    executor: IsolationExecutor<R>,
    jobs: usize,
}

impl<R: Runtime> Verifier<R> {
    pub fn new(runtime: R, config: &VerifyConfig) -> Self {
        Self {
            executor: IsolationExecutor::new(Arc::new(runtime), config),
            jobs: config.jobs.max(1),
        }
    }

    pub fn executor(&self) -> &IsolationExecutor<R> {
        &self.executor
    }

    /// Builds records from raw blocks, then verifies them.
    pub fn verify_snippets(&self, raw: Vec<RawSnippet>) -> VerificationReport {
        self.verify(&build_records(raw))
    }

    /// Verifies `records`, which must be in document order.
    pub fn verify(&self, records: &[SnippetRecord]) -> VerificationReport {
        let groups = group_ranges(records);
        info!(
            snippets = records.len(),
            groups = groups.len(),
            jobs = self.jobs,
            runtime = self.executor.runtime().name(),
            "verifying"
        );
        let abort = AtomicBool::new(false);
        let entries: Vec<ReportEntry> = if self.jobs == 1 || groups.len() < 2 {
            groups
                .iter()
                .flat_map(|range| self.run_group(&records[range.clone()], &abort))
                .collect()
        } else {
            self.run_parallel(records, &groups, &abort)
        };
        let report = VerificationReport::new(entries);
        info!(
            pass = report.summary.pass,
            fail = report.summary.fail,
            skipped = report.summary.skipped,
            timeout = report.summary.timeout,
            internal_error = report.summary.internal_error,
            "verification finished"
        );
        report
    }

    /// Runs one group's snippets in order on the current thread.
    fn run_group(&self, group: &[SnippetRecord], abort: &AtomicBool) -> Vec<ReportEntry> {
        let mut entries = Vec::with_capacity(group.len());
        let mut handle: Option<ContextHandle<R::Context>> = None;
        for record in group {
            if abort.load(Ordering::SeqCst) {
                entries.push(ReportEntry::not_reached(record));
                continue;
            }
            if handle.is_none() {
                match self.executor.fresh_context(record.isolation_group) {
                    Ok(fresh) => handle = Some(fresh),
                    Err(err) => {
                        entries.push(self.abort_at(record, err, abort));
                        continue;
                    }
                }
            }
            let Some(context) = handle.as_mut() else {
                continue;
            };
            match self.executor.execute(record, context) {
                Ok(result) => {
                    let outcome = match_record(record, &result);
                    let diff = match (&outcome.status, &record.annotation_note) {
                        (Status::Skipped(SkipReason::NoAssertion), Some(note)) => Some(note.clone()),
                        (Status::Timeout, _) => Some(
                            VerifyError::Timeout {
                                ceiling_ms: millis(self.executor.ceiling()),
                                elapsed_ms: result.duration_ticks / 1000,
                            }
                            .to_string(),
                        ),
                        _ => outcome.diff,
                    };
                    let mut entry = ReportEntry::for_record(record, outcome.status, diff);
                    entry.mismatch = outcome.mismatch;
                    entry.duration_ticks = result.duration_ticks;
                    entries.push(entry);
                }
                Err(err) => entries.push(self.abort_at(record, err, abort)),
            }
        }
        entries
    }

    fn abort_at(&self, record: &SnippetRecord, err: VerifyError, abort: &AtomicBool) -> ReportEntry {
        error!(snippet = %record.id, "{err}; aborting the remaining run");
        abort.store(true, Ordering::SeqCst);
        ReportEntry::internal(record, &err)
    }

    /// Hands groups to scoped workers, then merges in document order.
    fn run_parallel(
        &self,
        records: &[SnippetRecord],
        groups: &[Range<usize>],
        abort: &AtomicBool,
    ) -> Vec<ReportEntry> {
        let cursor = AtomicUsize::new(0);
        let workers = self.jobs.min(groups.len());
        let mut finished: Vec<Option<Vec<ReportEntry>>> = vec![None; groups.len()];

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let index = cursor.fetch_add(1, Ordering::SeqCst);
                            let Some(range) = groups.get(index) else {
                                break;
                            };
                            done.push((index, self.run_group(&records[range.clone()], abort)));
                        }
                        done
                    })
                })
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (index, entries) in done {
                            finished[index] = Some(entries);
                        }
                    }
                    Err(_) => {
                        error!("verification worker panicked; aborting the remaining run");
                        abort.store(true, Ordering::SeqCst);
                    }
                }
            }
        });

        let mut entries = Vec::with_capacity(records.len());
        for (range, done) in groups.iter().zip(finished) {
            match done {
                Some(group_entries) => entries.extend(group_entries),
                None => {
                    let lost = VerifyError::internal("verification worker panicked");
                    let group = &records[range.clone()];
                    if let Some((first, rest)) = group.split_first() {
                        entries.push(ReportEntry::internal(first, &lost));
                        entries.extend(rest.iter().map(ReportEntry::not_reached));
                    }
                }
            }
        }
        entries
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Forward scan: consecutive records with the same group form one range.
pub fn group_ranges(records: &[SnippetRecord]) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match ranges.last_mut() {
            Some(last) if records[last.start].isolation_group == record.isolation_group => {
                last.end = index + 1;
            }
            _ => ranges.push(index..index + 1),
        }
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::script::ScriptRuntime;

    fn verifier(jobs: usize) -> Verifier<ScriptRuntime> {
        let config = VerifyConfig {
            jobs,
            timeout_ms: 200,
            ..VerifyConfig::default()
        };
        Verifier::new(ScriptRuntime::default(), &config)
    }

    fn statuses(report: &VerificationReport) -> Vec<Status> {
        report.entries.iter().map(|e| e.status).collect()
    }

    #[test]
    fn ranges_follow_consecutive_groups() {
        let records = build_records(vec![
            RawSnippet::new("a"),
            RawSnippet::new("b").chained(),
            RawSnippet::new("c"),
        ]);
        assert_eq!(group_ranges(&records), vec![0..2, 2..3]);
        assert!(group_ranges(&[]).is_empty());
    }

    #[test]
    fn chained_counter_scenario() {
        let report = verifier(1).verify_snippets(vec![
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
    fn same_names_in_different_groups_do_not_collide() {
        let report = verifier(1).verify_snippets(vec![
            RawSnippet::new("const answer = 1;\nconsole.log(answer); // 1"),
            RawSnippet::new("const answer = 2;\nconsole.log(answer); // 2"),
        ]);
        assert_eq!(statuses(&report), vec![Status::Pass, Status::Pass]);
    }

    #[test]
    fn parallel_runs_merge_in_document_order() {
        let raw: Vec<RawSnippet> = (0..12)
            .map(|i| RawSnippet::new(format!("console.log({}); // {}", i, i)))
            .collect();
        let report = verifier(4).verify_snippets(raw);
        let ids: Vec<usize> = report.entries.iter().map(|e| e.snippet_id.0).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        assert_eq!(report.summary.pass, 12);
    }

    #[test]
    fn summary_counts_every_status() {
        let report = verifier(1).verify_snippets(vec![
            RawSnippet::new("console.log(1); // 1"),
            RawSnippet::new("console.log(1); // 2"),
            RawSnippet::new("let quiet = true;"),
            RawSnippet::new("while (true) {}\nconsole.log(1); // 1"),
        ]);
        assert_eq!(
            report.summary,
            Summary {
                pass: 1,
                fail: 1,
                skipped: 1,
                timeout: 1,
                internal_error: 0
            }
        );
        assert!(!report.is_success());
    }
}
