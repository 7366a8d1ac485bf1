//! The language runtime seam.
//!
//! The verifier never interprets snippets itself. It drives a [`Runtime`],
//! which owns a per-group evaluation context, writes console output into an
//! [`OutputSink`], and polls a [`Budget`] so runaway snippets can be stopped.
//! The bundled [`script::ScriptRuntime`] is one such runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::VerifyError;
use crate::snippet::GroupId;

pub mod script;

/// A language runtime capable of evaluating snippet source text.
///
/// Implementations must keep every binding inside the context they hand out:
/// two contexts created by the same runtime never observe each other.
pub trait Runtime: Send + Sync + 'static {
    /// The evaluation context of one isolation group.
    type Context: Send + 'static;

    fn name(&self) -> &str;

    /// Creates a fresh, empty context namespaced to `group`.
    ///
    /// An error here means the substrate is unusable.
    fn new_context(&self, group: GroupId, seed: u64) -> Result<Self::Context, VerifyError>;

    /// Evaluates `source` against `context`.
    ///
    /// Whatever the snippet does, including throwing, is reported through the
    /// returned [`Completion`]. `Err` is reserved for substrate faults.
    fn evaluate(
        &self,
        context: &mut Self::Context,
        source: &str,
        output: &mut dyn OutputSink,
        budget: &Budget,
    ) -> Result<Completion, VerifyError>;
}

/// How an evaluation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Normal,
    /// An unhandled throw, with its description (`Name: message`).
    Threw(String),
    /// The budget ran out before the snippet finished.
    Interrupted,
}

/// Receives console output, one line per emission.
pub trait OutputSink: Send {
    fn emit(&mut self, line: &str);
}

/// Collects console output into memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    lines: Vec<String>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl OutputSink for CaptureBuffer {
    fn emit(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// Writes console output straight to stdout.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn emit(&mut self, line: &str) {
        println!("{}", line);
    }
}

/// The wall-clock allowance of one evaluation.
///
/// Cloning shares the cancellation flag, so a watchdog holding a clone can
/// stop an evaluation it has given up on.
#[derive(Debug, Clone)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Budget {
    pub fn new(ceiling: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + ceiling,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A budget that never runs out, for interactive use.
    pub fn unlimited() -> Self {
        Self::new(Duration::from_secs(60 * 60 * 24 * 365))
    }

    /// True once the deadline has passed or the budget was cancelled.
    pub fn exhausted(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || Instant::now() >= self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn overran(&self) -> bool {
        Instant::now() > self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budget_is_exhausted_immediately() {
        let budget = Budget::new(Duration::ZERO);
        assert!(budget.exhausted());
    }

    #[test]
    fn cancellation_is_shared_between_clones() {
        let budget = Budget::unlimited();
        let watchdog = budget.clone();
        assert!(!budget.exhausted());
        watchdog.cancel();
        assert!(budget.exhausted());
        assert!(budget.is_cancelled());
    }

    #[test]
    fn capture_buffer_keeps_emission_order() {
        let mut buffer = CaptureBuffer::new();
        buffer.emit("a");
        buffer.emit("b");
        assert_eq!(buffer.into_lines(), vec!["a".to_string(), "b".to_string()]);
    }
}
