//! # Isolation Executor
//!
//! Runs one snippet against its isolation group's context and turns whatever
//! happens into an [`ExecutionResult`]. A throw, a timeout, or a syntax error
//! in the snippet is data; only a runtime that cannot evaluate at all comes
//! back as `Err`.
//!
//! ## Threads
//!
//! Every evaluation runs on its own thread with a large stack, so deeply
//! recursive snippets hit the runtime's call-depth limit instead of the
//! process stack. With a watchdog grace configured, the executor waits at
//! most `ceiling + grace` for that thread; past that the evaluation is
//! cancelled and abandoned along with its context.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::VerifyConfig;
use crate::errors::VerifyError;
use crate::runtime::{Budget, CaptureBuffer, Completion, Runtime};
use crate::snippet::{GroupId, SnippetRecord};

/// Stack size of evaluation threads.
pub const EVAL_STACK_SIZE: usize = 256 * 1024 * 1024;

// =============================================================================
// CORE TYPES
// =============================================================================

/// What one execution observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// Console lines in emission order, up to the throw point.
    pub captured_lines: Vec<String>,
    /// `Name: message` of an unhandled throw.
    pub thrown: Option<String>,
    pub timed_out: bool,
    /// Wall-clock duration in microseconds.
    pub duration_ticks: u64,
}

/// The evaluation context of one isolation group.
///
/// A handle is either live or discarded. Discarded handles come from a
/// timeout; the next execution against them starts from a fresh context.
#[derive(Debug)]
pub struct ContextHandle<C> {
    group: GroupId,
    context: Option<C>,
}

impl<C> ContextHandle<C> {
    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn is_live(&self) -> bool {
        self.context.is_some()
    }

    pub fn discard(&mut self) {
        self.context = None;
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }
}

/// Executes snippets through a [`Runtime`] under a wall-clock ceiling.
pub struct IsolationExecutor<R: Runtime> {
    runtime: Arc<R>,
    ceiling: Duration,
    grace: Option<Duration>,
    seed: u64,
}

impl<R: Runtime> Clone for IsolationExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            ceiling: self.ceiling,
            grace: self.grace,
            seed: self.seed,
        }
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

impl<R: Runtime> IsolationExecutor<R> {
    pub fn new(runtime: Arc<R>, config: &VerifyConfig) -> Self {
        Self {
            runtime,
            ceiling: config.ceiling(),
            grace: config.watchdog_grace(),
            seed: config.seed,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// A handle to a new, empty context for `group`.
    pub fn fresh_context(&self, group: GroupId) -> Result<ContextHandle<R::Context>, VerifyError> {
        let context = self.runtime.new_context(group, self.seed)?;
        Ok(ContextHandle {
            group,
            context: Some(context),
        })
    }

    /// Runs `snippet` against `handle`.
    ///
    /// The handle's bindings may change; that is how chained snippets see
    /// their predecessors' declarations. After a timeout the handle is
    /// discarded.
    pub fn execute(
        &self,
        snippet: &SnippetRecord,
        handle: &mut ContextHandle<R::Context>,
    ) -> Result<ExecutionResult, VerifyError> {
        let context = match handle.context.take() {
            Some(context) => context,
            None => {
                debug!(snippet = %snippet.id, group = %handle.group, "starting from a fresh context");
                self.runtime.new_context(handle.group, self.seed)?
            }
        };

        let budget = Budget::new(self.ceiling);
        let (sender, receiver) = mpsc::channel();
        let runtime = Arc::clone(&self.runtime);
        let source = snippet.source_text.clone();
        let thread_budget = budget.clone();
        thread::Builder::new()
            .name(format!("snipcheck-eval-{}", snippet.id.0))
            .stack_size(EVAL_STACK_SIZE)
            .spawn(move || {
                let mut context = context;
                let mut output = CaptureBuffer::new();
                let completion =
                    runtime.evaluate(&mut context, &source, &mut output, &thread_budget);
                // The receiver is gone when the watchdog gave up on us.
                let _ = sender.send((context, completion, output.into_lines()));
            })
            .map_err(|e| VerifyError::internal(format!("could not start evaluation thread: {}", e)))?;

        let received = match self.grace {
            Some(grace) => receiver.recv_timeout(self.ceiling + grace),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let (context, completion, captured_lines) = match received {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => {
                budget.cancel();
                warn!(
                    snippet = %snippet.id,
                    group = %handle.group,
                    "evaluation ignored its budget; abandoning context"
                );
                return Ok(ExecutionResult {
                    captured_lines: Vec::new(),
                    thrown: None,
                    timed_out: true,
                    duration_ticks: micros(budget.elapsed()),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(VerifyError::internal(format!(
                    "evaluation thread for snippet {} died",
                    snippet.id
                )));
            }
        };

        let duration_ticks = micros(budget.elapsed());
        let completion = completion?;
        let timed_out = completion == Completion::Interrupted || budget.overran();
        if timed_out {
            warn!(snippet = %snippet.id, group = %handle.group, "snippet exceeded its ceiling");
        } else {
            handle.context = Some(context);
        }
        let thrown = match completion {
            Completion::Threw(description) => Some(description),
            Completion::Normal | Completion::Interrupted => None,
        };
        debug!(
            snippet = %snippet.id,
            lines = captured_lines.len(),
            thrown = thrown.as_deref().unwrap_or(""),
            timed_out,
            "executed"
        );
        Ok(ExecutionResult {
            captured_lines,
            thrown,
            timed_out,
            duration_ticks,
        })
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::script::ScriptRuntime;
    use crate::runtime::OutputSink;
    use crate::snippet::{build_records, RawSnippet};

    fn executor(timeout_ms: u64, grace_ms: Option<u64>) -> IsolationExecutor<ScriptRuntime> {
        let config = VerifyConfig {
            timeout_ms,
            watchdog_grace_ms: grace_ms,
            ..VerifyConfig::default()
        };
        IsolationExecutor::new(Arc::new(ScriptRuntime::new(16)), &config)
    }

    fn record(code: &str) -> SnippetRecord {
        build_records(vec![RawSnippet::new(code)]).remove(0)
    }

    #[test]
    fn captures_lines_in_order() {
        let exec = executor(2000, Some(500));
        let mut handle = exec.fresh_context(GroupId(0)).unwrap();
        let result = exec
            .execute(&record("console.log('a'); console.log('b');"), &mut handle)
            .unwrap();
        assert_eq!(result.captured_lines, vec!["a", "b"]);
        assert_eq!(result.thrown, None);
        assert!(!result.timed_out);
        assert!(handle.is_live());
    }

    #[test]
    fn throws_stop_capture_and_are_data() {
        let exec = executor(2000, Some(500));
        let mut handle = exec.fresh_context(GroupId(0)).unwrap();
        let result = exec
            .execute(&record("console.log(1); missing(); console.log(2);"), &mut handle)
            .unwrap();
        assert_eq!(result.captured_lines, vec!["1"]);
        assert_eq!(result.thrown.as_deref(), Some("ReferenceError: missing is not defined"));
        assert!(handle.is_live());
    }

    #[test]
    fn timeouts_discard_the_context() {
        let exec = executor(30, Some(2000));
        let mut handle = exec.fresh_context(GroupId(0)).unwrap();
        exec.execute(&record("var leftover = 1;"), &mut handle).unwrap();
        let result = exec.execute(&record("for (;;) {}"), &mut handle).unwrap();
        assert!(result.timed_out);
        assert!(!handle.is_live());

        let next = exec
            .execute(&record("console.log(typeof leftover);"), &mut handle)
            .unwrap();
        assert_eq!(next.captured_lines, vec!["undefined"]);
        assert!(handle.is_live());
    }

    /// Sleeps until cancelled, never polling its deadline.
    struct Stubborn;

    impl Runtime for Stubborn {
        type Context = ();

        fn name(&self) -> &str {
            "stubborn"
        }

        fn new_context(&self, _group: GroupId, _seed: u64) -> Result<(), VerifyError> {
            Ok(())
        }

        fn evaluate(
            &self,
            _context: &mut (),
            _source: &str,
            _output: &mut dyn OutputSink,
            budget: &Budget,
        ) -> Result<Completion, VerifyError> {
            while !budget.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(Completion::Normal)
        }
    }

    #[test]
    fn watchdog_abandons_runaway_evaluations() {
        let config = VerifyConfig {
            timeout_ms: 20,
            watchdog_grace_ms: Some(20),
            ..VerifyConfig::default()
        };
        let exec = IsolationExecutor::new(Arc::new(Stubborn), &config);
        let mut handle = exec.fresh_context(GroupId(3)).unwrap();
        let result = exec.execute(&record("anything"), &mut handle).unwrap();
        assert!(result.timed_out);
        assert!(!handle.is_live());
        assert_eq!(handle.group(), GroupId(3));
    }

    struct Broken;

    impl Runtime for Broken {
        type Context = ();

        fn name(&self) -> &str {
            "broken"
        }

        fn new_context(&self, _group: GroupId, _seed: u64) -> Result<(), VerifyError> {
            Err(VerifyError::internal("no substrate"))
        }

        fn evaluate(
            &self,
            _context: &mut (),
            _source: &str,
            _output: &mut dyn OutputSink,
            _budget: &Budget,
        ) -> Result<Completion, VerifyError> {
            Ok(Completion::Normal)
        }
    }

    #[test]
    fn substrate_faults_are_errors() {
        let exec = IsolationExecutor::new(Arc::new(Broken), &VerifyConfig::default());
        assert!(exec.fresh_context(GroupId(0)).unwrap_err().is_fatal());
    }
}
