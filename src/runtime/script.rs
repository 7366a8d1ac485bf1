//! The bundled scripting runtime.
//!
//! A small, deterministic interpreter for the dynamically-typed scripting
//! language the documents are written in: `let`/`const`/`var`, functions and
//! arrows, classes with `extends`/`super` and accessors, template literals,
//! spread, `try`/`catch`/`finally`, and the usual builtins (`console`,
//! `Math`, `JSON`, `Object`, `Array`, `String`, error constructors, timers).
//!
//! Syntax outside that subset, destructuring included, is a `SyntaxError`.
//! Builtins outside it, such as `Map` or `Set`, are undefined names.
//!
//! Each [`ScriptContext`] owns its own heap and global scope, so contexts
//! never share bindings. `Math.random` draws from a generator seeded per
//! context, which makes "nondeterministic" snippets reproducible.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256StarStar;
use tracing::{debug, trace};

use crate::errors::VerifyError;
use crate::runtime::{Budget, Completion, OutputSink, Runtime};
use crate::snippet::GroupId;

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod heap;
pub mod inspect;
pub mod parser;
pub mod value;

use builtins::{Intrinsics, Timers};
use eval::{Abrupt, Interpreter};
use heap::{Heap, ScopeId, Scopes};

/// Default number of evaluation steps between budget polls.
pub const DEFAULT_CHECK_INTERVAL: u32 = 256;

/// Evaluation state of one isolation group.
pub struct ScriptContext {
    namespace: GroupId,
    heap: Heap,
    scopes: Scopes,
    global: ScopeId,
    intrinsics: Intrinsics,
    rng: Xoshiro256StarStar,
    timers: Timers,
    /// Set once an evaluation was interrupted; the state may be half-updated.
    poisoned: bool,
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("namespace", &self.namespace)
            .field("objects", &self.heap.len())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl ScriptContext {
    /// A context with only the builtins defined.
    pub fn new(namespace: GroupId, seed: u64) -> Result<Self, VerifyError> {
        let mut heap = Heap::default();
        let mut scopes = Scopes::default();
        let (intrinsics, builtins) = builtins::install(&mut heap, &mut scopes)
            .ok_or_else(|| VerifyError::internal("could not install script builtins"))?;
        let global = scopes
            .open(Some(builtins), true)
            .ok_or_else(|| VerifyError::internal("could not open the global scope"))?;
        Ok(Self {
            namespace,
            heap,
            scopes,
            global,
            intrinsics,
            rng: Xoshiro256StarStar::seed_from_u64(seed),
            timers: Timers::default(),
            poisoned: false,
        })
    }

    pub fn namespace(&self) -> &GroupId {
        &self.namespace
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Number of objects allocated so far.
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }
}

/// The [`Runtime`] implementation backed by the bundled interpreter.
#[derive(Debug, Clone)]
pub struct ScriptRuntime {
    check_interval: u32,
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}

impl ScriptRuntime {
    pub fn new(check_interval: u32) -> Self {
        Self {
            check_interval: check_interval.max(1),
        }
    }
}

impl Runtime for ScriptRuntime {
    type Context = ScriptContext;

    fn name(&self) -> &str {
        "script"
    }

    fn new_context(&self, group: GroupId, seed: u64) -> Result<ScriptContext, VerifyError> {
        debug!(group = %group, seed, "creating script context");
        ScriptContext::new(group, seed)
    }

    fn evaluate(
        &self,
        context: &mut ScriptContext,
        source: &str,
        output: &mut dyn OutputSink,
        budget: &Budget,
    ) -> Result<Completion, VerifyError> {
        if context.poisoned {
            return Err(VerifyError::internal(format!(
                "context for group {} was reused after an interrupted evaluation",
                context.namespace
            )));
        }
        let program = match parser::parse_program(source) {
            Ok(program) => program,
            Err(err) => {
                trace!(error = %err, "snippet failed to parse");
                return Ok(Completion::Threw(format!("SyntaxError: {}", err)));
            }
        };

        let mut interp = Interpreter::new(context, output, budget, self.check_interval);
        let outcome = interp
            .run_program(&program)
            .and_then(|()| builtins::run_timers(&mut interp));
        let completion = match outcome {
            Ok(()) => Completion::Normal,
            Err(Abrupt::Throw(value)) => Completion::Threw(interp.describe_thrown(&value)),
            Err(Abrupt::Interrupted) => Completion::Interrupted,
        };
        drop(interp);

        match completion {
            Completion::Normal => {}
            Completion::Threw(_) => context.timers.clear(),
            Completion::Interrupted => {
                context.timers.clear();
                context.poisoned = true;
            }
        }
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CaptureBuffer;

    /// Deep recursion needs more stack than a test thread has.
    fn run(source: &str) -> (Completion, Vec<String>) {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(256 * 1024 * 1024)
            .spawn(move || {
                let runtime = ScriptRuntime::default();
                let mut context = runtime.new_context(GroupId(0), 7).unwrap();
                let mut output = CaptureBuffer::new();
                let completion = runtime
                    .evaluate(&mut context, &source, &mut output, &Budget::unlimited())
                    .unwrap();
                (completion, output.into_lines())
            })
            .unwrap()
            .join()
            .unwrap()
    }

    fn lines(source: &str) -> Vec<String> {
        let (completion, lines) = run(source);
        assert_eq!(completion, Completion::Normal, "output so far: {:?}", lines);
        lines
    }

    #[test]
    fn console_log_formats_values() {
        assert_eq!(
            lines("console.log(1 + 2, 'a', [1, 'b'], { x: null }, undefined);"),
            vec!["3 a [ 1, 'b' ] { x: null } undefined"]
        );
    }

    #[test]
    fn closures_capture_their_scope() {
        let source = r#"
            function counter() {
              let count = 0;
              return () => ++count;
            }
            const next = counter();
            next();
            next();
            console.log(next());
        "#;
        assert_eq!(lines(source), vec!["3"]);
    }

    #[test]
    fn classes_support_inheritance() {
        let source = r#"
            class Animal {
              constructor(name) { this.name = name; }
              speak() { return `${this.name} makes a sound`; }
            }
            class Dog extends Animal {
              speak() { return `${super.speak()} (woof)`; }
            }
            const d = new Dog('Rex');
            console.log(d.speak());
            console.log(d);
            console.log(d instanceof Animal);
        "#;
        assert_eq!(
            lines(source),
            vec!["Rex makes a sound (woof)", "Dog { name: 'Rex' }", "true"]
        );
    }

    #[test]
    fn uncaught_errors_are_described() {
        let (completion, output) = run("console.log('before'); null.x;");
        assert_eq!(output, vec!["before"]);
        assert_eq!(
            completion,
            Completion::Threw("TypeError: Cannot read properties of null (reading 'x')".into())
        );
    }

    #[test]
    fn thrown_primitives_are_stringified() {
        let (completion, _) = run("throw 'boom';");
        assert_eq!(completion, Completion::Threw("boom".into()));
    }

    #[test]
    fn syntax_errors_are_reported_as_throws() {
        let (completion, output) = run("console.log('never'); let = ;");
        assert!(output.is_empty());
        assert!(matches!(completion, Completion::Threw(msg) if msg.starts_with("SyntaxError")));
    }

    #[test]
    fn temporal_dead_zone_is_enforced() {
        let (completion, _) = run("console.log(x); let x = 1;");
        assert_eq!(
            completion,
            Completion::Threw("ReferenceError: Cannot access 'x' before initialization".into())
        );
    }

    #[test]
    fn runaway_recursion_is_a_range_error() {
        let (completion, _) = run("function f() { return f(); } f();");
        assert_eq!(
            completion,
            Completion::Threw("RangeError: Maximum call stack size exceeded".into())
        );
    }

    #[test]
    fn timers_run_after_the_script() {
        let source = r#"
            setTimeout(() => console.log('later'), 10);
            setTimeout(() => console.log('sooner'), 0);
            console.log('now');
        "#;
        assert_eq!(lines(source), vec!["now", "sooner", "later"]);
    }

    #[test]
    fn bindings_persist_across_evaluations_of_one_context() {
        let runtime = ScriptRuntime::default();
        let mut context = runtime.new_context(GroupId(1), 0).unwrap();
        let budget = Budget::unlimited();
        let mut output = CaptureBuffer::new();
        runtime
            .evaluate(&mut context, "const total = 40;", &mut output, &budget)
            .unwrap();
        runtime
            .evaluate(&mut context, "console.log(total + 2);", &mut output, &budget)
            .unwrap();
        assert_eq!(output.into_lines(), vec!["42"]);
    }

    #[test]
    fn infinite_loops_are_interrupted_and_poison_the_context() {
        let runtime = ScriptRuntime::new(16);
        let mut context = runtime.new_context(GroupId(2), 0).unwrap();
        let budget = Budget::new(std::time::Duration::from_millis(20));
        let mut output = CaptureBuffer::new();
        let completion = runtime
            .evaluate(&mut context, "while (true) {}", &mut output, &budget)
            .unwrap();
        assert_eq!(completion, Completion::Interrupted);
        assert!(context.is_poisoned());
        assert!(runtime
            .evaluate(&mut context, "1;", &mut output, &Budget::unlimited())
            .is_err());
    }

    #[test]
    fn seeded_random_is_reproducible() {
        let source = "console.log(Math.random());";
        assert_eq!(lines(source), lines(source));
    }
}
