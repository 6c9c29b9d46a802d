//! Isolated script execution contexts.
//!
//! Interpreter instances are not safe to share across concurrent
//! invocations, so every logical script execution gets its own
//! [`ExecutionContext`]: one private `rhai::Engine` plus one `rhai::Scope`,
//! bound to a single blocking worker for the duration of an evaluation and
//! never shared between executions.
//!
//! Contexts are stamped out from a [`ScriptBindings`] registry: an ordered
//! list of engine init steps (native function registrations among them) and
//! named scope globals. The registry is configuration, not runtime-mutable
//! state: it is read once per context creation.
//!
//! Cancellation is cooperative. Each context installs a progress probe that
//! polls a cancellation flag at interpreter operation granularity, so an
//! evaluating script observes an abort at its next safe point without the
//! runner ever preempting the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, Position, RhaiNativeFunc, Scope};
use tracing::debug;

/// Engine initialization step applied to every new context.
pub type InitStep = Arc<dyn Fn(&mut Engine) + Send + Sync>;

/// Registry of native bindings consumed at context creation.
///
/// Built up front by the embedding application, then read by the runner each
/// time it creates an [`ExecutionContext`].
#[derive(Clone, Default)]
pub struct ScriptBindings {
    init_steps: Vec<InitStep>,
    globals: Vec<(String, Dynamic)>,
}

impl ScriptBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom engine initialization step, applied to every context in
    /// registration order.
    pub fn add_init_step(&mut self, step: impl Fn(&mut Engine) + Send + Sync + 'static) {
        self.init_steps.push(Arc::new(step));
    }

    pub(crate) fn add_init_step_arc(&mut self, step: InitStep) {
        self.init_steps.push(step);
    }

    /// Registers a native function as callable from scripts, under the given
    /// name. The function is registered anew into every context.
    pub fn register_user_function<A, const N: usize, const C: bool, R, const L: bool, F>(
        &mut self,
        name: impl Into<String>,
        func: F,
    ) where
        A: 'static,
        R: rhai::Variant + Clone,
        F: RhaiNativeFunc<A, N, C, R, L> + Clone + Send + Sync + 'static,
    {
        let name = name.into();
        self.add_init_step(move |engine: &mut Engine| {
            engine.register_fn(name.as_str(), func.clone());
        });
    }

    /// Adds a named value pushed into every context's scope.
    pub fn add_global(&mut self, name: impl Into<String>, value: Dynamic) {
        self.globals.push((name.into(), value));
    }
}

/// How one evaluation on a context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// The body ran to its natural end.
    Finished,
    /// The script explicitly requested termination via `quit()`.
    Quit,
    /// Evaluation was stopped by the cancellation flag.
    Cancelled,
    /// The script failed with a runtime or parse error.
    Failed(String),
}

/// One isolated interpreter instance plus its native bindings.
///
/// Owned exclusively by the script runner; moved onto a dedicated blocking
/// worker for each evaluation and returned afterwards.
pub struct ExecutionContext {
    engine: Engine,
    scope: Scope<'static>,
    cancel: Arc<AtomicBool>,
    quit: Arc<AtomicBool>,
}

impl ExecutionContext {
    /// Creates a fresh context from the bindings registry.
    pub fn new(bindings: &ScriptBindings) -> Self {
        let mut engine = Engine::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let quit = Arc::new(AtomicBool::new(false));

        // Cancellation probe, polled at operation granularity.
        let cancel_probe = Arc::clone(&cancel);
        engine.on_progress(move |_| {
            if cancel_probe.load(Ordering::SeqCst) {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });

        // quit() marks explicit termination and stops evaluation.
        let quit_flag = Arc::clone(&quit);
        engine.register_fn("quit", move || -> Result<(), Box<EvalAltResult>> {
            quit_flag.store(true, Ordering::SeqCst);
            Err(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE).into())
        });

        for step in &bindings.init_steps {
            step(&mut engine);
        }

        let mut scope = Scope::new();
        for (name, value) in &bindings.globals {
            scope.push_dynamic(name.clone(), value.clone());
        }

        debug!("execution context created");
        Self {
            engine,
            scope,
            cancel,
            quit,
        }
    }

    /// Flag the runner raises to request cooperative cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Whether the script has called `quit()` on this context.
    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Evaluates a script body against this context's scope.
    ///
    /// Variables declared by earlier evaluations on the same context stay
    /// visible, which is what direct-command sequences rely on.
    pub fn eval(&mut self, script: &str) -> EvalOutcome {
        match self
            .engine
            .eval_with_scope::<Dynamic>(&mut self.scope, script)
        {
            Ok(_) => EvalOutcome::Finished,
            Err(error) => {
                if self.quit.load(Ordering::SeqCst) {
                    return EvalOutcome::Quit;
                }
                match *error {
                    EvalAltResult::ErrorTerminated(..) => EvalOutcome::Cancelled,
                    other => EvalOutcome::Failed(other.to_string()),
                }
            }
        }
    }
}
