//! Script runner: lifecycle orchestration for script executions.
//!
//! The runner is an actor task fed by a request channel. All state
//! transitions happen inside that single task, which is what enforces the
//! core invariant: at most one execution context is alive at any instant,
//! and native bindings are never invoked concurrently from two executions.
//!
//! Script evaluation itself runs on a dedicated blocking worker
//! (`spawn_blocking`); the actor stays responsive to abort/replace requests
//! while a script is in flight and raises the context's cancellation flag
//! when asked to stop it. Teardown is always acknowledged: the worker must
//! hand its context back before the next execution may start, so two
//! contexts never overlap even when a running script is replaced.
//!
//! Every finished execution drives the bound actuators to their safe state
//! and emits one completion notification, in completion order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rhai::{Dynamic, Engine, RhaiNativeFunc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::actuator::PowerActuator;
use crate::scripting::bindings::{register_motor_api, MotorHandle};
use crate::scripting::context::{EvalOutcome, ExecutionContext, InitStep, ScriptBindings};

/// Orchestrator state, observable through [`ScriptRunner::state_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// No execution in flight.
    Idle,
    /// A script run is evaluating.
    Running,
    /// A direct command is evaluating.
    DirectCommandActive,
    /// Cancellation requested, waiting for the worker to acknowledge.
    Aborting,
}

/// How a finished execution ended; the completion notification payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Ran to its natural end or requested termination via `quit()`.
    Success,
    /// Stopped by `abort()` or superseded by a newer execution.
    Aborted,
    /// Failed with a script error.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionMode {
    ScriptRun,
    DirectCommand,
}

struct Execution {
    script: String,
    source_name: String,
    mode: ExecutionMode,
}

struct LiveExecution {
    mode: ExecutionMode,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<(ExecutionContext, EvalOutcome)>,
}

enum RunnerRequest {
    Run { script: String, source_name: String },
    DirectCommand { command: String },
    Abort,
    Beep,
    AddInitStep(InitStep),
    BindActuator { name: String, actuator: Arc<PowerActuator> },
    SetBeepAction(Arc<dyn Fn() + Send + Sync>),
}

/// Handle to the script runner actor.
///
/// Cheap to clone; all operations are non-blocking sends to the actor task
/// and completion is observed asynchronously via
/// [`ScriptRunner::subscribe_completions`]. Must be created inside a tokio
/// runtime.
#[derive(Clone)]
pub struct ScriptRunner {
    requests: mpsc::UnboundedSender<RunnerRequest>,
    completions: broadcast::Sender<CompletionStatus>,
    state: watch::Receiver<RunnerState>,
}

impl ScriptRunner {
    /// Spawns the runner actor with an empty bindings registry.
    pub fn new() -> Self {
        Self::with_bindings(ScriptBindings::new())
    }

    /// Spawns the runner actor with a pre-populated bindings registry.
    pub fn with_bindings(bindings: ScriptBindings) -> Self {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (completions, _) = broadcast::channel(16);
        let (state_tx, state) = watch::channel(RunnerState::Idle);

        let actor = RunnerActor {
            bindings,
            actuators: Vec::new(),
            beep_action: Arc::new(|| info!("beep")),
            completions: completions.clone(),
            state: state_tx,
            idle_context: None,
            pending: VecDeque::new(),
        };
        tokio::spawn(actor.run(request_rx));

        Self {
            requests,
            completions,
            state,
        }
    }

    /// Executes a script asynchronously on a fresh execution context.
    ///
    /// Any execution already in flight is aborted first; its completion
    /// notification (status aborted) is emitted before the new execution
    /// starts. The script counts as finished when its body ends, when it
    /// calls `quit()`, or when aborted; the runner then resets all bound
    /// actuators, destroys the context and notifies completion.
    ///
    /// Top-level statements in the body should be limited to declarations:
    /// the body is evaluated as a whole against a private engine instance,
    /// so top-level side effects would repeat on every invocation of a
    /// function from the same body.
    pub fn run(&self, script: impl Into<String>, source_name: impl Into<String>) {
        let _ = self.requests.send(RunnerRequest::Run {
            script: script.into(),
            source_name: source_name.into(),
        });
    }

    /// Executes a script fragment against the persistent direct-command
    /// context, creating one if none is live.
    ///
    /// Unlike [`ScriptRunner::run`], execution state is not reset before or
    /// after: variables set by one direct command are visible to the next.
    /// The sequence finishes when a command calls `quit()` (or fails, or is
    /// aborted), at which point the same reset/teardown/notify sequence as
    /// for a script run applies.
    pub fn run_direct_command(&self, command: impl Into<String>) {
        let _ = self.requests.send(RunnerRequest::DirectCommand {
            command: command.into(),
        });
    }

    /// Requests cancellation of whatever is live. A no-op on an idle runner
    /// with no persistent context.
    pub fn abort(&self) {
        let _ = self.requests.send(RunnerRequest::Abort);
    }

    /// Fire-and-forget audible signal, usable independent of script state.
    pub fn beep(&self) {
        let _ = self.requests.send(RunnerRequest::Beep);
    }

    /// Replaces the action invoked by [`ScriptRunner::beep`].
    pub fn set_beep_action(&self, action: impl Fn() + Send + Sync + 'static) {
        let _ = self
            .requests
            .send(RunnerRequest::SetBeepAction(Arc::new(action)));
    }

    /// Registers a native function as callable from scripts, with the given
    /// name. Applies to every context created afterwards.
    pub fn register_user_function<A, const N: usize, const C: bool, R, const L: bool, F>(
        &self,
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

    /// Adds a custom engine initialization step applied to every context
    /// created afterwards.
    pub fn add_init_step(&self, step: impl Fn(&mut Engine) + Send + Sync + 'static) {
        let _ = self
            .requests
            .send(RunnerRequest::AddInitStep(Arc::new(step)));
    }

    /// Exposes an actuator to scripts under `name` and enrolls it for
    /// safe-state reset at the end of every execution.
    pub fn bind_actuator(&self, name: impl Into<String>, actuator: Arc<PowerActuator>) {
        let _ = self.requests.send(RunnerRequest::BindActuator {
            name: name.into(),
            actuator,
        });
    }

    /// Subscribes to completion notifications, emitted once per finished
    /// execution in completion order.
    pub fn subscribe_completions(&self) -> broadcast::Receiver<CompletionStatus> {
        self.completions.subscribe()
    }

    /// Current orchestrator state.
    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }

    /// Watch channel following orchestrator state transitions.
    pub fn state_changes(&self) -> watch::Receiver<RunnerState> {
        self.state.clone()
    }
}

impl Default for ScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Actor
// =============================================================================

enum Event {
    Request(Option<RunnerRequest>),
    Finished(Result<(ExecutionContext, EvalOutcome), JoinError>),
}

struct RunnerActor {
    bindings: ScriptBindings,
    actuators: Vec<Arc<PowerActuator>>,
    beep_action: Arc<dyn Fn() + Send + Sync>,
    completions: broadcast::Sender<CompletionStatus>,
    state: watch::Sender<RunnerState>,
    idle_context: Option<ExecutionContext>,
    pending: VecDeque<Execution>,
}

impl RunnerActor {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RunnerRequest>) {
        debug!("script runner actor started");

        let mut live: Option<LiveExecution> = None;
        loop {
            let event = if let Some(current) = live.as_mut() {
                tokio::select! {
                    request = requests.recv() => Event::Request(request),
                    joined = &mut current.handle => Event::Finished(joined),
                }
            } else {
                Event::Request(requests.recv().await)
            };

            match event {
                Event::Request(Some(request)) => self.handle_request(request, &mut live),
                Event::Request(None) => {
                    // All handles dropped: cancel anything in flight and stop.
                    if let Some(current) = live.take() {
                        current.cancel.store(true, Ordering::SeqCst);
                        let joined = current.handle.await;
                        self.finish(current.mode, true, joined);
                    }
                    if self.idle_context.take().is_some() {
                        self.reset_actuators();
                    }
                    break;
                }
                Event::Finished(joined) => {
                    if let Some(current) = live.take() {
                        let cancelled = current.cancel.load(Ordering::SeqCst);
                        self.finish(current.mode, cancelled, joined);
                    }
                    self.start_pending(&mut live);
                }
            }
        }

        info!("script runner actor stopped");
    }

    fn handle_request(&mut self, request: RunnerRequest, live: &mut Option<LiveExecution>) {
        match request {
            RunnerRequest::Run {
                script,
                source_name,
            } => {
                let execution = Execution {
                    script,
                    source_name,
                    mode: ExecutionMode::ScriptRun,
                };
                // A new run supersedes whatever was queued or in flight.
                self.pending.clear();
                self.pending.push_back(execution);
                if let Some(current) = live.as_ref() {
                    self.request_cancel(current);
                } else {
                    self.start_pending(live);
                }
            }

            RunnerRequest::DirectCommand { command } => {
                let execution = Execution {
                    script: command,
                    source_name: String::new(),
                    mode: ExecutionMode::DirectCommand,
                };
                self.pending.push_back(execution);
                match live.as_ref() {
                    // Direct commands queue up behind the one evaluating.
                    Some(current) if current.mode == ExecutionMode::DirectCommand => {}
                    // A live script run holds the single-context slot; it
                    // must be aborted before the direct command can start.
                    Some(current) => self.request_cancel(current),
                    None => self.start_pending(live),
                }
            }

            RunnerRequest::Abort => {
                self.pending.clear();
                if let Some(current) = live.as_ref() {
                    self.request_cancel(current);
                } else if self.idle_context.take().is_some() {
                    // A persistent direct-command session counts as live
                    // state; aborting it tears it down like any execution.
                    info!("aborting persistent direct command session");
                    self.reset_actuators();
                    self.notify(CompletionStatus::Aborted);
                }
            }

            RunnerRequest::Beep => (self.beep_action)(),

            RunnerRequest::AddInitStep(step) => self.bindings.add_init_step_arc(step),

            RunnerRequest::BindActuator { name, actuator } => {
                // The Motor API is shared by all handles; one init step
                // registers it for every context.
                if self.actuators.is_empty() {
                    self.bindings.add_init_step(register_motor_api);
                }
                self.bindings.add_global(
                    name,
                    Dynamic::from(MotorHandle::new(Arc::clone(&actuator))),
                );
                self.actuators.push(actuator);
            }

            RunnerRequest::SetBeepAction(action) => self.beep_action = action,
        }
    }

    fn request_cancel(&self, current: &LiveExecution) {
        debug!("requesting cooperative cancellation");
        current.cancel.store(true, Ordering::SeqCst);
        self.state.send_replace(RunnerState::Aborting);
    }

    fn start_pending(&mut self, live: &mut Option<LiveExecution>) {
        if live.is_some() {
            return;
        }
        if let Some(execution) = self.pending.pop_front() {
            *live = Some(self.start_execution(execution));
        }
    }

    fn start_execution(&mut self, execution: Execution) -> LiveExecution {
        let (mut context, state) = match execution.mode {
            ExecutionMode::ScriptRun => {
                // A fresh run never reuses state; a leftover direct-command
                // session is superseded and torn down first.
                if self.idle_context.take().is_some() {
                    self.reset_actuators();
                    self.notify(CompletionStatus::Aborted);
                }
                (ExecutionContext::new(&self.bindings), RunnerState::Running)
            }
            ExecutionMode::DirectCommand => {
                let context = self
                    .idle_context
                    .take()
                    .unwrap_or_else(|| ExecutionContext::new(&self.bindings));
                (context, RunnerState::DirectCommandActive)
            }
        };

        info!(source = %execution.source_name, mode = ?execution.mode, "starting execution");
        self.state.send_replace(state);

        let cancel = context.cancel_flag();
        let script = execution.script;
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = context.eval(&script);
            (context, outcome)
        });

        LiveExecution {
            mode: execution.mode,
            cancel,
            handle,
        }
    }

    fn finish(
        &mut self,
        mode: ExecutionMode,
        cancel_requested: bool,
        joined: Result<(ExecutionContext, EvalOutcome), JoinError>,
    ) {
        match joined {
            Err(join_error) => {
                warn!(%join_error, "execution worker failed");
                self.reset_actuators();
                self.notify(CompletionStatus::Error);
            }
            Ok((context, outcome)) => {
                // An execution that finished right as cancellation was
                // requested still counts as aborted; otherwise a cancelled
                // direct command could slip through with no notification.
                let outcome = if cancel_requested {
                    EvalOutcome::Cancelled
                } else {
                    outcome
                };
                self.finish_with_outcome(mode, context, outcome);
            }
        }

        self.state.send_replace(RunnerState::Idle);
    }

    fn finish_with_outcome(
        &mut self,
        mode: ExecutionMode,
        context: ExecutionContext,
        outcome: EvalOutcome,
    ) {
        match (mode, outcome) {
            // A direct command that neither quit nor failed keeps its
            // context for the next command; the session is not finished.
            (ExecutionMode::DirectCommand, EvalOutcome::Finished) => {
                self.idle_context = Some(context);
            }
            (_, EvalOutcome::Finished) | (_, EvalOutcome::Quit) => {
                drop(context);
                self.reset_actuators();
                self.notify(CompletionStatus::Success);
            }
            (_, EvalOutcome::Cancelled) => {
                drop(context);
                self.reset_actuators();
                self.notify(CompletionStatus::Aborted);
            }
            (_, EvalOutcome::Failed(message)) => {
                warn!(%message, "script failed");
                drop(context);
                self.reset_actuators();
                self.notify(CompletionStatus::Error);
            }
        }
    }

    /// Safe-state reset: every bound actuator is powered off, on every
    /// finish path.
    fn reset_actuators(&self) {
        for actuator in &self.actuators {
            if let Err(error) = actuator.power_off() {
                warn!(port = actuator.port(), %error, "failed to reset actuator");
            }
        }
    }

    fn notify(&self, status: CompletionStatus) {
        info!(?status, "execution completed");
        let _ = self.completions.send(status);
    }
}
