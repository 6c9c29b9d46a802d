//! Script execution engine.
//!
//! This module manages the lifecycle of user automation scripts that drive
//! the hardware:
//!
//! ```text
//! ScriptRunner (actor, one per process)
//!     ├── ExecutionContext   one rhai Engine + Scope per execution
//!     ├── ScriptBindings     init steps + globals, read per context
//!     └── MotorHandle        script-side actuator access
//! ```
//!
//! The runner owns at most one live [`ExecutionContext`] at a time and
//! serializes run/direct-command/abort requests through a single actor task;
//! see [`runner`] for the state machine and [`context`] for the isolation
//! and cancellation model.

pub mod bindings;
pub mod context;
pub mod runner;

pub use bindings::{register_motor_api, MotorHandle};
pub use context::{EvalOutcome, ExecutionContext, InitStep, ScriptBindings};
pub use runner::{CompletionStatus, RunnerState, ScriptRunner};
