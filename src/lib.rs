//! Actuator-control and script-orchestration core for robot middleware.
//!
//! Two tightly coupled pieces live here: calibrated actuator drivers that
//! turn host power commands into fixed-format binary frames on a command
//! transport, and a script runner that executes user automation scripts, one
//! at a time and with deterministic cancellation, calling into those drivers
//! through registered native bindings.

pub mod actuator;
pub mod calibration;
pub mod config;
pub mod error;
pub mod scripting;
pub mod transport;

pub use actuator::PowerActuator;
pub use error::{RoboError, RoboResult};
pub use scripting::{CompletionStatus, RunnerState, ScriptBindings, ScriptRunner};
