//! Custom error types for the control core.
//!
//! This module defines the primary error type, `RoboError`, used across the
//! whole crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures the core can hit:
//!
//! - **`Config`**: file/format-level errors from the `figment` configuration
//!   loader (missing file, bad TOML and so on).
//! - **`MalformedConfig`**: semantic configuration errors that pass parsing
//!   but are logically invalid, such as a non-monotonic calibration point
//!   list. These are fatal at construction time; the affected device is never
//!   usable.
//! - **`UnknownPort`**: lookup failure against the per-port configuration.
//! - **`Internal`**: programming-contract violations, signalled synchronously
//!   to the caller and never retried.
//! - **`Script`**: script execution failures surfaced to callers that need a
//!   synchronous error. Per-execution outcomes travel through the runner's
//!   completion notifications instead.
//!
//! With `#[from]`, `RoboError` is created seamlessly from underlying error
//! types, so the `?` operator works throughout the crate.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type RoboResult<T> = std::result::Result<T, RoboError>;

#[derive(Error, Debug)]
pub enum RoboError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("No configuration for port '{0}'")]
    UnknownPort(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Script error: {0}")]
    Script(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RoboError::MalformedConfig("nonmonotonic calibration".to_string());
        assert_eq!(
            err.to_string(),
            "Malformed configuration: nonmonotonic calibration"
        );
    }

    #[test]
    fn test_unknown_port_display() {
        let err = RoboError::UnknownPort("M5".into());
        assert!(err.to_string().contains("M5"));
    }
}
