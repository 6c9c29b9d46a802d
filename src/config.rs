//! Per-port device configuration.
//!
//! Actuator ports are described in a TOML file, with optional environment
//! overrides (prefix `ROBO_`), loaded through `figment`:
//!
//! ```toml
//! [ports.M1]
//! invert = "false"
//! i2cCommandNumber = 20
//! period = 5000
//! measures = "(0;0)(50;45)(100;100)"
//! ```
//!
//! Attribute semantics follow the device protocol they feed:
//!
//! - `invert` is textual; the string `"false"` disables inversion, any other
//!   value enables it.
//! - `i2cCommandNumber` addresses the actuator on the command bus.
//! - `period` is the default PWM period, sent once at driver construction.
//! - `measures` is the grouped `(raw;measured)` calibration point list, see
//!   [`crate::calibration::parse_measures`].

use std::collections::HashMap;
use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{RoboError, RoboResult};

/// Attributes of one configured actuator port.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    /// Textual inversion flag; `"false"` disables inversion.
    pub invert: String,
    /// Protocol command number addressing this port.
    #[serde(rename = "i2cCommandNumber")]
    pub i2c_command_number: i32,
    /// Default PWM period, applied at driver construction.
    pub period: i32,
    /// Grouped `(raw;measured)` calibration point list.
    pub measures: String,
}

impl PortConfig {
    /// Whether commands for this port must be sign-inverted.
    pub fn inverted(&self) -> bool {
        self.invert.trim() != "false"
    }
}

/// Full device configuration, keyed by port identifier.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Configured actuator ports.
    #[serde(default)]
    pub ports: HashMap<String, PortConfig>,
}

impl Settings {
    /// Loads settings from a TOML file merged with `ROBO_`-prefixed
    /// environment variables.
    pub fn load(path: impl AsRef<Path>) -> RoboResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ROBO_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Attributes for one port, failing with [`RoboError::UnknownPort`] when
    /// the port is not configured.
    pub fn port(&self, id: &str) -> RoboResult<&PortConfig> {
        self.ports
            .get(id)
            .ok_or_else(|| RoboError::UnknownPort(id.to_string()))
    }
}
