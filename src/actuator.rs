//! Calibrated power actuator driver.
//!
//! One [`PowerActuator`] exists per configured port. At construction it reads
//! the port's attributes, builds its calibration table and pushes the
//! configured default period to the device; afterwards it turns power
//! requests into fixed-format binary frames on the command transport.
//!
//! # Protocol
//!
//! | Command   | Bytes | Layout                                             |
//! |-----------|-------|----------------------------------------------------|
//! | set power | 3     | `[cmd_lo, cmd_hi, calibrated power as i8]`         |
//! | set period| 4     | `[(cmd - 4) low byte, 0, period_lo, period_hi]`    |
//!
//! # Thread safety
//!
//! The calibration table and command number are immutable after
//! construction. `current_power`/`current_period` are single-writer fields:
//! the runner guarantees that only the thread currently authorized to drive
//! the actuator calls the setters, so plain atomics are enough to make the
//! getters safe from any thread.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::calibration::{parse_measures, CalibrationTable, MAX_CONTROL, MIN_CONTROL};
use crate::config::Settings;
use crate::error::{RoboError, RoboResult};
use crate::transport::{Communicator, DeviceStatus};

/// Driver for one calibrated power actuator port.
pub struct PowerActuator {
    port: String,
    invert: bool,
    command_number: i32,
    current_power: AtomicI32,
    current_period: AtomicI32,
    table: CalibrationTable,
    communicator: Arc<dyn Communicator>,
    readiness: DeviceStatus,
}

impl PowerActuator {
    /// Builds the driver for `port` from the configured attributes.
    ///
    /// Construction is fatal on any configuration problem (unknown port,
    /// malformed or non-monotonic calibration data); a driver that fails to
    /// construct is never usable. On success the configured default period
    /// has already been sent to the device.
    pub fn new(
        port: &str,
        settings: &Settings,
        communicator: Arc<dyn Communicator>,
    ) -> RoboResult<Self> {
        let attributes = settings.port(port)?;
        let points = parse_measures(&attributes.measures)?;
        let table = CalibrationTable::build(&points)?;

        let actuator = Self {
            port: port.to_string(),
            invert: attributes.inverted(),
            command_number: attributes.i2c_command_number,
            current_power: AtomicI32::new(0),
            current_period: AtomicI32::new(attributes.period),
            table,
            communicator,
            readiness: DeviceStatus::Ready,
        };
        actuator.set_period(attributes.period);

        info!(port = %actuator.port, "power actuator ready");
        Ok(actuator)
    }

    /// Sets actuator power.
    ///
    /// `power` is stored verbatim as the observable current power, then
    /// linearized through the calibration table (negative values use the
    /// table with sign preserved) and inverted per port configuration before
    /// one 3-byte command frame is emitted.
    ///
    /// Constraining is mandatory: `constrain == false` fails with an
    /// internal error and sends nothing. The flag exists to make the
    /// contract explicit at call sites. Callers clamp `power` into
    /// [`Self::min_control`]`..=`[`Self::max_control`] beforehand.
    pub fn set_power(&self, power: i32, constrain: bool) -> RoboResult<()> {
        if !constrain {
            return Err(RoboError::Internal(
                "set_power called without mandatory constrain flag".into(),
            ));
        }

        self.current_power.store(power, Ordering::Relaxed);

        let calibrated = if power <= 0 {
            -self.table.get(-power)
        } else {
            self.table.get(power)
        };
        let calibrated = if self.invert { -calibrated } else { calibrated };

        debug!(port = %self.port, power, calibrated, "set power");
        self.communicator.send(&[
            (self.command_number & 0xFF) as u8,
            ((self.command_number >> 8) & 0xFF) as u8,
            (calibrated & 0xFF) as u8,
        ]);
        Ok(())
    }

    /// Last stored power request, before calibration.
    pub fn power(&self) -> i32 {
        self.current_power.load(Ordering::Relaxed)
    }

    /// Sets the PWM period and emits the 4-byte period command frame.
    pub fn set_period(&self, period: i32) {
        self.current_period.store(period, Ordering::Relaxed);
        debug!(port = %self.port, period, "set period");
        self.communicator.send(&[
            ((self.command_number - 4) & 0xFF) as u8,
            0,
            (period & 0xFF) as u8,
            ((period >> 8) & 0xFF) as u8,
        ]);
    }

    /// Last stored PWM period.
    pub fn period(&self) -> i32 {
        self.current_period.load(Ordering::Relaxed)
    }

    /// Drives the actuator to its safe state, equivalent to
    /// `set_power(0, true)`.
    pub fn power_off(&self) -> RoboResult<()> {
        self.set_power(0, true)
    }

    /// Worst-of the transport link status and this driver's readiness.
    pub fn status(&self) -> DeviceStatus {
        self.communicator.status().combine(self.readiness)
    }

    /// Port identifier this driver was built for.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Lowest accepted control magnitude.
    pub fn min_control(&self) -> i32 {
        MIN_CONTROL
    }

    /// Highest accepted control magnitude.
    pub fn max_control(&self) -> i32 {
        MAX_CONTROL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::transport::mock::MockCommunicator;

    fn settings(invert: &str) -> Settings {
        let mut settings = Settings::default();
        settings.ports.insert(
            "M1".into(),
            PortConfig {
                invert: invert.into(),
                i2c_command_number: 0x0114,
                period: 5000,
                measures: "(0;0)(50;50)(100;100)".into(),
            },
        );
        settings
    }

    fn actuator(invert: &str) -> (PowerActuator, MockCommunicator) {
        let mock = MockCommunicator::new();
        let actuator =
            PowerActuator::new("M1", &settings(invert), Arc::new(mock.clone())).unwrap();
        (actuator, mock)
    }

    #[test]
    fn test_construction_sends_default_period() {
        let (_actuator, mock) = actuator("false");
        // 0x0114 - 4 = 0x0110; period 5000 = 0x1388.
        assert_eq!(mock.sent_frames(), vec![vec![0x10, 0, 0x88, 0x13]]);
    }

    #[test]
    fn test_set_power_emits_calibrated_frame() {
        let (actuator, mock) = actuator("false");
        actuator.set_power(50, true).unwrap();
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x01, 50]));
        assert_eq!(actuator.power(), 50);
    }

    #[test]
    fn test_negative_power_preserves_sign() {
        let (actuator, mock) = actuator("false");
        actuator.set_power(-50, true).unwrap();
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x01, (-50i32 & 0xFF) as u8]));
        assert_eq!(actuator.power(), -50);
    }

    #[test]
    fn test_inverted_port_negates_output() {
        let (actuator, mock) = actuator("true");
        actuator.set_power(50, true).unwrap();
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x01, (-50i32 & 0xFF) as u8]));
        // The observable power stays the caller's value.
        assert_eq!(actuator.power(), 50);
    }

    #[test]
    fn test_unconstrained_set_power_fails_without_send() {
        let (actuator, mock) = actuator("false");
        let before = mock.sent_count();
        let result = actuator.set_power(30, false);
        assert!(matches!(result, Err(RoboError::Internal(_))));
        assert_eq!(mock.sent_count(), before);
        assert_eq!(actuator.power(), 0);
    }

    #[test]
    fn test_power_off_is_zero_set_power() {
        let (actuator, mock) = actuator("false");
        actuator.set_power(80, true).unwrap();
        actuator.power_off().unwrap();
        assert_eq!(mock.last_frame(), Some(vec![0x14, 0x01, 0]));
        assert_eq!(actuator.power(), 0);
    }

    #[test]
    fn test_set_period_updates_getter() {
        let (actuator, mock) = actuator("false");
        actuator.set_period(300);
        assert_eq!(actuator.period(), 300);
        assert_eq!(mock.last_frame(), Some(vec![0x10, 0, 0x2C, 0x01]));
    }

    #[test]
    fn test_status_combines_link_and_readiness() {
        let (actuator, mock) = actuator("false");
        assert_eq!(actuator.status(), DeviceStatus::Ready);
        mock.set_status(DeviceStatus::Failure);
        assert_eq!(actuator.status(), DeviceStatus::Failure);
    }

    #[test]
    fn test_unknown_port_fails_construction() {
        let result = PowerActuator::new(
            "M9",
            &settings("false"),
            Arc::new(MockCommunicator::new()),
        );
        assert!(matches!(result, Err(RoboError::UnknownPort(_))));
    }

    #[test]
    fn test_bad_calibration_fails_construction() {
        let mut settings = settings("false");
        settings.ports.get_mut("M1").unwrap().measures = "(0;0)(80;90)(60;100)".into();
        let mock = MockCommunicator::new();
        let result = PowerActuator::new("M1", &settings, Arc::new(mock.clone()));
        assert!(matches!(result, Err(RoboError::MalformedConfig(_))));
        // A driver that failed to construct must not have touched the bus.
        assert_eq!(mock.sent_count(), 0);
    }

    #[test]
    fn test_control_range_constants() {
        let (actuator, _mock) = actuator("false");
        assert_eq!(actuator.min_control(), -100);
        assert_eq!(actuator.max_control(), 100);
    }
}
