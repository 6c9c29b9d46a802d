//! Piecewise-linear calibration of actuator control values.
//!
//! Physical actuators rarely respond linearly to their raw drive value, so
//! each port is configured with a list of `(raw; measured)` calibration
//! points taken on the bench. This module turns that list into a fixed-size
//! lookup table mapping every integer control magnitude in
//! `0..=MAX_CONTROL` to the raw drive value that produces it.
//!
//! The table is built once at driver construction and is immutable
//! afterwards, which makes it safe to share by reference across threads.
//!
//! # Algorithm
//!
//! Measured outputs are normalized to the control range by scaling against
//! the final point's measured value (the final point is defined to be the
//! maximum). Each integer magnitude is then bracketed by the closest pair of
//! normalized points and the raw value is linearly interpolated along that
//! segment. Non-monotonic input (a non-positive delta on either axis between
//! consecutive points) is a fatal configuration error.

use crate::error::{RoboError, RoboResult};

/// Lower bound of the accepted control magnitude range.
pub const MIN_CONTROL: i32 = -100;

/// Upper bound of the accepted control magnitude range.
pub const MAX_CONTROL: i32 = 100;

/// One configured calibration measurement: the raw drive value sent to the
/// hardware and the output measured for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// Raw drive value handed to the device.
    pub raw: f64,
    /// Output measured at that drive value.
    pub measured: f64,
}

/// Precomputed control-magnitude to raw-drive-value mapping.
///
/// Holds exactly `MAX_CONTROL + 1` entries, indexed by magnitude `0..=100`.
/// The raw value sequence is non-decreasing and the final entry is exactly
/// the configured maximum raw value.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    entries: Vec<i32>,
}

impl CalibrationTable {
    /// Builds the table from an ordered calibration point list.
    ///
    /// Fails with [`RoboError::MalformedConfig`] when fewer than two points
    /// are given or when any consecutive pair is non-monotonic in either
    /// axis. Magnitudes below the first normalized point extrapolate along
    /// the first segment.
    pub fn build(points: &[CalibrationPoint]) -> RoboResult<Self> {
        if points.len() < 2 {
            return Err(RoboError::MalformedConfig(
                "calibration requires at least two points".into(),
            ));
        }

        let max_measured = points[points.len() - 1].measured;
        if max_measured <= 0.0 {
            return Err(RoboError::MalformedConfig(
                "final calibration point must have a positive measured value".into(),
            ));
        }

        // Normalize measured outputs to the control range; the last point is
        // the defined maximum and lands exactly on MAX_CONTROL.
        let normalized: Vec<CalibrationPoint> = points
            .iter()
            .map(|p| CalibrationPoint {
                raw: p.raw,
                measured: p.measured * f64::from(MAX_CONTROL) / max_measured,
            })
            .collect();

        for pair in normalized.windows(2) {
            let d_measured = pair[1].measured - pair[0].measured;
            let d_raw = pair[1].raw - pair[0].raw;
            if d_measured <= 0.0 || d_raw <= 0.0 {
                return Err(RoboError::MalformedConfig(
                    "nonmonotonic calibration data".into(),
                ));
            }
        }

        let mut entries = Vec::with_capacity((MAX_CONTROL + 1) as usize);
        for i in 0..MAX_CONTROL {
            let magnitude = f64::from(i);
            // Greatest k whose normalized output does not exceed the target
            // magnitude; below the first point this clamps to the first
            // segment and extrapolates.
            let k = normalized
                .iter()
                .rposition(|p| p.measured <= magnitude)
                .unwrap_or(0)
                .min(normalized.len() - 2);

            let slope =
                (normalized[k + 1].raw - normalized[k].raw)
                    / (normalized[k + 1].measured - normalized[k].measured);
            let raw = normalized[k].raw + slope * (magnitude - normalized[k].measured);
            entries.push(raw as i32);
        }
        // Pin the boundary to the configured maximum raw value instead of
        // interpolating it.
        entries.push(points[points.len() - 1].raw as i32);

        Ok(Self { entries })
    }

    /// Raw drive value for the given control magnitude, clamped into the
    /// table's index range.
    pub fn get(&self, magnitude: i32) -> i32 {
        let index = magnitude.clamp(0, MAX_CONTROL) as usize;
        self.entries[index]
    }

    /// Number of entries in the table (always `MAX_CONTROL + 1`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; the table is never empty after construction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses the textual calibration form used by the port configuration:
/// parenthesis-delimited groups with semicolon-separated values, e.g.
/// `"(0;0)(50;45)(100;100)"`.
pub fn parse_measures(text: &str) -> RoboResult<Vec<CalibrationPoint>> {
    let mut points = Vec::new();
    for group in text.split(')') {
        let group = group.trim();
        if group.is_empty() {
            continue;
        }
        let body = group.strip_prefix('(').ok_or_else(|| {
            RoboError::MalformedConfig(format!("calibration group '{group}' is not parenthesized"))
        })?;
        let mut values = body.split(';');
        let raw = parse_value(values.next(), group)?;
        let measured = parse_value(values.next(), group)?;
        if values.next().is_some() {
            return Err(RoboError::MalformedConfig(format!(
                "calibration group '{group}' has more than two values"
            )));
        }
        points.push(CalibrationPoint { raw, measured });
    }

    if points.len() < 2 {
        return Err(RoboError::MalformedConfig(
            "calibration requires at least two points".into(),
        ));
    }
    Ok(points)
}

fn parse_value(value: Option<&str>, group: &str) -> RoboResult<f64> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<f64>().ok())
        .ok_or_else(|| {
            RoboError::MalformedConfig(format!("calibration group '{group}' is malformed"))
        })
}
