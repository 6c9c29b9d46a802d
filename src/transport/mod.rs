//! Command transport interface.
//!
//! The core never talks to a bus directly; it hands fixed-format binary
//! frames to a [`Communicator`] supplied by the embedding application. The
//! transport is fire-and-forget: `send` reports nothing synchronously and
//! delivery problems are only visible through `status()`.

pub mod mock;

/// Health of a device or link, ordered from best to worst so that
/// [`DeviceStatus::combine`] can take the worst of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceStatus {
    /// Operational.
    Ready,
    /// Initialization not finished yet.
    Starting,
    /// Unusable.
    Failure,
}

impl DeviceStatus {
    /// Worst of the two statuses.
    pub fn combine(self, other: DeviceStatus) -> DeviceStatus {
        self.max(other)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Ready
    }
}

/// Command/response transport used by actuator drivers.
///
/// `send` is fire-and-forget by design: the underlying bus offers no
/// acknowledgement, so failures surface only through [`Communicator::status`].
pub trait Communicator: Send + Sync {
    /// Queues one binary command frame for transmission.
    fn send(&self, frame: &[u8]);

    /// Current link status.
    fn status(&self) -> DeviceStatus;
}
