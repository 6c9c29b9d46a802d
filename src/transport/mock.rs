//! Mock transport for testing without hardware.
//!
//! Records every frame handed to `send` so tests can assert on the exact
//! bytes a driver produced, and lets tests degrade the reported link status.

use std::sync::{Arc, Mutex};

use super::{Communicator, DeviceStatus};

/// In-memory [`Communicator`] that records sent frames.
#[derive(Clone, Default)]
pub struct MockCommunicator {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    status: Arc<Mutex<DeviceStatus>>,
}

impl MockCommunicator {
    /// Creates a mock with a `Ready` link.
    pub fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(Mutex::new(DeviceStatus::Ready)),
        }
    }

    /// All frames sent so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The most recently sent frame, if any.
    pub fn last_frame(&self) -> Option<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }

    /// Number of frames sent so far.
    pub fn sent_count(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Overrides the reported link status.
    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

impl Communicator for MockCommunicator {
    fn send(&self, frame: &[u8]) {
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(frame.to_vec());
    }

    fn status(&self) -> DeviceStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}
