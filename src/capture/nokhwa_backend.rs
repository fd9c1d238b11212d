//! TEMP INVESTIGATION STUB — not the real backend. Restored before finishing.

use super::{CameraInfo, CaptureBackend, CaptureConfig, CaptureError};
use crate::frame::Frame;
use anyhow::Result;

pub struct NokhwaCapture {
    open: bool,
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        Ok(Vec::new())
    }

    fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        Err(CaptureError::DeviceUnavailable {
            index: config.device_index,
            reason: "stub".to_string(),
        })
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_frame(&mut self) -> Option<Frame> {
        None
    }

    fn frame_size(&self) -> (u32, u32) {
        (0, 0)
    }

    fn release(&mut self) {
        self.open = false;
    }
}
