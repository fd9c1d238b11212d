//! Webcam capture backends.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaCapture;

use crate::frame::Frame;
use anyhow::Result;
use thiserror::Error;

/// Errors raised while acquiring a capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened. Fatal at startup; the frame loop is
    /// never entered.
    #[error("capture device {index} unavailable: {reason}")]
    DeviceUnavailable { index: u32, reason: String },
}

/// Trait for webcam capture backends.
pub trait CaptureBackend {
    /// Returns a list of available camera devices.
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    /// Opens the camera with the specified configuration.
    fn open(config: CaptureConfig) -> Result<Self, CaptureError>
    where
        Self: Sized;

    /// Whether the device is still delivering frames.
    fn is_open(&self) -> bool;

    /// Pulls the next frame.
    ///
    /// `None` means end of stream: the device disconnected, the driver
    /// reported a read error, or a finite source ran out. The backend does
    /// not distinguish these cases and never retries.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);

    /// Releases the device. Idempotent; also fired on drop.
    fn release(&mut self);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 2,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}
