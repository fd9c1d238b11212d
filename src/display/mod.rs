//! Window display: presentation surface and bounded event polling.

mod window;

pub use window::DisplaySurface;

use crate::frame::Frame;
use anyhow::Result;
use std::time::Duration;

/// Keys the frame loop cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Escape,
    Other,
}

/// Events surfaced from the window to the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    KeyPressed(Key),
    CloseRequested,
}

/// Seam between the frame loop and the windowing stack.
pub trait PresentSurface {
    /// Shows a frame, scaled to the current window size.
    fn present(&mut self, frame: &Frame) -> Result<()>;

    /// Pumps window events for at most `wait`, returning what arrived.
    fn poll(&mut self, wait: Duration) -> Vec<SurfaceEvent>;
}
