//! The frame loop: capture, detect, annotate, present, poll.

use crate::capture::CaptureBackend;
use crate::detector::DetectSession;
use crate::display::{Key, PresentSurface, SurfaceEvent};
use crate::frame::ChannelOrder;
use crate::overlay;
use crate::util::FpsCounter;
use std::time::Duration;
use tracing::{debug, error};

/// How long each iteration waits for window events.
const POLL_WAIT: Duration = Duration::from_millis(5);

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The capture device stopped delivering frames.
    EndOfStream,
    /// The user pressed escape.
    EscapeKey,
    /// The user closed the window.
    WindowClosed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::EndOfStream => write!(f, "end of stream"),
            StopReason::EscapeKey => write!(f, "escape key"),
            StopReason::WindowClosed => write!(f, "window closed"),
        }
    }
}

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped(StopReason),
}

/// Drives the capture/detect/annotate/present cycle and owns the process-wide
/// resources for its duration.
pub struct FrameLoop<C, D, P> {
    capture: C,
    session: D,
    surface: P,
    state: LoopState,
    fps: FpsCounter,
}

impl<C: CaptureBackend, D: DetectSession, P: PresentSurface> FrameLoop<C, D, P> {
    pub fn new(capture: C, session: D, surface: P) -> Self {
        Self {
            capture,
            session,
            surface,
            state: LoopState::Idle,
            fps: FpsCounter::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs until end of stream, escape, or window close, then releases the
    /// capture device and the detection session.
    pub fn run(&mut self) -> StopReason {
        self.state = LoopState::Running;
        let reason = self.drive();
        self.capture.release();
        self.session.close();
        self.state = LoopState::Stopped(reason);
        reason
    }

    fn drive(&mut self) -> StopReason {
        while self.capture.is_open() {
            let Some(mut frame) = self.capture.read_frame() else {
                debug!("capture stream ended");
                return StopReason::EndOfStream;
            };

            // Dimensions come from this frame; the device may renegotiate
            // resolution between frames.
            let (width, height) = (frame.width(), frame.height());

            let detector_input = frame.converted(ChannelOrder::Rgb);
            match self.session.process(&detector_input) {
                Ok(faces) => {
                    for face in &faces {
                        overlay::annotate_face(&mut frame, face);
                    }
                }
                // The frame goes out unannotated; nothing was drawn yet.
                Err(e) => error!("face mesh processing error: {e}"),
            }

            if let Err(e) = self.surface.present(&frame) {
                error!("present error: {e}");
            }

            if let Some(fps) = self.fps.tick() {
                debug!("[Perf] Rendering at {:.2} FPS (Resolution: {}x{})", fps, width, height);
            }

            for event in self.surface.poll(POLL_WAIT) {
                match event {
                    SurfaceEvent::KeyPressed(Key::Escape) => return StopReason::EscapeKey,
                    SurfaceEvent::KeyPressed(_) => {}
                    SurfaceEvent::CloseRequested => return StopReason::WindowClosed,
                }
            }
        }
        StopReason::EndOfStream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraInfo, CaptureConfig, CaptureError};
    use crate::detector::{FaceLandmarks, Landmark, LANDMARK_COUNT};
    use crate::frame::Frame;
    use anyhow::Result;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Default)]
    struct Shared {
        reads: usize,
        released: usize,
        closed: usize,
        presented: Vec<Frame>,
    }

    type SharedHandle = Rc<RefCell<Shared>>;

    struct ScriptedCapture {
        frames: VecDeque<Frame>,
        shared: SharedHandle,
    }

    impl CaptureBackend for ScriptedCapture {
        fn list_devices() -> Result<Vec<CameraInfo>> {
            Ok(Vec::new())
        }

        fn open(_config: CaptureConfig) -> Result<Self, CaptureError> {
            unreachable!("tests construct the capture directly")
        }

        fn is_open(&self) -> bool {
            true
        }

        fn read_frame(&mut self) -> Option<Frame> {
            self.shared.borrow_mut().reads += 1;
            self.frames.pop_front()
        }

        fn frame_size(&self) -> (u32, u32) {
            (640, 480)
        }

        fn release(&mut self) {
            self.shared.borrow_mut().released += 1;
        }
    }

    struct StubSession {
        faces: Vec<FaceLandmarks>,
        fail: bool,
        shared: SharedHandle,
    }

    impl DetectSession for StubSession {
        fn process(&mut self, _frame: &Frame) -> Result<Vec<FaceLandmarks>> {
            if self.fail {
                anyhow::bail!("inference failed")
            }
            Ok(self.faces.clone())
        }

        fn close(&mut self) {
            self.shared.borrow_mut().closed += 1;
        }
    }

    struct ScriptedSurface {
        polls: VecDeque<Vec<SurfaceEvent>>,
        shared: SharedHandle,
    }

    impl PresentSurface for ScriptedSurface {
        fn present(&mut self, frame: &Frame) -> Result<()> {
            self.shared.borrow_mut().presented.push(frame.clone());
            Ok(())
        }

        fn poll(&mut self, _wait: Duration) -> Vec<SurfaceEvent> {
            self.polls.pop_front().unwrap_or_default()
        }
    }

    fn black_frame() -> Frame {
        Frame::new(640, 480, ChannelOrder::Rgb)
    }

    fn face_at(x: f32, y: f32) -> FaceLandmarks {
        FaceLandmarks::new(vec![Landmark { x, y, z: 0.0 }; LANDMARK_COUNT], 0.9)
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y * frame.width() + x) * 3) as usize;
        let d = frame.data();
        [d[idx], d[idx + 1], d[idx + 2]]
    }

    fn frame_loop(
        frame_count: usize,
        faces: Vec<FaceLandmarks>,
        fail: bool,
        polls: Vec<Vec<SurfaceEvent>>,
    ) -> (
        FrameLoop<ScriptedCapture, StubSession, ScriptedSurface>,
        SharedHandle,
    ) {
        let shared = SharedHandle::default();
        let capture = ScriptedCapture {
            frames: (0..frame_count).map(|_| black_frame()).collect(),
            shared: shared.clone(),
        };
        let session = StubSession {
            faces,
            fail,
            shared: shared.clone(),
        };
        let surface = ScriptedSurface {
            polls: polls.into(),
            shared: shared.clone(),
        };
        (FrameLoop::new(capture, session, surface), shared)
    }

    #[test]
    fn test_idle_until_run() {
        let (frame_loop, _) = frame_loop(0, Vec::new(), false, Vec::new());
        assert_eq!(frame_loop.state(), LoopState::Idle);
    }

    #[test]
    fn test_runs_until_stream_end_and_releases_once() {
        let (mut frame_loop, shared) = frame_loop(3, Vec::new(), false, Vec::new());
        let reason = frame_loop.run();

        assert_eq!(reason, StopReason::EndOfStream);
        assert_eq!(frame_loop.state(), LoopState::Stopped(StopReason::EndOfStream));
        let shared = shared.borrow();
        // 3 good frames, then the failed read that ends the stream.
        assert_eq!(shared.reads, 4);
        assert_eq!(shared.presented.len(), 3);
        assert_eq!(shared.released, 1);
        assert_eq!(shared.closed, 1);
    }

    #[test]
    fn test_zero_faces_presents_frame_untouched() {
        let (mut frame_loop, shared) = frame_loop(1, Vec::new(), false, Vec::new());
        frame_loop.run();

        let shared = shared.borrow();
        assert_eq!(shared.presented[0].data(), black_frame().data());
    }

    #[test]
    fn test_escape_stops_within_one_iteration() {
        let polls = vec![vec![SurfaceEvent::KeyPressed(Key::Escape)]];
        let (mut frame_loop, shared) = frame_loop(5, Vec::new(), false, polls);
        let reason = frame_loop.run();

        assert_eq!(reason, StopReason::EscapeKey);
        let shared = shared.borrow();
        // No further capture or present calls after the key was observed.
        assert_eq!(shared.reads, 1);
        assert_eq!(shared.presented.len(), 1);
        assert_eq!(shared.released, 1);
        assert_eq!(shared.closed, 1);
    }

    #[test]
    fn test_window_close_stops_loop() {
        let polls = vec![vec![SurfaceEvent::CloseRequested]];
        let (mut frame_loop, _) = frame_loop(5, Vec::new(), false, polls);
        assert_eq!(frame_loop.run(), StopReason::WindowClosed);
    }

    #[test]
    fn test_other_keys_do_not_stop_loop() {
        let polls = vec![vec![SurfaceEvent::KeyPressed(Key::Other)]];
        let (mut frame_loop, shared) = frame_loop(2, Vec::new(), false, polls);
        let reason = frame_loop.run();

        assert_eq!(reason, StopReason::EndOfStream);
        assert_eq!(shared.borrow().presented.len(), 2);
    }

    #[test]
    fn test_detected_face_is_annotated_at_truncated_coordinates() {
        let (mut frame_loop, shared) = frame_loop(1, vec![face_at(0.5, 0.5)], false, Vec::new());
        frame_loop.run();

        let shared = shared.borrow();
        // 0.5 * 640 = 320, 0.5 * 480 = 240
        assert_eq!(pixel(&shared.presented[0], 320, 240), [255, 0, 0]);
    }

    #[test]
    fn test_multiple_faces_accumulate_on_one_frame() {
        let faces = vec![face_at(0.25, 0.25), face_at(0.75, 0.75)];
        let (mut frame_loop, shared) = frame_loop(1, faces, false, Vec::new());
        frame_loop.run();

        let shared = shared.borrow();
        assert_eq!(shared.presented.len(), 1);
        assert_eq!(pixel(&shared.presented[0], 160, 120), [255, 0, 0]);
        assert_eq!(pixel(&shared.presented[0], 480, 360), [255, 0, 0]);
    }

    #[test]
    fn test_detection_error_presents_unannotated_and_continues() {
        let (mut frame_loop, shared) = frame_loop(2, vec![face_at(0.5, 0.5)], true, Vec::new());
        let reason = frame_loop.run();

        assert_eq!(reason, StopReason::EndOfStream);
        let shared = shared.borrow();
        assert_eq!(shared.presented.len(), 2);
        for frame in &shared.presented {
            assert_eq!(frame.data(), black_frame().data());
        }
        assert_eq!(shared.closed, 1);
    }
}
