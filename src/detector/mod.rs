//! Face-mesh detection: a face-proposal stage, a 468-point landmark stage,
//! and the streaming session that tracks regions of interest across frames.

mod landmark;
mod proposal;
pub mod topology;

pub use landmark::{LandmarkNet, LANDMARK_COUNT};
pub use proposal::FaceProposer;

use crate::frame::{ChannelOrder, Frame};
use anyhow::{anyhow, ensure, Result};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Expansion applied to a face box or landmark extent to produce the square
/// region handed to the landmark model.
pub(crate) const ROI_EXPANSION: f32 = 1.5;

/// Tracked regions closer than this are considered the same face.
const DUPLICATE_IOU: f32 = 0.5;

/// Errors raised while loading the detection models.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    Missing(std::path::PathBuf),
    #[error("failed to load model: {0}")]
    Load(#[from] ort::Error),
}

// The session-builder option methods return a recoverable `ort::Error`
// parameterized by the builder; erase the recover handle (which this code
// never uses) so `?` can convert into `ModelError::Load`.
impl From<ort::Error<ort::session::builder::SessionBuilder>> for ModelError {
    fn from(err: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        ModelError::Load(err.into())
    }
}

/// Initialize the ONNX Runtime environment.
/// This should be called once at startup.
pub fn init_runtime() -> Result<()> {
    ort::init().with_name("meshcam").commit();
    Ok(())
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// A single landmark in frame-normalized coordinates.
///
/// `x` and `y` are fractions of frame width and height; `z` is model-relative
/// depth, carried but unused by rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Ordered landmark sequence for one detected face.
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    points: Vec<Landmark>,
    score: f32,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Landmark>, score: f32) -> Self {
        Self { points, score }
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    /// Model presence score for this face.
    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Face region of interest in frame-normalized coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormRect {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
}

impl NormRect {
    pub fn left(&self) -> f32 {
        self.x_center - self.width / 2.0
    }

    pub fn top(&self) -> f32 {
        self.y_center - self.height / 2.0
    }

    pub(crate) fn iou(&self, other: &NormRect) -> f32 {
        let x1 = self.left().max(other.left());
        let y1 = self.top().max(other.top());
        let x2 = (self.left() + self.width).min(other.left() + other.width);
        let y2 = (self.top() + self.height).min(other.top() + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width * self.height + other.width * other.height - inter;
        inter / union
    }
}

/// Detection session configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Streaming mode carries regions of interest between frames so the
    /// proposal stage only re-runs when a tracking slot is free. Static mode
    /// re-runs it on every frame.
    pub streaming: bool,
    /// Upper bound on simultaneously tracked faces.
    pub max_faces: usize,
    /// Minimum score for a proposal or a tracked face to survive.
    pub min_confidence: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            max_faces: 3,
            min_confidence: 0.5,
        }
    }
}

/// Seam between the frame loop and the detection stack.
pub trait DetectSession {
    /// Runs detection on an RGB frame, returning zero or more faces.
    fn process(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarks>>;

    /// Releases the model sessions. Idempotent; also fired on drop.
    fn close(&mut self);
}

struct Stages {
    proposer: FaceProposer,
    landmarker: LandmarkNet,
}

/// Scoped face-mesh detection session backed by two ONNX Runtime sessions.
pub struct FaceMeshSession {
    config: SessionConfig,
    stages: Option<Stages>,
    tracked: Vec<NormRect>,
}

impl FaceMeshSession {
    /// Loads `blazeface.onnx` and `face_landmark.onnx` from `model_dir`.
    pub fn new(config: SessionConfig, model_dir: &Path) -> Result<Self, ModelError> {
        let proposer = FaceProposer::new(&model_dir.join("blazeface.onnx"))?;
        let landmarker = LandmarkNet::new(&model_dir.join("face_landmark.onnx"))?;
        Ok(Self {
            config,
            stages: Some(Stages {
                proposer,
                landmarker,
            }),
            tracked: Vec::new(),
        })
    }
}

impl DetectSession for FaceMeshSession {
    fn process(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarks>> {
        ensure!(
            frame.order() == ChannelOrder::Rgb,
            "detection requires an RGB frame"
        );
        let stages = self
            .stages
            .as_mut()
            .ok_or_else(|| anyhow!("session is closed"))?;

        let mut rois = std::mem::take(&mut self.tracked);
        if !self.config.streaming {
            rois.clear();
        }
        if rois.len() < self.config.max_faces {
            let proposals =
                stages
                    .proposer
                    .propose(frame, self.config.min_confidence, self.config.max_faces)?;
            rois = merge_rois(rois, proposals, self.config.max_faces);
        }

        let mut faces = Vec::new();
        for roi in &rois {
            let face = stages.landmarker.infer(frame, roi)?;
            if face.score() >= self.config.min_confidence {
                if self.config.streaming {
                    self.tracked.push(landmark::roi_from_landmarks(
                        &face,
                        frame.width(),
                        frame.height(),
                    ));
                }
                faces.push(face);
            }
        }
        Ok(faces)
    }

    fn close(&mut self) {
        if self.stages.take().is_some() {
            self.tracked.clear();
            debug!("face mesh session released");
        }
    }
}

impl Drop for FaceMeshSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keeps tracked regions and appends non-overlapping proposals, capped at
/// `max_faces`.
fn merge_rois(tracked: Vec<NormRect>, proposals: Vec<NormRect>, max_faces: usize) -> Vec<NormRect> {
    let mut rois = tracked;
    rois.truncate(max_faces);
    for proposal in proposals {
        if rois.len() >= max_faces {
            break;
        }
        if rois.iter().all(|r| r.iou(&proposal) < DUPLICATE_IOU) {
            rois.push(proposal);
        }
    }
    rois
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(x_center: f32, y_center: f32, width: f32, height: f32) -> NormRect {
        NormRect {
            x_center,
            y_center,
            width,
            height,
        }
    }

    #[test]
    fn test_sigmoid_zero() {
        assert_relative_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn test_sigmoid_saturates() {
        assert!(sigmoid(10.0) > 0.999);
        assert!(sigmoid(-10.0) < 0.001);
    }

    #[test]
    fn test_iou_identical_rects() {
        let r = rect(0.5, 0.5, 0.2, 0.2);
        assert_relative_eq!(r.iou(&r), 1.0);
    }

    #[test]
    fn test_iou_disjoint_rects() {
        let a = rect(0.2, 0.2, 0.1, 0.1);
        let b = rect(0.8, 0.8, 0.1, 0.1);
        assert_relative_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        // b covers the right half of a, and a the left half of b.
        let a = rect(0.4, 0.5, 0.2, 0.2);
        let b = rect(0.5, 0.5, 0.2, 0.2);
        // intersection 0.1*0.2, union 2*0.04 - 0.02
        assert_relative_eq!(a.iou(&b), 0.02 / 0.06, epsilon = 1e-6);
    }

    #[test]
    fn test_merge_rois_deduplicates() {
        let tracked = vec![rect(0.5, 0.5, 0.2, 0.2)];
        let proposals = vec![rect(0.5, 0.5, 0.2, 0.2), rect(0.1, 0.1, 0.1, 0.1)];
        let merged = merge_rois(tracked, proposals, 3);
        assert_eq!(merged.len(), 2);
        assert_relative_eq!(merged[1].x_center, 0.1);
    }

    #[test]
    fn test_merge_rois_caps_at_max_faces() {
        let proposals = vec![
            rect(0.1, 0.1, 0.05, 0.05),
            rect(0.5, 0.5, 0.05, 0.05),
            rect(0.9, 0.9, 0.05, 0.05),
        ];
        let merged = merge_rois(Vec::new(), proposals, 2);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_rois_keeps_tracked_first() {
        let tracked = vec![rect(0.3, 0.3, 0.2, 0.2)];
        let proposals = vec![rect(0.7, 0.7, 0.2, 0.2)];
        let merged = merge_rois(tracked, proposals, 3);
        assert_relative_eq!(merged[0].x_center, 0.3);
        assert_relative_eq!(merged[1].x_center, 0.7);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert!(config.streaming);
        assert_eq!(config.max_faces, 3);
        assert_relative_eq!(config.min_confidence, 0.5);
    }

    #[test]
    fn test_face_landmarks_accessors() {
        let face = FaceLandmarks::new(
            vec![Landmark {
                x: 0.1,
                y: 0.2,
                z: 0.0,
            }],
            0.8,
        );
        assert_eq!(face.len(), 1);
        assert!(!face.is_empty());
        assert!(face.get(0).is_some());
        assert!(face.get(1).is_none());
        assert_relative_eq!(face.score(), 0.8);
    }
}
