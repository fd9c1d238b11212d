//! Face-proposal stage: a short-range BlazeFace detector that produces
//! square regions of interest for the landmark stage.

use super::{sigmoid, ModelError, NormRect, ROI_EXPANSION};
use crate::frame::Frame;
use anyhow::Result;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;

/// Model input resolution.
const INPUT_SIZE: u32 = 128;

/// Anchor count of the short-range model.
const NUM_ANCHORS: usize = 896;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f32 = 0.3;

/// Face proposal detector backed by an ONNX Runtime session.
pub struct FaceProposer {
    session: Session,
    anchors: Vec<[f32; 2]>,
}

impl FaceProposer {
    /// Loads the short-range BlazeFace model.
    pub fn new(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::Missing(model_path.to_path_buf()));
        }
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;
        Ok(Self {
            session,
            anchors: generate_anchors(),
        })
    }

    /// Runs the proposal model over a whole RGB frame.
    ///
    /// Returns up to `max_faces` square regions of interest, highest score
    /// first.
    pub fn propose(
        &mut self,
        frame: &Frame,
        min_confidence: f32,
        max_faces: usize,
    ) -> Result<Vec<NormRect>> {
        let tensor = preprocess(frame, INPUT_SIZE);
        let shape = tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
        let data = tensor.into_raw_vec();
        let input_value = Value::from_array((shape, data))?;
        let inputs = ort::inputs!["input" => &input_value];
        let outputs = self.session.run(inputs)?;

        // Output names follow the short-range model export: per-anchor box
        // regressors [1, 896, 16] and score logits [1, 896, 1].
        let (_, regressors) = outputs["regressors"].try_extract_tensor::<f32>()?;
        let (_, scores) = outputs["classificators"].try_extract_tensor::<f32>()?;

        let mut detections = decode_detections(regressors, scores, &self.anchors, min_confidence);
        let kept = nms(&mut detections, NMS_IOU_THRESH);

        Ok(kept
            .into_iter()
            .take(max_faces)
            .map(|d| d.to_roi(frame.width(), frame.height()))
            .collect())
    }
}

/// Samples a frame down to `size x size` and normalizes to [0,1] NCHW.
fn preprocess(frame: &Frame, size: u32) -> Array4<f32> {
    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, s, s));
    for y in 0..s {
        let sy = (((y as f32 + 0.5) * src_h as f32 / s as f32) as usize).min(src_h - 1);
        for x in 0..s {
            let sx = (((x as f32 + 0.5) * src_w as f32 / s as f32) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[sy, sx, c]] as f32 / 255.0;
            }
        }
    }
    tensor
}

/// Anchor centers for the short-range model: a 16x16 grid with 2 anchors per
/// cell followed by an 8x8 grid with 6.
fn generate_anchors() -> Vec<[f32; 2]> {
    let layers = [(16usize, 2usize), (8, 6)];
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (grid, per_cell) in layers {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                anchors.extend(std::iter::repeat([cx, cy]).take(per_cell));
            }
        }
    }
    anchors
}

/// One decoded face box in frame-normalized coordinates.
#[derive(Clone, Debug)]
struct Detection {
    x_center: f32,
    y_center: f32,
    width: f32,
    height: f32,
    score: f32,
}

impl Detection {
    fn left(&self) -> f32 {
        self.x_center - self.width / 2.0
    }

    fn top(&self) -> f32 {
        self.y_center - self.height / 2.0
    }

    fn iou(&self, other: &Detection) -> f32 {
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

    /// Expands the box to the square region handed to the landmark model.
    ///
    /// The square is sized in pixels so it stays square on screen, then
    /// normalized per axis.
    fn to_roi(&self, frame_width: u32, frame_height: u32) -> NormRect {
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let side = (self.width * fw).max(self.height * fh) * ROI_EXPANSION;
        NormRect {
            x_center: self.x_center,
            y_center: self.y_center,
            width: side / fw,
            height: side / fh,
        }
    }
}

/// Decodes anchor-relative regressor output into normalized boxes, dropping
/// anything under `min_confidence`.
fn decode_detections(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[[f32; 2]],
    min_confidence: f32,
) -> Vec<Detection> {
    let scale = INPUT_SIZE as f32;
    let count = anchors.len().min(scores.len());
    let mut detections = Vec::new();

    for i in 0..count {
        let score = sigmoid(scores[i]);
        if score < min_confidence {
            continue;
        }
        let offset = i * 16;
        if offset + 4 > regressors.len() {
            break;
        }
        detections.push(Detection {
            x_center: anchors[i][0] + regressors[offset] / scale,
            y_center: anchors[i][1] + regressors[offset + 1] / scale,
            width: regressors[offset + 2] / scale,
            height: regressors[offset + 3] / scale,
            score,
        });
    }
    detections
}

fn nms(detections: &mut [Detection], iou_thresh: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in detections.iter() {
        if keep.iter().all(|k| k.iou(candidate) <= iou_thresh) {
            keep.push(candidate.clone());
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;
    use approx::assert_relative_eq;

    fn detection(x: f32, y: f32, w: f32, h: f32, score: f32) -> Detection {
        Detection {
            x_center: x,
            y_center: y,
            width: w,
            height: h,
            score,
        }
    }

    #[test]
    fn test_generate_anchors_count_and_range() {
        let anchors = generate_anchors();
        // 16*16*2 + 8*8*6 = 512 + 384
        assert_eq!(anchors.len(), NUM_ANCHORS);
        for a in &anchors {
            assert!(a[0] > 0.0 && a[0] < 1.0);
            assert!(a[1] > 0.0 && a[1] < 1.0);
        }
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let frame = Frame::from_data(2, 2, ChannelOrder::Rgb, vec![255u8; 12]);
        let tensor = preprocess(&frame, 128);
        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
        assert_relative_eq!(tensor[[0, 0, 0, 0]], 1.0);
        assert_relative_eq!(tensor[[0, 2, 127, 127]], 1.0);
    }

    #[test]
    fn test_decode_detections_single_anchor() {
        let anchors = generate_anchors();
        let mut scores = vec![-20.0f32; NUM_ANCHORS];
        scores[0] = 2.0;
        let mut regressors = vec![0.0f32; NUM_ANCHORS * 16];
        // 32 px offsets and extents at 128 input resolution
        regressors[2] = 32.0;
        regressors[3] = 32.0;

        let detections = decode_detections(&regressors, &scores, &anchors, 0.5);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_relative_eq!(d.x_center, anchors[0][0]);
        assert_relative_eq!(d.y_center, anchors[0][1]);
        assert_relative_eq!(d.width, 0.25);
        assert_relative_eq!(d.height, 0.25);
        assert!(d.score > 0.5);
    }

    #[test]
    fn test_decode_detections_filters_low_scores() {
        let anchors = generate_anchors();
        let scores = vec![-20.0f32; NUM_ANCHORS];
        let regressors = vec![0.0f32; NUM_ANCHORS * 16];
        assert!(decode_detections(&regressors, &scores, &anchors, 0.5).is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let mut detections = vec![
            detection(0.5, 0.5, 0.4, 0.4, 0.9),
            detection(0.52, 0.52, 0.4, 0.4, 0.7),
        ];
        let kept = nms(&mut detections, 0.3);
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_nms_keeps_separate_faces() {
        let mut detections = vec![
            detection(0.2, 0.2, 0.2, 0.2, 0.9),
            detection(0.8, 0.8, 0.2, 0.2, 0.8),
        ];
        let kept = nms(&mut detections, 0.3);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_roi_is_square_in_pixels() {
        let d = detection(0.5, 0.5, 0.2, 0.1, 0.9);
        let roi = d.to_roi(200, 100);
        // box is 40x10 px, so the expanded square side is 40 * 1.5 = 60 px
        assert_relative_eq!(roi.width, 0.3);
        assert_relative_eq!(roi.height, 0.6);
        assert_relative_eq!(roi.x_center, 0.5);
    }
}
