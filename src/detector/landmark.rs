//! Landmark stage: the 468-point face-mesh model run over a face region.

use super::{sigmoid, FaceLandmarks, Landmark, ModelError, NormRect, ROI_EXPANSION};
use crate::frame::Frame;
use anyhow::Result;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;

/// Model input resolution.
const INPUT_SIZE: u32 = 192;

/// Points produced per face.
pub const LANDMARK_COUNT: usize = 468;

/// 468-point face landmark model backed by an ONNX Runtime session.
pub struct LandmarkNet {
    session: Session,
}

impl LandmarkNet {
    pub fn new(model_path: &Path) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::Missing(model_path.to_path_buf()));
        }
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)?;
        Ok(Self { session })
    }

    /// Runs the landmark model on one region of an RGB frame.
    pub fn infer(&mut self, frame: &Frame, roi: &NormRect) -> Result<FaceLandmarks> {
        let crop = crop_region(frame, roi, INPUT_SIZE);
        let tensor = tensor_from_rgb(&crop);

        let shape = tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
        let data = tensor.into_raw_vec();
        let input_value = Value::from_array((shape, data))?;
        let inputs = ort::inputs!["input_1" => &input_value];
        let outputs = self.session.run(inputs)?;

        // Output names follow the published model export: 1404 coordinates
        // in input-pixel space and one presence logit.
        let (_, raw) = outputs["conv2d_21"].try_extract_tensor::<f32>()?;
        let (_, score_raw) = outputs["conv2d_31"].try_extract_tensor::<f32>()?;

        let score = sigmoid(score_raw.first().copied().unwrap_or(f32::NEG_INFINITY));
        Ok(FaceLandmarks::new(decode_landmarks(raw, roi), score))
    }
}

/// Cuts the region out of the frame, padding out-of-bounds pixels black, and
/// resizes it to the model input size.
fn crop_region(frame: &Frame, roi: &NormRect, size: u32) -> RgbImage {
    let fw = frame.width() as i64;
    let fh = frame.height() as i64;
    let left = (roi.left() * fw as f32).round() as i64;
    let top = (roi.top() * fh as f32).round() as i64;
    let crop_w = ((roi.width * fw as f32).round() as i64).max(1);
    let crop_h = ((roi.height * fh as f32).round() as i64).max(1);

    let src = frame.as_ndarray();
    let mut crop = RgbImage::new(crop_w as u32, crop_h as u32);
    for y in 0..crop_h {
        let sy = top + y;
        if sy < 0 || sy >= fh {
            continue;
        }
        for x in 0..crop_w {
            let sx = left + x;
            if sx < 0 || sx >= fw {
                continue;
            }
            let pixel = image::Rgb([
                src[[sy as usize, sx as usize, 0]],
                src[[sy as usize, sx as usize, 1]],
                src[[sy as usize, sx as usize, 2]],
            ]);
            crop.put_pixel(x as u32, y as u32, pixel);
        }
    }

    image::imageops::resize(&crop, size, size, FilterType::Triangle)
}

/// Normalizes the crop to a [0,1] NCHW tensor.
fn tensor_from_rgb(img: &RgbImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in img.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Maps raw model output (input-pixel space, x/y/z triples) back into
/// frame-normalized coordinates through the region it was cropped from.
fn decode_landmarks(raw: &[f32], roi: &NormRect) -> Vec<Landmark> {
    let scale = INPUT_SIZE as f32;
    raw.chunks_exact(3)
        .take(LANDMARK_COUNT)
        .map(|p| Landmark {
            x: roi.left() + (p[0] / scale) * roi.width,
            y: roi.top() + (p[1] / scale) * roi.height,
            z: (p[2] / scale) * roi.width,
        })
        .collect()
}

/// Derives the next frame's region of interest from this frame's landmarks.
pub(crate) fn roi_from_landmarks(
    face: &FaceLandmarks,
    frame_width: u32,
    frame_height: u32,
) -> NormRect {
    if face.is_empty() {
        return NormRect {
            x_center: 0.5,
            y_center: 0.5,
            width: 1.0,
            height: 1.0,
        };
    }

    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    for lm in face.points() {
        min_x = min_x.min(lm.x);
        min_y = min_y.min(lm.y);
        max_x = max_x.max(lm.x);
        max_y = max_y.max(lm.y);
    }

    let fw = frame_width as f32;
    let fh = frame_height as f32;
    let side = ((max_x - min_x) * fw).max((max_y - min_y) * fh) * ROI_EXPANSION;
    NormRect {
        x_center: (min_x + max_x) / 2.0,
        y_center: (min_y + max_y) / 2.0,
        width: side / fw,
        height: side / fh,
    }
}
