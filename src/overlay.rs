//! CPU overlay drawing: highlighted landmark markers and mesh lines.

use crate::detector::{topology, FaceLandmarks, Landmark};
use crate::frame::{ChannelOrder, Frame};
use line_drawing::Bresenham;

/// Landmark indices given an explicit marker: the brow ridges, the nose
/// bridge, and the upper lip.
pub const HIGHLIGHT_POINTS: [usize; 21] = [
    70, 63, 105, 66, 107, // right brow
    336, 296, 334, 293, 300, // left brow
    122, 196, 3, 51, 281, 248, 419, 351, // nose bridge
    37, 0, 267, // upper lip
];

/// Marker geometry: a 2 px circle stroked 5 px wide renders as a solid disc.
pub const MARKER_RADIUS: u32 = 2;
pub const MARKER_THICKNESS: u32 = 5;

/// Overlay color, in RGB.
pub const OVERLAY_COLOR: [u8; 3] = [255, 0, 0];

/// Projects a normalized landmark onto pixel coordinates, truncating toward
/// zero.
pub fn project(landmark: &Landmark, width: u32, height: u32) -> (i64, i64) {
    (
        (landmark.x * width as f32) as i64,
        (landmark.y * height as f32) as i64,
    )
}

fn put_pixel(frame: &mut Frame, x: i64, y: i64, color: [u8; 3]) {
    if x < 0 || y < 0 || x >= frame.width() as i64 || y >= frame.height() as i64 {
        return;
    }
    let [r, g, b] = color;
    let px = match frame.order() {
        ChannelOrder::Rgb => [r, g, b],
        ChannelOrder::Bgr => [b, g, r],
    };
    let idx = ((y as usize) * frame.width() as usize + x as usize) * 3;
    frame.data_mut()[idx..idx + 3].copy_from_slice(&px);
}

/// Draws a filled marker disc, clipped to the frame.
///
/// A stroke of `thickness` centered on `radius` covers the interior, so the
/// effective reach is `radius + thickness / 2`.
pub fn draw_marker(
    frame: &mut Frame,
    cx: i64,
    cy: i64,
    radius: u32,
    thickness: u32,
    color: [u8; 3],
) {
    let reach = radius as f32 + thickness as f32 / 2.0;
    let span = reach.ceil() as i64;
    let limit = reach * reach;
    for dy in -span..=span {
        for dx in -span..=span {
            if (dx * dx + dy * dy) as f32 <= limit {
                put_pixel(frame, cx + dx, cy + dy, color);
            }
        }
    }
}

/// Draws line segments between connected landmark pairs, clipped to the
/// frame.
pub fn draw_connections(
    frame: &mut Frame,
    landmarks: &[Landmark],
    connections: &[[u16; 2]],
    color: [u8; 3],
) {
    let (w, h) = (frame.width(), frame.height());
    for &[a, b] in connections {
        let (Some(from), Some(to)) = (landmarks.get(a as usize), landmarks.get(b as usize)) else {
            continue;
        };
        let start = project(from, w, h);
        let end = project(to, w, h);
        for (x, y) in Bresenham::new(start, end) {
            put_pixel(frame, x, y, color);
        }
    }
}

/// Draws one face's overlay: the highlighted markers plus the full mesh.
///
/// Drawing happens on the frame in its native channel order; the color is
/// adapted per pixel.
pub fn annotate_face(frame: &mut Frame, face: &FaceLandmarks) {
    let (w, h) = (frame.width(), frame.height());
    for &index in HIGHLIGHT_POINTS.iter() {
        if let Some(landmark) = face.get(index) {
            let (x, y) = project(landmark, w, h);
            draw_marker(frame, x, y, MARKER_RADIUS, MARKER_THICKNESS, OVERLAY_COLOR);
        }
    }
    draw_connections(frame, face.points(), topology::CONNECTIONS, OVERLAY_COLOR);
}
