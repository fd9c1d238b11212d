//! Video frame type and channel-order conversions.

use ndarray::{ArrayView3, ArrayViewMut3};

/// Channel orders a frame buffer can carry.
///
/// Capture backends decode into whatever order their driver hands out; the
/// face-mesh models consume RGB. Conversion is a pure byte swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    /// Red, green, blue
    Rgb,
    /// Blue, green, red
    Bgr,
}

/// A single captured video frame: 8-bit, 3-channel, row-major.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl Frame {
    /// Creates a zeroed frame with the given dimensions.
    pub fn new(width: u32, height: u32, order: ChannelOrder) -> Self {
        let size = (width as usize) * (height as usize) * 3;
        Self {
            width,
            height,
            order,
            data: vec![0; size],
        }
    }

    /// Creates a frame from existing pixel data.
    pub fn from_data(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * 3,
            "data length must equal width * height * 3"
        );
        Self {
            width,
            height,
            order,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Returns this frame in the requested channel order.
    ///
    /// A pure transform: the source frame is left untouched. When the frame
    /// already carries the requested order this is a plain copy.
    pub fn converted(&self, order: ChannelOrder) -> Frame {
        if self.order == order {
            return self.clone();
        }

        // Rgb <-> Bgr is symmetric: swap the first and third channel.
        let mut data = self.data.clone();
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Frame {
            width: self.width,
            height: self.height,
            order,
            data,
        }
    }

    /// Expands this frame to an RGBA upload buffer (alpha = 255).
    pub fn to_rgba(&self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize);
        let mut rgba = vec![0u8; pixel_count * 4];
        let (r, b) = match self.order {
            ChannelOrder::Rgb => (0, 2),
            ChannelOrder::Bgr => (2, 0),
        };
        for i in 0..pixel_count {
            rgba[i * 4] = self.data[i * 3 + r];
            rgba[i * 4 + 1] = self.data[i * 3 + 1];
            rgba[i * 4 + 2] = self.data[i * 3 + b];
            rgba[i * 4 + 3] = 255;
        }
        rgba
    }

    /// (height, width, channel) view for detector preprocessing.
    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("frame data length must match dimensions")
    }

    pub fn as_ndarray_mut(&mut self) -> ArrayViewMut3<'_, u8> {
        ArrayViewMut3::from_shape(self.shape(), &mut self.data)
            .expect("frame data length must match dimensions")
    }

    fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converted_swaps_channels() {
        let bgr = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 10, 20, 30];
        let frame = Frame::from_data(2, 2, ChannelOrder::Bgr, bgr);
        let rgb = frame.converted(ChannelOrder::Rgb);

        assert_eq!(rgb.order(), ChannelOrder::Rgb);
        // Blue pixel in BGR becomes (0, 0, 255) in RGB.
        assert_eq!(&rgb.data()[0..3], &[0, 0, 255]);
        assert_eq!(&rgb.data()[3..6], &[0, 255, 0]);
        assert_eq!(&rgb.data()[6..9], &[255, 0, 0]);
        assert_eq!(&rgb.data()[9..12], &[30, 20, 10]);
        // Source untouched.
        assert_eq!(&frame.data()[0..3], &[255, 0, 0]);
    }

    #[test]
    fn test_converted_same_order_is_copy() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let frame = Frame::from_data(2, 1, ChannelOrder::Rgb, data.clone());
        let copy = frame.converted(ChannelOrder::Rgb);
        assert_eq!(copy.data(), &data[..]);
    }

    #[test]
    fn test_converted_round_trip() {
        let data = vec![9, 8, 7, 1, 2, 3];
        let frame = Frame::from_data(2, 1, ChannelOrder::Rgb, data.clone());
        let back = frame
            .converted(ChannelOrder::Bgr)
            .converted(ChannelOrder::Rgb);
        assert_eq!(back.data(), &data[..]);
    }

    #[test]
    fn test_to_rgba_adds_alpha() {
        let rgb_data = vec![255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];
        let frame = Frame::from_data(2, 2, ChannelOrder::Rgb, rgb_data);
        let rgba = frame.to_rgba();

        assert_eq!(rgba.len(), 16);
        assert_eq!(&rgba[0..4], &[255, 0, 0, 255]);
        assert_eq!(&rgba[4..8], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_to_rgba_from_bgr() {
        let bgr_data = vec![255, 0, 0]; // blue pixel in BGR
        let frame = Frame::from_data(1, 1, ChannelOrder::Bgr, bgr_data);
        assert_eq!(frame.to_rgba(), vec![0, 0, 255, 255]);
    }

    #[test]
    fn test_as_ndarray_shape_and_access() {
        let mut data = vec![0u8; 24]; // 2x4x3
        data[6] = 200; // row 0, col 2, R
        let frame = Frame::from_data(4, 2, ChannelOrder::Rgb, data);
        let arr = frame.as_ndarray();
        assert_eq!(arr.shape(), &[2, 4, 3]);
        assert_eq!(arr[[0, 2, 0]], 200);
    }

    #[test]
    #[should_panic(expected = "data length must equal width * height * 3")]
    fn test_mismatched_data_length_panics_in_debug() {
        Frame::from_data(2, 2, ChannelOrder::Rgb, vec![0u8; 10]);
    }
}
