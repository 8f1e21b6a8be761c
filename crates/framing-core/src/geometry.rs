//! Box, rectangle, and landmark types for subject framing.
//!
//! Boxes live in source-pixel coordinates: `(0, 0)` is the top-left
//! corner of the captured frame. Landmarks are normalized to the frame,
//! so `(1.0, 1.0)` is the bottom-right corner.

use serde::{Deserialize, Serialize};

/// Dimensions of the source frame in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// A crop region in fractional source-pixel coordinates.
///
/// This is the engine's working precision; smoothing happens on these
/// fields before truncation to a [`CropRect`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl CropBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The box covering the entire frame (no crop).
    pub fn full_frame(frame: FrameSize) -> Self {
        Self::new(0.0, 0.0, frame.width as f64, frame.height as f64)
    }

    /// The center point of this box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Area of the box in square pixels.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Whether every field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Fields in `[x, y, width, height]` order.
    pub fn to_array(&self) -> [f64; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn from_array([x, y, width, height]: [f64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

/// An integer crop rectangle guaranteed to lie inside its frame with
/// positive area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Right edge (exclusive).
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Bottom edge (exclusive).
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Whether this rectangle fits entirely inside `frame`.
    pub fn fits_within(&self, frame: FrameSize) -> bool {
        self.width > 0
            && self.height > 0
            && self.right() <= frame.width
            && self.bottom() <= frame.height
    }
}

/// One body landmark as reported by the pose detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal position, normalized to the frame width.
    pub x: f64,
    /// Vertical position, normalized to the frame height.
    pub y: f64,
    /// Detector confidence that the landmark is visible, in `[0, 1]`.
    #[serde(default)]
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, visibility: f64) -> Self {
        Self { x, y, visibility }
    }

    /// Denormalize to source-pixel coordinates.
    pub fn to_pixels(&self, frame: FrameSize) -> (f64, f64) {
        (self.x * frame.width as f64, self.y * frame.height as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame_box() {
        let frame = FrameSize::new(1280, 720);
        let full = CropBox::full_frame(frame);
        assert_eq!(full, CropBox::new(0.0, 0.0, 1280.0, 720.0));
        assert_eq!(full.center(), (640.0, 360.0));
        assert_eq!(full.area(), 1280.0 * 720.0);
    }

    #[test]
    fn test_array_round_trip_keeps_field_order() {
        let b = CropBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(b.to_array(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(CropBox::from_array(b.to_array()), b);
    }

    #[test]
    fn test_rect_fits_within() {
        let frame = FrameSize::new(100, 50);
        let inside = CropRect {
            x: 10,
            y: 10,
            width: 90,
            height: 40,
        };
        assert!(inside.fits_within(frame));

        let overflowing = CropRect {
            width: 91,
            ..inside
        };
        assert!(!overflowing.fits_within(frame));
    }

    #[test]
    fn test_landmark_to_pixels() {
        let lm = Landmark::new(0.25, 0.5, 0.9);
        assert_eq!(lm.to_pixels(FrameSize::new(1280, 720)), (320.0, 360.0));
    }

    #[test]
    fn test_landmark_visibility_defaults_to_zero() {
        let lm: Landmark = serde_json::from_str(r#"{"x":0.1,"y":0.2}"#).unwrap();
        assert_eq!(lm.visibility, 0.0);
    }
}
