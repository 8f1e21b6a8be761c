//! The framing engine: landmarks in, crop rectangle out.
//!
//! # Algorithm
//!
//! 1. **Target** derivation: bounding box of the landmarks whose visibility
//!    exceeds [`VISIBILITY_THRESHOLD`], padded on every side by
//!    `padding_factor` times its own width/height. No usable landmarks
//!    means the full frame.
//! 2. **Smoothing**: per-field exponential moving average,
//!    `smoothed = previous * (1 - a) + target * a`.
//! 3. **Clamping**: truncate to integers, pull the origin inside the frame
//!    and trim width/height at the right/bottom edges. A rectangle with no
//!    area is not emitted, but the smoothed state still advances.

use crate::geometry::{CropBox, CropRect, FrameSize, Landmark};

/// Landmarks at or below this visibility are ignored.
pub const VISIBILITY_THRESHOLD: f64 = 0.5;

/// Per-frame tuning, read fresh from settings on every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramingParams {
    /// Weight of the new target in the moving average.
    /// `0` freezes the box, `1` jumps straight to the target.
    pub smoothing_factor: f64,

    /// Fraction of the subject box added on each side.
    pub padding_factor: f64,
}

impl Default for FramingParams {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.07,
            padding_factor: 0.4,
        }
    }
}

/// Everything the engine produced for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramingStep {
    /// This frame's raw desired crop.
    pub target: CropBox,
    /// New smoothed state, carried to the next frame.
    pub smoothed: CropBox,
    /// Emit-ready rectangle, `None` when it clamps to zero area.
    pub crop: Option<CropRect>,
}

/// Derive this frame's target box.
///
/// Returns the full frame when `landmarks` is `None` or when none of them
/// is visible enough to trust.
pub fn target_box(landmarks: Option<&[Landmark]>, frame: FrameSize, padding_factor: f64) -> CropBox {
    let Some(landmarks) = landmarks else {
        return CropBox::full_frame(frame);
    };

    let mut visible = landmarks
        .iter()
        .filter(|lm| lm.visibility > VISIBILITY_THRESHOLD)
        .map(|lm| lm.to_pixels(frame));

    let Some((first_x, first_y)) = visible.next() else {
        tracing::trace!("No visible landmarks; framing full frame");
        return CropBox::full_frame(frame);
    };

    let (min_x, max_x, min_y, max_y) = visible.fold(
        (first_x, first_x, first_y, first_y),
        |(min_x, max_x, min_y, max_y), (px, py)| {
            (min_x.min(px), max_x.max(px), min_y.min(py), max_y.max(py))
        },
    );

    let padding = non_negative(padding_factor);
    let box_w = max_x - min_x;
    let box_h = max_y - min_y;
    let pad_w = box_w * padding;
    let pad_h = box_h * padding;

    CropBox::new(
        min_x - pad_w,
        min_y - pad_h,
        box_w + 2.0 * pad_w,
        box_h + 2.0 * pad_h,
    )
}

/// Blend `previous` toward `target` field by field.
///
/// A target with a non-finite field (from out-of-range landmark
/// coordinates) leaves `previous` unchanged, so one bad frame cannot
/// poison the state for the rest of the session.
pub fn smooth_box(previous: &CropBox, target: &CropBox, smoothing_factor: f64) -> CropBox {
    if !target.is_finite() {
        tracing::debug!(?target, "Ignoring non-finite target");
        return *previous;
    }
    let a = clamp01(smoothing_factor);
    let prev = previous.to_array();
    let tgt = target.to_array();
    CropBox::from_array(std::array::from_fn(|i| prev[i] * (1.0 - a) + tgt[i] * a))
}

/// Truncate a smoothed box to an integer rectangle inside `frame`.
///
/// Returns `None` when the result would have no area.
pub fn clamp_to_frame(smoothed: &CropBox, frame: FrameSize) -> Option<CropRect> {
    let x = (smoothed.x as i64).max(0);
    let y = (smoothed.y as i64).max(0);
    let width = (smoothed.width as i64).min(frame.width as i64 - x);
    let height = (smoothed.height as i64).min(frame.height as i64 - y);

    if width <= 0 || height <= 0 {
        return None;
    }

    // Positive width/height imply x < frame.width and y < frame.height.
    Some(CropRect {
        x: x as u32,
        y: y as u32,
        width: width as u32,
        height: height as u32,
    })
}

/// Compute the next smoothed box from the previous one and this frame's
/// landmarks.
pub fn compute_next_box(
    previous: &CropBox,
    landmarks: Option<&[Landmark]>,
    frame: FrameSize,
    params: &FramingParams,
) -> CropBox {
    let target = target_box(landmarks, frame, params.padding_factor);
    smooth_box(previous, &target, params.smoothing_factor)
}

/// Owns the smoothed box for the lifetime of a streaming session.
#[derive(Debug, Clone)]
pub struct FramingEngine {
    frame: FrameSize,
    smoothed: CropBox,
}

impl FramingEngine {
    /// Create an engine whose state starts at the full frame.
    pub fn new(frame: FrameSize) -> Self {
        Self {
            frame,
            smoothed: CropBox::full_frame(frame),
        }
    }

    /// Source dimensions this engine frames against.
    pub fn frame(&self) -> FrameSize {
        self.frame
    }

    /// Current smoothed state.
    pub fn smoothed(&self) -> CropBox {
        self.smoothed
    }

    /// Advance one frame.
    pub fn step(&mut self, landmarks: Option<&[Landmark]>, params: &FramingParams) -> FramingStep {
        let target = target_box(landmarks, self.frame, params.padding_factor);
        self.smoothed = smooth_box(&self.smoothed, &target, params.smoothing_factor);
        FramingStep {
            target,
            smoothed: self.smoothed,
            crop: clamp_to_frame(&self.smoothed, self.frame),
        }
    }

    /// Return to the full frame (session restart).
    pub fn reset(&mut self) {
        self.smoothed = CropBox::full_frame(self.frame);
    }
}

fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}
