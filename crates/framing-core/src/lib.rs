//! StageFocus Framing Core
//!
//! Keeps a single subject centered in frame:
//! - **Target derivation:** bound the visible pose landmarks and pad the box
//! - **Temporal smoothing:** exponential moving average against the previous box
//! - **Clamping:** integer crop rectangle that never leaves the frame
//!
//! This crate does no I/O and has no platform dependencies.
//! All inputs are data; all outputs are data.

pub mod engine;
pub mod geometry;

pub use engine::{
    clamp_to_frame, compute_next_box, smooth_box, target_box, FramingEngine, FramingParams,
    FramingStep, VISIBILITY_THRESHOLD,
};
pub use geometry::{CropBox, CropRect, FrameSize, Landmark};
