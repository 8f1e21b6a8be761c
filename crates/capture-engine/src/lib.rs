//! StageFocus Capture Engine
//!
//! Runs the per-frame streaming loop: pull a webcam frame, ask the pose
//! detector where the subject is, let the framing engine pick a crop, then
//! resample and hand the frame to the virtual camera and/or preview.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    FramingSession                      │
//! │  ┌───────────────┐  ┌──────────────┐  ┌──────────────┐ │
//! │  │ CaptureSource │─▶│ PoseDetector │─▶│FramingEngine │ │
//! │  └───────────────┘  └──────────────┘  └──────┬───────┘ │
//! │                                              ▼         │
//! │                               crop + resample (image)  │
//! │                                              │         │
//! │                  ┌────────────────┐  ┌───────▼──────┐  │
//! │                  │ Preview window │◀─│ FrameSink(s) │  │
//! │                  └────────────────┘  │ v4l2loopback │  │
//! │                                      └──────────────┘  │
//! └────────────────────────────────────────────────────────┘
//! ```

pub mod detector;
pub mod frame;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod source;

pub use detector::{PoseDetector, SubprocessDetector};
pub use frame::Frame;
pub use session::*;
pub use sink::{FrameSink, GstFrameSink, SinkKind, DEFAULT_VIRTUAL_DEVICE};
pub use source::{CaptureSource, GstWebcamSource, StreamInfo};
