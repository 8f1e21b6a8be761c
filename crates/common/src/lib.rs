//! StageFocus Common Utilities
//!
//! Shared infrastructure for all StageFocus crates:
//! - Error types and result aliases
//! - The file-backed settings store
//! - Session clock and frame pacing
//! - The shared stop signal between the driver and its supervisor
//! - Tracing/logging initialization

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod signal;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use signal::StopSignal;
