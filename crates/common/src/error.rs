//! Error types shared across StageFocus crates.

use std::path::PathBuf;

/// Top-level error type for StageFocus operations.
#[derive(Debug, thiserror::Error)]
pub enum StagefocusError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Pose detector error: {message}")]
    Detector { message: String },

    #[error("Frame sink error: {message}")]
    Sink { message: String },

    #[error("Settings error: {message}")]
    Settings { message: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using StagefocusError.
pub type StagefocusResult<T> = Result<T, StagefocusError>;

impl StagefocusError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn detector(msg: impl Into<String>) -> Self {
        Self::Detector {
            message: msg.into(),
        }
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink {
            message: msg.into(),
        }
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self::Settings {
            message: msg.into(),
        }
    }

    pub fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
