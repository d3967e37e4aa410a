//! Error types for voxscribe.

use std::time::Duration;
use thiserror::Error;

/// Boxed cause carried by decode and model-load failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum VoxscribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    // Audio errors
    #[error("Failed to decode audio from {source_id}: {cause}")]
    Decode {
        source_id: String,
        #[source]
        cause: BoxError,
    },

    // Model errors
    #[error("Failed to load model {model}: {cause}")]
    ModelLoad {
        model: String,
        #[source]
        cause: BoxError,
    },

    #[error("Feature dimension mismatch: model expects {expected} mel bins, got {actual}")]
    FeatureDimension { expected: usize, actual: usize },

    #[error("Inference failed: {message}")]
    Inference { message: String },

    // Request errors
    #[error("Transcription timed out after {elapsed:?} ({windows_completed} windows decoded)")]
    TimeoutExceeded {
        elapsed: Duration,
        windows_completed: usize,
    },

    #[error("Transcription cancelled")]
    Cancelled,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxscribeError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn decode(source_id: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Decode {
            source_id: source_id.into(),
            cause: cause.into(),
        }
    }

    pub fn model_load(model: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            cause: cause.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }

    /// Structural errors are never worth retrying with different decoding parameters.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Inference { .. } | Self::Io(_))
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxscribeError>;
