//! voxscribe - Offline speech-to-text for audio files
//!
//! Decodes an audio file, extracts log-mel features and runs a Whisper-style
//! acoustic model with temperature fallback to produce a timestamped
//! transcript and the spoken language.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decode;
pub mod defaults;
pub mod error;
pub mod language;
pub mod model;
pub mod orchestrator;
#[cfg(feature = "cli")]
pub mod output;
pub mod segment;
pub mod service;

// Pipeline stages
pub use audio::{AudioInput, AudioLoader, FeatureExtractor, MelSpectrogram, NormalizedWaveform, Waveform};
pub use decode::{DecodeRequest, Decoder, DecodingOptions, DecodingResult, FallbackPolicy, Segment};
pub use language::{LanguageDetector, LanguageEstimate};
pub use segment::{CancelToken, Completion, SegmentAssembler};

// Model seam
pub use model::{AcousticModel, DecodeSession, ExecutionSlots, Precision, SharedModel, Vocabulary};

// Entry points
pub use orchestrator::{RequestControl, RuntimePolicy, TimeoutPolicy, Transcription, TranscriptionOrchestrator};
pub use service::{AudioUpload, OrchestratorService, ServiceResponse, SpeechService};

// Error handling
pub use error::{Result, VoxscribeError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
