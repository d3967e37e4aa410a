//! Transport-free speech-to-text service contract.
//!
//! An HTTP layer accepts a multipart upload under [`AUDIO_FIELD`], hands the
//! bytes to a [`SpeechService`] and serializes the [`ServiceResponse`] as JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::audio::{AudioInput, SUPPORTED_EXTENSIONS, is_supported_extension};
use crate::decode::DecodingOptions;
use crate::defaults::{ENGINE_NAME, MAX_UPLOAD_BYTES};
use crate::language::LANGUAGES;
use crate::orchestrator::{RequestControl, Transcription, TranscriptionOrchestrator};
use crate::segment::Completion;

/// Multipart form field carrying the audio file.
pub const AUDIO_FIELD: &str = "audioFile";

/// One uploaded audio file.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Reason the upload cannot be transcribed, checked before decoding.
    pub fn rejection(&self) -> Option<String> {
        if self.bytes.is_empty() {
            return Some("No audio file provided".to_string());
        }
        if self.bytes.len() > MAX_UPLOAD_BYTES {
            return Some(format!(
                "Audio file too large ({} bytes, limit {MAX_UPLOAD_BYTES})",
                self.bytes.len()
            ));
        }
        if !is_supported_extension(&self.file_name) {
            return Some(format!(
                "Unsupported audio format '{}' (expected one of: {})",
                self.file_name,
                SUPPORTED_EXTENSIONS.join(", ")
            ));
        }
        None
    }
}

/// JSON body returned for every request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ServiceData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            message: format!("Speech recognition failed: {error}"),
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceData {
    pub engine: String,
    pub file_name: String,
    pub file_size: usize,
    /// Wall-clock time as `"<n>ms"`.
    pub processing_time: String,
    /// `exp(avg_logprob)` in `[0, 1]`.
    pub confidence: f32,
    pub recognized_text: String,
    pub language: String,
    pub language_confidence: f32,
    pub low_confidence: bool,
    /// `complete`, `cancelled`, `timed_out` or `failed`.
    pub completion: String,
    pub duration_secs: f32,
    pub segments: Vec<ServiceSegment>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSegment {
    pub start: f32,
    pub end: f32,
    pub text: String,
    pub confidence: f32,
}

impl ServiceData {
    pub fn from_transcription(engine: &str, upload: &AudioUpload, transcription: &Transcription) -> Self {
        let completion = match transcription.completion {
            Completion::Complete => "complete",
            Completion::Cancelled => "cancelled",
            Completion::TimedOut => "timed_out",
            Completion::Failed(_) => "failed",
        };
        Self {
            engine: engine.to_string(),
            file_name: upload.file_name.clone(),
            file_size: upload.bytes.len(),
            processing_time: format!("{}ms", transcription.elapsed.as_millis()),
            confidence: transcription.confidence(),
            recognized_text: transcription.text().to_string(),
            language: transcription.language.language.clone(),
            language_confidence: transcription.language.confidence,
            low_confidence: transcription.low_confidence,
            completion: completion.to_string(),
            duration_secs: transcription.duration_secs,
            segments: transcription
                .segments()
                .iter()
                .map(|s| ServiceSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text.clone(),
                    confidence: s.avg_logprob.exp().clamp(0.0, 1.0),
                })
                .collect(),
        }
    }
}

/// Static description of the engine behind a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    pub engine: String,
    pub model: String,
    pub device: String,
    pub languages: Vec<String>,
    pub formats: Vec<String>,
    pub max_upload_bytes: usize,
    pub model_loaded: bool,
}

#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Transcribe one upload. Failures are reported in the response, never panicked.
    async fn recognize(&self, upload: AudioUpload) -> ServiceResponse;

    fn engine_info(&self) -> EngineInfo;
}

/// [`SpeechService`] backed by a [`TranscriptionOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorService {
    orchestrator: Arc<TranscriptionOrchestrator>,
    options: DecodingOptions,
}

impl OrchestratorService {
    pub fn new(orchestrator: Arc<TranscriptionOrchestrator>, options: DecodingOptions) -> Self {
        Self {
            orchestrator,
            options,
        }
    }
}

#[async_trait]
impl SpeechService for OrchestratorService {
    async fn recognize(&self, upload: AudioUpload) -> ServiceResponse {
        if let Some(reason) = upload.rejection() {
            warn!(file = %upload.file_name, %reason, "Upload rejected");
            return ServiceResponse::failure(reason);
        }

        let input = AudioInput::bytes(upload.file_name.clone(), upload.bytes.clone());
        let result = Arc::clone(&self.orchestrator)
            .transcribe_async(input, self.options.clone(), RequestControl::default())
            .await;

        match result {
            Ok(transcription) => ServiceResponse {
                success: true,
                message: "Speech recognition complete".to_string(),
                data: Some(ServiceData::from_transcription(
                    ENGINE_NAME,
                    &upload,
                    &transcription,
                )),
                error: None,
            },
            Err(e) => {
                warn!(file = %upload.file_name, error = %e, "Recognition failed");
                ServiceResponse::failure(e.to_string())
            }
        }
    }

    fn engine_info(&self) -> EngineInfo {
        let shared = self.orchestrator.model();
        EngineInfo {
            engine: ENGINE_NAME.to_string(),
            model: shared.describe(),
            device: crate::defaults::inference_device().to_string(),
            languages: LANGUAGES.iter().map(|(code, _)| code.to_string()).collect(),
            formats: SUPPORTED_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            model_loaded: shared.is_loaded(),
        }
    }
}
