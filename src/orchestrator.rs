//! Request-level entry point: audio in, [`Transcription`] out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::{AudioInput, AudioLoader, FeatureExtractor, NormalizedWaveform, Waveform};
use crate::config::Config;
use crate::decode::{DecodeRequest, DecodingOptions, DecodingResult, Segment, compression_ratio};
use crate::defaults;
use crate::error::{Result, VoxscribeError};
use crate::language::{LanguageDetector, LanguageEstimate};
use crate::model::catalog::CatalogLoader;
use crate::model::slots::SlotWait;
use crate::model::{AcousticModel, ExecutionSlots, Precision, SharedModel};
use crate::segment::{Assembly, CancelToken, Completion, RunControl, SegmentAssembler};

/// What to do when a request runs out of time or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Return the segments decoded so far.
    #[default]
    ReturnPartial,
    /// Fail with [`VoxscribeError::TimeoutExceeded`] or [`VoxscribeError::Cancelled`].
    Fail,
}

/// Process-wide limits applied to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimePolicy {
    /// Default request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    pub inference_slots: usize,
    /// Detected languages below this probability flag the result as low confidence.
    pub language_confidence_threshold: f32,
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            on_timeout: TimeoutPolicy::default(),
            inference_slots: defaults::INFERENCE_SLOTS,
            language_confidence_threshold: defaults::LANGUAGE_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Per-request deadline and cancellation.
#[derive(Debug, Clone, Default)]
pub struct RequestControl {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl RequestControl {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Final output of a request.
#[derive(Debug, Clone)]
pub struct Transcription {
    /// Merged result: all segments, their text and aggregate metrics.
    pub result: DecodingResult,
    pub language: LanguageEstimate,
    pub duration_secs: f32,
    pub elapsed: Duration,
    pub completion: Completion,
    /// Set when the language guess or the decoded text is unreliable.
    pub low_confidence: bool,
}

impl Transcription {
    pub fn text(&self) -> &str {
        &self.result.text
    }

    pub fn segments(&self) -> &[Segment] {
        &self.result.segments
    }

    /// `exp(avg_logprob)` clamped to `[0, 1]`.
    pub fn confidence(&self) -> f32 {
        if self.result.attempts == 0 {
            return 0.0;
        }
        self.result.avg_logprob.exp().clamp(0.0, 1.0)
    }
}

/// Runs the full pipeline for one request at a time per caller.
///
/// Cheap to share behind an `Arc`; the model is loaded on first use and
/// concurrent inference is bounded by [`ExecutionSlots`].
#[derive(Debug)]
pub struct TranscriptionOrchestrator {
    model: Arc<SharedModel>,
    loader: AudioLoader,
    slots: ExecutionSlots,
    policy: RuntimePolicy,
}

impl TranscriptionOrchestrator {
    pub fn new(model: Arc<SharedModel>, policy: RuntimePolicy) -> Self {
        Self {
            model,
            loader: AudioLoader::default(),
            slots: ExecutionSlots::new(policy.inference_slots),
            policy,
        }
    }

    /// Orchestrator over the catalog model named in `config`. Nothing is
    /// downloaded until the first request.
    pub fn from_config(config: &Config) -> Result<Self> {
        let loader = CatalogLoader::for_name(&config.model.name, config.model.cache_dir.clone())?;
        Ok(Self::new(
            Arc::new(SharedModel::new(loader)),
            config.runtime_policy(),
        ))
    }

    pub fn model(&self) -> &Arc<SharedModel> {
        &self.model
    }

    pub fn policy(&self) -> &RuntimePolicy {
        &self.policy
    }

    pub fn transcribe(&self, input: &AudioInput, options: &DecodingOptions) -> Result<Transcription> {
        self.transcribe_with(input, options, RequestControl::default())
    }

    /// Run on tokio's blocking pool.
    pub async fn transcribe_async(
        self: Arc<Self>,
        input: AudioInput,
        options: DecodingOptions,
        control: RequestControl,
    ) -> Result<Transcription> {
        tokio::task::spawn_blocking(move || self.transcribe_with(&input, &options, control))
            .await
            .map_err(|e| VoxscribeError::inference(format!("Transcription task failed: {e}")))?
    }

    pub fn transcribe_with(
        &self,
        input: &AudioInput,
        options: &DecodingOptions,
        control: RequestControl,
    ) -> Result<Transcription> {
        let started = Instant::now();
        options.validate()?;
        let forced = options.language_code()?;

        let waveform = self.loader.load(input)?;
        info!(
            source = %input.source_id(),
            duration_secs = waveform.duration_secs(),
            "Transcribing"
        );

        let model = self.model.get()?;
        if let Some(code) = forced
            && !model.vocabulary().supports_language(code)
        {
            return Err(VoxscribeError::config(
                "language",
                format!("model {} does not support '{code}'", model.name()),
            ));
        }
        let precision = resolve_precision(model.as_ref(), options.precision);
        let extractor = FeatureExtractor::new(model.dims().n_mels)?;

        let deadline = control
            .deadline
            .or_else(|| self.policy.timeout.and_then(|timeout| started.checked_add(timeout)));
        let run = RunControl::new(deadline, control.cancel);

        let language = match forced {
            Some(code) => LanguageDetector::forced(code),
            None => match self.detect_language(model.as_ref(), &extractor, &waveform, precision, &run)? {
                Some(estimate) => estimate,
                None => {
                    let stop = run.check().unwrap_or(Completion::TimedOut);
                    let assembly = Assembly {
                        segments: Vec::new(),
                        windows: Vec::new(),
                        completion: stop,
                    };
                    return self.finish(assembly, LanguageEstimate::undetermined(), options, &waveform, started);
                }
            },
        };

        let request = DecodeRequest::new(options, Some(&language.language), precision);
        let assembler = SegmentAssembler::new(model.as_ref(), &extractor, &self.slots);
        debug!(
            language = %language.language,
            %precision,
            single_window = waveform.fits_single_window(),
            "Decoding"
        );
        // Short input is one window unless the decoder asks to resume inside it.
        let assembly = assembler.assemble(&waveform, &request, &run)?;

        self.finish(assembly, language, options, &waveform, started)
    }

    /// Identify the language from the first window. `None` when the run was
    /// stopped before the model could be consulted.
    fn detect_language(
        &self,
        model: &dyn AcousticModel,
        extractor: &FeatureExtractor,
        waveform: &Waveform,
        precision: Precision,
        run: &RunControl,
    ) -> Result<Option<LanguageEstimate>> {
        if run.check().is_some() {
            return Ok(None);
        }
        let first = waveform.window(0, defaults::N_SAMPLES);
        let mel = extractor.extract(&NormalizedWaveform::from_samples(first));
        let _slot = match self.slots.acquire_until(run.deadline)? {
            SlotWait::Acquired(guard) => guard,
            SlotWait::DeadlineExpired => return Ok(None),
        };
        let estimate = LanguageDetector::detect(model, &mel, precision)?;
        if estimate.is_low_confidence(self.policy.language_confidence_threshold) {
            warn!(
                language = %estimate.language,
                confidence = estimate.confidence,
                "Low-confidence language detection"
            );
        }
        Ok(Some(estimate))
    }

    fn finish(
        &self,
        assembly: Assembly,
        language: LanguageEstimate,
        options: &DecodingOptions,
        waveform: &Waveform,
        started: Instant,
    ) -> Result<Transcription> {
        let elapsed = started.elapsed();
        let windows_completed = assembly.windows_decoded();

        if self.policy.on_timeout == TimeoutPolicy::Fail {
            match assembly.completion {
                Completion::TimedOut => {
                    return Err(VoxscribeError::TimeoutExceeded {
                        elapsed,
                        windows_completed,
                    });
                }
                Completion::Cancelled => return Err(VoxscribeError::Cancelled),
                _ => {}
            }
        }

        let result = merge(&assembly, &language.language)?;
        let low_confidence = (!language.forced
            && language.is_low_confidence(self.policy.language_confidence_threshold))
            || (!result.segments.is_empty() && result.is_low_confidence(&options.fallback));

        info!(
            windows = windows_completed,
            segments = result.segments.len(),
            language = %language.language,
            completion = ?assembly.completion,
            elapsed_ms = elapsed.as_millis() as u64,
            "Transcription finished"
        );

        Ok(Transcription {
            result,
            language,
            duration_secs: waveform.duration_secs(),
            elapsed,
            completion: assembly.completion,
            low_confidence,
        })
    }
}

/// Fp16 on a backend without it drops to fp32.
fn resolve_precision(model: &dyn AcousticModel, requested: Precision) -> Precision {
    if model.supports_precision(requested) {
        return requested;
    }
    warn!(
        model = model.name(),
        requested = %requested,
        "Precision not supported by backend; using fp32"
    );
    Precision::Fp32
}

/// Fold per-window results into one.
///
/// `avg_logprob` is weighted by scored tokens, `no_speech_prob` is the mean
/// over windows and `temperature` is the highest used.
fn merge(assembly: &Assembly, language: &str) -> Result<DecodingResult> {
    if assembly.windows.is_empty() {
        return Ok(DecodingResult::empty(Some(language.to_string())));
    }

    let text = assembly
        .segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let tokens = assembly
        .segments
        .iter()
        .flat_map(|s| s.tokens.iter().copied())
        .collect();

    let mut weighted = 0.0f64;
    let mut scored = 0usize;
    let mut no_speech = 0.0f32;
    let mut temperature = 0.0f32;
    let mut attempts = 0usize;
    for window in &assembly.windows {
        let n = window.tokens.len() + 1;
        weighted += f64::from(window.avg_logprob) * n as f64;
        scored += n;
        no_speech += window.no_speech_prob;
        temperature = temperature.max(window.temperature);
        attempts += window.attempts;
    }

    Ok(DecodingResult {
        compression_ratio: compression_ratio(&text)?,
        text,
        tokens,
        segments: assembly.segments.clone(),
        language: Some(language.to_string()),
        avg_logprob: (weighted / scored as f64) as f32,
        no_speech_prob: no_speech / assembly.windows.len() as f32,
        temperature,
        attempts,
        resume_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockModel;
    use crate::model::shared::StaticLoader;

    fn orchestrator(model: MockModel, policy: RuntimePolicy) -> (Arc<MockModel>, TranscriptionOrchestrator) {
        let model = Arc::new(model);
        let shared = SharedModel::new(StaticLoader::new(model.clone()));
        (model, TranscriptionOrchestrator::new(Arc::new(shared), policy))
    }

    fn tone(secs: f32) -> AudioInput {
        AudioInput::from(Waveform::new(
            (0..(secs * 16_000.0) as usize)
                .map(|i| 0.3 * (i as f32 * 0.17).sin())
                .collect(),
        ))
    }

    fn window(avg_logprob: f32, tokens: usize, no_speech_prob: f32, temperature: f32) -> DecodingResult {
        DecodingResult {
            tokens: vec![0; tokens],
            avg_logprob,
            no_speech_prob,
            temperature,
            attempts: 1,
            ..DecodingResult::empty(None)
        }
    }

    #[test]
    fn short_audio_transcribes_in_one_window() {
        let (model, orch) = orchestrator(MockModel::new().with_transcript("short clip"), RuntimePolicy::default());
        let out = orch.transcribe(&tone(5.0), &DecodingOptions::default()).unwrap();

        assert_eq!(out.text(), "short clip");
        assert_eq!(out.language.language, "en");
        assert!(!out.language.forced);
        assert_eq!(out.completion, Completion::Complete);
        assert!(!out.low_confidence);
        assert!(out.confidence() > 0.9);
        // One detection session plus one decode session.
        assert_eq!(model.sessions_started(), 2);
    }

    #[test]
    fn short_audio_ending_mid_sentence_keeps_the_tail() {
        let model = MockModel::new()
            .with_transcript("short clip")
            .with_unfinished_tail(4.0, "trailing off");
        let (model, orch) = orchestrator(model, RuntimePolicy::default());
        let options = DecodingOptions::default().with_language("en");
        let out = orch.transcribe(&tone(10.0), &options).unwrap();

        // Resumes at 4 and 8 s; the 2 s remainder closes normally.
        assert_eq!(model.sessions_started(), 3);
        assert_eq!(out.segments().len(), 3);
        assert!((out.segments()[2].start - 8.0).abs() < 1e-3);
        assert!((out.segments()[2].end - 10.0).abs() < 0.2);
        assert_eq!(out.text(), "short clip short clip short clip");
    }

    #[test]
    fn forced_language_skips_detection() {
        let (model, orch) = orchestrator(MockModel::new(), RuntimePolicy::default());
        let options = DecodingOptions::default().with_language("zh");
        let out = orch.transcribe(&tone(5.0), &options).unwrap();
        assert_eq!(out.language.language, "zh");
        assert_eq!(out.language.confidence, 1.0);
        assert!(out.language.forced);
        assert_eq!(model.sessions_started(), 1);
    }

    #[test]
    fn unsupported_language_for_english_model_is_config_error() {
        let (model, orch) = orchestrator(MockModel::english_only(), RuntimePolicy::default());
        let options = DecodingOptions::default().with_language("de");
        let err = orch.transcribe(&tone(2.0), &options).unwrap_err();
        assert!(matches!(err, VoxscribeError::Config { ref key, .. } if key == "language"));
        assert_eq!(model.sessions_started(), 0);
    }

    #[test]
    fn fp16_falls_back_on_fp32_backend() {
        let (_, orch) = orchestrator(MockModel::new(), RuntimePolicy::default());
        let options = DecodingOptions::default().with_precision(Precision::Fp16);
        assert!(orch.transcribe(&tone(2.0), &options).is_ok());
    }

    #[test]
    fn ambiguous_language_is_low_confidence() {
        let model = MockModel::new().with_language_logits(&[("fr", 2.0), ("es", 2.0)]);
        let (_, orch) = orchestrator(model, RuntimePolicy::default());
        let out = orch.transcribe(&tone(2.0), &DecodingOptions::default()).unwrap();
        assert!(out.low_confidence);
    }

    #[test]
    fn timeout_with_fail_policy_errors() {
        let policy = RuntimePolicy {
            on_timeout: TimeoutPolicy::Fail,
            ..RuntimePolicy::default()
        };
        let model = MockModel::new().with_session_delay(Duration::from_millis(300));
        let (_, orch) = orchestrator(model, policy);
        let control = RequestControl::with_timeout(Duration::from_millis(200));
        let err = orch
            .transcribe_with(&tone(75.0), &DecodingOptions::default().with_language("en"), control)
            .unwrap_err();
        assert!(matches!(err, VoxscribeError::TimeoutExceeded { windows_completed, .. } if windows_completed >= 1));
    }

    #[test]
    fn cancellation_returns_partial_by_default() {
        let (_, orch) = orchestrator(MockModel::new(), RuntimePolicy::default());
        let control = RequestControl::default();
        control.cancel.cancel();
        let out = orch
            .transcribe_with(&tone(45.0), &DecodingOptions::default(), control)
            .unwrap();
        assert_eq!(out.completion, Completion::Cancelled);
        assert_eq!(out.language.language, "und");
        assert!(out.segments().is_empty());
        assert_eq!(out.confidence(), 0.0);
    }

    #[test]
    fn merge_weights_by_tokens() {
        let assembly = Assembly {
            segments: Vec::new(),
            windows: vec![window(-0.2, 9, 0.1, 0.0), window(-1.0, 39, 0.3, 0.4)],
            completion: Completion::Complete,
        };
        let merged = merge(&assembly, "en").unwrap();
        // (-0.2 * 10 + -1.0 * 40) / 50
        assert!((merged.avg_logprob - (-0.84)).abs() < 1e-5);
        assert!((merged.no_speech_prob - 0.2).abs() < 1e-6);
        assert_eq!(merged.temperature, 0.4);
        assert_eq!(merged.attempts, 2);
    }

    #[tokio::test]
    async fn async_entry_point_runs_on_blocking_pool() {
        let (_, orch) = orchestrator(MockModel::new().with_transcript("async works"), RuntimePolicy::default());
        let out = Arc::new(orch)
            .transcribe_async(tone(3.0), DecodingOptions::default(), RequestControl::default())
            .await
            .unwrap();
        assert_eq!(out.text(), "async works");
    }
}
