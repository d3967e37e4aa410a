//! Per-request decoding options and the temperature fallback policy.

use crate::defaults;
use crate::error::{Result, VoxscribeError};
use crate::language::normalize_language;
use crate::model::Precision;

/// When a decode attempt is bad enough to retry at a higher temperature.
///
/// A `None` threshold disables that check.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackPolicy {
    /// Step between ladder rungs. Zero disables fallback.
    pub temperature_increment: f32,
    /// Upper bound on attempts per window, the first one included.
    pub max_attempts: Option<usize>,
    pub logprob_threshold: Option<f32>,
    pub no_speech_threshold: Option<f32>,
    pub compression_ratio_threshold: Option<f32>,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            temperature_increment: defaults::TEMPERATURE_INCREMENT,
            max_attempts: None,
            logprob_threshold: Some(defaults::LOGPROB_THRESHOLD),
            no_speech_threshold: Some(defaults::NO_SPEECH_THRESHOLD),
            compression_ratio_threshold: Some(defaults::COMPRESSION_RATIO_THRESHOLD),
        }
    }
}

impl FallbackPolicy {
    /// Single attempt at the first temperature.
    pub fn disabled() -> Self {
        Self {
            temperature_increment: 0.0,
            ..Self::default()
        }
    }

    /// Whether an attempt with these metrics should be retried.
    ///
    /// Repetitive or improbable output needs a retry, unless the window is
    /// judged to be silence, in which case there is nothing better to find.
    pub fn needs_fallback(
        &self,
        avg_logprob: f32,
        compression_ratio: f32,
        no_speech_prob: f32,
    ) -> bool {
        if self
            .no_speech_threshold
            .is_some_and(|threshold| no_speech_prob > threshold)
        {
            return false;
        }
        let too_repetitive = self
            .compression_ratio_threshold
            .is_some_and(|threshold| compression_ratio > threshold);
        let too_improbable = self
            .logprob_threshold
            .is_some_and(|threshold| avg_logprob < threshold);
        too_repetitive || too_improbable
    }

    /// Whether a window should be treated as containing no speech.
    ///
    /// High no-speech probability alone is not enough when the decoded text
    /// is itself confident.
    pub fn is_silent(&self, avg_logprob: f32, no_speech_prob: f32) -> bool {
        let Some(threshold) = self.no_speech_threshold else {
            return false;
        };
        no_speech_prob > threshold
            && !self
                .logprob_threshold
                .is_some_and(|logprob| avg_logprob > logprob)
    }
}

/// Options for one transcription request.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingOptions {
    /// Language code or name; `None` or `"auto"` requests detection.
    pub language: Option<String>,
    /// First temperature of the fallback ladder.
    pub temperature: f32,
    pub precision: Precision,
    /// Drop windows judged to be silence instead of emitting their text.
    ///
    /// A window is silence when its no-speech probability exceeds
    /// `fallback.no_speech_threshold`, unless its average log-probability
    /// clears `fallback.logprob_threshold`: confident text is kept even over
    /// a high no-speech score. See [`FallbackPolicy::is_silent`].
    pub suppress_silence: bool,
    /// Predict segment timestamps.
    pub timestamps: bool,
    /// Upper bound on tokens sampled per window.
    pub max_new_tokens: usize,
    /// Audio re-decoded between windows when no resume point is known.
    pub window_overlap_secs: f32,
    /// Base seed for sampling at non-zero temperature.
    pub seed: u64,
    pub fallback: FallbackPolicy,
}

impl Default for DecodingOptions {
    fn default() -> Self {
        Self {
            language: None,
            temperature: defaults::TEMPERATURE,
            precision: Precision::default(),
            suppress_silence: true,
            timestamps: true,
            max_new_tokens: defaults::MAX_NEW_TOKENS,
            window_overlap_secs: defaults::WINDOW_OVERLAP_SECS,
            seed: defaults::SEED,
            fallback: FallbackPolicy::default(),
        }
    }
}

impl DecodingOptions {
    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_suppress_silence(mut self, suppress: bool) -> Self {
        self.suppress_silence = suppress;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_window_overlap(mut self, secs: f32) -> Self {
        self.window_overlap_secs = secs;
        self
    }

    /// Resolved language code, or `None` for auto-detection.
    pub fn language_code(&self) -> Result<Option<&'static str>> {
        match self.language.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(lang) if lang.eq_ignore_ascii_case(defaults::AUTO_LANGUAGE) => Ok(None),
            Some(lang) => normalize_language(lang).map(Some).ok_or_else(|| {
                VoxscribeError::config("language", format!("unsupported language '{lang}'"))
            }),
        }
    }

    /// Reject values that cannot produce a meaningful decode.
    pub fn validate(&self) -> Result<()> {
        self.language_code()?;

        if !(0.0..=defaults::MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(VoxscribeError::config(
                "temperature",
                format!(
                    "{} is outside 0.0..={}",
                    self.temperature,
                    defaults::MAX_TEMPERATURE
                ),
            ));
        }
        let increment = self.fallback.temperature_increment;
        if increment.is_nan() || increment < 0.0 {
            return Err(VoxscribeError::config(
                "temperature_increment",
                "must be zero or positive",
            ));
        }
        if let Some(threshold) = self.fallback.no_speech_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(VoxscribeError::config(
                "no_speech_threshold",
                format!("{threshold} is not a probability"),
            ));
        }
        if let Some(threshold) = self.fallback.compression_ratio_threshold
            && (threshold.is_nan() || threshold <= 0.0)
        {
            return Err(VoxscribeError::config(
                "compression_ratio_threshold",
                "must be positive",
            ));
        }
        if self.fallback.max_attempts == Some(0) {
            return Err(VoxscribeError::config("max_attempts", "must be at least 1"));
        }
        if self.max_new_tokens == 0 {
            return Err(VoxscribeError::config("max_new_tokens", "must be at least 1"));
        }
        let window = defaults::CHUNK_SECS as f32;
        if !(0.0..window).contains(&self.window_overlap_secs) {
            return Err(VoxscribeError::config(
                "window_overlap_secs",
                format!("{} is outside 0.0..{window}", self.window_overlap_secs),
            ));
        }
        Ok(())
    }

    /// Temperatures tried in order: the first rung, then increments up to the
    /// maximum temperature and attempt count.
    pub fn temperatures(&self) -> Vec<f32> {
        let mut ladder = vec![self.temperature];
        let step = self.fallback.temperature_increment;
        let max_attempts = self.fallback.max_attempts.unwrap_or(usize::MAX).max(1);
        if step <= 0.0 {
            return ladder;
        }
        let mut n = 1;
        while ladder.len() < max_attempts {
            let t = self.temperature + step * n as f32;
            if t > defaults::MAX_TEMPERATURE + 1e-6 {
                break;
            }
            ladder.push(t.min(defaults::MAX_TEMPERATURE));
            n += 1;
        }
        ladder
    }
}
