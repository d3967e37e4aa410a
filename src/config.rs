use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decode::{DecodingOptions, FallbackPolicy};
use crate::defaults;
use crate::error::{Result, VoxscribeError};
use crate::model::Precision;
use crate::orchestrator::{RuntimePolicy, TimeoutPolicy};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub decoding: DecodingConfig,
    pub runtime: RuntimeConfig,
}

/// Which model to load and how to run it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Catalog tier name, e.g. "base" or "large-v3"
    pub name: String,
    /// Hugging Face cache override; the hub default is used when unset
    pub cache_dir: Option<PathBuf>,
    /// "fp32" or "fp16"
    pub precision: String,
}

/// Decoding defaults applied to every request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecodingConfig {
    /// Language code or name, or "auto" to detect
    pub language: String,
    pub temperature: f32,
    pub temperature_increment: f32,
    pub max_attempts: Option<usize>,
    pub logprob_threshold: Option<f32>,
    pub no_speech_threshold: Option<f32>,
    pub compression_ratio_threshold: Option<f32>,
    pub suppress_silence: bool,
    pub timestamps: bool,
    pub max_new_tokens: usize,
    pub window_overlap_secs: f32,
    pub seed: u64,
}

/// Request limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Per-request timeout in milliseconds; 0 disables it
    pub timeout_ms: u64,
    /// Fail timed-out requests instead of returning partial transcripts
    pub fail_on_timeout: bool,
    pub inference_slots: usize,
    pub language_confidence_threshold: f32,
    /// Directory scanned for audio when the CLI is given no file
    pub upload_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_MODEL.to_string(),
            cache_dir: None,
            precision: Precision::default().to_string(),
        }
    }
}

impl Default for DecodingConfig {
    fn default() -> Self {
        let fallback = FallbackPolicy::default();
        Self {
            language: defaults::AUTO_LANGUAGE.to_string(),
            temperature: defaults::TEMPERATURE,
            temperature_increment: fallback.temperature_increment,
            max_attempts: fallback.max_attempts,
            logprob_threshold: fallback.logprob_threshold,
            no_speech_threshold: fallback.no_speech_threshold,
            compression_ratio_threshold: fallback.compression_ratio_threshold,
            suppress_silence: true,
            timestamps: true,
            max_new_tokens: defaults::MAX_NEW_TOKENS,
            window_overlap_secs: defaults::WINDOW_OVERLAP_SECS,
            seed: defaults::SEED,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            fail_on_timeout: false,
            inference_slots: defaults::INFERENCE_SLOTS,
            language_confidence_threshold: defaults::LANGUAGE_CONFIDENCE_THRESHOLD,
            upload_dir: PathBuf::from(defaults::UPLOAD_DIR),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXSCRIBE_MODEL → model.name
    /// - VOXSCRIBE_LANGUAGE → decoding.language
    /// - VOXSCRIBE_PRECISION → model.precision
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("VOXSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.model.name = model;
        }

        if let Ok(language) = std::env::var("VOXSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.decoding.language = language;
        }

        if let Ok(precision) = std::env::var("VOXSCRIBE_PRECISION")
            && !precision.is_empty()
        {
            self.model.precision = precision;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxscribe/config.toml on Linux, or a relative
    /// `voxscribe/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_default()
            .join("voxscribe")
            .join("config.toml")
    }

    /// Per-request decoding options built from `[model]` and `[decoding]`.
    ///
    /// Values are validated here so a bad file fails before any audio is read.
    pub fn decoding_options(&self) -> Result<DecodingOptions> {
        let d = &self.decoding;
        let options = DecodingOptions {
            language: Some(d.language.clone()),
            temperature: d.temperature,
            precision: self.model.precision.parse()?,
            suppress_silence: d.suppress_silence,
            timestamps: d.timestamps,
            max_new_tokens: d.max_new_tokens,
            window_overlap_secs: d.window_overlap_secs,
            seed: d.seed,
            fallback: FallbackPolicy {
                temperature_increment: d.temperature_increment,
                max_attempts: d.max_attempts,
                logprob_threshold: d.logprob_threshold,
                no_speech_threshold: d.no_speech_threshold,
                compression_ratio_threshold: d.compression_ratio_threshold,
            },
        };
        options.validate()?;
        Ok(options)
    }

    pub fn runtime_policy(&self) -> RuntimePolicy {
        let r = &self.runtime;
        RuntimePolicy {
            timeout: (r.timeout_ms > 0).then(|| Duration::from_millis(r.timeout_ms)),
            on_timeout: if r.fail_on_timeout {
                TimeoutPolicy::Fail
            } else {
                TimeoutPolicy::ReturnPartial
            },
            inference_slots: r.inference_slots,
            language_confidence_threshold: r.language_confidence_threshold,
        }
    }

    /// Reject a config whose values can never produce a transcription.
    pub fn validate(&self) -> Result<()> {
        if self.model.name.trim().is_empty() {
            return Err(VoxscribeError::config("model.name", "must not be empty"));
        }
        if self.runtime.inference_slots == 0 {
            return Err(VoxscribeError::config(
                "runtime.inference_slots",
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.runtime.language_confidence_threshold) {
            return Err(VoxscribeError::config(
                "runtime.language_confidence_threshold",
                "must be between 0 and 1",
            ));
        }
        self.decoding_options().map(|_| ())
    }
}
