//! Whisper model tier catalog.
//!
//! Maps tier names to the Hugging Face repositories holding the weights,
//! tokenizer and config, plus the facts the pipeline needs before loading
//! (mel bin count, English-only suffix).

use std::path::PathBuf;
use std::sync::Arc;

use crate::defaults::{DEFAULT_MODEL, ENGLISH_ONLY_SUFFIX, N_MELS, N_MELS_V3};
use crate::error::{Result, VoxscribeError};
use crate::model::{AcousticModel, ModelLoader};

/// Metadata for a Whisper model tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Tier identifier (e.g., "tiny.en", "base", "large-v3")
    pub name: &'static str,
    /// Hugging Face repository id
    pub hf_repo: &'static str,
    /// Repository revision
    pub revision: &'static str,
    /// Approximate safetensors size in megabytes
    pub size_mb: u32,
    /// Mel bins the encoder expects
    pub n_mels: usize,
}

impl ModelInfo {
    /// English-only tiers carry the `.en` suffix and skip language detection.
    pub fn is_english_only(&self) -> bool {
        self.name.ends_with(ENGLISH_ONLY_SUFFIX)
    }

    /// Reject checkpoint configs whose mel bin count disagrees with the tier.
    pub fn check_mel_bins(&self, n_mels: usize) -> Result<()> {
        if n_mels != self.n_mels {
            return Err(VoxscribeError::model_load(
                self.name,
                format!("checkpoint expects {n_mels} mel bins, tier {} uses {}", self.name, self.n_mels),
            ));
        }
        Ok(())
    }
}

/// Catalog of available Whisper tiers, smallest first.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "tiny.en",
        hf_repo: "openai/whisper-tiny.en",
        revision: "main",
        size_mb: 151,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "tiny",
        hf_repo: "openai/whisper-tiny",
        revision: "main",
        size_mb: 151,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "base.en",
        hf_repo: "openai/whisper-base.en",
        revision: "main",
        size_mb: 290,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "base",
        hf_repo: "openai/whisper-base",
        revision: "main",
        size_mb: 290,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "small.en",
        hf_repo: "openai/whisper-small.en",
        revision: "main",
        size_mb: 967,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "small",
        hf_repo: "openai/whisper-small",
        revision: "main",
        size_mb: 967,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "medium.en",
        hf_repo: "openai/whisper-medium.en",
        revision: "main",
        size_mb: 3055,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "medium",
        hf_repo: "openai/whisper-medium",
        revision: "main",
        size_mb: 3055,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "large-v2",
        hf_repo: "openai/whisper-large-v2",
        revision: "main",
        size_mb: 6173,
        n_mels: N_MELS,
    },
    ModelInfo {
        name: "large-v3",
        hf_repo: "openai/whisper-large-v3",
        revision: "main",
        size_mb: 3087,
        n_mels: N_MELS_V3,
    },
    ModelInfo {
        name: "large-v3-turbo",
        hf_repo: "openai/whisper-large-v3-turbo",
        revision: "main",
        size_mb: 1618,
        n_mels: N_MELS_V3,
    },
];

/// Find a model by exact tier name.
pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

/// Resolve a tier name, accepting the short aliases `large` and `turbo`.
pub fn resolve_name(name: &str) -> Option<&'static ModelInfo> {
    let canonical = match name {
        "large" => "large-v3",
        "turbo" => "large-v3-turbo",
        other => other,
    };
    get_model(canonical)
}

/// Loads a catalog tier with the backend compiled into this build.
#[derive(Debug, Clone)]
pub struct CatalogLoader {
    info: &'static ModelInfo,
    cache_dir: Option<PathBuf>,
}

impl CatalogLoader {
    pub fn new(info: &'static ModelInfo, cache_dir: Option<PathBuf>) -> Self {
        Self { info, cache_dir }
    }

    /// Look up `name` (aliases allowed) and build a loader for it.
    pub fn for_name(name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let info = resolve_name(name).ok_or_else(|| {
            let known: Vec<_> = MODELS.iter().map(|m| m.name).collect();
            VoxscribeError::config(
                "model",
                format!("unknown model '{name}' (available: {})", known.join(", ")),
            )
        })?;
        Ok(Self::new(info, cache_dir))
    }

    pub fn info(&self) -> &'static ModelInfo {
        self.info
    }
}

impl ModelLoader for CatalogLoader {
    fn describe(&self) -> String {
        self.info.name.to_string()
    }

    #[cfg(feature = "candle")]
    fn load(&self) -> Result<Arc<dyn AcousticModel>> {
        let model = crate::model::candle::CandleWhisperModel::load(self.info, self.cache_dir.clone())?;
        Ok(Arc::new(model))
    }

    #[cfg(not(feature = "candle"))]
    fn load(&self) -> Result<Arc<dyn AcousticModel>> {
        Err(VoxscribeError::model_load(
            self.info.name,
            "no inference backend compiled in (enable the `candle` feature)",
        ))
    }
}

/// Get all available models.
pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

/// The default tier: multilingual `base`.
pub fn default_model() -> &'static ModelInfo {
    get_model(DEFAULT_MODEL).unwrap_or(&MODELS[0])
}
