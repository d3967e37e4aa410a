//! Acoustic model seam.
//!
//! The network is a black box: given a mel spectrogram and a token prefix it
//! returns next-token logits. Everything else (prompting, filtering, sampling,
//! fallback) lives in [`crate::decode`].

#[cfg(feature = "candle")]
pub mod candle;
pub mod catalog;
pub mod mock;
pub mod shared;
pub mod slots;
pub mod vocabulary;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::audio::MelSpectrogram;
use crate::error::{Result, VoxscribeError};

pub use shared::{ModelLoader, SharedModel};
pub use slots::{ExecutionSlots, SlotGuard};
pub use vocabulary::Vocabulary;

/// Numeric precision used for inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp16,
    #[default]
    Fp32,
}

impl FromStr for Precision {
    type Err = VoxscribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fp16" | "f16" | "half" => Ok(Self::Fp16),
            "fp32" | "f32" | "full" => Ok(Self::Fp32),
            other => Err(VoxscribeError::config(
                "precision",
                format!("unknown precision '{other}' (expected fp16 or fp32)"),
            )),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fp16 => write!(f, "fp16"),
            Self::Fp32 => write!(f, "fp32"),
        }
    }
}

/// Shape parameters of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDims {
    pub n_mels: usize,
    pub n_audio_ctx: usize,
    pub n_text_ctx: usize,
    pub n_vocab: usize,
}

/// A loaded Whisper-style encoder/decoder.
///
/// Implementations must be shareable across threads; a non-reentrant engine
/// serializes internally and callers bound concurrency with
/// [`ExecutionSlots`].
pub trait AcousticModel: Send + Sync {
    /// Model tier name, e.g. `base` or `large-v3`.
    fn name(&self) -> &str;

    fn dims(&self) -> ModelDims;

    fn vocabulary(&self) -> &Vocabulary;

    fn supports_precision(&self, precision: Precision) -> bool;

    /// Encode one window of features and open a decoding session over it.
    fn start_session<'a>(
        &'a self,
        mel: &MelSpectrogram,
        precision: Precision,
    ) -> Result<Box<dyn DecodeSession + 'a>>;

    /// Convert text tokens back to a string. Non-text tokens are ignored.
    fn detokenize(&self, tokens: &[u32]) -> Result<String>;
}

/// Decoder state bound to one encoded window.
pub trait DecodeSession {
    /// Logits for the token following `tokens`, one entry per vocabulary id.
    fn next_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>>;
}

impl<T: AcousticModel + ?Sized> AcousticModel for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn dims(&self) -> ModelDims {
        (**self).dims()
    }

    fn vocabulary(&self) -> &Vocabulary {
        (**self).vocabulary()
    }

    fn supports_precision(&self, precision: Precision) -> bool {
        (**self).supports_precision(precision)
    }

    fn start_session<'a>(
        &'a self,
        mel: &MelSpectrogram,
        precision: Precision,
    ) -> Result<Box<dyn DecodeSession + 'a>> {
        (**self).start_session(mel, precision)
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        (**self).detokenize(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_parses_common_spellings() {
        assert_eq!("fp16".parse::<Precision>().unwrap(), Precision::Fp16);
        assert_eq!("F32".parse::<Precision>().unwrap(), Precision::Fp32);
        assert_eq!(" half ".parse::<Precision>().unwrap(), Precision::Fp16);
    }

    #[test]
    fn unknown_precision_is_config_error() {
        let err = "int8".parse::<Precision>().unwrap_err();
        assert!(matches!(err, VoxscribeError::Config { ref key, .. } if key == "precision"));
    }

    #[test]
    fn precision_display_round_trips() {
        for p in [Precision::Fp16, Precision::Fp32] {
            assert_eq!(p.to_string().parse::<Precision>().unwrap(), p);
        }
    }

    #[test]
    fn arc_model_is_a_model() {
        fn assert_model<T: AcousticModel>() {}
        assert_model::<Arc<dyn AcousticModel>>();
        assert_model::<Arc<mock::MockModel>>();
    }
}
