//! Whisper inference via candle.
//!
//! Downloads `config.json`, `tokenizer.json` and `model.safetensors` from the
//! Hugging Face hub on first use, then runs the encoder once per window and the
//! decoder once per requested token.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::audio::MelSpectrogram;
use crate::error::{Result, VoxscribeError};
use crate::language::LANGUAGES;
use crate::model::catalog::ModelInfo;
use crate::model::{AcousticModel, DecodeSession, ModelDims, Precision, Vocabulary};

/// Whisper encoder/decoder running on the CPU.
pub struct CandleWhisperModel {
    name: String,
    model: Mutex<m::model::Whisper>,
    tokenizer: Tokenizer,
    vocab: Vocabulary,
    dims: ModelDims,
    device: Device,
}

impl CandleWhisperModel {
    /// Fetch (or reuse cached) artifacts for `info` and build the model.
    pub fn load(info: &ModelInfo, cache_dir: Option<PathBuf>) -> Result<Self> {
        let device = Device::Cpu;
        let load_err = |e: Box<dyn std::error::Error + Send + Sync>| {
            VoxscribeError::model_load(info.name, e)
        };

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(dir) = cache_dir {
            builder = builder.with_cache_dir(dir);
        }
        let api = builder.build().map_err(|e| load_err(e.into()))?;
        let repo = api.repo(Repo::with_revision(
            info.hf_repo.to_string(),
            RepoType::Model,
            info.revision.to_string(),
        ));

        let config_path = repo.get("config.json").map_err(|e| load_err(e.into()))?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(|e| load_err(e.into()))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| load_err(e.into()))?;

        let config_bytes = std::fs::read(&config_path).map_err(|e| load_err(e.into()))?;
        let config: Config =
            serde_json::from_slice(&config_bytes).map_err(|e| load_err(e.into()))?;
        info.check_mel_bins(config.num_mel_bins)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(load_err)?;
        let vocab = vocabulary_from_tokenizer(&tokenizer, &config, info.is_english_only())
            .map_err(|e| load_err(e.into()))?;

        // SAFETY: the weights file is owned by the hub cache and not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], m::DTYPE, &device)
                .map_err(|e| load_err(e.into()))?
        };
        let dims = ModelDims {
            n_mels: config.num_mel_bins,
            n_audio_ctx: config.max_source_positions,
            n_text_ctx: config.max_target_positions,
            n_vocab: config.vocab_size,
        };
        let model = m::model::Whisper::load(&vb, config).map_err(|e| load_err(e.into()))?;

        info!(model = info.name, n_mels = dims.n_mels, "Whisper model loaded");

        Ok(Self {
            name: info.name.to_string(),
            model: Mutex::new(model),
            tokenizer,
            vocab,
            dims,
            device,
        })
    }
}

fn vocabulary_from_tokenizer(
    tokenizer: &Tokenizer,
    config: &Config,
    english_only: bool,
) -> std::result::Result<Vocabulary, String> {
    let token = |name: &str| {
        tokenizer
            .token_to_id(name)
            .ok_or_else(|| format!("token '{name}' not found in vocabulary"))
    };

    let eot = token(m::EOT_TOKEN)?;
    let sot = token(m::SOT_TOKEN)?;
    let translate = token(m::TRANSLATE_TOKEN)?;
    let transcribe = token(m::TRANSCRIBE_TOKEN)?;
    let no_timestamps = token(m::NO_TIMESTAMPS_TOKEN)?;
    let no_speech = m::NO_SPEECH_TOKENS
        .iter()
        .find_map(|name| tokenizer.token_to_id(name))
        .ok_or("no-speech token not found in vocabulary")?;
    let timestamp_begin = tokenizer
        .token_to_id("<|0.00|>")
        .unwrap_or(no_timestamps + 1);

    let languages = if english_only {
        Vec::new()
    } else {
        LANGUAGES
            .iter()
            .filter_map(|(code, _)| {
                tokenizer
                    .token_to_id(&format!("<|{code}|>"))
                    .map(|id| (code.to_string(), id))
            })
            .collect()
    };

    Ok(Vocabulary::new(
        eot,
        sot,
        translate,
        transcribe,
        no_speech,
        no_timestamps,
        timestamp_begin,
        config.vocab_size,
        languages,
    ))
}

impl AcousticModel for CandleWhisperModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> ModelDims {
        self.dims
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn supports_precision(&self, precision: Precision) -> bool {
        // Half precision needs an accelerator; this build runs on the CPU.
        precision == Precision::Fp32
    }

    fn start_session<'a>(
        &'a self,
        mel: &MelSpectrogram,
        precision: Precision,
    ) -> Result<Box<dyn DecodeSession + 'a>> {
        mel.ensure_bins(self.dims.n_mels)?;
        if !self.supports_precision(precision) {
            return Err(VoxscribeError::inference(format!(
                "{} does not run at {precision} on {:?}",
                self.name, self.device
            )));
        }

        let mut model = self
            .model
            .lock()
            .map_err(|e| VoxscribeError::inference(format!("Model lock poisoned: {e}")))?;

        let mel_t = Tensor::from_vec(
            mel.to_row_major(),
            (1, mel.n_mels(), mel.n_frames()),
            &self.device,
        )
        .map_err(|e| VoxscribeError::inference(format!("Create mel tensor: {e}")))?;

        let audio_features = model
            .encoder
            .forward(&mel_t, true)
            .map_err(|e| VoxscribeError::inference(format!("Encoder forward: {e}")))?;
        debug!(shape = ?audio_features.shape(), "Encoded window");

        Ok(Box::new(CandleSession {
            model,
            audio_features,
            device: &self.device,
            first: true,
        }))
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        let text: Vec<u32> = tokens
            .iter()
            .copied()
            .filter(|&t| self.vocab.is_text(t))
            .collect();
        self.tokenizer
            .decode(&text, true)
            .map_err(|e| VoxscribeError::inference(format!("Detokenize: {e}")))
    }
}

struct CandleSession<'a> {
    model: MutexGuard<'a, m::model::Whisper>,
    audio_features: Tensor,
    device: &'a Device,
    first: bool,
}

impl DecodeSession for CandleSession<'_> {
    fn next_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        let tokens_t = Tensor::new(tokens, self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| VoxscribeError::inference(format!("Create tokens tensor: {e}")))?;

        // Cross-attention keys are cached after the first call of the session.
        let ys = self
            .model
            .decoder
            .forward(&tokens_t, &self.audio_features, self.first)
            .map_err(|e| VoxscribeError::inference(format!("Decoder forward: {e}")))?;
        self.first = false;

        let (_, seq_len, _) = ys
            .dims3()
            .map_err(|e| VoxscribeError::inference(format!("Decoder output dims: {e}")))?;
        let last = ys
            .i((..1, seq_len - 1..))
            .map_err(|e| VoxscribeError::inference(format!("Slice decoder output: {e}")))?;

        self.model
            .decoder
            .final_linear(&last)
            .and_then(|logits| logits.i(0))
            .and_then(|logits| logits.i(0))
            .and_then(|logits| logits.to_vec1::<f32>())
            .map_err(|e| VoxscribeError::inference(format!("Project logits: {e}")))
    }
}
