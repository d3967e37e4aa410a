//! Special-token layout of a Whisper vocabulary.

use crate::defaults::TIMESTAMP_PRECISION;

/// Number of timestamp tokens (0.00 s through 30.00 s in 0.02 s steps).
pub const N_TIMESTAMPS: u32 = 1501;

/// Token ids the decoder needs to know about.
///
/// Every id below `eot` is an ordinary text token and every id from
/// `timestamp_begin` on is a timestamp. Everything in between is a control
/// token that is never sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    pub eot: u32,
    pub sot: u32,
    pub translate: u32,
    pub transcribe: u32,
    pub no_speech: u32,
    pub no_timestamps: u32,
    pub timestamp_begin: u32,
    pub n_vocab: usize,
    languages: Vec<(String, u32)>,
}

impl Vocabulary {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        eot: u32,
        sot: u32,
        translate: u32,
        transcribe: u32,
        no_speech: u32,
        no_timestamps: u32,
        timestamp_begin: u32,
        n_vocab: usize,
        languages: Vec<(String, u32)>,
    ) -> Self {
        Self {
            eot,
            sot,
            translate,
            transcribe,
            no_speech,
            no_timestamps,
            timestamp_begin,
            n_vocab,
            languages,
        }
    }

    /// Language codes and their token ids, in model order. Empty for
    /// English-only models.
    pub fn languages(&self) -> &[(String, u32)] {
        &self.languages
    }

    pub fn is_multilingual(&self) -> bool {
        !self.languages.is_empty()
    }

    pub fn language_token(&self, code: &str) -> Option<u32> {
        self.languages
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, id)| *id)
    }

    pub fn supports_language(&self, code: &str) -> bool {
        if self.is_multilingual() {
            self.language_token(code).is_some()
        } else {
            code == crate::defaults::ENGLISH_LANGUAGE
        }
    }

    pub fn is_text(&self, token: u32) -> bool {
        token < self.eot
    }

    pub fn is_timestamp(&self, token: u32) -> bool {
        token >= self.timestamp_begin
    }

    /// Seconds into the window encoded by a timestamp token.
    pub fn timestamp_seconds(&self, token: u32) -> Option<f32> {
        self.is_timestamp(token)
            .then(|| (token - self.timestamp_begin) as f32 * TIMESTAMP_PRECISION)
    }

    /// Timestamp token for `index` steps of [`TIMESTAMP_PRECISION`].
    pub fn timestamp_token(&self, index: u32) -> u32 {
        self.timestamp_begin + index.min(N_TIMESTAMPS - 1)
    }

    /// Initial decoder prompt for a window.
    pub fn prompt(&self, language: Option<&str>, timestamps: bool) -> Vec<u32> {
        let mut prompt = vec![self.sot];
        if self.is_multilingual() {
            if let Some(token) = language.and_then(|code| self.language_token(code)) {
                prompt.push(token);
            }
            prompt.push(self.transcribe);
        }
        if !timestamps {
            prompt.push(self.no_timestamps);
        }
        prompt
    }
}
