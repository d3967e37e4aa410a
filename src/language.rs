//! Spoken-language identification.
//!
//! Detection runs a single decoder step on `[<|startoftranscript|>]` and reads
//! the distribution over language tokens. A forced language skips the model.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::audio::MelSpectrogram;
use crate::defaults::ENGLISH_LANGUAGE;
use crate::error::{Result, VoxscribeError};
use crate::model::{AcousticModel, Precision};

/// Whisper language codes and English names, in token order.
pub const LANGUAGES: &[(&str, &str)] = &[
    ("en", "english"),
    ("zh", "chinese"),
    ("de", "german"),
    ("es", "spanish"),
    ("ru", "russian"),
    ("ko", "korean"),
    ("fr", "french"),
    ("ja", "japanese"),
    ("pt", "portuguese"),
    ("tr", "turkish"),
    ("pl", "polish"),
    ("ca", "catalan"),
    ("nl", "dutch"),
    ("ar", "arabic"),
    ("sv", "swedish"),
    ("it", "italian"),
    ("id", "indonesian"),
    ("hi", "hindi"),
    ("fi", "finnish"),
    ("vi", "vietnamese"),
    ("he", "hebrew"),
    ("uk", "ukrainian"),
    ("el", "greek"),
    ("ms", "malay"),
    ("cs", "czech"),
    ("ro", "romanian"),
    ("da", "danish"),
    ("hu", "hungarian"),
    ("ta", "tamil"),
    ("no", "norwegian"),
    ("th", "thai"),
    ("ur", "urdu"),
    ("hr", "croatian"),
    ("bg", "bulgarian"),
    ("lt", "lithuanian"),
    ("la", "latin"),
    ("mi", "maori"),
    ("ml", "malayalam"),
    ("cy", "welsh"),
    ("sk", "slovak"),
    ("te", "telugu"),
    ("fa", "persian"),
    ("lv", "latvian"),
    ("bn", "bengali"),
    ("sr", "serbian"),
    ("az", "azerbaijani"),
    ("sl", "slovenian"),
    ("kn", "kannada"),
    ("et", "estonian"),
    ("mk", "macedonian"),
    ("br", "breton"),
    ("eu", "basque"),
    ("is", "icelandic"),
    ("hy", "armenian"),
    ("ne", "nepali"),
    ("mn", "mongolian"),
    ("bs", "bosnian"),
    ("kk", "kazakh"),
    ("sq", "albanian"),
    ("sw", "swahili"),
    ("gl", "galician"),
    ("mr", "marathi"),
    ("pa", "punjabi"),
    ("si", "sinhala"),
    ("km", "khmer"),
    ("sn", "shona"),
    ("yo", "yoruba"),
    ("so", "somali"),
    ("af", "afrikaans"),
    ("oc", "occitan"),
    ("ka", "georgian"),
    ("be", "belarusian"),
    ("tg", "tajik"),
    ("sd", "sindhi"),
    ("gu", "gujarati"),
    ("am", "amharic"),
    ("yi", "yiddish"),
    ("lo", "lao"),
    ("uz", "uzbek"),
    ("fo", "faroese"),
    ("ht", "haitian creole"),
    ("ps", "pashto"),
    ("tk", "turkmen"),
    ("nn", "nynorsk"),
    ("mt", "maltese"),
    ("sa", "sanskrit"),
    ("lb", "luxembourgish"),
    ("my", "myanmar"),
    ("bo", "tibetan"),
    ("tl", "tagalog"),
    ("mg", "malagasy"),
    ("as", "assamese"),
    ("tt", "tatar"),
    ("haw", "hawaiian"),
    ("ln", "lingala"),
    ("ha", "hausa"),
    ("ba", "bashkir"),
    ("jw", "javanese"),
    ("su", "sundanese"),
    ("yue", "cantonese"),
];

/// ISO 639 code for an undetermined language.
pub const UNDETERMINED: &str = "und";

/// Alternative names accepted in place of a code.
const ALIASES: &[(&str, &str)] = &[
    ("burmese", "my"),
    ("valencian", "ca"),
    ("flemish", "nl"),
    ("haitian", "ht"),
    ("letzeburgesch", "lb"),
    ("pushto", "ps"),
    ("panjabi", "pa"),
    ("moldavian", "ro"),
    ("moldovan", "ro"),
    ("sinhalese", "si"),
    ("castilian", "es"),
    ("mandarin", "zh"),
];

/// Resolve a language code, English name or alias to its code.
pub fn normalize_language(input: &str) -> Option<&'static str> {
    let key = input.trim().to_lowercase();
    LANGUAGES
        .iter()
        .find(|(code, name)| *code == key || *name == key)
        .map(|(code, _)| *code)
        .or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == key)
                .map(|(_, code)| *code)
        })
}

/// Result of language identification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageEstimate {
    /// Most probable language code.
    pub language: String,
    /// Probability of `language`.
    pub confidence: f32,
    /// Probability per candidate language; sums to one.
    pub probabilities: BTreeMap<String, f32>,
    /// Set when the caller fixed the language instead of detecting it.
    pub forced: bool,
}

impl LanguageEstimate {
    /// Placeholder for a run that stopped before detection. Code `und`, confidence 0.
    pub fn undetermined() -> Self {
        Self {
            language: UNDETERMINED.to_string(),
            confidence: 0.0,
            probabilities: BTreeMap::new(),
            forced: false,
        }
    }

    pub fn is_low_confidence(&self, threshold: f32) -> bool {
        self.confidence < threshold
    }

    /// The `n` most likely languages, best first.
    pub fn top(&self, n: usize) -> Vec<(&str, f32)> {
        let mut ranked: Vec<_> = self
            .probabilities
            .iter()
            .map(|(code, p)| (code.as_str(), *p))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Language identification over one window of features.
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageDetector;

impl LanguageDetector {
    /// Certain estimate for a caller-supplied language. No model access.
    pub fn forced(code: &str) -> LanguageEstimate {
        LanguageEstimate {
            language: code.to_string(),
            confidence: 1.0,
            probabilities: BTreeMap::from([(code.to_string(), 1.0)]),
            forced: true,
        }
    }

    /// Identify the spoken language of `mel`.
    ///
    /// English-only models have no language tokens and always report English.
    /// A low-confidence estimate is returned as-is for the caller to judge.
    pub fn detect(
        model: &dyn AcousticModel,
        mel: &MelSpectrogram,
        precision: Precision,
    ) -> Result<LanguageEstimate> {
        let vocab = model.vocabulary();
        if !vocab.is_multilingual() {
            return Ok(LanguageEstimate {
                language: ENGLISH_LANGUAGE.to_string(),
                confidence: 1.0,
                probabilities: BTreeMap::from([(ENGLISH_LANGUAGE.to_string(), 1.0)]),
                forced: false,
            });
        }

        let mut session = model.start_session(mel, precision)?;
        let logits = session.next_logits(&[vocab.sot])?;

        let candidates: Vec<(&str, f32)> = vocab
            .languages()
            .iter()
            .map(|(code, id)| {
                logits
                    .get(*id as usize)
                    .map(|&logit| (code.as_str(), logit))
                    .ok_or_else(|| {
                        VoxscribeError::inference(format!(
                            "language token {id} outside logits of length {}",
                            logits.len()
                        ))
                    })
            })
            .collect::<Result<_>>()?;

        let max = candidates
            .iter()
            .map(|(_, l)| *l)
            .fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = candidates.iter().map(|(_, l)| (l - max).exp()).collect();
        let total: f32 = exp.iter().sum();

        let probabilities: BTreeMap<String, f32> = candidates
            .iter()
            .zip(&exp)
            .map(|((code, _), e)| (code.to_string(), e / total))
            .collect();

        let (language, confidence) = probabilities
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(code, p)| (code.clone(), *p))
            .ok_or_else(|| VoxscribeError::inference("model exposes no language tokens"))?;

        debug!(%language, confidence, "Detected language");
        Ok(LanguageEstimate {
            language,
            confidence,
            probabilities,
            forced: false,
        })
    }
}
