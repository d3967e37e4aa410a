//! Deterministic stand-in for a Whisper model.
//!
//! The mock reads the mel spectrogram it is given: a window whose peak is
//! below the silence level is reported as no-speech, anything else "speaks"
//! the configured transcript, bracketed by timestamps that match where the
//! energy in the window stops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::audio::MelSpectrogram;
use crate::defaults::{N_MELS, TIMESTAMP_PRECISION};
use crate::error::{Result, VoxscribeError};
use crate::language::LANGUAGES;
use crate::model::vocabulary::N_TIMESTAMPS;
use crate::model::{AcousticModel, DecodeSession, ModelDims, Precision, Vocabulary};

/// Mel peak below which a window counts as silent. An all-zero window sits at -1.5.
const SILENCE_LEVEL: f32 = -1.0;

/// Seconds per mel frame.
const FRAME_SECS: f32 = 0.01;

/// Logit given to timestamps the mock is not currently emitting.
const IDLE_TIMESTAMP_LOGIT: f32 = -10.0;

/// Logit given to languages without an explicit score.
const IDLE_LANGUAGE_LOGIT: f32 = -10.0;

/// No-speech logit magnitude.
const NO_SPEECH_LOGIT: f32 = 15.0;

/// Mock acoustic model with call counters.
#[derive(Debug)]
pub struct MockModel {
    name: String,
    n_mels: usize,
    multilingual: bool,
    words: Vec<String>,
    transcript: Vec<u32>,
    tail_text: String,
    tail: Vec<u32>,
    tail_at: Option<u32>,
    vocab: Vocabulary,
    language_logits: Vec<(String, f32)>,
    margin: f32,
    fp16: bool,
    session_delay: Option<Duration>,
    fail_after_sessions: Option<usize>,
    sessions: AtomicUsize,
    forward_passes: AtomicUsize,
}

impl Default for MockModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModel {
    /// Multilingual mock that hears English and speaks a short sentence.
    pub fn new() -> Self {
        let mut model = Self {
            name: "mock".to_string(),
            n_mels: N_MELS,
            multilingual: true,
            words: Vec::new(),
            transcript: Vec::new(),
            tail_text: String::new(),
            tail: Vec::new(),
            tail_at: None,
            vocab: Vocabulary::new(0, 0, 0, 0, 0, 0, 0, 0, Vec::new()),
            language_logits: vec![("en".to_string(), 8.0)],
            margin: 10.0,
            fp16: false,
            session_delay: None,
            fail_after_sessions: None,
            sessions: AtomicUsize::new(0),
            forward_passes: AtomicUsize::new(0),
        };
        model.rebuild("hello from the mock model");
        model
    }

    /// English-only variant: no language tokens, `[sot]` prompt.
    pub fn english_only() -> Self {
        let mut model = Self::new().with_name("mock.en");
        model.multilingual = false;
        let transcript = model.words_text();
        model.rebuild(&transcript);
        model
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Words spoken in every non-silent window.
    pub fn with_transcript(mut self, text: &str) -> Self {
        self.rebuild(text);
        self
    }

    /// When speech runs past `secs`, close the segment there and trail off
    /// into `text` without a closing timestamp.
    pub fn with_unfinished_tail(mut self, secs: f32, text: &str) -> Self {
        self.tail_text = text.to_string();
        self.tail_at = Some((secs / TIMESTAMP_PRECISION).round() as u32);
        let transcript = self.words_text();
        self.rebuild(&transcript);
        self
    }

    /// Raw language logits; unspecified languages score very low.
    pub fn with_language_logits(mut self, logits: &[(&str, f32)]) -> Self {
        self.language_logits = logits
            .iter()
            .map(|(code, logit)| (code.to_string(), *logit))
            .collect();
        self
    }

    /// Logit lead of the planned token over its competitors. Small margins
    /// produce low average log-probabilities.
    pub fn with_margin(mut self, margin: f32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_mel_bins(mut self, n_mels: usize) -> Self {
        self.n_mels = n_mels;
        self
    }

    pub fn with_fp16(mut self, supported: bool) -> Self {
        self.fp16 = supported;
        self
    }

    /// Sleep this long whenever a session starts.
    pub fn with_session_delay(mut self, delay: Duration) -> Self {
        self.session_delay = Some(delay);
        self
    }

    /// Fail every session after the first `n`.
    pub fn failing_after(mut self, sessions: usize) -> Self {
        self.fail_after_sessions = Some(sessions);
        self
    }

    /// Sessions opened so far (one per decoded window and detection pass).
    pub fn sessions_started(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// `next_logits` calls so far.
    pub fn forward_passes(&self) -> usize {
        self.forward_passes.load(Ordering::SeqCst)
    }

    fn words_text(&self) -> String {
        self.transcript
            .iter()
            .filter_map(|&t| self.words.get(t as usize))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn rebuild(&mut self, text: &str) {
        let mut words: Vec<String> = Vec::new();
        let mut transcript = Vec::new();
        for word in text.split_whitespace() {
            let id = match words.iter().position(|w| w == word) {
                Some(id) => id,
                None => {
                    words.push(word.to_string());
                    words.len() - 1
                }
            };
            transcript.push(id as u32);
        }
        let mut tail = Vec::new();
        for word in self.tail_text.split_whitespace() {
            let id = match words.iter().position(|w| w == word) {
                Some(id) => id,
                None => {
                    words.push(word.to_string());
                    words.len() - 1
                }
            };
            tail.push(id as u32);
        }

        let eot = words.len() as u32;
        let sot = eot + 1;
        let languages: Vec<(String, u32)> = if self.multilingual {
            LANGUAGES
                .iter()
                .enumerate()
                .map(|(i, (code, _))| (code.to_string(), sot + 1 + i as u32))
                .collect()
        } else {
            Vec::new()
        };
        let translate = sot + 1 + languages.len() as u32;
        let transcribe = translate + 1;
        let no_speech = transcribe + 1;
        let no_timestamps = no_speech + 1;
        let timestamp_begin = no_timestamps + 1;
        let n_vocab = (timestamp_begin + N_TIMESTAMPS) as usize;

        self.vocab = Vocabulary::new(
            eot,
            sot,
            translate,
            transcribe,
            no_speech,
            no_timestamps,
            timestamp_begin,
            n_vocab,
            languages,
        );
        self.words = words;
        self.transcript = transcript;
        self.tail = tail;
    }
}

impl AcousticModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> ModelDims {
        ModelDims {
            n_mels: self.n_mels,
            n_audio_ctx: 1500,
            n_text_ctx: 448,
            n_vocab: self.vocab.n_vocab,
        }
    }

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn supports_precision(&self, precision: Precision) -> bool {
        precision == Precision::Fp32 || self.fp16
    }

    fn start_session<'a>(
        &'a self,
        mel: &MelSpectrogram,
        precision: Precision,
    ) -> Result<Box<dyn DecodeSession + 'a>> {
        mel.ensure_bins(self.n_mels)?;
        if !self.supports_precision(precision) {
            return Err(VoxscribeError::inference(format!(
                "{} does not run at {precision}",
                self.name
            )));
        }

        let started = self.sessions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.session_delay {
            std::thread::sleep(delay);
        }
        if self.fail_after_sessions.is_some_and(|limit| started >= limit) {
            return Err(VoxscribeError::inference("mock encoder failure"));
        }

        let silent = mel.max() < SILENCE_LEVEL;
        Ok(Box::new(MockSession {
            model: self,
            silent,
            speech_end: speech_end_index(mel),
            answered_sot: false,
        }))
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        Ok(tokens
            .iter()
            .filter(|&&t| self.vocab.is_text(t))
            .filter_map(|&t| self.words.get(t as usize))
            .map(|w| format!(" {w}"))
            .collect())
    }
}

/// Timestamp index at which energy in the window stops.
fn speech_end_index(mel: &MelSpectrogram) -> u32 {
    let view = mel.view();
    let loud = mel.max() - 1.0;
    let last_loud_frame = (0..mel.n_frames())
        .rev()
        .find(|&t| view.column(t).iter().any(|&v| v > loud))
        .unwrap_or(0);
    let secs = (last_loud_frame + 1) as f32 * FRAME_SECS;
    ((secs / TIMESTAMP_PRECISION).round() as u32).clamp(1, N_TIMESTAMPS - 1)
}

struct MockSession<'a> {
    model: &'a MockModel,
    silent: bool,
    speech_end: u32,
    answered_sot: bool,
}

impl MockSession<'_> {
    fn planned_token(&self, step: usize, timestamps: bool) -> u32 {
        let vocab = &self.model.vocab;
        if self.silent {
            return vocab.eot;
        }
        let words = &self.model.transcript;
        if timestamps && let Some(close) = self.unfinished_at() {
            let n = words.len();
            return match step {
                0 => vocab.timestamp_token(0),
                s if s <= n => words[s - 1],
                s if s <= n + 2 => vocab.timestamp_token(close),
                s => self.model.tail.get(s - n - 3).copied().unwrap_or(vocab.eot),
            };
        }
        if timestamps {
            match step {
                0 => vocab.timestamp_token(0),
                s if s <= words.len() => words[s - 1],
                s if s == words.len() + 1 => vocab.timestamp_token(self.speech_end),
                _ => vocab.eot,
            }
        } else {
            words.get(step).copied().unwrap_or(vocab.eot)
        }
    }

    /// Timestamp index of the tail, when this window's speech runs past it.
    fn unfinished_at(&self) -> Option<u32> {
        self.model
            .tail_at
            .filter(|&at| !self.model.tail.is_empty() && self.speech_end > at)
    }
}

impl DecodeSession for MockSession<'_> {
    fn next_logits(&mut self, tokens: &[u32]) -> Result<Vec<f32>> {
        self.model.forward_passes.fetch_add(1, Ordering::SeqCst);
        let vocab = &self.model.vocab;

        let mut logits = vec![0.0f32; vocab.n_vocab];
        for logit in &mut logits[vocab.timestamp_begin as usize..] {
            *logit = IDLE_TIMESTAMP_LOGIT;
        }

        // The first bare [sot] query is language/no-speech detection. An
        // English-only prompt with timestamps is also [sot], so later ones decode.
        if tokens == [vocab.sot] && !self.answered_sot {
            self.answered_sot = true;
            for (_, id) in vocab.languages() {
                logits[*id as usize] = IDLE_LANGUAGE_LOGIT;
            }
            for (code, logit) in &self.model.language_logits {
                if let Some(id) = vocab.language_token(code) {
                    logits[id as usize] = *logit;
                }
            }
            logits[vocab.no_speech as usize] = if self.silent {
                NO_SPEECH_LOGIT
            } else {
                -NO_SPEECH_LOGIT
            };
            return Ok(logits);
        }

        let prompt_len = tokens
            .iter()
            .take_while(|&&t| t > vocab.eot && !vocab.is_timestamp(t))
            .count();
        let timestamps = !tokens[..prompt_len].contains(&vocab.no_timestamps);
        let step = tokens.len() - prompt_len;

        let planned = self.planned_token(step, timestamps);
        logits[planned as usize] = self.model.margin;
        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{FeatureExtractor, NormalizedWaveform};

    fn mel_of(samples: &[f32]) -> MelSpectrogram {
        FeatureExtractor::new(N_MELS)
            .unwrap()
            .extract(&NormalizedWaveform::from_samples(samples))
    }

    fn tone(secs: f32) -> Vec<f32> {
        (0..(secs * 16_000.0) as usize)
            .map(|i| 0.3 * (i as f32 * 0.17).sin())
            .collect()
    }

    #[test]
    fn vocabulary_layout_is_contiguous() {
        let model = MockModel::new().with_transcript("a b a c");
        let vocab = model.vocabulary();
        assert_eq!(vocab.eot, 3);
        assert_eq!(vocab.sot, 4);
        assert_eq!(vocab.languages().len(), LANGUAGES.len());
        assert_eq!(vocab.timestamp_begin, vocab.no_timestamps + 1);
        assert_eq!(vocab.n_vocab, (vocab.timestamp_begin + N_TIMESTAMPS) as usize);
    }

    #[test]
    fn english_only_has_no_languages() {
        let model = MockModel::english_only();
        assert!(!model.vocabulary().is_multilingual());
        assert_eq!(model.name(), "mock.en");
    }

    #[test]
    fn silence_is_detected_from_features() {
        let model = MockModel::new();
        let mel = mel_of(&[]);
        let mut session = model.start_session(&mel, Precision::Fp32).unwrap();
        let logits = session.next_logits(&[model.vocabulary().sot]).unwrap();
        assert_eq!(logits[model.vocabulary().no_speech as usize], NO_SPEECH_LOGIT);
        assert_eq!(model.sessions_started(), 1);
        assert_eq!(model.forward_passes(), 1);
    }

    #[test]
    fn speech_end_tracks_tone_length() {
        let index = speech_end_index(&mel_of(&tone(10.0)));
        let secs = index as f32 * TIMESTAMP_PRECISION;
        assert!((secs - 10.0).abs() < 0.1, "speech end {secs}");
    }

    #[test]
    fn plan_without_timestamps_is_words_then_eot() {
        let model = MockModel::new().with_transcript("one two");
        let mel = mel_of(&tone(2.0));
        let mut session = model.start_session(&mel, Precision::Fp32).unwrap();
        let vocab = model.vocabulary().clone();
        let prompt = vocab.prompt(Some("en"), false);

        let first = session.next_logits(&prompt).unwrap();
        assert_eq!(first[0], 10.0);

        let mut after = prompt.clone();
        after.extend([0, 1]);
        let last = session.next_logits(&after).unwrap();
        assert_eq!(last[vocab.eot as usize], 10.0);
    }

    #[test]
    fn unsupported_precision_fails() {
        let model = MockModel::new();
        let mel = mel_of(&[]);
        assert!(model.start_session(&mel, Precision::Fp16).is_err());
        assert!(
            MockModel::new()
                .with_fp16(true)
                .start_session(&mel, Precision::Fp16)
                .is_ok()
        );
    }

    #[test]
    fn mel_bin_mismatch_is_reported() {
        let model = MockModel::new().with_mel_bins(128);
        let err = model.start_session(&mel_of(&[]), Precision::Fp32).err();
        assert!(matches!(
            err,
            Some(VoxscribeError::FeatureDimension {
                expected: 128,
                actual: 80
            })
        ));
    }

    #[test]
    fn failing_after_limit() {
        let model = MockModel::new().failing_after(1);
        let mel = mel_of(&[]);
        assert!(model.start_session(&mel, Precision::Fp32).is_ok());
        assert!(model.start_session(&mel, Precision::Fp32).is_err());
    }

    #[test]
    fn detokenize_skips_special_tokens() {
        let model = MockModel::new().with_transcript("hi there");
        let vocab = model.vocabulary();
        let text = model
            .detokenize(&[vocab.timestamp_begin, 0, 1, vocab.eot])
            .unwrap();
        assert_eq!(text, " hi there");
    }
}
