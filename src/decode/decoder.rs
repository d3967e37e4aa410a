//! Constrained autoregressive decoding with a temperature fallback ladder.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::audio::MelSpectrogram;
use crate::decode::filters::{LogitFilter, log_softmax, softmax_at};
use crate::decode::options::DecodingOptions;
use crate::decode::result::{DecodingResult, Segment};
use crate::error::{Result, VoxscribeError};
use crate::model::{AcousticModel, Precision, Vocabulary};

/// What stays fixed across every window of a request.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    pub options: &'a DecodingOptions,
    /// Resolved language code used in the prompt.
    pub language: Option<&'a str>,
    /// Precision the model supports; fallback from fp16 already applied.
    pub precision: Precision,
}

impl<'a> DecodeRequest<'a> {
    pub fn new(options: &'a DecodingOptions, language: Option<&'a str>, precision: Precision) -> Self {
        Self {
            options,
            language,
            precision,
        }
    }
}

/// Turns one window of features into text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

impl Decoder {
    /// Decode a window, retrying at higher temperatures when the output is
    /// repetitive or improbable.
    ///
    /// The returned attempt never has a lower `avg_logprob` than the first one.
    /// `window_secs` is the real audio length of the window (the tail of the
    /// last window is padding).
    pub fn decode(
        model: &dyn AcousticModel,
        mel: &MelSpectrogram,
        request: &DecodeRequest<'_>,
        window_secs: f32,
    ) -> Result<DecodingResult> {
        let ladder = request.options.temperatures();
        let policy = &request.options.fallback;

        let mut first_avg: Option<f32> = None;
        let mut best: Option<DecodingResult> = None;

        for (attempt, &temperature) in ladder.iter().enumerate() {
            let mut result = Self::decode_once(model, mel, request, window_secs, temperature, attempt)?;
            let baseline = *first_avg.get_or_insert(result.avg_logprob);

            let needs_fallback = policy.needs_fallback(
                result.avg_logprob,
                result.compression_ratio,
                result.no_speech_prob,
            );
            if !needs_fallback && result.avg_logprob >= baseline {
                result.attempts = attempt + 1;
                return Ok(result);
            }

            debug!(
                temperature,
                avg_logprob = result.avg_logprob,
                compression_ratio = result.compression_ratio,
                "Decode attempt rejected"
            );

            best = match best {
                Some(kept) if kept.avg_logprob >= result.avg_logprob => Some(kept),
                _ => Some(result),
            };
        }

        let mut best = best.ok_or_else(|| VoxscribeError::inference("empty temperature ladder"))?;
        best.attempts = ladder.len();
        warn!(
            attempts = best.attempts,
            avg_logprob = best.avg_logprob,
            temperature = best.temperature,
            "No decode attempt cleared the thresholds; keeping the most probable"
        );
        Ok(best)
    }

    /// A single pass at a fixed temperature.
    pub fn decode_once(
        model: &dyn AcousticModel,
        mel: &MelSpectrogram,
        request: &DecodeRequest<'_>,
        window_secs: f32,
        temperature: f32,
        attempt: usize,
    ) -> Result<DecodingResult> {
        let dims = model.dims();
        mel.ensure_bins(dims.n_mels)?;

        let vocab = model.vocabulary();
        let options = request.options;
        let mut session = model.start_session(mel, request.precision)?;

        let sot_logits = session.next_logits(&[vocab.sot])?;
        let no_speech_prob = softmax_at(&sot_logits, vocab.no_speech as usize);

        let prompt = vocab.prompt(request.language, options.timestamps);
        let sample_len = options.max_new_tokens.min(dims.n_text_ctx / 2).max(1);
        let filter = LogitFilter::new(vocab, options.timestamps);
        let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(attempt as u64));

        let mut tokens = prompt;
        let mut sampled: Vec<u32> = Vec::new();
        let mut sum_logprob = 0.0f64;

        for _ in 0..sample_len {
            let mut logits = session.next_logits(&tokens)?;
            filter.apply(&mut logits, &sampled);

            let next = if temperature <= 0.0 {
                argmax(&logits)
            } else {
                sample(&logits, temperature, &mut rng)
            };
            let Some(next) = next else {
                break;
            };

            let log_probs = log_softmax(&logits);
            sum_logprob += f64::from(log_probs[next as usize]);
            if next == vocab.eot {
                break;
            }
            sampled.push(next);
            tokens.push(next);
        }

        let avg_logprob = (sum_logprob / (sampled.len() + 1) as f64) as f32;
        let full_text = model.detokenize(&sampled)?;
        let compression_ratio = compression_ratio(full_text.trim())?;

        let split = split_segments(vocab, &sampled, options.timestamps, window_secs);
        let mut segments = Vec::with_capacity(split.spans.len());
        let mut kept_tokens = Vec::new();
        for span in split.spans {
            let text = model.detokenize(&span.tokens)?;
            kept_tokens.extend_from_slice(&span.tokens);
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            segments.push(Segment {
                start: span.start,
                end: span.end,
                text,
                tokens: span.tokens,
                avg_logprob,
                no_speech_prob,
                temperature,
                compression_ratio,
            });
        }
        let text = model.detokenize(&kept_tokens)?.trim().to_string();

        Ok(DecodingResult {
            text,
            tokens: sampled,
            segments,
            language: request.language.map(str::to_string),
            avg_logprob,
            no_speech_prob,
            temperature,
            compression_ratio,
            attempts: 1,
            resume_at: split.resume_at,
        })
    }
}

/// Index of the first maximum finite logit.
fn argmax(logits: &[f32]) -> Option<u32> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &logit) in logits.iter().enumerate() {
        if logit.is_finite() && best.is_none_or(|(_, b)| logit > b) {
            best = Some((i, logit));
        }
    }
    best.map(|(i, _)| i as u32)
}

/// Draw from `softmax(logits / temperature)`.
fn sample(logits: &[f32], temperature: f32, rng: &mut StdRng) -> Option<u32> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return None;
    }
    let weights: Vec<f64> = logits
        .iter()
        .map(|&l| {
            if l.is_finite() {
                f64::from((l - max) / temperature).exp()
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut target = rng.random::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if *w > 0.0 {
            if target < *w {
                return Some(i as u32);
            }
            target -= w;
        }
    }
    // Rounding left `target` just past the end: take the last candidate.
    weights.iter().rposition(|w| *w > 0.0).map(|i| i as u32)
}

/// Ratio of UTF-8 length to zlib-compressed length. Repetitive text scores high.
pub fn compression_ratio(text: &str) -> Result<f32> {
    if text.is_empty() {
        return Ok(0.0);
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(text.len() as f32 / compressed.len() as f32)
}

/// A timed run of text tokens, relative to the window start.
#[derive(Debug, Clone, PartialEq)]
struct Span {
    start: f32,
    end: f32,
    tokens: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
struct SplitSegments {
    spans: Vec<Span>,
    resume_at: Option<f32>,
}

/// Group sampled tokens into `<|t0|> text <|t1|>` spans.
///
/// Text after the last closing timestamp is unfinished: when earlier spans
/// exist and that timestamp lies inside the window it is dropped and decoding
/// resumes there, otherwise it becomes a span running to the end of the window.
fn split_segments(vocab: &Vocabulary, sampled: &[u32], timestamps: bool, window_secs: f32) -> SplitSegments {
    let clamp = |t: f32| t.clamp(0.0, window_secs);

    if !timestamps {
        let tokens: Vec<u32> = sampled.iter().copied().filter(|&t| vocab.is_text(t)).collect();
        let spans = if tokens.is_empty() {
            Vec::new()
        } else {
            vec![Span {
                start: 0.0,
                end: window_secs,
                tokens,
            }]
        };
        return SplitSegments {
            spans,
            resume_at: None,
        };
    }

    let mut spans = Vec::new();
    let mut open: Option<(f32, Vec<u32>)> = None;
    let mut last_close: Option<f32> = None;

    for &token in sampled {
        match (vocab.timestamp_seconds(token), open.as_mut()) {
            (Some(secs), None) => open = Some((secs, Vec::new())),
            (Some(secs), Some((start, text))) => {
                if text.is_empty() {
                    *start = secs;
                } else {
                    let start = clamp(*start);
                    spans.push(Span {
                        start,
                        end: clamp(secs).max(start),
                        tokens: std::mem::take(text),
                    });
                    last_close = Some(secs);
                    open = None;
                }
            }
            (None, Some((_, text))) => text.push(token),
            (None, None) => open = Some((last_close.unwrap_or(0.0), vec![token])),
        }
    }

    let unfinished = open.filter(|(_, text)| !text.is_empty());
    let ends_with_pair = sampled.len() >= 2
        && sampled[sampled.len() - 2..]
            .iter()
            .all(|&t| vocab.is_timestamp(t));
    let resumable = |secs: f32| secs > 0.0 && secs < window_secs;
    let resume_at = match (unfinished, last_close) {
        (Some(_), Some(close)) if resumable(close) => Some(close),
        (Some((start, text)), _) => {
            let start = clamp(start);
            spans.push(Span {
                start,
                end: window_secs.max(start),
                tokens: text,
            });
            None
        }
        // A dangling opener after a closed span: restart at the close.
        (None, Some(close)) if ends_with_pair && resumable(close) => Some(close),
        (None, _) => None,
    };

    SplitSegments { spans, resume_at }
}
