//! Logit filters applied before every sampling step.

use crate::defaults::{MAX_INITIAL_TIMESTAMP, TIMESTAMP_PRECISION};
use crate::model::Vocabulary;

/// Constrains the next-token distribution for one window.
#[derive(Debug, Clone)]
pub struct LogitFilter<'a> {
    vocab: &'a Vocabulary,
    timestamps: bool,
    max_initial_timestamp: u32,
}

impl<'a> LogitFilter<'a> {
    pub fn new(vocab: &'a Vocabulary, timestamps: bool) -> Self {
        Self {
            vocab,
            timestamps,
            max_initial_timestamp: (MAX_INITIAL_TIMESTAMP / TIMESTAMP_PRECISION).round() as u32,
        }
    }

    /// Mask disallowed tokens in `logits` given the tokens sampled so far
    /// (prompt excluded).
    pub fn apply(&self, logits: &mut [f32], sampled: &[u32]) {
        let eot = self.vocab.eot as usize;
        let ts_begin = (self.vocab.timestamp_begin as usize).min(logits.len());

        // Control tokens (sot, languages, task, no-speech, no-timestamps) are never sampled.
        mask(logits, eot + 1, ts_begin);

        // An empty transcript is not an answer.
        if sampled.is_empty() && eot < logits.len() {
            logits[eot] = f32::NEG_INFINITY;
        }

        if !self.timestamps {
            mask(logits, ts_begin, logits.len());
            return;
        }
        self.apply_timestamp_rules(logits, sampled, eot, ts_begin);
    }

    fn apply_timestamp_rules(&self, logits: &mut [f32], sampled: &[u32], eot: usize, ts_begin: usize) {
        let is_ts = |t: &u32| self.vocab.is_timestamp(*t);
        let last_was_ts = sampled.last().is_some_and(is_ts);
        let penultimate_was_ts = sampled.len() < 2 || is_ts(&sampled[sampled.len() - 2]);

        if last_was_ts {
            if penultimate_was_ts {
                // A pair just closed: text or end must follow.
                mask(logits, ts_begin, logits.len());
            } else {
                // A segment is open: close it or end.
                mask(logits, 0, eot);
            }
        }

        // Timestamps never go backwards. Right after a closing timestamp the
        // next segment may start at the same time.
        if let Some(&last_ts) = sampled.iter().rev().find(|t| is_ts(t)) {
            let floor = if last_was_ts && !penultimate_was_ts {
                last_ts as usize
            } else {
                last_ts as usize + 1
            };
            mask(logits, ts_begin, floor.min(logits.len()));
        }

        if sampled.is_empty() {
            // The first token is a timestamp no later than the initial limit.
            mask(logits, 0, ts_begin);
            let last_allowed = ts_begin + self.max_initial_timestamp as usize;
            mask(logits, last_allowed + 1, logits.len());
        }

        // When timestamps jointly outweigh every text token, emit a timestamp.
        let log_probs = log_softmax(logits);
        let timestamp_mass = log_sum_exp(&log_probs[ts_begin..]);
        let best_text = log_probs[..ts_begin]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if timestamp_mass > best_text {
            mask(logits, 0, ts_begin);
        }
    }
}

fn mask(logits: &mut [f32], from: usize, to: usize) {
    let to = to.min(logits.len());
    if from < to {
        logits[from..to].fill(f32::NEG_INFINITY);
    }
}

/// Numerically stable `log(sum(exp(x)))`. Empty or all `-inf` input gives `-inf`.
pub fn log_sum_exp(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return f32::NEG_INFINITY;
    }
    let sum: f32 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Log-softmax over all entries.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let lse = log_sum_exp(logits);
    logits.iter().map(|l| l - lse).collect()
}

/// Softmax probability of a single entry.
pub fn softmax_at(logits: &[f32], index: usize) -> f32 {
    match logits.get(index) {
        Some(&logit) => (logit - log_sum_exp(logits)).exp(),
        None => 0.0,
    }
}
