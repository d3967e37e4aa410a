//! Decoder output types.

use serde::Serialize;

use crate::decode::options::FallbackPolicy;

/// A time-bounded piece of transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    /// Start in seconds.
    pub start: f32,
    /// End in seconds.
    pub end: f32,
    pub text: String,
    #[serde(skip)]
    pub tokens: Vec<u32>,
    pub avg_logprob: f32,
    pub no_speech_prob: f32,
    pub temperature: f32,
    pub compression_ratio: f32,
}

impl Segment {
    pub fn duration(&self) -> f32 {
        self.end - self.start
    }

    /// Shift both bounds by `secs`.
    pub fn offset(mut self, secs: f32) -> Self {
        self.start += secs;
        self.end += secs;
        self
    }
}

/// Outcome of decoding one window (or, after merging, a whole recording).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodingResult {
    pub text: String,
    #[serde(skip)]
    pub tokens: Vec<u32>,
    pub segments: Vec<Segment>,
    /// Language the decoder was prompted with, if any.
    pub language: Option<String>,
    /// Mean log-probability of the sampled tokens, end token included.
    pub avg_logprob: f32,
    pub no_speech_prob: f32,
    /// Temperature of the accepted attempt.
    pub temperature: f32,
    /// gzip compression ratio of `text`.
    pub compression_ratio: f32,
    /// Decode attempts made, including the accepted one.
    pub attempts: usize,
    /// Seconds into the window where the next window should start, when the
    /// window ended inside an unfinished segment.
    #[serde(skip)]
    pub resume_at: Option<f32>,
}

impl DecodingResult {
    /// Empty result for a window that produced no usable output.
    pub fn empty(language: Option<String>) -> Self {
        Self {
            text: String::new(),
            tokens: Vec::new(),
            segments: Vec::new(),
            language,
            avg_logprob: 0.0,
            no_speech_prob: 0.0,
            temperature: 0.0,
            compression_ratio: 0.0,
            attempts: 0,
            resume_at: None,
        }
    }

    pub fn is_silent(&self, policy: &FallbackPolicy) -> bool {
        policy.is_silent(self.avg_logprob, self.no_speech_prob)
    }

    /// Below the log-probability threshold even after fallback.
    pub fn is_low_confidence(&self, policy: &FallbackPolicy) -> bool {
        policy
            .logprob_threshold
            .is_some_and(|threshold| self.avg_logprob < threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f32, end: f32) -> Segment {
        Segment {
            start,
            end,
            text: "hi".to_string(),
            tokens: vec![1],
            avg_logprob: -0.2,
            no_speech_prob: 0.01,
            temperature: 0.0,
            compression_ratio: 1.0,
        }
    }

    #[test]
    fn offset_shifts_both_bounds() {
        let shifted = segment(1.0, 2.5).offset(30.0);
        assert_eq!((shifted.start, shifted.end), (31.0, 32.5));
        assert!((shifted.duration() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn silence_and_confidence_follow_policy() {
        let policy = FallbackPolicy::default();
        let mut result = DecodingResult::empty(None);
        result.no_speech_prob = 0.95;
        result.avg_logprob = -1.5;
        assert!(result.is_silent(&policy));
        assert!(result.is_low_confidence(&policy));

        result.avg_logprob = -0.3;
        assert!(!result.is_silent(&policy));
        assert!(!result.is_low_confidence(&policy));
    }

    #[test]
    fn serializes_without_internal_fields() {
        let mut result = DecodingResult::empty(Some("en".to_string()));
        result.segments.push(segment(0.0, 1.0));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("tokens").is_none());
        assert!(json.get("resume_at").is_none());
        assert_eq!(json["segments"][0]["text"], "hi");
        assert_eq!(json["language"], "en");
    }
}
