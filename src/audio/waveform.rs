//! Mono 16 kHz waveforms and the fixed-length window the model consumes.

use crate::defaults::{N_SAMPLES, SAMPLE_RATE};

/// Decoded mono audio at [`SAMPLE_RATE`].
///
/// Immutable once built; the assembler borrows windows out of it with
/// [`Waveform::window`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
}

impl Waveform {
    /// Wrap samples that are already mono at the system rate.
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / SAMPLE_RATE as f32
    }

    /// Borrow up to `len` samples starting at `start`, clamped to the end.
    pub fn window(&self, start: usize, len: usize) -> &[f32] {
        let start = start.min(self.samples.len());
        let end = start.saturating_add(len).min(self.samples.len());
        &self.samples[start..end]
    }

    /// Whether the whole recording fits in a single context window.
    pub fn fits_single_window(&self) -> bool {
        self.samples.len() <= N_SAMPLES
    }
}

/// Exactly one context window of audio: [`N_SAMPLES`] samples.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWaveform {
    samples: Vec<f32>,
}

impl NormalizedWaveform {
    /// Zero-pad at the end or truncate to [`N_SAMPLES`].
    pub fn from_samples(samples: &[f32]) -> Self {
        Self {
            samples: pad_or_trim(samples, N_SAMPLES),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Pad with trailing zeros or truncate so the result has exactly `len` samples.
pub fn pad_or_trim(samples: &[f32], len: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&samples[..samples.len().min(len)]);
    out.resize(len, 0.0);
    out
}
