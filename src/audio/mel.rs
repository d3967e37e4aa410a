//! Log-mel spectrogram extraction.
//!
//! Matches the Whisper front end: periodic Hann window, reflect-padded STFT
//! with `N_FFT = 400` and `HOP_LENGTH = 160`, power spectrum, Slaney mel
//! filterbank, `log10` with a dynamic-range floor of 8, then `(x + 4) / 4`.

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio::waveform::NormalizedWaveform;
use crate::defaults::{HOP_LENGTH, N_FFT, N_FRAMES, N_MELS, N_MELS_V3, SAMPLE_RATE};
use crate::error::{Result, VoxscribeError};

/// Frequency bins in one FFT frame.
const N_FREQS: usize = N_FFT / 2 + 1;

/// A `(n_mels, N_FRAMES)` log-mel spectrogram of one context window.
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpectrogram {
    data: Array2<f32>,
}

impl MelSpectrogram {
    pub fn n_mels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    /// Row-major copy of the values, for handing to an inference backend.
    pub fn to_row_major(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Largest value in the spectrogram.
    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Fail unless the spectrogram has exactly `expected` mel bins.
    pub fn ensure_bins(&self, expected: usize) -> Result<()> {
        if self.n_mels() == expected {
            Ok(())
        } else {
            Err(VoxscribeError::FeatureDimension {
                expected,
                actual: self.n_mels(),
            })
        }
    }
}

/// Computes [`MelSpectrogram`]s for a fixed number of mel bins.
///
/// Window, filterbank and FFT plan are built once and reused, so extraction
/// is a pure function of the input samples.
#[derive(Clone)]
pub struct FeatureExtractor {
    n_mels: usize,
    window: Vec<f32>,
    filters: Array2<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("n_mels", &self.n_mels)
            .finish_non_exhaustive()
    }
}

impl FeatureExtractor {
    /// Build an extractor for 80 or 128 mel bins.
    pub fn new(n_mels: usize) -> Result<Self> {
        if n_mels != N_MELS && n_mels != N_MELS_V3 {
            return Err(VoxscribeError::config(
                "n_mels",
                format!("unsupported mel bin count {n_mels} (expected {N_MELS} or {N_MELS_V3})"),
            ));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(N_FFT);
        Ok(Self {
            n_mels,
            window: hann_window(N_FFT),
            filters: mel_filterbank(n_mels, N_FFT, SAMPLE_RATE as f32),
            fft,
        })
    }

    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    /// Extract the log-mel spectrogram of one normalized window.
    pub fn extract(&self, audio: &NormalizedWaveform) -> MelSpectrogram {
        let power = self.power_spectrum(audio.samples());
        let mel = self.filters.dot(&power);

        let mut log_spec = mel.mapv(|x| x.max(1e-10).log10());
        let floor = log_spec.iter().copied().fold(f32::NEG_INFINITY, f32::max) - 8.0;
        log_spec.mapv_inplace(|x| (x.max(floor) + 4.0) / 4.0);

        MelSpectrogram { data: log_spec }
    }

    /// `(N_FREQS, N_FRAMES)` power spectrum. The trailing STFT frame is dropped.
    fn power_spectrum(&self, samples: &[f32]) -> Array2<f32> {
        let padded = reflect_pad(samples, N_FFT / 2);
        let mut power = Array2::<f32>::zeros((N_FREQS, N_FRAMES));
        let mut frame = vec![Complex::new(0.0f32, 0.0); N_FFT];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for t in 0..N_FRAMES {
            let start = t * HOP_LENGTH;
            for (i, slot) in frame.iter_mut().enumerate() {
                let sample = padded.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut frame, &mut scratch);
            for (k, bin) in frame.iter().take(N_FREQS).enumerate() {
                power[[k, t]] = bin.norm_sqr();
            }
        }
        power
    }
}

/// Periodic Hann window of length `n`.
fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// Reflect-pad `pad` samples on each side, excluding the edge sample.
fn reflect_pad(samples: &[f32], pad: usize) -> Vec<f32> {
    let n = samples.len();
    if n <= pad {
        // Too short to reflect; fall back to zero padding.
        let mut out = vec![0.0; pad];
        out.extend_from_slice(samples);
        out.resize(n + 2 * pad, 0.0);
        return out;
    }
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| samples[i]));
    out.extend_from_slice(samples);
    out.extend((0..pad).map(|j| samples[n - 2 - j]));
    out
}

fn hz_to_mel(hz: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / logstep
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    const F_SP: f32 = 200.0 / 3.0;
    const MIN_LOG_HZ: f32 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let logstep = 6.4f32.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (logstep * (mel - min_log_mel)).exp()
    } else {
        F_SP * mel
    }
}

/// Slaney-style mel filterbank from 0 Hz to Nyquist, area-normalized.
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f32) -> Array2<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f32> = (0..n_freqs)
        .map(|k| k as f32 * sample_rate / n_fft as f32)
        .collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate / 2.0);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = Array2::<f32>::zeros((n_mels, n_freqs));
    for m in 0..n_mels {
        let (left, center, right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        let enorm = 2.0 / (right - left);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let lower = (freq - left) / (center - left);
            let upper = (right - freq) / (right - center);
            filters[[m, k]] = lower.min(upper).max(0.0) * enorm;
        }
    }
    filters
}
