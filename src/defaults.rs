//! Default configuration constants for voxscribe.
//!
//! Audio geometry constants are fixed by the Whisper model family and are not
//! configurable. Thresholds and ladder parameters seed `DecodingOptions` and the
//! `[decoding]` config section.

/// System sample rate in Hz. Every input is resampled to this rate.
pub const SAMPLE_RATE: u32 = 16000;

/// FFT window size in samples (25 ms at 16 kHz).
pub const N_FFT: usize = 400;

/// STFT hop in samples (10 ms at 16 kHz).
pub const HOP_LENGTH: usize = 160;

/// Length of one model context window in seconds.
pub const CHUNK_SECS: usize = 30;

/// Samples in one context window.
pub const N_SAMPLES: usize = CHUNK_SECS * SAMPLE_RATE as usize;

/// Mel frames in one context window.
pub const N_FRAMES: usize = N_SAMPLES / HOP_LENGTH;

/// Seconds represented by one timestamp token.
pub const TIMESTAMP_PRECISION: f32 = 0.02;

/// Mel bins used by every tier except large-v3.
pub const N_MELS: usize = 80;

/// Mel bins used by large-v3 and large-v3-turbo.
pub const N_MELS_V3: usize = 128;

/// Default Whisper model tier.
///
/// "base" (multilingual) supports auto-detection of any language.
pub const DEFAULT_MODEL: &str = "base";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// English language code.
pub const ENGLISH_LANGUAGE: &str = "en";

/// Suffix for English-only model variants.
pub const ENGLISH_ONLY_SUFFIX: &str = ".en";

/// First rung of the temperature ladder. Zero means greedy decoding.
pub const TEMPERATURE: f32 = 0.0;

/// Step between temperature ladder rungs.
pub const TEMPERATURE_INCREMENT: f32 = 0.2;

/// Highest temperature the ladder may reach.
pub const MAX_TEMPERATURE: f32 = 1.0;

/// An attempt whose average log-probability falls below this needs a fallback.
pub const LOGPROB_THRESHOLD: f32 = -1.0;

/// No-speech probability above which a window is treated as silence.
pub const NO_SPEECH_THRESHOLD: f32 = 0.6;

/// gzip compression ratio above which decoded text is considered repetitive.
pub const COMPRESSION_RATIO_THRESHOLD: f32 = 2.4;

/// Upper bound on tokens sampled per window.
pub const MAX_NEW_TOKENS: usize = 224;

/// Latest timestamp the first sampled token may carry, in seconds.
pub const MAX_INITIAL_TIMESTAMP: f32 = 1.0;

/// Seconds of audio re-decoded between consecutive windows when the decoder
/// gives no resume point.
pub const WINDOW_OVERLAP_SECS: f32 = 0.0;

/// Base seed for temperature sampling. Attempt `n` uses `seed + n`.
pub const SEED: u64 = 0;

/// Language detection confidence below which a result is flagged.
pub const LANGUAGE_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Concurrent inference permits.
///
/// One slot serializes access to a non-reentrant inference engine.
pub const INFERENCE_SLOTS: usize = 1;

/// Per-request timeout in milliseconds. Zero disables the timeout.
pub const REQUEST_TIMEOUT_MS: u64 = 0;

/// Directory scanned by the CLI when no audio path is given.
pub const UPLOAD_DIR: &str = "uploads/audio";

/// Extensions the CLI picks up from the upload directory.
pub const UPLOAD_EXTENSIONS: &[&str] = &["mp3", "wav"];

/// Largest upload the service accepts, in bytes.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Engine name reported by the service.
pub const ENGINE_NAME: &str = "voxscribe (Whisper)";

/// Report the inference device compiled into this build.
pub fn inference_device() -> &'static str {
    if cfg!(feature = "candle") {
        "CPU (candle)"
    } else {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_geometry_matches_whisper() {
        assert_eq!(N_SAMPLES, 480_000);
        assert_eq!(N_FRAMES, 3000);
    }

    #[test]
    fn timestamp_precision_matches_two_hops() {
        let hop_secs = HOP_LENGTH as f32 / SAMPLE_RATE as f32;
        assert!((TIMESTAMP_PRECISION - 2.0 * hop_secs).abs() < 1e-6);
    }

    #[test]
    fn ladder_reaches_max_temperature() {
        let steps = ((MAX_TEMPERATURE - TEMPERATURE) / TEMPERATURE_INCREMENT).round() as usize;
        assert_eq!(steps, 5);
    }
}
