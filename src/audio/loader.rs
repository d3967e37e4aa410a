//! Audio decoding and resampling to 16 kHz mono f32.
//!
//! Any container/codec symphonia can probe is accepted. Channels are averaged
//! to mono and the result is resampled with a windowed-sinc filter so that the
//! output length is exactly `round(n * 16000 / source_rate)`.

use std::io::Cursor;
use std::path::PathBuf;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use crate::audio::waveform::Waveform;
use crate::defaults::SAMPLE_RATE;
use crate::error::{BoxError, Result, VoxscribeError};

/// Input frames fed to the resampler per call.
const RESAMPLE_CHUNK: usize = 1024;

/// Where the audio for a request comes from.
#[derive(Debug, Clone)]
pub enum AudioInput {
    /// A file on disk; its extension is used as a format hint.
    Path(PathBuf),
    /// An uploaded file held in memory.
    Bytes { name: String, bytes: Vec<u8> },
    /// Audio that has already been decoded.
    Waveform(Waveform),
}

impl AudioInput {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Bytes {
            name: name.into(),
            bytes,
        }
    }

    /// Identifier used in error messages and logs.
    pub fn source_id(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Bytes { name, .. } => name.clone(),
            Self::Waveform(_) => "<waveform>".to_string(),
        }
    }

    fn extension(&self) -> Option<String> {
        let name = match self {
            Self::Path(path) => path.to_str()?,
            Self::Bytes { name, .. } => name.as_str(),
            Self::Waveform(_) => return None,
        };
        extension_of(name)
    }
}

impl From<Waveform> for AudioInput {
    fn from(waveform: Waveform) -> Self {
        Self::Waveform(waveform)
    }
}

/// Turns an [`AudioInput`] into a [`Waveform`] at the system sample rate.
#[derive(Debug, Clone)]
pub struct AudioLoader {
    target_rate: u32,
}

impl Default for AudioLoader {
    fn default() -> Self {
        Self {
            target_rate: SAMPLE_RATE,
        }
    }
}

impl AudioLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode, downmix and resample the input.
    ///
    /// Every failure is reported as [`VoxscribeError::Decode`] carrying the
    /// source identifier and the underlying cause.
    pub fn load(&self, input: &AudioInput) -> Result<Waveform> {
        let source_id = input.source_id();
        match input {
            AudioInput::Waveform(waveform) => Ok(waveform.clone()),
            AudioInput::Path(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|e| VoxscribeError::decode(&source_id, e))?;
                self.decode_bytes(bytes, input.extension().as_deref(), &source_id)
            }
            AudioInput::Bytes { bytes, .. } => {
                self.decode_bytes(bytes.clone(), input.extension().as_deref(), &source_id)
            }
        }
    }

    fn decode_bytes(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
        source_id: &str,
    ) -> Result<Waveform> {
        if bytes.is_empty() {
            return Err(VoxscribeError::decode(source_id, "input is empty"));
        }

        let (samples, source_rate) =
            decode_mono(bytes, extension).map_err(|e| VoxscribeError::decode(source_id, e))?;

        let samples = resample(&samples, source_rate, self.target_rate)
            .map_err(|e| VoxscribeError::decode(source_id, e))?;

        debug!(
            source = source_id,
            source_rate,
            samples = samples.len(),
            "Decoded audio"
        );
        Ok(Waveform::new(samples))
    }
}

/// Decode to mono f32 at the source rate.
fn decode_mono(
    bytes: Vec<u8>,
    extension: Option<&str>,
) -> std::result::Result<(Vec<f32>, u32), BoxError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| format!("probe failed: {e}"))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or("no audio track found")?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| format!("codec init failed: {e}"))?;

    let mut source_rate = codec_params.sample_rate;
    let mut mono: Vec<f32> = Vec::new();
    let mut skipped = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) if !mono.is_empty() => {
                warn!("Stopping at unreadable packet: {e}");
                break;
            }
            Err(e) => return Err(format!("packet read failed: {e}").into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                skipped += 1;
                warn!("Skipping corrupt packet: {msg}");
                continue;
            }
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(format!("decode failed: {e}").into()),
        };

        let spec = *decoded.spec();
        source_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count().max(1);

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        let interleaved = buffer.samples();

        if channels > 1 {
            mono.extend(
                interleaved
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        } else {
            mono.extend_from_slice(interleaved);
        }
    }

    if skipped > 0 {
        debug!(skipped, "Skipped corrupt packets");
    }
    if mono.is_empty() {
        return Err("no audio samples decoded".into());
    }
    let source_rate = source_rate.ok_or("unknown sample rate")?;
    Ok((mono, source_rate))
}

/// Resample mono audio from `from_rate` to `to_rate` using rubato.
///
/// The sinc filter's delay is trimmed so the output is aligned with the input
/// and has exactly `round(len * to_rate / from_rate)` samples.
pub fn resample(
    samples: &[f32],
    from_rate: u32,
    to_rate: u32,
) -> std::result::Result<Vec<f32>, BoxError> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    if from_rate == 0 || to_rate == 0 {
        return Err(format!("invalid sample rate conversion {from_rate} -> {to_rate}").into());
    }
    if from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)?;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0usize;

    // Keep feeding (zero-padded) chunks until the delayed tail has been flushed.
    while output.len() < delay + expected {
        let end = (position + RESAMPLE_CHUNK).min(samples.len());
        let mut chunk = samples.get(position..end).unwrap_or_default().to_vec();
        chunk.resize(RESAMPLE_CHUNK, 0.0);
        position += RESAMPLE_CHUNK;

        let resampled = resampler.process(&[chunk], None)?;
        if let Some(channel) = resampled.first() {
            output.extend_from_slice(channel);
        }
    }

    Ok(output[delay..delay + expected].to_vec())
}

/// Lowercased extension of a file name, if any.
pub(crate) fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
