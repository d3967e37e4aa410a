//! Windowed transcription of recordings longer than one context window.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

use crate::audio::{FeatureExtractor, NormalizedWaveform, Waveform};
use crate::decode::{DecodeRequest, Decoder, DecodingResult, Segment};
use crate::defaults::{N_SAMPLES, SAMPLE_RATE};
use crate::error::Result;
use crate::model::AcousticModel;
use crate::model::slots::{ExecutionSlots, SlotWait};

/// Cooperative cancellation flag, checked between windows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a transcription run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Cancelled,
    TimedOut,
    /// A window failed after earlier windows had decoded.
    Failed(String),
}

impl Completion {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// Stop conditions consulted at every window boundary.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub deadline: Option<Instant>,
    pub cancel: CancelToken,
}

impl RunControl {
    pub fn new(deadline: Option<Instant>, cancel: CancelToken) -> Self {
        Self { deadline, cancel }
    }

    /// Why the run must stop now, if it must.
    pub fn check(&self) -> Option<Completion> {
        if self.cancel.is_cancelled() {
            return Some(Completion::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(Completion::TimedOut);
        }
        None
    }
}

/// Output of a windowed run.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// Absolute-time segments, monotone and within the recording.
    pub segments: Vec<Segment>,
    /// Per-window decoder output, silent windows included.
    pub windows: Vec<DecodingResult>,
    pub completion: Completion,
}

impl Assembly {
    pub fn windows_decoded(&self) -> usize {
        self.windows.len()
    }
}

/// Walks a waveform window by window and stitches the segments together.
pub struct SegmentAssembler<'a> {
    model: &'a dyn AcousticModel,
    extractor: &'a FeatureExtractor,
    slots: &'a ExecutionSlots,
}

impl<'a> SegmentAssembler<'a> {
    pub fn new(
        model: &'a dyn AcousticModel,
        extractor: &'a FeatureExtractor,
        slots: &'a ExecutionSlots,
    ) -> Self {
        Self {
            model,
            extractor,
            slots,
        }
    }

    /// Normalize, extract and decode one slice under an execution slot.
    ///
    /// Returns `None` when the deadline passed while waiting for a slot.
    pub fn decode_window(
        &self,
        samples: &[f32],
        request: &DecodeRequest<'_>,
        control: &RunControl,
    ) -> Result<Option<DecodingResult>> {
        let window_secs = samples.len() as f32 / SAMPLE_RATE as f32;
        let mel = self
            .extractor
            .extract(&NormalizedWaveform::from_samples(samples));

        let _slot = match self.slots.acquire_until(control.deadline)? {
            SlotWait::Acquired(guard) => guard,
            SlotWait::DeadlineExpired => return Ok(None),
        };
        Decoder::decode(self.model, &mel, request, window_secs).map(Some)
    }

    pub fn assemble(
        &self,
        waveform: &Waveform,
        request: &DecodeRequest<'_>,
        control: &RunControl,
    ) -> Result<Assembly> {
        let options = request.options;
        let total = waveform.len();
        let duration = waveform.duration_secs();
        let rate = SAMPLE_RATE as f32;
        let overlap = (options.window_overlap_secs * rate) as usize;

        let mut segments: Vec<Segment> = Vec::new();
        let mut windows: Vec<DecodingResult> = Vec::new();
        let mut completion = Completion::Complete;
        let mut cursor = 0usize;

        while cursor < total {
            if let Some(stop) = control.check() {
                completion = stop;
                break;
            }

            let slice = waveform.window(cursor, N_SAMPLES);
            let slice_len = slice.len();
            let slice_start = cursor as f32 / rate;
            let slice_end = (slice_start + slice_len as f32 / rate).min(duration);

            let result = match self.decode_window(slice, request, control) {
                Ok(Some(result)) => result,
                Ok(None) => {
                    completion = Completion::TimedOut;
                    break;
                }
                Err(e) if windows.is_empty() || e.is_structural() => return Err(e),
                Err(e) => {
                    warn!(window = windows.len(), error = %e, "Window failed; keeping earlier segments");
                    completion = Completion::Failed(e.to_string());
                    break;
                }
            };

            let silent = options.suppress_silence && result.is_silent(&options.fallback);
            debug!(
                window = windows.len(),
                start = slice_start,
                silent,
                segments = result.segments.len(),
                "Decoded window"
            );
            if !silent {
                for segment in &result.segments {
                    let mut segment = segment.clone().offset(slice_start);
                    segment.end = segment.end.min(slice_end);
                    push_monotone(&mut segments, segment, duration);
                }
            }

            // A resume point is always inside the slice, so it moves the cursor
            // forward even on the last window.
            let advance = if silent {
                slice_len
            } else if let Some(resume) = result.resume_at {
                (resume * rate) as usize
            } else if cursor + slice_len >= total {
                total - cursor
            } else {
                slice_len.saturating_sub(overlap)
            };
            cursor += advance.max(1);
            windows.push(result);
        }

        Ok(Assembly {
            segments,
            windows,
            completion,
        })
    }
}

/// Append `segment` keeping starts and ends non-decreasing and within `limit`.
fn push_monotone(segments: &mut Vec<Segment>, mut segment: Segment, limit: f32) {
    if let Some(prev) = segments.last() {
        segment.start = segment.start.max(prev.start);
        segment.end = segment.end.max(prev.end);
    }
    segment.start = segment.start.min(limit);
    segment.end = segment.end.max(segment.start).min(limit);
    segments.push(segment);
}
