//! End-to-end runs of the pipeline against the mock acoustic model.
//!
//! Audio is written to real WAV files with hound so the symphonia decode
//! path is exercised too.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxscribe::audio::{AudioInput, FeatureExtractor, NormalizedWaveform, Waveform};
use voxscribe::defaults::{N_MELS, N_SAMPLES};
use voxscribe::model::mock::MockModel;
use voxscribe::model::shared::{SharedModel, StaticLoader};
use voxscribe::orchestrator::{RequestControl, RuntimePolicy, TimeoutPolicy, TranscriptionOrchestrator};
use voxscribe::segment::{CancelToken, Completion};
use voxscribe::{DecodingOptions, VoxscribeError};

fn orchestrator(model: MockModel) -> (Arc<MockModel>, Arc<TranscriptionOrchestrator>) {
    orchestrator_with(model, RuntimePolicy::default())
}

fn orchestrator_with(
    model: MockModel,
    policy: RuntimePolicy,
) -> (Arc<MockModel>, Arc<TranscriptionOrchestrator>) {
    let model = Arc::new(model);
    let shared = SharedModel::new(StaticLoader::new(model.clone()));
    let orch = TranscriptionOrchestrator::new(Arc::new(shared), policy);
    (model, Arc::new(orch))
}

fn tone_samples(secs: f32, rate: u32) -> Vec<f32> {
    (0..(secs * rate as f32) as usize)
        .map(|i| 0.3 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin())
        .collect()
}

fn write_wav(dir: &Path, name: &str, samples: &[f32], rate: u32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn wav_file_transcribes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "greeting.wav", &tone_samples(4.0, 16_000), 16_000);
    let (model, orch) = orchestrator(MockModel::new().with_transcript("good morning everyone"));

    let out = orch
        .transcribe(&AudioInput::path(&path), &DecodingOptions::default())
        .unwrap();

    assert_eq!(out.text(), "good morning everyone");
    assert_eq!(out.language.language, "en");
    assert_eq!(out.completion, Completion::Complete);
    assert!((out.duration_secs - 4.0).abs() < 0.01);
    assert_eq!(out.segments().len(), 1);
    assert!((out.segments()[0].end - 4.0).abs() < 0.1);
    assert_eq!(model.sessions_started(), 2);
}

#[test]
fn resampled_input_keeps_duration() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "hifi.wav", &tone_samples(3.0, 44_100), 44_100);
    let (_, orch) = orchestrator(MockModel::new());

    let out = orch
        .transcribe(&AudioInput::path(&path), &DecodingOptions::default())
        .unwrap();
    assert!((out.duration_secs - 3.0).abs() < 0.01, "got {}", out.duration_secs);
}

#[test]
fn forty_five_second_recording_spans_two_windows() {
    let (model, orch) = orchestrator(MockModel::new().with_transcript("long form speech"));
    let input = AudioInput::from(Waveform::new(tone_samples(45.0, 16_000)));

    let out = orch.transcribe(&input, &DecodingOptions::default()).unwrap();

    assert_eq!(out.completion, Completion::Complete);
    assert_eq!(out.segments().len(), 2);
    assert_eq!(out.text(), "long form speech long form speech");
    assert!(out.segments()[1].start >= 30.0 - 1e-3);
    assert!(out.segments().iter().all(|s| s.end <= 45.0 + 1e-3));
    // Detection plus two decoded windows.
    assert_eq!(model.sessions_started(), 3);
}

#[test]
fn unfinished_sentence_moves_the_next_window_back() {
    let model = MockModel::new()
        .with_transcript("long form speech")
        .with_unfinished_tail(20.0, "and so");
    let (model, orch) = orchestrator(model);
    let input = AudioInput::from(Waveform::new(tone_samples(45.0, 16_000)));

    let out = orch.transcribe(&input, &DecodingOptions::default()).unwrap();

    // Windows at 0, 20 and 40 s instead of 0 and 30 s.
    assert_eq!(out.completion, Completion::Complete);
    assert_eq!(model.sessions_started(), 4);
    assert_eq!(out.segments().len(), 3);
    assert!((out.segments()[1].start - 20.0).abs() < 1e-3);
    assert!((out.segments()[2].end - 45.0).abs() < 0.2);
    assert_eq!(out.text(), "long form speech long form speech long form speech");
}

#[test]
fn recording_ending_mid_sentence_keeps_its_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_wav(dir.path(), "cutoff.wav", &tone_samples(8.0, 16_000), 16_000);
    let model = MockModel::new()
        .with_transcript("closing remarks")
        .with_unfinished_tail(5.0, "and finally");
    let (model, orch) = orchestrator(model);

    let out = orch
        .transcribe(&AudioInput::path(&path), &DecodingOptions::default())
        .unwrap();

    // The last 3 s are decoded again from the close at 5 s.
    assert_eq!(model.sessions_started(), 3);
    assert_eq!(out.segments().len(), 2);
    assert!((out.segments()[1].start - 5.0).abs() < 1e-3);
    assert!((out.segments()[1].end - 8.0).abs() < 0.2);
    assert_eq!(out.text(), "closing remarks closing remarks");
}

#[test]
fn segments_are_monotone_with_overlap() {
    let (_, orch) = orchestrator(MockModel::new());
    let input = AudioInput::from(Waveform::new(tone_samples(80.0, 16_000)));
    let options = DecodingOptions::default().with_window_overlap(3.0);

    let out = orch.transcribe(&input, &options).unwrap();

    assert!(out.segments().len() >= 3);
    for pair in out.segments().windows(2) {
        assert!(pair[0].start <= pair[1].start, "{:?}", pair);
        assert!(pair[0].end <= pair[1].end, "{:?}", pair);
    }
    for segment in out.segments() {
        assert!(segment.start <= segment.end);
    }
}

#[test]
fn forced_chinese_is_reported_with_full_confidence() {
    let (model, orch) = orchestrator(MockModel::new());
    let input = AudioInput::from(Waveform::new(tone_samples(6.0, 16_000)));
    let options = DecodingOptions::default().with_language("chinese");

    let out = orch.transcribe(&input, &options).unwrap();

    assert_eq!(out.language.language, "zh");
    assert_eq!(out.language.confidence, 1.0);
    assert!(out.language.forced);
    assert_eq!(out.result.language.as_deref(), Some("zh"));
    assert_eq!(model.sessions_started(), 1);
}

#[test]
fn silent_recording_produces_empty_transcript() {
    let (_, orch) = orchestrator(MockModel::new());
    let input = AudioInput::from(Waveform::new(vec![0.0; 16_000 * 10]));

    let out = orch
        .transcribe(&input, &DecodingOptions::default().with_language("en"))
        .unwrap();

    assert!(out.text().is_empty());
    assert!(out.segments().is_empty());
    assert_eq!(out.completion, Completion::Complete);
    assert!(out.result.no_speech_prob > 0.6);
}

#[test]
fn hesitant_model_triggers_temperature_fallback() {
    let (_, orch) = orchestrator(MockModel::new().with_margin(0.5));
    let input = AudioInput::from(Waveform::new(tone_samples(3.0, 16_000)));
    let options = DecodingOptions::default()
        .with_language("en")
        .with_timestamps(false);

    let out = orch.transcribe(&input, &options).unwrap();

    assert!(out.result.attempts > 1);
    assert!(out.result.temperature <= 1.0);
}

#[test]
fn unknown_language_fails_before_loading_the_model() {
    let (model, orch) = orchestrator(MockModel::new());
    let input = AudioInput::from(Waveform::new(tone_samples(2.0, 16_000)));

    let err = orch
        .transcribe(&input, &DecodingOptions::default().with_language("xx"))
        .unwrap_err();

    assert!(matches!(err, VoxscribeError::Config { .. }), "{err:?}");
    assert_eq!(model.sessions_started(), 0);
    assert_eq!(orch.model().load_count(), 0);
}

#[test]
fn malformed_bytes_fail_without_touching_the_model() {
    let (model, orch) = orchestrator(MockModel::new());
    let input = AudioInput::bytes("broken.mp3", b"definitely not audio".to_vec());

    let err = orch.transcribe(&input, &DecodingOptions::default()).unwrap_err();

    assert!(matches!(err, VoxscribeError::Decode { .. }), "{err:?}");
    assert!(err.to_string().contains("broken.mp3"));
    assert_eq!(model.forward_passes(), 0);
    assert!(!orch.model().is_loaded());
}

#[test]
fn concurrent_requests_share_one_model_load() {
    let (_, orch) = orchestrator(MockModel::new());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let orch = Arc::clone(&orch);
            thread::spawn(move || {
                let input = AudioInput::from(Waveform::new(tone_samples(2.0, 16_000)));
                orch.transcribe(&input, &DecodingOptions::default())
            })
        })
        .collect();

    for handle in handles {
        let out = handle.join().unwrap().unwrap();
        assert_eq!(out.completion, Completion::Complete);
    }
    assert_eq!(orch.model().load_count(), 1);
}

#[test]
fn timeout_returns_partial_transcript_by_default() {
    let model = MockModel::new().with_session_delay(Duration::from_millis(300));
    let (_, orch) = orchestrator(model);
    let input = AudioInput::from(Waveform::new(tone_samples(75.0, 16_000)));
    let control = RequestControl::with_timeout(Duration::from_millis(200));

    let out = orch
        .transcribe_with(&input, &DecodingOptions::default().with_language("en"), control)
        .unwrap();

    assert_eq!(out.completion, Completion::TimedOut);
    assert_eq!(out.segments().len(), 1);
    assert!(!out.text().is_empty());
}

#[test]
fn timeout_fails_under_strict_policy() {
    let policy = RuntimePolicy {
        on_timeout: TimeoutPolicy::Fail,
        ..RuntimePolicy::default()
    };
    let model = MockModel::new().with_session_delay(Duration::from_millis(300));
    let (_, orch) = orchestrator_with(model, policy);
    let input = AudioInput::from(Waveform::new(tone_samples(75.0, 16_000)));
    let control = RequestControl::with_timeout(Duration::from_millis(200));

    let err = orch
        .transcribe_with(&input, &DecodingOptions::default().with_language("en"), control)
        .unwrap_err();

    assert!(matches!(err, VoxscribeError::TimeoutExceeded { .. }), "{err:?}");
}

#[test]
fn cancelled_request_stops_before_decoding() {
    let (model, orch) = orchestrator(MockModel::new());
    let input = AudioInput::from(Waveform::new(tone_samples(40.0, 16_000)));
    let cancel = CancelToken::new();
    cancel.cancel();

    let out = orch
        .transcribe_with(
            &input,
            &DecodingOptions::default().with_language("en"),
            RequestControl::default().with_cancel(cancel),
        )
        .unwrap();

    assert_eq!(out.completion, Completion::Cancelled);
    assert!(out.segments().is_empty());
    assert_eq!(model.sessions_started(), 0);
}

#[tokio::test]
async fn async_transcription_runs_off_the_runtime() {
    let (_, orch) = orchestrator(MockModel::new().with_transcript("from a task"));
    let input = AudioInput::from(Waveform::new(tone_samples(2.0, 16_000)));

    let out = orch
        .transcribe_async(input, DecodingOptions::default(), RequestControl::default())
        .await
        .unwrap();
    assert_eq!(out.text(), "from a task");
}

#[test]
fn normalized_window_is_always_thirty_seconds() {
    for secs in [0.0, 1.0, 29.99, 30.0, 31.0, 95.0] {
        let samples = tone_samples(secs, 16_000);
        assert_eq!(NormalizedWaveform::from_samples(&samples).len(), N_SAMPLES);
    }
}

#[test]
fn features_are_deterministic_across_extractors() {
    let window = NormalizedWaveform::from_samples(&tone_samples(12.0, 16_000));
    let a = FeatureExtractor::new(N_MELS).unwrap().extract(&window);
    let b = FeatureExtractor::new(N_MELS).unwrap().extract(&window);

    assert_eq!(a.n_mels(), N_MELS);
    assert_eq!(a.n_frames(), 3000);
    assert_eq!(a, b);
}
