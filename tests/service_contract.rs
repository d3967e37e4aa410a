//! JSON shape returned by the speech service for uploads.

use std::io::Cursor;
use std::sync::Arc;

use serde_json::Value;
use voxscribe::DecodingOptions;
use voxscribe::model::mock::MockModel;
use voxscribe::model::shared::SharedModel;
use voxscribe::orchestrator::{RuntimePolicy, TranscriptionOrchestrator};
use voxscribe::service::{AudioUpload, OrchestratorService, SpeechService};

fn service(model: MockModel) -> OrchestratorService {
    let shared = SharedModel::preloaded(Arc::new(model));
    let orch = TranscriptionOrchestrator::new(Arc::new(shared), RuntimePolicy::default());
    OrchestratorService::new(Arc::new(orch), DecodingOptions::default())
}

fn wav_bytes(secs: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(secs * 16_000.0) as usize {
            let s = 0.3 * (i as f32 * 0.17).sin();
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn successful_upload_reports_transcript_and_metadata() {
    let svc = service(MockModel::new().with_transcript("upload works"));
    let bytes = wav_bytes(2.0);
    let size = bytes.len();

    let response = svc.recognize(AudioUpload::new("memo.wav", bytes)).await;
    let json: Value = serde_json::to_value(&response).unwrap();

    assert_eq!(json["success"], true);
    assert!(json.get("error").is_none());
    let data = &json["data"];
    assert_eq!(data["recognizedText"], "upload works");
    assert_eq!(data["fileName"], "memo.wav");
    assert_eq!(data["fileSize"], size);
    assert_eq!(data["language"], "en");
    assert_eq!(data["completion"], "complete");
    assert_eq!(data["lowConfidence"], false);
    assert!(data["processingTime"].as_str().unwrap().ends_with("ms"));
    let confidence = data["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(data["segments"].as_array().unwrap().len(), 1);
    assert_eq!(data["segments"][0]["text"], "upload works");
}

#[tokio::test]
async fn rejected_upload_never_reaches_the_model() {
    let svc = service(MockModel::new());

    let response = svc.recognize(AudioUpload::new("notes.txt", vec![1, 2, 3])).await;

    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response.error.unwrap().contains("notes.txt"));
    assert!(!svc.engine_info().model_loaded);
}

#[tokio::test]
async fn undecodable_upload_is_reported_as_failure() {
    let svc = service(MockModel::new());

    let response = svc
        .recognize(AudioUpload::new("garbage.mp3", b"not an mp3 at all".to_vec()))
        .await;
    let json: Value = serde_json::to_value(&response).unwrap();

    assert_eq!(json["success"], false);
    assert!(json.get("data").is_none());
    assert!(json["error"].as_str().unwrap().contains("garbage.mp3"));
    assert!(json["message"].as_str().unwrap().starts_with("Speech recognition failed"));
}

#[tokio::test]
async fn engine_info_lists_languages_and_formats() {
    let svc = service(MockModel::new());
    let info = serde_json::to_value(svc.engine_info()).unwrap();

    assert_eq!(info["model"], "mock");
    assert!(info["languages"].as_array().unwrap().iter().any(|l| l == "zh"));
    assert!(info["formats"].as_array().unwrap().iter().any(|f| f == "mp3"));
    assert_eq!(info["maxUploadBytes"], 10 * 1024 * 1024);

    let _ = svc.recognize(AudioUpload::new("a.wav", wav_bytes(1.0))).await;
    assert!(svc.engine_info().model_loaded);
}
