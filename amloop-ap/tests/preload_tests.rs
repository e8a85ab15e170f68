//! Preload and decode integration tests
//!
//! Real WAV files are generated into a temp dir and decoded through the
//! symphonia loader, so these exercise probe, decode, stereo folding and
//! resampling end to end.

mod helpers;

use amloop_ap::audio::decoder::{decode_clip, decode_file};
use amloop_ap::audio::{ClipId, ClipSource, SymphoniaLoader};
use amloop_ap::playback::{AudioGraph, LoopEngine};
use amloop_ap::{EngineConfig, LoopEvent};
use helpers::audio_generator::generate_sine_wav;
use helpers::{drain, engine_with};
use tempfile::TempDir;

#[test]
fn test_decode_wav_properties() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    generate_sine_wav(&path, 500, 22_050, 1, 440.0).unwrap();

    let decoded = decode_file(&path).unwrap();
    assert_eq!(decoded.sample_rate, 22_050);
    assert_eq!(decoded.channels, 1);
    assert_eq!(decoded.samples.len(), 11_025);
    assert!(decoded.samples.iter().all(|s| s.abs() <= 0.51));
}

#[test]
fn test_decode_clip_folds_and_resamples() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tone.wav");
    generate_sine_wav(&path, 1000, 22_050, 1, 440.0).unwrap();

    let buffer = decode_clip(&path, 44_100).unwrap();
    assert_eq!(buffer.sample_rate(), 44_100);
    assert!(
        (buffer.duration_seconds() - 1.0).abs() < 0.01,
        "duration {}",
        buffer.duration_seconds()
    );
}

#[test]
fn test_decode_clip_rejects_garbage() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("noise.wav");
    std::fs::write(&path, b"definitely not a wav file").unwrap();

    assert!(decode_clip(&path, 44_100).is_err());
}

#[tokio::test]
async fn test_partial_load_resilience() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.wav");
    generate_sine_wav(&a, 500, 8_000, 2, 220.0).unwrap();
    let missing = dir.path().join("b.wav");

    let (graph, _clock) = AudioGraph::manual(8_000);
    let mut engine = LoopEngine::new(EngineConfig::default(), graph).unwrap();
    let mut events = engine.subscribe();

    let report = engine
        .preload(
            &SymphoniaLoader::new(8_000),
            &[
                ClipSource::new("a", a.to_string_lossy()),
                ClipSource::new("b", format!("file://{}", missing.display())),
            ],
        )
        .await;

    assert!(engine.is_loaded());
    assert_eq!(report.loaded, vec![ClipId::from("a")]);
    assert_eq!(report.failed.len(), 1);
    assert!(engine.registry().get(&"a".into()).is_some());
    assert!(engine.registry().get(&"b".into()).is_none());

    // Failed clip is a logged no-op
    engine.play("b");
    assert!(!engine.is_playing());
    engine.play("a");
    assert!(engine.is_playing());

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, LoopEvent::ClipLoadFailed { clip_id, .. } if clip_id.as_str() == "b")));
    assert!(events.contains(&LoopEvent::Loaded { loaded: 1, failed: 1 }));
}

#[tokio::test]
async fn test_unsupported_url_scheme_fails_only_that_clip() {
    let (mut engine, _clock) = engine_with(EngineConfig::default(), &[]).await;
    let report = engine
        .preload(
            &SymphoniaLoader::new(1_000),
            &[ClipSource::new("remote", "https://example.com/rain.ogg")],
        )
        .await;

    assert!(report.loaded.is_empty());
    assert_eq!(report.failed[0].0.as_str(), "remote");
    assert!(engine.is_loaded());
}
