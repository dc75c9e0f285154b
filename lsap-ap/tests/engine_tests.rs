//! Stream engine integration tests
//!
//! Recovery cycle, ingest ordering, health monitoring, teardown, and an
//! end-to-end decode through symphonia.

mod helpers;

use helpers::*;
use lsap_ap::audio::SymphoniaChunkDecoder;
use lsap_ap::error::Error;
use lsap_ap::{EngineConfig, StreamEngine};
use lsap_common::events::{EngineEvent, HealthState, HealthStatus, QualityBand};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test(start_paused = true)]
async fn test_recovery_cycle_through_engine() {
    let decoder = MockDecoder::failing();
    let engine = engine(Arc::clone(&decoder), MockDevice::new()).await;
    let mut events = engine.subscribe();

    for _ in 0..4 {
        let _ = engine.submit_chunk(chunk()).await;
    }
    assert_eq!(engine.health_state(), HealthState::Recovery);
    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        EngineEvent::Error { operation, recoverable: true, .. } if operation == "recovery"
    )));

    // A success during Recovery resets the counter but not the state
    decoder.push([DecodeBehavior::half_second()]);
    engine.submit_chunk(chunk()).await.unwrap();
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    assert_eq!(engine.health_state(), HealthState::Recovery);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(engine.health_state(), HealthState::Normal);
    assert_eq!(engine.queue().lock().max_count(), 50);
    assert!(drain_events(&mut events).iter().any(|e| matches!(
        e,
        EngineEvent::Recovery { operation, .. } if operation == "recovery"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_ingest_preserves_arrival_order() {
    let engine = engine(MockDecoder::succeeding(), MockDevice::new()).await;
    let (tx, rx) = mpsc::channel(8);
    let ingest = engine.spawn_ingest(rx);

    for _ in 0..3 {
        tx.send(chunk()).await.unwrap();
    }
    tx.send(Vec::new()).await.unwrap();
    drop(tx);

    assert_eq!(ingest.await.unwrap(), 3);
    let mut queue = engine.queue().lock();
    let order: Vec<u64> = std::iter::from_fn(|| queue.dequeue().map(|b| b.sequence)).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_emits_quality_change() {
    let engine = engine(MockDecoder::succeeding(), MockDevice::new()).await;
    let mut events = engine.subscribe();

    // Empty chunks are dropped without retries: drop rate 100% → score 50
    for _ in 0..3 {
        let _ = engine.submit_chunk(Vec::new()).await;
    }
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let events = drain_events(&mut events);
    assert!(events.contains(&EngineEvent::QualityChange {
        status: QualityBand::Fair
    }));
}

#[tokio::test(start_paused = true)]
async fn test_health_report_serializes() {
    let engine = engine(MockDecoder::succeeding(), MockDevice::suspended(false)).await;
    engine.set_memory_pressure(true);

    let report = engine.health_report();
    assert_eq!(report.status, HealthStatus::Warning);
    assert_eq!(report.issues.len(), 2);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "warning");
    assert_eq!(json["state"], "normal");
    assert_eq!(json["device_state"], "suspended");
    assert_eq!(json["issues"][0], "device_inactive");
    assert_eq!(json["issues"][1], "memory_pressure");
    assert_eq!(json["quality"], "excellent");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resets_and_refuses_chunks() {
    let engine = engine(MockDecoder::failing(), MockDevice::new()).await;
    for _ in 0..4 {
        let _ = engine.submit_chunk(chunk()).await;
    }
    assert_eq!(engine.health_state(), HealthState::Recovery);

    engine.shutdown();
    engine.shutdown();

    assert_eq!(engine.health_state(), HealthState::Normal);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    assert!(matches!(
        engine.submit_chunk(chunk()).await,
        Err(Error::Internal(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_rejects_invalid_config() {
    let mut config = EngineConfig::default();
    config.queue.max_count = 0;
    let result = StreamEngine::new(config, MockDecoder::succeeding(), MockDevice::new()).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_buffer_over_memory_budget_is_refused() {
    // 0.5s of 48 kHz stereo is estimated at 192000 bytes
    let config = EngineConfig::from_toml_str("[queue]\nmax_memory_bytes = 100000\n").unwrap();
    let engine = engine_with(config, MockDecoder::succeeding(), MockDevice::new()).await;

    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(result, Err(Error::Queue(_))));
    assert_eq!(engine.queue().lock().size(), 0);
    assert_eq!(engine.pool().len(), 1);
}

/// 16-bit mono WAV held in memory
fn wav_chunk(sample_rate: u32, frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..frames {
            writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

#[tokio::test]
async fn test_end_to_end_wav_chunks() {
    let device = MockDevice::with_sample_rate(16_000);
    let engine = StreamEngine::new(
        EngineConfig::default(),
        Arc::new(SymphoniaChunkDecoder::with_extension("wav")),
        device.clone(),
    )
    .await
    .unwrap();

    engine.submit_chunk(wav_chunk(16_000, 1_600)).await.unwrap();
    engine.submit_chunk(wav_chunk(16_000, 3_200)).await.unwrap();

    let first = engine.scheduler().tick().unwrap();
    let second = engine.scheduler().tick().unwrap();
    assert!((first.duration - 0.1).abs() < 1e-9);
    assert!((second.duration - 0.2).abs() < 1e-9);
    assert!((second.start_time - (first.start_time + 0.1)).abs() < 1e-9);

    let scheduled = device.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert_eq!(engine.health_report().metrics.processed, 2);
}

#[tokio::test]
async fn test_end_to_end_wav_converted_to_device_rate() {
    let device = MockDevice::new();
    let engine = StreamEngine::new(
        EngineConfig::default(),
        Arc::new(SymphoniaChunkDecoder::with_extension("wav")),
        device.clone(),
    )
    .await
    .unwrap();

    engine.submit_chunk(wav_chunk(16_000, 1_600)).await.unwrap();
    let placed = engine.scheduler().tick().unwrap();

    assert!((placed.duration - 0.1).abs() < 0.002, "duration {}", placed.duration);
    let scheduled = device.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].sample_rate, 48_000);
}
