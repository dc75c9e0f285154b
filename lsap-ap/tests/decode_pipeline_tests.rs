//! Decode pipeline integration tests
//!
//! Retry/timeout policy, rejection accounting, memory pressure and device
//! activation, driven through the engine with a scripted decoder.

mod helpers;

use helpers::*;
use lsap_ap::audio::{DeviceState, OutputDevice};
use lsap_ap::error::{ContextError, DecodeError, Error};
use lsap_ap::EngineConfig;
use lsap_common::events::{EngineEvent, HealthState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_successful_decode_is_queued() {
    let device = MockDevice::new();
    let engine = engine(MockDecoder::succeeding(), Arc::clone(&device)).await;

    engine.submit_chunk(chunk()).await.unwrap();

    assert_eq!(engine.queue().lock().size(), 1);
    let report = engine.health_report();
    assert_eq!(report.metrics.processed, 1);
    assert_eq!(report.metrics.dropped, 0);
    assert_eq!(report.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_three_timeouts_drop_chunk() {
    let decoder = MockDecoder::new(DecodeBehavior::Hang);
    let engine = engine(Arc::clone(&decoder), MockDevice::new()).await;
    let started = Instant::now();

    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(
        result,
        Err(Error::Decode(DecodeError::Timeout {
            attempt: 3,
            timeout_ms: 9000
        }))
    ));
    assert_eq!(decoder.calls(), 3);

    let report = engine.health_report();
    assert_eq!(report.metrics.dropped, 1);
    assert_eq!(report.consecutive_failures, 3);
    assert_eq!(report.state, HealthState::Normal);

    // 5s + 7s + 9s of timeouts plus 200ms and 400ms of backoff (+ jitter)
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(21_600));
    assert!(elapsed < Duration::from_millis(21_700));
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_after_failure() {
    let decoder = MockDecoder::succeeding();
    decoder.push([DecodeBehavior::malformed()]);
    let engine = engine(Arc::clone(&decoder), MockDevice::new()).await;
    let mut events = engine.subscribe();

    engine.submit_chunk(chunk()).await.unwrap();

    assert_eq!(decoder.calls(), 2);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    let events = drain_events(&mut events);
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::Recovery { operation, .. } if operation == "decode")));
}

#[tokio::test(start_paused = true)]
async fn test_size_rejections_do_not_count_as_failures() {
    let config = EngineConfig::from_toml_str("[decode]\nmin_chunk_bytes = 16\nmax_chunk_bytes = 1024\n")
        .unwrap();
    let decoder = MockDecoder::succeeding();
    let engine = engine_with(config, Arc::clone(&decoder), MockDevice::new()).await;

    assert!(matches!(
        engine.submit_chunk(Vec::new()).await,
        Err(Error::Decode(DecodeError::Empty))
    ));
    assert!(matches!(
        engine.submit_chunk(vec![1; 8]).await,
        Err(Error::Decode(DecodeError::Undersized { size: 8, min: 16 }))
    ));
    assert!(matches!(
        engine.submit_chunk(vec![1; 2048]).await,
        Err(Error::Decode(DecodeError::Oversized { size: 2048, max: 1024 }))
    ));

    assert_eq!(decoder.calls(), 0);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    assert_eq!(engine.health_report().metrics.dropped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_counts_and_recycles() {
    let decoder = MockDecoder::new(DecodeBehavior::ZeroSampleRate);
    let engine = engine(decoder, MockDevice::new()).await;

    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(engine.recovery().consecutive_failures(), 3);
    assert_eq!(engine.queue().lock().size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_uncounted_decoder_error_is_not_retried() {
    // A decoder reporting an empty result is a drop, not a failure
    let decoder = MockDecoder::new(DecodeBehavior::Fail(DecodeError::Empty));
    let engine = engine(Arc::clone(&decoder), MockDevice::new()).await;

    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(result, Err(Error::Decode(DecodeError::Empty))));
    assert_eq!(decoder.calls(), 1);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    assert_eq!(engine.health_report().metrics.dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_error_event_is_classified() {
    let engine = engine(MockDecoder::failing(), MockDevice::new()).await;
    let mut events = engine.subscribe();

    let _ = engine.submit_chunk(chunk()).await;

    let events = drain_events(&mut events);
    let error = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::Error {
                operation,
                message,
                suggestion,
                recoverable,
                ..
            } if operation == "decode" => Some((message.clone(), suggestion.clone(), *recoverable)),
            _ => None,
        })
        .expect("decode error event");
    assert_eq!(error.0, "Received corrupted audio data");
    assert!(!error.0.contains("bad frame header"));
    assert!(!error.1.is_empty());
    assert!(error.2);
}

#[tokio::test(start_paused = true)]
async fn test_twelve_failures_enter_recovery() {
    let device = MockDevice::new();
    let engine = engine(MockDecoder::failing(), device).await;
    for _ in 0..3 {
        engine.pool().release(Vec::with_capacity(1024));
    }
    assert_eq!(engine.pool().len(), 3);

    // 3 attempts per chunk in Normal; the 11th failure switches to Recovery
    for _ in 0..5 {
        let _ = engine.submit_chunk(chunk()).await;
    }

    assert_eq!(engine.health_state(), HealthState::Recovery);
    assert_eq!(engine.recovery().consecutive_failures(), 12);
    assert_eq!(engine.queue().lock().max_count(), 25);
    assert_eq!(engine.queue().lock().size(), 0);
    assert!(engine.pool().is_empty());
    assert_eq!(engine.recovery().limits().decode_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_cuts_retries_mid_chunk() {
    let decoder = MockDecoder::failing();
    let engine = engine(Arc::clone(&decoder), MockDevice::new()).await;

    for _ in 0..4 {
        let _ = engine.submit_chunk(chunk()).await;
    }

    // Chunks 1-3 use 3 attempts each; chunk 4 stops after its 2nd (11th overall)
    assert_eq!(decoder.calls(), 11);
    assert_eq!(engine.health_state(), HealthState::Recovery);
}

#[tokio::test(start_paused = true)]
async fn test_external_memory_pressure_runs_cleanup() {
    let engine = engine(MockDecoder::succeeding(), MockDevice::new()).await;
    for seq in 0..20 {
        engine.queue().lock().enqueue(buffer(seq, 0.1));
    }
    engine.pool().release(Vec::with_capacity(64));

    engine.set_memory_pressure(true);
    engine.submit_chunk(chunk()).await.unwrap();

    // Cleanup kept 5, then the new buffer was queued
    assert_eq!(engine.queue().lock().size(), 6);
    let report = engine.health_report();
    assert!(report.memory_pressure);
}

#[tokio::test(start_paused = true)]
async fn test_memory_pressure_drops_when_still_crowded() {
    let config = EngineConfig::from_toml_str("[queue]\nmax_count = 6\n").unwrap();
    let decoder = MockDecoder::succeeding();
    let engine = engine_with(config, Arc::clone(&decoder), MockDevice::new()).await;
    for seq in 0..6 {
        engine.queue().lock().enqueue(buffer(seq, 0.1));
    }

    // 6/6 is over 90%; after cleanup 5/6 is still over half full
    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(
        result,
        Err(Error::Decode(DecodeError::MemoryPressure { queued: 5, max_count: 6 }))
    ));
    assert_eq!(decoder.calls(), 0);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
    assert_eq!(engine.health_report().metrics.dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_suspended_device_is_resumed() {
    let device = MockDevice::suspended(false);
    let engine = engine(MockDecoder::succeeding(), Arc::clone(&device)).await;

    engine.submit_chunk(chunk()).await.unwrap();

    assert_eq!(device.resume_calls(), 1);
    assert_eq!(device.state(), DeviceState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_activation_required_latches_until_activate() {
    let device = MockDevice::suspended(true);
    let decoder = MockDecoder::succeeding();
    let engine = engine(Arc::clone(&decoder), Arc::clone(&device)).await;
    let mut events = engine.subscribe();

    let first = engine.submit_chunk(chunk()).await;
    assert!(matches!(
        first,
        Err(Error::Context(ContextError::ActivationRequired))
    ));
    assert!(engine.awaiting_activation());

    let announced = drain_events(&mut events);
    assert!(announced
        .iter()
        .any(|e| matches!(e, EngineEvent::ActivationRequired { .. })));
    assert!(announced.iter().any(|e| matches!(
        e,
        EngineEvent::Error { recoverable: true, .. }
    )));

    // Fails fast without asking the device again
    let second = engine.submit_chunk(chunk()).await;
    assert!(matches!(
        second,
        Err(Error::Context(ContextError::ActivationRequired))
    ));
    assert_eq!(device.resume_calls(), 1);
    assert_eq!(decoder.calls(), 0);
    assert!(drain_events(&mut events)
        .iter()
        .all(|e| matches!(e, EngineEvent::QualityChange { .. })));

    engine.activate().await.unwrap();
    assert!(!engine.awaiting_activation());
    engine.submit_chunk(chunk()).await.unwrap();
    assert_eq!(engine.queue().lock().size(), 1);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_closed_device_is_not_retried() {
    let device = MockDevice::new();
    device.set_state(DeviceState::Closed);
    let decoder = MockDecoder::succeeding();
    let engine = engine(Arc::clone(&decoder), device).await;

    let result = engine.submit_chunk(chunk()).await;

    assert!(matches!(
        result,
        Err(Error::Context(ContextError::Unavailable(_)))
    ));
    assert_eq!(decoder.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_decode_still_succeeds() {
    let decoder = MockDecoder::new(DecodeBehavior::Slow {
        delay: Duration::from_millis(300),
        frames: 500,
        sample_rate: 1_000,
    });
    let engine = engine(decoder, MockDevice::with_sample_rate(1_000)).await;

    engine.submit_chunk(chunk()).await.unwrap();

    let report = engine.health_report();
    assert_eq!(report.metrics.decode_time_ms.samples, 1);
    assert!(report.metrics.decode_time_ms.average >= 300.0);
}

#[tokio::test]
async fn test_decoded_audio_is_converted_to_device_rate() {
    // 0.1s of 24 kHz stereo on a 48 kHz device
    let decoder = MockDecoder::new(DecodeBehavior::Succeed {
        frames: 2_400,
        sample_rate: 24_000,
        channels: 2,
    });
    let engine = engine(decoder, MockDevice::new()).await;

    engine.submit_chunk(chunk()).await.unwrap();

    let buffer = engine.queue().lock().dequeue().unwrap();
    assert_eq!(buffer.sample_rate, 48_000);
    assert_eq!(buffer.channels, 2);
    assert!((buffer.duration - 0.1).abs() < 0.001, "duration {}", buffer.duration);
    assert_eq!(engine.recovery().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_matching_rate_is_queued_unchanged() {
    let decoder = MockDecoder::new(DecodeBehavior::Succeed {
        frames: 1_600,
        sample_rate: 16_000,
        channels: 1,
    });
    let engine = engine(decoder, MockDevice::with_sample_rate(16_000)).await;

    engine.submit_chunk(chunk()).await.unwrap();

    let buffer = engine.queue().lock().dequeue().unwrap();
    assert_eq!(buffer.sample_rate, 16_000);
    assert_eq!(buffer.frames(), 1_600);
    assert!(buffer.samples.iter().all(|&s| s == 0.1));
}
