//! Decode pipeline
//!
//! Turns one [`EncodedChunk`] into a validated [`DecodedBuffer`]:
//!
//! 1. Size bounds (empty / too small / too large) → rejected, no retry
//! 2. Memory pressure → emergency cleanup, drop the chunk if still crowded
//! 3. Output device must be running (see [`ActivationGate`])
//! 4. Up to 3 attempts (1 in Recovery), each raced against a growing timeout,
//!    with exponential backoff plus jitter between attempts
//! 5. Result validated, then converted to the device sample rate
//!
//! Failed attempts whose error [counts as a failure](Error::counts_as_failure)
//! feed the shared consecutive-failure counter and are retried; any other
//! error drops the chunk straight away.

use crate::audio::decoder::ChunkDecoder;
use crate::audio::resampler;
use crate::audio::types::{DecodedAudio, DecodedBuffer, EncodedChunk};
use crate::config::DecodeConfig;
use crate::error::{ContextError, DecodeError, Error, Result};
use crate::playback::activation::ActivationGate;
use crate::playback::buffer_pool::BufferPool;
use crate::playback::queue::SharedQueue;
use crate::playback::recovery::RecoveryManager;
use crate::telemetry::Telemetry;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Timeout of the first decode attempt
pub const BASE_DECODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout growth per further attempt
pub const DECODE_TIMEOUT_STEP: Duration = Duration::from_secs(2);

/// Upper bound on a single attempt's timeout
pub const MAX_DECODE_TIMEOUT: Duration = Duration::from_secs(15);

/// Base unit of the exponential backoff
pub const BACKOFF_UNIT: Duration = Duration::from_millis(100);

/// Upper bound (exclusive) of the random jitter added to each backoff
pub const MAX_JITTER_MS: u64 = 50;

/// Consecutive failures above which backoff doubles
pub const BACKOFF_ESCALATION_FAILURES: u32 = 5;

/// Queue fill ratio that triggers emergency cleanup
const PRESSURE_OCCUPANCY: f64 = 0.90;

/// Fill ratio above which a chunk is dropped after emergency cleanup
const DROP_OCCUPANCY: f64 = 0.50;

/// Timeout for 1-based attempt `n`: `5s + 2s·(n−1)`, at most 15s
pub fn attempt_timeout(attempt: u32) -> Duration {
    let grown = BASE_DECODE_TIMEOUT + DECODE_TIMEOUT_STEP * attempt.saturating_sub(1);
    grown.min(MAX_DECODE_TIMEOUT)
}

/// Backoff after failed attempt `n` (without jitter): `2^n × 100ms`,
/// doubled once the failure count passes 5
pub fn backoff_delay(attempt: u32, consecutive_failures: u32) -> Duration {
    let base = BACKOFF_UNIT * 2u32.saturating_pow(attempt.min(16));
    if consecutive_failures > BACKOFF_ESCALATION_FAILURES {
        base * 2
    } else {
        base
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS))
}

/// Chunk → validated PCM, with retries and failure accounting
pub struct DecodePipeline {
    decoder: Arc<dyn ChunkDecoder>,
    config: DecodeConfig,
    queue: SharedQueue,
    pool: Arc<BufferPool>,
    gate: Arc<ActivationGate>,
    recovery: Arc<RecoveryManager>,
    telemetry: Arc<Telemetry>,
}

impl DecodePipeline {
    pub fn new(
        decoder: Arc<dyn ChunkDecoder>,
        config: DecodeConfig,
        queue: SharedQueue,
        pool: Arc<BufferPool>,
        gate: Arc<ActivationGate>,
        recovery: Arc<RecoveryManager>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            decoder,
            config,
            queue,
            pool,
            gate,
            recovery,
            telemetry,
        }
    }

    /// Decode one chunk
    ///
    /// Any returned error has already been counted as a drop and, where the
    /// host should know, emitted as a classified `Error` event.
    pub async fn decode(&self, chunk: EncodedChunk) -> Result<DecodedBuffer> {
        if let Err(e) = self.check_size(&chunk) {
            return Err(self.drop_chunk(&chunk, e.into(), true));
        }

        if let Err(e) = self.relieve_memory_pressure() {
            return Err(self.drop_chunk(&chunk, e.into(), true));
        }

        if let Err(e) = self.gate.ensure_active("decode").await {
            // The gate already announced activation-required
            let announce = !matches!(e, ContextError::ActivationRequired);
            return Err(self.drop_chunk(&chunk, e.into(), announce));
        }

        let mut attempt = 0u32;
        let last_error = loop {
            attempt += 1;
            match self.attempt(&chunk, attempt).await {
                Ok(buffer) => return Ok(buffer),
                Err(e) => {
                    debug!(
                        "Decode attempt {} for chunk #{} failed: {}",
                        attempt, chunk.sequence, e
                    );
                    if !e.counts_as_failure() {
                        break e;
                    }
                    let failures = self.recovery.record_failure("decode");

                    // Budget is re-read so entering Recovery mid-chunk cuts retries short
                    if attempt >= self.recovery.limits().decode_attempts {
                        break e;
                    }
                    tokio::time::sleep(backoff_delay(attempt, failures) + jitter()).await;
                }
            }
        };

        Err(self.drop_chunk(&chunk, last_error, true))
    }

    /// One decode attempt raced against its timeout, then validated
    async fn attempt(&self, chunk: &EncodedChunk, attempt: u32) -> Result<DecodedBuffer> {
        let timeout = attempt_timeout(attempt);
        let started = Instant::now();
        let scratch = self.pool.acquire();

        let audio = match tokio::time::timeout(
            timeout,
            self.decoder.decode(Arc::clone(&chunk.data), scratch),
        )
        .await
        {
            Ok(Ok(audio)) => audio,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(DecodeError::Timeout {
                    attempt,
                    timeout_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        };

        let buffer = DecodedBuffer::from_decoded(chunk.sequence, audio).map_err(|(e, samples)| {
            self.pool.release(samples);
            Error::from(e)
        })?;
        let buffer = self.convert_rate(buffer).await?;

        let elapsed = started.elapsed();
        self.telemetry.record_decode_time(elapsed);
        self.telemetry.record_processed();
        self.recovery.record_success("decode");

        let limit = self.recovery.limits().max_decode_time;
        if elapsed > limit {
            warn!(
                "Slow decode: chunk #{} took {:?} (limit {:?})",
                chunk.sequence, elapsed, limit
            );
        } else {
            debug!(
                "Decoded chunk #{}: {:.3}s, {}Hz, {}ch in {:?}",
                chunk.sequence, buffer.duration, buffer.sample_rate, buffer.channels, elapsed
            );
        }
        Ok(buffer)
    }

    /// Bring a validated buffer to the device rate on a blocking worker
    async fn convert_rate(&self, buffer: DecodedBuffer) -> Result<DecodedBuffer> {
        let target = self.gate.device().sample_rate();
        if buffer.sample_rate == target {
            return Ok(buffer);
        }

        let DecodedBuffer {
            sequence,
            samples,
            sample_rate,
            channels,
            ..
        } = buffer;
        let storage = self.pool.acquire();
        let (converted, source) = tokio::task::spawn_blocking(move || {
            let converted = resampler::resample(&samples, sample_rate, target, channels, storage);
            (converted, samples)
        })
        .await
        .map_err(|e| DecodeError::Resample(format!("conversion task failed: {}", e)))?;
        self.pool.release(source);

        let samples = converted?;
        debug!(
            "Converted chunk #{} from {}Hz to {}Hz",
            sequence, sample_rate, target
        );
        DecodedBuffer::from_decoded(
            sequence,
            DecodedAudio {
                samples,
                sample_rate: target,
                channels,
            },
        )
        .map_err(|(e, samples)| {
            self.pool.release(samples);
            Error::from(e)
        })
    }

    fn check_size(&self, chunk: &EncodedChunk) -> std::result::Result<(), DecodeError> {
        let size = chunk.len();
        if size == 0 {
            return Err(DecodeError::Empty);
        }
        if size < self.config.min_chunk_bytes {
            return Err(DecodeError::Undersized {
                size,
                min: self.config.min_chunk_bytes,
            });
        }
        if size > self.config.max_chunk_bytes {
            return Err(DecodeError::Oversized {
                size,
                max: self.config.max_chunk_bytes,
            });
        }
        Ok(())
    }

    /// Emergency cleanup under pressure; refuse the chunk if the queue is
    /// still more than half full afterwards
    fn relieve_memory_pressure(&self) -> std::result::Result<(), DecodeError> {
        let external = self.telemetry.memory_pressure();
        let mut queue = self.queue.lock();
        let crowded = queue.occupancy() > PRESSURE_OCCUPANCY
            || queue.memory_occupancy() > PRESSURE_OCCUPANCY;
        if !(external || crowded) {
            return Ok(());
        }

        warn!(
            "Memory pressure (external: {}, queue {}/{}), running emergency cleanup",
            external,
            queue.size(),
            queue.max_count()
        );
        queue.emergency_cleanup();

        if queue.occupancy() > DROP_OCCUPANCY {
            return Err(DecodeError::MemoryPressure {
                queued: queue.size(),
                max_count: queue.max_count(),
            });
        }
        Ok(())
    }

    fn drop_chunk(&self, chunk: &EncodedChunk, error: Error, announce: bool) -> Error {
        self.telemetry.record_dropped();
        if announce {
            self.telemetry.report_error("decode", &error);
        } else {
            debug!("Dropped chunk #{}: {}", chunk.sequence, error);
        }
        error
    }
}
