//! Stream engine
//!
//! Owns and wires the playback components:
//!
//! ```text
//! transport → DecodePipeline → PlaybackQueue → Scheduler → OutputDevice
//!                   └──────── RecoveryManager ────────┘
//!                         Telemetry observes all
//! ```
//!
//! Collaborators (decoder backend, output device, configuration) are
//! injected; there is no global state.

use crate::audio::decoder::ChunkDecoder;
use crate::audio::output::OutputDevice;
use crate::audio::types::{DecodedBuffer, EncodedChunk};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::activation::ActivationGate;
use crate::playback::buffer_pool::BufferPool;
use crate::playback::decode_pipeline::DecodePipeline;
use crate::playback::monitor::start_health_monitor;
use crate::playback::queue::{PlaybackQueue, SharedQueue};
use crate::playback::recovery::{OperatingLimits, RecoveryManager};
use crate::playback::scheduler::Scheduler;
use crate::telemetry::{HealthReport, QueueReport, ReportInputs, Telemetry};
use lsap_common::events::{EngineEvent, EventBus, HealthState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Event channel capacity
const EVENT_CAPACITY: usize = 256;

/// Playback engine for one live stream
pub struct StreamEngine {
    config: EngineConfig,
    events: Arc<EventBus>,
    telemetry: Arc<Telemetry>,
    device: Arc<dyn OutputDevice>,
    pool: Arc<BufferPool>,
    queue: SharedQueue,
    gate: Arc<ActivationGate>,
    recovery: Arc<RecoveryManager>,
    pipeline: DecodePipeline,
    scheduler: Arc<Scheduler>,
    next_sequence: AtomicU64,
    shut_down: AtomicBool,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamEngine {
    /// Build an engine and start its health monitor
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn new(
        config: EngineConfig,
        decoder: Arc<dyn ChunkDecoder>,
        device: Arc<dyn OutputDevice>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let events = Arc::new(EventBus::new(EVENT_CAPACITY));
        let telemetry = Arc::new(Telemetry::new(Arc::clone(&events)));
        let pool = Arc::new(BufferPool::new(config.pool.max_size));
        let queue = PlaybackQueue::new(
            config.queue.max_count,
            config.queue.max_memory_bytes,
            Arc::clone(&pool),
        )
        .shared();
        let gate = Arc::new(ActivationGate::new(Arc::clone(&device), Arc::clone(&telemetry)));
        let recovery = Arc::new(RecoveryManager::new(
            OperatingLimits::from_config(&config),
            Arc::clone(&queue),
            Arc::clone(&telemetry),
        ));
        let pipeline = DecodePipeline::new(
            decoder,
            config.decode.clone(),
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&gate),
            Arc::clone(&recovery),
            Arc::clone(&telemetry),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&pool),
            Arc::clone(&gate),
            Arc::clone(&recovery),
            Arc::clone(&telemetry),
        ));

        let engine = Arc::new(Self {
            config,
            events,
            telemetry,
            device,
            pool,
            queue,
            gate,
            recovery,
            pipeline,
            scheduler,
            next_sequence: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            monitor_task: Mutex::new(None),
        });

        let monitor = start_health_monitor(
            Arc::downgrade(&engine),
            engine.config.telemetry.health_check_interval(),
        );
        *engine.monitor_task.lock() = Some(monitor);

        info!(
            "Stream engine ready (queue {} buffers / {} bytes, pool {})",
            engine.config.queue.max_count,
            engine.config.queue.max_memory_bytes,
            engine.config.pool.max_size
        );
        Ok(engine)
    }

    /// Decode one chunk from the transport and queue it for playback
    pub async fn submit_chunk(&self, data: Vec<u8>) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::Internal("engine is shut down".to_string()));
        }

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let chunk = EncodedChunk::new(sequence, data);
        self.telemetry.record_arrival(chunk.received_at);

        let buffer = self.pipeline.decode(chunk).await?;
        let accepted = self.queue.lock().enqueue(buffer);
        if !accepted {
            let error = Error::Queue(format!(
                "buffer #{} exceeds the {}-byte memory budget",
                sequence, self.config.queue.max_memory_bytes
            ));
            self.telemetry.report_error("enqueue", &error);
            return Err(error);
        }
        Ok(())
    }

    /// Feed chunks from a transport channel, in arrival order.
    ///
    /// The task ends when the sender side closes or the engine shuts down;
    /// it yields the number of chunks queued.
    pub fn spawn_ingest(self: &Arc<Self>, mut chunks: mpsc::Receiver<Vec<u8>>) -> JoinHandle<u64> {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut queued = 0u64;
            while let Some(data) = chunks.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                if engine.shut_down.load(Ordering::SeqCst) {
                    break;
                }
                match engine.submit_chunk(data).await {
                    Ok(()) => queued += 1,
                    Err(e) => debug!("Ingest skipped chunk: {}", e),
                }
            }
            debug!("Ingest finished ({} chunks queued)", queued);
            queued
        })
    }

    /// Decode without queueing (for hosts that drive playback themselves)
    pub async fn decode_chunk(&self, data: Vec<u8>) -> Result<DecodedBuffer> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let chunk = EncodedChunk::new(sequence, data);
        self.telemetry.record_arrival(chunk.received_at);
        self.pipeline.decode(chunk).await
    }

    pub fn start_streaming(&self) {
        self.scheduler.start_streaming();
    }

    pub fn stop_streaming(&self) {
        self.scheduler.stop_streaming();
    }

    /// Play a single buffer now and wait for it to finish
    pub async fn play_buffer(&self, buffer: DecodedBuffer) -> Result<()> {
        self.scheduler.play_buffer(buffer).await
    }

    /// External activation signal for a device that refused to resume
    pub async fn activate(&self) -> Result<()> {
        self.gate.activate().await.map_err(|e| {
            let error = Error::from(e);
            self.telemetry.report_error("activation", &error);
            error
        })
    }

    /// Raise or clear the external memory-pressure signal
    pub fn set_memory_pressure(&self, active: bool) {
        self.telemetry.set_memory_pressure(active);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn health_state(&self) -> HealthState {
        self.recovery.state()
    }

    /// Snapshot of engine health
    pub fn health_report(&self) -> HealthReport {
        let queue = QueueReport::from_queue(&self.queue.lock());
        HealthReport::assemble(ReportInputs {
            state: self.recovery.state(),
            consecutive_failures: self.recovery.consecutive_failures(),
            device_state: self.device.state(),
            queue,
            pool: self.pool.stats(),
            metrics: self.telemetry.metrics_snapshot(),
            average_latency_ms: self.telemetry.average_latency_ms(),
            external_memory_pressure: self.telemetry.memory_pressure(),
            recent_errors: self.telemetry.recent_errors(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn recovery(&self) -> &Arc<RecoveryManager> {
        &self.recovery
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn awaiting_activation(&self) -> bool {
        self.gate.awaiting_activation()
    }

    /// Teardown: stop streaming and monitoring, return to Normal
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop_streaming();
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        self.recovery.reset();
        self.pool.clear();
        info!("Stream engine shut down");
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        if let Some(task) = self.monitor_task.get_mut().take() {
            task.abort();
        }
    }
}
