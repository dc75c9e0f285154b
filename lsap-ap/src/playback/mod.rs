//! Playback engine: decode pipeline, bounded queue, gapless scheduler,
//! recovery state machine and health monitoring

pub mod activation;
pub mod buffer_pool;
pub mod decode_pipeline;
pub mod engine;
pub mod monitor;
pub mod queue;
pub mod recovery;
pub mod scheduler;

pub use activation::ActivationGate;
pub use buffer_pool::{BufferPool, PoolStats};
pub use decode_pipeline::DecodePipeline;
pub use engine::StreamEngine;
pub use monitor::start_health_monitor;
pub use queue::{PlaybackQueue, SharedQueue};
pub use recovery::{OperatingLimits, RecoveryManager};
pub use scheduler::{PlaybackHandle, ScheduledPlayback, Scheduler};
