//! Live Stream Audio Playback (lsap-ap) - replay harness
//!
//! Feeds audio files to the stream engine as if each were a chunk arriving
//! from the network, plays them through an output device, and prints the
//! final health report as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait};
use lsap_ap::audio::{CpalOutputDevice, OutputDevice, SymphoniaChunkDecoder};
use lsap_ap::{EngineConfig, StreamEngine};
use lsap_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use lsap_common::events::EngineEvent;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for lsap-ap
#[derive(Parser, Debug)]
#[command(name = "lsap-ap")]
#[command(about = "Live stream audio playback engine")]
#[command(version)]
struct Args {
    /// Configuration file (overrides LSAP_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay audio files as stream chunks
    Play {
        /// Chunk files, sent in order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Delay between chunks in milliseconds
        #[arg(long, default_value = "0", env = "LSAP_INTERVAL_MS")]
        interval_ms: u64,

        /// Output device name (overrides the config file)
        #[arg(long, env = "LSAP_DEVICE")]
        device: Option<String>,
    },

    /// List output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config = EngineConfig::load(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lsap_ap={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    match args.command {
        Command::Devices => list_devices(),
        Command::Play {
            files,
            interval_ms,
            device,
        } => {
            if device.is_some() {
                config.output.device = device;
            }
            play(config, files, Duration::from_millis(interval_ms)).await
        }
    }
}

fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let devices = host
        .output_devices()
        .context("Failed to enumerate output devices")?;

    for device in devices {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let marker = if Some(&name) == default_name.as_ref() { " (default)" } else { "" };
        println!("{}{}", name, marker);
    }
    Ok(())
}

async fn play(config: EngineConfig, files: Vec<PathBuf>, interval: Duration) -> Result<()> {
    let device: Arc<dyn OutputDevice> = Arc::new(
        CpalOutputDevice::open(config.output.device.clone(), config.output.start_suspended)
            .context("Failed to open audio output")?,
    );
    let start_suspended = config.output.start_suspended;

    let engine = StreamEngine::new(config, Arc::new(SymphoniaChunkDecoder::new()), device)
        .await
        .context("Failed to initialize stream engine")?;
    info!("Stream engine initialized");

    let mut events = engine.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Error {
                    operation,
                    message,
                    suggestion,
                    ..
                } => warn!("[{}] {} - {}", operation, message, suggestion),
                EngineEvent::Recovery {
                    operation, message, ..
                } => info!("[{}] {}", operation, message),
                EngineEvent::QualityChange { status } => info!("Quality: {}", status),
                EngineEvent::ActivationRequired { message, .. } => warn!("{}", message),
            }
        }
    });

    if start_suspended {
        // Running the command counts as the user's activation
        engine.activate().await.context("Failed to activate audio output")?;
    }

    engine.start_streaming();

    let (tx, rx) = mpsc::channel(16);
    let ingest = engine.spawn_ingest(rx);

    let total = files.len();
    for path in files {
        let data = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        info!("Sending {} ({} bytes)", path.display(), data.len());
        if tx.send(data).await.is_err() {
            error!("Ingest stopped early");
            break;
        }
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }
    drop(tx);

    let queued = ingest.await.context("Ingest task failed")?;
    info!("{} of {} chunks queued, waiting for playback to drain", queued, total);

    tokio::select! {
        _ = wait_for_drain(&engine) => info!("Playback finished"),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, stopping"),
    }

    let report = engine.health_report();
    engine.shutdown();
    event_logger.abort();

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize health report")?
    );
    Ok(())
}

async fn wait_for_drain(engine: &StreamEngine) {
    loop {
        let queued = engine.queue().lock().size();
        if queued == 0 && engine.scheduler().active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
