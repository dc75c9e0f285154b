//! Output device activation gate
//!
//! Decode and playback both need the output device running before they do
//! any work. A suspended device is asked to resume; if the platform insists
//! on an external activation signal the gate latches and fails fast until
//! [`ActivationGate::activate`] succeeds, so the device is not asked again
//! for every chunk.

use crate::audio::output::{DeviceState, OutputDevice};
use crate::error::{ContextError, Error};
use crate::telemetry::Telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ActivationGate {
    device: Arc<dyn OutputDevice>,
    telemetry: Arc<Telemetry>,
    awaiting_activation: AtomicBool,
}

impl ActivationGate {
    pub fn new(device: Arc<dyn OutputDevice>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            device,
            telemetry,
            awaiting_activation: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &Arc<dyn OutputDevice> {
        &self.device
    }

    /// True while blocked on an external activation signal
    pub fn awaiting_activation(&self) -> bool {
        self.awaiting_activation.load(Ordering::SeqCst)
    }

    /// Make sure the device is running, resuming it if suspended.
    ///
    /// Never waits for a user: activation-required and closed devices fail
    /// immediately.
    pub async fn ensure_active(&self, operation: &str) -> Result<(), ContextError> {
        if self.awaiting_activation() {
            return Err(ContextError::ActivationRequired);
        }

        match self.device.state() {
            DeviceState::Active => Ok(()),
            DeviceState::Closed => Err(ContextError::Unavailable("output device closed".to_string())),
            DeviceState::Suspended => {
                debug!("Output device suspended, requesting resume for {}", operation);
                match self.device.resume().await {
                    Ok(()) => Ok(()),
                    Err(ContextError::ActivationRequired) => {
                        // Only the first refusal is announced
                        if !self.awaiting_activation.swap(true, Ordering::SeqCst) {
                            self.telemetry.report_activation_required(operation);
                            self.telemetry
                                .report_error(operation, &Error::from(ContextError::ActivationRequired));
                        }
                        Err(ContextError::ActivationRequired)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// External activation signal: resume the device and lift the latch
    pub async fn activate(&self) -> Result<(), ContextError> {
        self.device.activate().await?;
        let was_waiting = self.awaiting_activation.swap(false, Ordering::SeqCst);
        info!("Output device activated");
        if was_waiting {
            self.telemetry
                .report_recovery("activation", "Audio output activated; playback can continue");
        }
        Ok(())
    }
}
