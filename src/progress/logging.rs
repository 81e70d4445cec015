//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BuildStarted { steps } => {
                info!(steps, "Starting build pipeline");
            }
            ProgressEvent::StepStarted { step, index, total } => {
                info!(
                    step = %step,
                    progress = format!("{}/{}", index, total),
                    "Starting step"
                );
            }
            ProgressEvent::StepCompleted { step, duration } => {
                info!(
                    step = %step,
                    duration_ms = duration.as_millis(),
                    "Step complete"
                );
            }
            ProgressEvent::StepHalted { step, error } => {
                warn!(step = %step, error = %error, "Step halted the pipeline");
            }
            ProgressEvent::CleanupStarted { step } => {
                debug!(step = %step, "Cleaning up step");
            }
            ProgressEvent::CleanupFailed { step, error } => {
                warn!(step = %step, error = %error, "Cleanup failed");
            }
            ProgressEvent::Say(text) => {
                info!("{}", text);
            }
            ProgressEvent::Message(text) => {
                debug!("{}", text);
            }
            ProgressEvent::Error(text) => {
                error!("{}", text);
            }
            ProgressEvent::Completed { total_time } => {
                info!(total_time_ms = total_time.as_millis(), "Build complete");
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Build failed");
            }
        }
    }
}
