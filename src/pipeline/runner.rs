use super::config::PipelineConfig;
use super::state::BuildState;
use super::step::{Step, StepAction};
use crate::error::BuildError;
use crate::progress::ProgressEvent;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps whose run returned `Continue`
    pub completed: Vec<&'static str>,
    /// Step that halted forward execution, if any
    pub halted_at: Option<&'static str>,
    /// Steps whose cleanup was invoked, in invocation order
    pub cleaned: Vec<&'static str>,
    pub duration: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.halted_at.is_none()
    }
}

/// Runs steps strictly in order and unwinds the started ones in reverse
pub struct PipelineRunner {
    steps: Vec<Box<dyn Step>>,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(steps: Vec<Box<dyn Step>>, config: PipelineConfig) -> Self {
        Self { steps, config }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub async fn run(&mut self, state: &mut BuildState) -> RunSummary {
        let start = Instant::now();
        let total = self.steps.len();
        state.cleanup_timeout = self.config.cleanup_timeout;

        info!("Starting pipeline with {} steps", total);
        state
            .ui
            .on_progress(&ProgressEvent::BuildStarted { steps: total });

        let mut started = 0;
        let mut completed = Vec::new();
        let mut halted_at = None;

        for (index, step) in self.steps.iter_mut().enumerate() {
            let name = step.name();

            if state.cancel.is_cancelled() {
                state.halt(BuildError::Cancelled);
                halted_at = Some(name);
                break;
            }

            debug!("Step {}/{}: {}", index + 1, total, name);
            state.ui.on_progress(&ProgressEvent::StepStarted {
                step: name.to_string(),
                index: index + 1,
                total,
            });

            let step_start = Instant::now();
            started += 1;
            match step.run(state).await {
                StepAction::Continue => {
                    state.ui.on_progress(&ProgressEvent::StepCompleted {
                        step: name.to_string(),
                        duration: step_start.elapsed(),
                    });
                    completed.push(name);
                }
                StepAction::Halt => {
                    if state.error.is_none() {
                        state.error = Some(BuildError::HaltedWithoutError(name));
                    }
                    let error = state
                        .error
                        .as_ref()
                        .map(|err| err.to_string())
                        .unwrap_or_default();
                    warn!("Step {} halted the pipeline: {}", name, error);
                    state.ui.on_progress(&ProgressEvent::StepHalted {
                        step: name.to_string(),
                        error,
                    });
                    halted_at = Some(name);
                    break;
                }
            }
        }

        let mut cleaned = Vec::new();
        if halted_at.is_some() || self.config.teardown_on_success {
            for step in self.steps[..started].iter_mut().rev() {
                let name = step.name();
                state.ui.on_progress(&ProgressEvent::CleanupStarted {
                    step: name.to_string(),
                });
                if let Err(err) = step.cleanup(state).await {
                    warn!("Cleanup of {} failed: {}", name, err);
                    state.ui.on_progress(&ProgressEvent::CleanupFailed {
                        step: name.to_string(),
                        error: err.to_string(),
                    });
                }
                cleaned.push(name);
            }
        }

        match &state.error {
            Some(err) => state.ui.on_progress(&ProgressEvent::Failed {
                error: err.to_string(),
            }),
            None => state.ui.on_progress(&ProgressEvent::Completed {
                total_time: start.elapsed(),
            }),
        }

        info!(
            "Pipeline finished: {} completed, halted at {:?}, {} cleaned",
            completed.len(),
            halted_at,
            cleaned.len()
        );

        RunSummary {
            completed,
            halted_at,
            cleaned,
            duration: start.elapsed(),
        }
    }
}
