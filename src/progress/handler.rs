//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while a build pipeline runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Pipeline started
    BuildStarted { steps: usize },

    /// A step's run began
    StepStarted {
        step: String,
        index: usize,
        total: usize,
    },

    /// A step's run finished and the pipeline continues
    StepCompleted { step: String, duration: Duration },

    /// A step halted the pipeline
    StepHalted { step: String, error: String },

    /// Unwinding reached a step
    CleanupStarted { step: String },

    /// A step's cleanup failed; unwinding continues
    CleanupFailed { step: String, error: String },

    /// Headline for a new phase of work ("==> ...")
    Say(String),

    /// Detail line, including heartbeat while waiting on remote jobs
    Message(String),

    /// Operator-facing error line
    Error(String),

    /// Pipeline completed without halting
    Completed { total_time: Duration },

    /// Pipeline halted
    Failed { error: String },
}

/// Trait for handling progress events during a build
///
/// This is the UI sink every step reports through. `say`, `message` and
/// `error` are shorthands for the three line-oriented events.
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);

    fn say(&self, text: &str) {
        self.on_progress(&ProgressEvent::Say(text.to_string()));
    }

    fn message(&self, text: &str) {
        self.on_progress(&ProgressEvent::Message(text.to_string()));
    }

    fn error(&self, text: &str) {
        self.on_progress(&ProgressEvent::Error(text.to_string()));
    }
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    impl ProgressHandler for CountingHandler {
        fn on_progress(&self, _event: &ProgressEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_noop_handler() {
        let handler = NoOpHandler;
        handler.say("Creating network");
        handler.on_progress(&ProgressEvent::BuildStarted { steps: 3 });
    }

    #[test]
    fn test_shorthands_route_through_on_progress() {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            count: count.clone(),
        };

        handler.say("Importing the base image");
        handler.message("Job state: running");
        handler.error("failed to create network");
        handler.on_progress(&ProgressEvent::Completed {
            total_time: Duration::from_secs(5),
        });

        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_event_debug() {
        let event = ProgressEvent::StepStarted {
            step: "network".to_string(),
            index: 1,
            total: 4,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("StepStarted"));
        assert!(debug_str.contains("index: 1"));
    }
}
