//! Console progress handler used by the CLI

use super::{LoggingHandler, ProgressEvent, ProgressHandler};
use std::io::Write;

/// Prints operator-facing lines to stderr and forwards lifecycle events to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHandler {
    logging: LoggingHandler,
}

impl ConsoleHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn format(event: &ProgressEvent) -> Option<String> {
        match event {
            ProgressEvent::Say(text) => Some(format!("==> {}", text)),
            ProgressEvent::Message(text) => Some(format!("    {}", text)),
            ProgressEvent::Error(text) => Some(format!("==> Error: {}", text)),
            _ => None,
        }
    }
}

impl ProgressHandler for ConsoleHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match Self::format(event) {
            Some(line) => {
                let mut stderr = std::io::stderr().lock();
                let _ = writeln!(stderr, "{}", line);
            }
            None => self.logging.on_progress(event),
        }
    }
}
