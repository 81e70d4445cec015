//! Progress reporting for build pipelines

mod console;
mod handler;
mod logging;
mod recording;

pub use console::ConsoleHandler;
pub use handler::{NoOpHandler, ProgressEvent, ProgressHandler};
pub use logging::LoggingHandler;
pub use recording::RecordingHandler;
