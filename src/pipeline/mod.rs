//! Step pipeline: typed build state, the step trait, the runner and the
//! concrete provisioning steps

pub mod config;
pub mod poll;
pub mod runner;
pub mod state;
pub mod step;
pub mod steps;

pub use config::PipelineConfig;
pub use poll::{poll_for, poll_until, PollPolicy};
pub use runner::{PipelineRunner, RunSummary};
pub use state::BuildState;
pub use step::{ResourceState, Step, StepAction};
