//! powervs-builder - custom image builder for IBM Power Virtual Server
//!
//! A build is a fixed sequence of steps sharing one typed [`BuildState`]:
//! import or locate the base image, provide a network, boot an instance,
//! optionally reach and provision it, stop it and capture it. Every step
//! knows how to remove what it created; when the pipeline halts the runner
//! unwinds the steps that started, newest first.
//!
//! # Core Concepts
//!
//! - **Steps**: [`Step`] implementations with a forward `run` and a
//!   best-effort `cleanup`
//! - **Runner**: [`PipelineRunner`] executes steps in order and unwinds them
//! - **Polling**: [`poll_until`] drives every bounded wait on remote state
//! - **Cloud clients**: capability traits in [`cloud`], backed by
//!   [`PowerVsClient`] in production and [`MockCloud`] in tests
//!
//! # Example Usage
//!
//! ```ignore
//! use powervs_builder::{BuildConfig, BuildEnvironment, Builder, CloudClients, PowerVsClient};
//! use powervs_builder::progress::ConsoleHandler;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! async fn build() -> anyhow::Result<()> {
//!     let config = BuildConfig::load(Path::new("build.toml"))?;
//!     let client = Arc::new(PowerVsClient::new(&config)?);
//!     let env = BuildEnvironment::for_config(
//!         &config,
//!         CloudClients::from_shared(client),
//!         Arc::new(ConsoleHandler::new()),
//!     );
//!
//!     let artifact = Builder::new(config).run(env).await?;
//!     println!("{}", artifact);
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod builder;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod provision;
pub mod util;

pub use artifact::Artifact;
pub use builder::{BuildEnvironment, Builder, BUILDER_ID};
pub use cloud::{ApiError, CloudClients, MockCloud, PowerVsClient};
pub use config::{BuildConfig, ConfigError};
pub use error::BuildError;
pub use pipeline::{
    poll_until, BuildState, PipelineConfig, PipelineRunner, PollPolicy, RunSummary, Step,
    StepAction,
};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "powervs-builder");
    }
}
