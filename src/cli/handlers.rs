//! Command handlers; each returns the process exit code

use super::commands::{BuildArgs, ValidateArgs};
use super::output::OutputFormatter;
use crate::builder::{BuildEnvironment, Builder};
use crate::cloud::{CloudClients, PowerVsClient};
use crate::config::BuildConfig;
use crate::progress::{ConsoleHandler, LoggingHandler, ProgressHandler};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    match run_build(args, quiet).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Build failed: {:#}", e);
            eprintln!("Build failed: {:#}", e);
            1
        }
    }
}

async fn run_build(args: &BuildArgs, quiet: bool) -> Result<()> {
    info!("Loading configuration from {}", args.config.display());
    let mut config = BuildConfig::load(&args.config)
        .with_context(|| format!("Invalid configuration in {}", args.config.display()))?;
    if args.teardown_on_success {
        config.pipeline.teardown_on_success = true;
    }
    debug!("{}", config);

    let client = PowerVsClient::new(&config).context("Failed to create the API client")?;
    let ui: Arc<dyn ProgressHandler> = if quiet {
        Arc::new(LoggingHandler)
    } else {
        Arc::new(ConsoleHandler::new())
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_watcher(cancel.clone());

    let env = BuildEnvironment::for_config(&config, CloudClients::from_shared(Arc::new(client)), ui)
        .with_cancel(cancel);
    let artifact = Builder::new(config).run(env).await?;

    let formatter = OutputFormatter::new(args.format.into());
    println!("{}", formatter.format_artifact(&artifact)?);
    Ok(())
}

/// Cancels the build on Ctrl-C; resources are still cleaned up
fn spawn_interrupt_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("Interrupt received, cancelling the build");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for interrupts: {}", e),
            },
            _ = cancel.cancelled() => {}
        }
    });
}

pub async fn handle_validate(args: &ValidateArgs) -> i32 {
    match BuildConfig::load(&args.config) {
        Ok(config) => {
            println!("{}", config);
            println!("Configuration is valid.");
            0
        }
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!(
                "Configuration error in {}: {}",
                args.config.display(),
                e
            );
            1
        }
    }
}
