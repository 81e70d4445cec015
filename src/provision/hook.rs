use crate::error::BuildError;
use crate::progress::ProgressHandler;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Where provisioning should be pointed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionTarget {
    pub host: String,
    pub port: u16,
    pub instance_id: String,
}

/// Customises the running instance before it is captured
#[async_trait]
pub trait ProvisionHook: Send + Sync {
    async fn provision(
        &self,
        target: &ProvisionTarget,
        ui: &dyn ProgressHandler,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl ProvisionHook for NoopHook {
    async fn provision(
        &self,
        _target: &ProvisionTarget,
        _ui: &dyn ProgressHandler,
        _cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        Ok(())
    }
}

/// Runs local shell commands that reach the instance through the exported
/// `POWERVS_HOST`, `POWERVS_PORT` and `POWERVS_INSTANCE_ID` variables
#[derive(Debug, Clone, Default)]
pub struct ShellHook {
    commands: Vec<String>,
}

impl ShellHook {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    async fn run_command(
        &self,
        command: &str,
        target: &ProvisionTarget,
        ui: &dyn ProgressHandler,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        ui.message(&format!("Running: {}", command));
        info!("Provisioning command: {}", command);

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("POWERVS_HOST", &target.host)
            .env("POWERVS_PORT", target.port.to_string())
            .env("POWERVS_INSTANCE_ID", &target.instance_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Provision(format!("failed to spawn `{}`: {}", command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BuildError::Provision("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BuildError::Provision("stderr was not captured".to_string()))?;
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        while !(out_done && err_done) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BuildError::Cancelled),
                line = out.next_line(), if !out_done => match line {
                    Ok(Some(line)) => ui.message(&line),
                    _ => out_done = true,
                },
                line = err.next_line(), if !err_done => match line {
                    Ok(Some(line)) => ui.message(&line),
                    _ => err_done = true,
                },
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
            status = child.wait() => status
                .map_err(|e| BuildError::Provision(format!("failed to wait for `{}`: {}", command, e)))?,
        };
        if !status.success() {
            return Err(BuildError::Provision(format!(
                "command `{}` exited with {}",
                command, status
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionHook for ShellHook {
    async fn provision(
        &self,
        target: &ProvisionTarget,
        ui: &dyn ProgressHandler,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        for command in &self.commands {
            self.run_command(command, target, ui, cancel).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RecordingHandler;

    fn target() -> ProvisionTarget {
        ProvisionTarget {
            host: "169.48.0.7".to_string(),
            port: 22,
            instance_id: "instance-3".to_string(),
        }
    }

    #[tokio::test]
    async fn test_shell_hook_exports_target_and_streams_output() {
        let ui = RecordingHandler::new();
        let hook = ShellHook::new(vec![
            "echo host=$POWERVS_HOST port=$POWERVS_PORT".to_string(),
            "echo id=$POWERVS_INSTANCE_ID".to_string(),
        ]);

        hook.provision(&target(), &ui, &CancellationToken::new())
            .await
            .unwrap();

        let lines = ui.lines();
        assert!(lines.contains(&"host=169.48.0.7 port=22".to_string()));
        assert!(lines.contains(&"id=instance-3".to_string()));
    }

    #[tokio::test]
    async fn test_shell_hook_stops_at_failing_command() {
        let ui = RecordingHandler::new();
        let hook = ShellHook::new(vec![
            "echo first".to_string(),
            "exit 3".to_string(),
            "echo never".to_string(),
        ]);

        let err = hook
            .provision(&target(), &ui, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Provision(ref msg) if msg.contains("exit 3")));
        assert!(!ui.lines().contains(&"never".to_string()));
    }

    #[tokio::test]
    async fn test_noop_hook() {
        let ui = RecordingHandler::new();
        assert!(NoopHook
            .provision(&target(), &ui, &CancellationToken::new())
            .await
            .is_ok());
        assert!(ui.events().is_empty());
    }
}
