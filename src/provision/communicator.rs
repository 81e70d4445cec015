use crate::error::BuildError;
use crate::pipeline::poll::{poll_until, PollPolicy};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Establishes remote access to a discovered host
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Waits until `host:port` accepts connections
    async fn connect(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError>;
}

/// Probes the endpoint with plain TCP connects until one succeeds
#[derive(Debug, Clone)]
pub struct TcpCommunicator {
    timeout: Duration,
    interval: Duration,
}

impl TcpCommunicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: PROBE_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl Communicator for TcpCommunicator {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        let policy = PollPolicy::new("communicator connection", self.interval, self.timeout);
        let attempt = self.interval;

        poll_until(&policy, cancel, move || async move {
            match tokio::time::timeout(attempt, TcpStream::connect((host, port))).await {
                Ok(Ok(_)) => Ok(true),
                Ok(Err(err)) => {
                    debug!("Connection to {}:{} failed: {}", host, port, err);
                    Ok(false)
                }
                Err(_) => {
                    debug!("Connection to {}:{} timed out", host, port);
                    Ok(false)
                }
            }
        })
        .await
    }
}
