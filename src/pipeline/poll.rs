//! Bounded polling of remote state
//!
//! Every step that waits on the service (jobs, image activation, shutdown,
//! DHCP attachment, instance visibility, deletion) goes through this module.
//! The condition is checked immediately, then once per interval until it
//! reports done, returns an error, the deadline passes, or the build is
//! cancelled. The last check is clamped to the deadline, so a wait never
//! overruns its timeout by more than one condition call.

use crate::error::BuildError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How often to poll and how long to wait before giving up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// What is being waited for, used in timeout errors
    pub operation: &'static str,
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(operation: &'static str, interval: Duration, timeout: Duration) -> Self {
        Self {
            operation,
            interval,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Polls until `condition` yields a value
///
/// `Ok(None)` means "not yet"; any `Err` stops polling immediately and is
/// returned unchanged.
pub async fn poll_for<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut condition: F,
) -> Result<T, BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, BuildError>>,
{
    let deadline = Instant::now() + policy.timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        if let Some(value) = condition().await? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BuildError::timeout(policy.operation, policy.timeout));
        }

        let wake = (now + policy.interval).min(deadline);
        tokio::select! {
            _ = cancel.cancelled() => return Err(BuildError::Cancelled),
            _ = sleep_until(wake) => {}
        }
    }
}

/// Polls until `condition` reports `true`
pub async fn poll_until<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut condition: F,
) -> Result<(), BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, BuildError>>,
{
    poll_for(policy, cancel, || {
        let check = condition();
        async move { Ok(check.await?.then_some(())) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ApiError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const POLICY: PollPolicy =
        PollPolicy::new("test condition", Duration::from_secs(10), Duration::from_secs(35));

    #[tokio::test(start_paused = true)]
    async fn test_done_immediately_does_not_wait() {
        let start = Instant::now();
        let result = poll_until(&POLICY, &CancellationToken::new(), || async { Ok(true) }).await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_done() {
        let checks = AtomicUsize::new(0);
        let start = Instant::now();

        let result = poll_until(&POLICY, &CancellationToken::new(), || {
            let n = checks.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(n == 3) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_error_stops_retrying() {
        let checks = AtomicUsize::new(0);

        let result = poll_until(&POLICY, &CancellationToken::new(), || {
            let n = checks.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    Err(BuildError::Api {
                        operation: "fetch job",
                        source: ApiError::Transport("connection reset".to_string()),
                    })
                } else {
                    Ok(false)
                }
            }
        })
        .await;

        assert!(matches!(result, Err(BuildError::Api { .. })));
        assert_eq!(checks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_bounded() {
        let checks = AtomicUsize::new(0);
        let start = Instant::now();

        let result = poll_until(&POLICY, &CancellationToken::new(), || {
            checks.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        })
        .await;

        match result {
            Err(BuildError::Timeout { operation, after }) => {
                assert_eq!(operation, "test condition");
                assert_eq!(after, Duration::from_secs(35));
            }
            other => panic!("Expected timeout, got {:?}", other),
        }
        assert!(start.elapsed() <= POLICY.timeout + POLICY.interval);
        // checks at 0, 10, 20, 30 and the clamped one at 35
        assert_eq!(checks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let result = poll_until(&POLICY, &cancel, || async { Ok(false) }).await;

        assert!(matches!(result, Err(BuildError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_for_returns_value() {
        let checks = AtomicUsize::new(0);
        let value = poll_for(&POLICY, &CancellationToken::new(), || {
            let n = checks.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n == 1).then(|| "10.0.0.7".to_string())) }
        })
        .await
        .unwrap();

        assert_eq!(value, "10.0.0.7");
    }
}
