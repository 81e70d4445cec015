//! Concrete provisioning steps, in the order the builder runs them

mod capture;
mod connect;
mod image;
mod instance;
mod network;
mod prepare;
mod provision;

pub use capture::{CaptureStep, CAPTURE_JOB_POLL};
pub use connect::{ConnectStep, HOST_DISCOVERY_POLL};
pub use image::{generated_image_name, ImageImportStep, IMPORT_JOB_POLL, STOCK_IMAGE_POLL};
pub use instance::{InstanceCreateStep, INSTANCE_VISIBLE_POLL};
pub use network::{NetworkStep, DHCP_NETWORK_POLL};
pub use prepare::{PrepareStep, SHUTOFF_POLL};
pub use provision::ProvisionStep;

use super::poll::{poll_until, PollPolicy};
use super::state::BuildState;
use crate::cloud::{ApiError, JobState};
use crate::error::{ApiResultExt, BuildError};
use crate::progress::ProgressHandler;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Interval between checks while waiting for a deleted resource to disappear
pub const CLEANUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Waits for a remote job to complete, streaming its status to the UI
pub(crate) async fn wait_for_job(
    state: &BuildState,
    job_id: &str,
    policy: &PollPolicy,
) -> Result<(), BuildError> {
    let jobs = &*state.clients.job;
    let ui = &*state.ui;

    poll_until(policy, &state.cancel, move || async move {
        let job = jobs.get_job(job_id).await.during("fetch job")?;
        ui.message(&job.status.summary());

        match job.status.job_state() {
            JobState::Completed => Ok(true),
            JobState::Failed => Err(BuildError::RemoteFailed {
                resource: "job",
                id: job_id.to_string(),
                message: job
                    .status
                    .message
                    .unwrap_or_else(|| "no message from the service".to_string()),
            }),
            JobState::InProgress(_) => {
                ui.message(&format!("Sleeping for {}s", policy.interval.as_secs()));
                Ok(false)
            }
        }
    })
    .await
}

/// Waits until `fetch` reports the resource as gone
///
/// `fetch` returns the resource's current state; `NotFound` ends the wait.
/// Runs on its own token so an interrupted build still finishes unwinding.
pub(crate) async fn wait_until_gone<F, Fut>(
    ui: &dyn ProgressHandler,
    operation: &'static str,
    resource: &str,
    timeout: Duration,
    mut fetch: F,
) -> Result<(), BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, ApiError>>,
{
    let policy = PollPolicy::new(operation, CLEANUP_POLL_INTERVAL, timeout);
    poll_until(&policy, &CancellationToken::new(), move || {
        let check = fetch();
        async move {
            match check.await {
                Err(err) if err.is_not_found() => Ok(true),
                Err(source) => Err(BuildError::Api { operation, source }),
                Ok(status) => {
                    ui.message(&format!("{} still exists, state: {}", resource, status));
                    Ok(false)
                }
            }
        }
    })
    .await
}

/// Reports a failed cleanup so the operator can remove the leftover by hand
pub(crate) fn cleanup_failed(
    ui: &dyn ProgressHandler,
    what: &str,
    name: &str,
    err: BuildError,
) -> BuildError {
    ui.error(&format!(
        "Error cleaning up {}. Please delete the {} manually: {} ({})",
        what, what, name, err
    ));
    err
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::cloud::{CloudClients, MockCloud};
    use crate::progress::RecordingHandler;
    use std::sync::Arc;

    pub(crate) struct Harness {
        pub cloud: Arc<MockCloud>,
        pub ui: Arc<RecordingHandler>,
        pub state: BuildState,
    }

    pub(crate) fn harness() -> Harness {
        let cloud = Arc::new(MockCloud::new());
        let ui = Arc::new(RecordingHandler::new());
        let state = BuildState::new(
            CloudClients::from_shared(cloud.clone()),
            ui.clone(),
            CancellationToken::new(),
        );
        Harness { cloud, ui, state }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::cloud::{CosImageImport, ImageApi};

    const JOB_POLL: PollPolicy =
        PollPolicy::new("test job", Duration::from_secs(60), Duration::from_secs(600));

    async fn submit_job(h: &super::test_support::Harness) -> String {
        h.cloud
            .import_cos_image(&CosImageImport {
                image_name: "rhel".to_string(),
                bucket_name: "images".to_string(),
                bucket_access: "public".to_string(),
                region: "us-south".to_string(),
                image_filename: "rhel.ova.gz".to_string(),
                storage_type: "tier1".to_string(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_completes_after_pending_states() {
        let h = harness();
        h.cloud.push_job_states(&["pending", "pending", "completed"]);
        let job_id = submit_job(&h).await;

        wait_for_job(&h.state, &job_id, &JOB_POLL).await.unwrap();

        assert_eq!(h.cloud.call_count("job.get"), 3);
        assert!(h
            .ui
            .lines()
            .iter()
            .any(|line| line.starts_with("Job state: pending")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_failure_halts_on_observing_poll() {
        let h = harness();
        h.cloud.push_job_states(&["pending", "failed"]);
        let job_id = submit_job(&h).await;

        let err = wait_for_job(&h.state, &job_id, &JOB_POLL).await.unwrap_err();

        assert!(matches!(err, BuildError::RemoteFailed { resource: "job", .. }));
        assert_eq!(h.cloud.call_count("job.get"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gone_tolerates_lingering_resource() {
        let h = harness();
        let polls = std::sync::atomic::AtomicUsize::new(0);

        wait_until_gone(
            h.ui.as_ref(),
            "image deletion",
            "image",
            Duration::from_secs(60),
            || {
                let n = polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Ok("deleting".to_string())
                    } else {
                        Err(ApiError::not_found("image", "image-1"))
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(h.ui.lines(), vec!["image still exists, state: deleting"; 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_gone_is_bounded() {
        let h = harness();
        let err = wait_until_gone(
            h.ui.as_ref(),
            "instance deletion",
            "instance",
            Duration::from_secs(30),
            || async { Ok("DELETING".to_string()) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BuildError::Timeout { .. }));
    }
}
