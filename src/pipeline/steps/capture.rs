use super::wait_for_job;
use crate::cloud::InstanceCapture;
use crate::config::CaptureSettings;
use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::PollPolicy;
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{Step, StepAction};
use async_trait::async_trait;
use std::time::Duration;

pub const CAPTURE_JOB_POLL: PollPolicy = PollPolicy::new(
    "image capture job",
    Duration::from_secs(5 * 60),
    Duration::from_secs(60 * 60),
);

/// Captures the stopped instance into the image catalog and/or COS
pub struct CaptureStep {
    settings: CaptureSettings,
}

impl CaptureStep {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }

    fn request(&self) -> InstanceCapture {
        let cos = self.settings.cos.as_ref();
        InstanceCapture {
            capture_destination: self.settings.destination.as_str().to_string(),
            capture_name: self.settings.name.clone(),
            cloud_storage_access_key: cos.map(|cos| cos.access_key.clone()),
            cloud_storage_image_path: cos.map(|cos| cos.bucket.clone()),
            cloud_storage_region: cos.map(|cos| cos.region.clone()),
            cloud_storage_secret_key: cos.map(|cos| cos.secret_key.clone()),
        }
    }

    async fn execute(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        state.ui.say("Capturing the instance");
        let id = state.instance()?.pvm_instance_id.clone();
        let instances = &*state.clients.instance;

        let instance = instances.get_instance(&id).await.during("fetch instance")?;
        let job = instances
            .capture_instance(&id, &self.request())
            .await
            .during("capture instance")?;
        state.ui.message(&format!(
            "Capturing {} as {} ({}), job ID: {}",
            instance.server_name, self.settings.name, self.settings.destination, job.id
        ));

        state.record("CaptureJobID", job.id.clone());
        state.capture_job = Some(job.clone());
        wait_for_job(state, &job.id, &CAPTURE_JOB_POLL).await?;

        state
            .ui
            .message(&format!("Image {} captured", self.settings.name));
        Ok(())
    }
}

#[async_trait]
impl Step for CaptureStep {
    fn name(&self) -> &'static str {
        "capture"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        state.finish(result)
    }
}
