use crate::cloud::{InstanceAction, INSTANCE_STATUS_SHUTOFF};
use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::{poll_until, PollPolicy};
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{Step, StepAction};
use async_trait::async_trait;
use std::time::Duration;

pub const SHUTOFF_POLL: PollPolicy = PollPolicy::new(
    "instance shutdown",
    Duration::from_secs(2 * 60),
    Duration::from_secs(6 * 60),
);

/// Stops the instance so it can be captured
#[derive(Debug, Default)]
pub struct PrepareStep;

impl PrepareStep {
    async fn execute(&self, state: &BuildState) -> Result<(), BuildError> {
        let instances = &*state.clients.instance;
        let ui = &*state.ui;
        let instance = state.instance()?;
        let id = instance.pvm_instance_id.as_str();

        ui.say("Stopping the instance");
        instances
            .instance_action(id, &InstanceAction::stop())
            .await
            .during("stop instance")?;

        poll_until(&SHUTOFF_POLL, &state.cancel, move || async move {
            let current = instances.get_instance(id).await.during("fetch instance")?;
            ui.message(&format!("Instance status: {}", current.status));
            Ok(current.status == INSTANCE_STATUS_SHUTOFF)
        })
        .await?;

        ui.message(&format!("Instance {} is stopped", instance.server_name));
        Ok(())
    }
}

#[async_trait]
impl Step for PrepareStep {
    fn name(&self) -> &'static str {
        "prepare"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        state.finish(result)
    }
}
