use super::{cleanup_failed, wait_until_gone};
use crate::cloud::{InstanceCreate, InstanceNetworkRef};
use crate::config::InstanceSettings;
use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::{poll_for, PollPolicy};
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{ResourceState, Step, StepAction};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::time::Duration;

pub const INSTANCE_VISIBLE_POLL: PollPolicy = PollPolicy::new(
    "instance to become available",
    Duration::from_secs(30),
    Duration::from_secs(5 * 60),
);

/// Creates the build instance from the resolved image on the build network
pub struct InstanceCreateStep {
    settings: InstanceSettings,
    instance: ResourceState,
    /// Further instances the service started for the same request
    extra_instances: Vec<String>,
}

impl InstanceCreateStep {
    pub fn new(settings: InstanceSettings) -> Self {
        Self {
            settings,
            instance: ResourceState::NotStarted,
            extra_instances: Vec::new(),
        }
    }

    pub fn resource(&self) -> &ResourceState {
        &self.instance
    }

    fn request(&self, state: &BuildState) -> Result<InstanceCreate, BuildError> {
        let image = state.source_image()?;
        let networks = state
            .attach_network_ids()?
            .into_iter()
            .map(|network_id| InstanceNetworkRef { network_id })
            .collect();

        Ok(InstanceCreate {
            image_id: image.image_id.clone(),
            key_pair_name: self.settings.key_pair_name.clone(),
            memory: self.settings.memory,
            networks,
            proc_type: self.settings.proc_type.clone(),
            processors: self.settings.processors,
            server_name: self.settings.name.clone(),
            storage_type: image.storage_type.clone(),
            user_data: self
                .settings
                .user_data
                .as_ref()
                .map(|data| STANDARD.encode(data)),
        })
    }

    async fn execute(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        state.ui.say("Creating the instance");
        let body = self.request(state)?;

        let instances = &*state.clients.instance;
        let ui = &*state.ui;
        let handles = instances
            .create_instance(&body)
            .await
            .during("create instance")?;
        let mut ids = handles
            .into_iter()
            .map(|handle| handle.pvm_instance_id)
            .filter(|id| !id.is_empty());
        let id = ids.next().ok_or(BuildError::EmptyInstanceList)?;
        self.instance = ResourceState::Created { id: id.clone() };
        self.extra_instances = ids.collect();
        ui.message(&format!("Instance {} submitted, ID: {}", body.server_name, id));
        if !self.extra_instances.is_empty() {
            ui.message(&format!(
                "Service started {} additional instance(s), they are removed on cleanup: {}",
                self.extra_instances.len(),
                self.extra_instances.join(", ")
            ));
        }

        let target = id.as_str();
        let instance = poll_for(&INSTANCE_VISIBLE_POLL, &state.cancel, move || async move {
            match instances.get_instance(target).await {
                Ok(instance) if !instance.pvm_instance_id.is_empty() => Ok(Some(instance)),
                Ok(_) => {
                    ui.message("Instance returned an empty ID, retrying");
                    Ok(None)
                }
                Err(err) if err.is_not_found() => {
                    ui.message("Instance is not available yet, retrying");
                    Ok(None)
                }
                Err(source) => Err(BuildError::Api {
                    operation: "fetch instance",
                    source,
                }),
            }
        })
        .await?;
        ui.message(&format!(
            "Instance {} is available, status: {}",
            instance.server_name, instance.status
        ));

        state.record("InstanceID", instance.pvm_instance_id.clone());
        state.record("InstanceName", instance.server_name.clone());
        state.instance = Some(instance);
        Ok(())
    }
}

#[async_trait]
impl Step for InstanceCreateStep {
    fn name(&self) -> &'static str {
        "instance-create"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        if result.is_err() {
            self.instance.mark_failed();
        }
        state.finish(result)
    }

    async fn cleanup(&mut self, state: &BuildState) -> Result<(), BuildError> {
        let ResourceState::Created { id } = &self.instance else {
            return Ok(());
        };

        state.ui.say("Deleting the instance");
        let mut result = delete_instance(state, id, &self.settings.name).await;
        for extra in &self.extra_instances {
            let deleted = delete_instance(state, extra, extra).await;
            result = result.and(deleted);
        }
        result
    }
}

async fn delete_instance(state: &BuildState, id: &str, name: &str) -> Result<(), BuildError> {
    let ui = &*state.ui;
    let instances = &*state.clients.instance;

    match instances.delete_instance(id).await {
        Err(err) if err.is_not_found() => return Ok(()),
        Err(source) => {
            let err = BuildError::Api {
                operation: "delete instance",
                source,
            };
            return Err(cleanup_failed(ui, "instance", name, err));
        }
        Ok(()) => {}
    }

    wait_until_gone(
        ui,
        "instance deletion",
        "instance",
        state.cleanup_timeout,
        move || async move {
            instances
                .get_instance(id)
                .await
                .map(|instance| instance.status)
        },
    )
    .await
    .map_err(|err| cleanup_failed(ui, "instance", name, err))?;

    ui.message(&format!("Instance {} deleted", id));
    Ok(())
}
