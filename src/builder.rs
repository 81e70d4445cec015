//! Assembles the step pipeline for a [`BuildConfig`] and runs it

use crate::artifact::Artifact;
use crate::cloud::CloudClients;
use crate::config::{BuildConfig, CommunicatorKind};
use crate::error::BuildError;
use crate::pipeline::steps::{
    CaptureStep, ConnectStep, ImageImportStep, InstanceCreateStep, NetworkStep, PrepareStep,
    ProvisionStep,
};
use crate::pipeline::{BuildState, PipelineRunner, Step};
use crate::progress::ProgressHandler;
use crate::provision::{Communicator, ProvisionHook, ShellHook, TcpCommunicator};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Identifier stamped on every artifact
pub const BUILDER_ID: &str = "powervs.builder";

/// Collaborators a build runs against
#[derive(Clone)]
pub struct BuildEnvironment {
    pub clients: CloudClients,
    pub ui: Arc<dyn ProgressHandler>,
    pub communicator: Arc<dyn Communicator>,
    pub hook: Arc<dyn ProvisionHook>,
    pub cancel: CancellationToken,
}

impl BuildEnvironment {
    /// TCP reachability probing and shell provisioning as configured
    pub fn for_config(
        config: &BuildConfig,
        clients: CloudClients,
        ui: Arc<dyn ProgressHandler>,
    ) -> Self {
        Self {
            clients,
            ui,
            communicator: Arc::new(TcpCommunicator::new(Duration::from_secs(
                config.communicator.timeout_secs,
            ))),
            hook: Arc::new(ShellHook::new(config.provision.commands.clone())),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_communicator(mut self, communicator: Arc<dyn Communicator>) -> Self {
        self.communicator = communicator;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn ProvisionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for BuildEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildEnvironment")
            .field("clients", &self.clients)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub struct Builder {
    config: BuildConfig,
}

impl Builder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Steps in execution order; remote access steps are left out when the
    /// communicator is disabled
    pub fn steps(&self, env: &BuildEnvironment) -> Vec<Box<dyn Step>> {
        let config = &self.config;
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(ImageImportStep::new(config.source.clone())),
            Box::new(NetworkStep::new(config.network.clone())),
            Box::new(InstanceCreateStep::new(config.instance.clone())),
        ];

        if config.communicator.kind != CommunicatorKind::None {
            let port = config.communicator.port;
            steps.push(Box::new(ConnectStep::new(env.communicator.clone(), port)));
            steps.push(Box::new(ProvisionStep::new(env.hook.clone(), port)));
        }

        steps.push(Box::new(PrepareStep));
        steps.push(Box::new(CaptureStep::new(config.capture.clone())));
        steps
    }

    /// Runs the pipeline and returns the artifact, or the error that halted it
    pub async fn run(&self, env: BuildEnvironment) -> Result<Artifact, BuildError> {
        let mut runner = PipelineRunner::new(self.steps(&env), self.config.pipeline_config());
        let mut state = BuildState::new(env.clients, env.ui, env.cancel);

        info!(
            "Building image '{}' with steps: {}",
            self.config.capture.name,
            runner.step_names().join(", ")
        );
        let summary = runner.run(&mut state).await;
        info!(
            "Pipeline finished in {:.1}s, cleaned up {} step(s)",
            summary.duration.as_secs_f64(),
            summary.cleaned.len()
        );

        if let Some(error) = state.error.take() {
            return Err(error);
        }

        Ok(Artifact {
            builder_id: BUILDER_ID.to_string(),
            capture_name: self.config.capture.name.clone(),
            destination: self.config.capture.destination,
            capture_job_id: state.capture_job.as_ref().map(|job| job.id.clone()),
            instance_id: state
                .instance
                .as_ref()
                .map(|instance| instance.pvm_instance_id.clone()),
            source_image: state.source_image.as_ref().map(|image| image.name.clone()),
            created_at: Utc::now(),
            generated_data: state.generated_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloud;
    use crate::progress::NoOpHandler;

    const CONFIG: &str = r#"
[access]
api_key = "key"
zone = "dal10"
service_instance_id = "sid"

[instance]
name = "builder-vm"

[source]
name = "centos-stream"

[capture]
name = "golden"
destination = "image-catalog"
"#;

    fn environment(config: &BuildConfig) -> BuildEnvironment {
        BuildEnvironment::for_config(
            config,
            CloudClients::from_shared(Arc::new(MockCloud::new())),
            Arc::new(NoOpHandler),
        )
    }

    #[test]
    fn test_steps_with_ssh_communicator() {
        let config = BuildConfig::from_toml_str(CONFIG).unwrap();
        let builder = Builder::new(config.clone());
        let names: Vec<_> = builder
            .steps(&environment(&config))
            .iter()
            .map(|step| step.name())
            .collect();

        assert_eq!(
            names,
            vec![
                "image-import",
                "network",
                "instance-create",
                "connect",
                "provision",
                "prepare",
                "capture"
            ]
        );
    }

    #[test]
    fn test_steps_without_communicator() {
        let mut config = BuildConfig::from_toml_str(CONFIG).unwrap();
        config.communicator.kind = CommunicatorKind::None;
        let builder = Builder::new(config.clone());
        let names: Vec<_> = builder
            .steps(&environment(&config))
            .iter()
            .map(|step| step.name())
            .collect();

        assert!(!names.contains(&"connect"));
        assert!(!names.contains(&"provision"));
        assert_eq!(names.last(), Some(&"capture"));
    }
}
