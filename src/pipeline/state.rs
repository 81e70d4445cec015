//! Typed state shared by the steps of one pipeline run

use super::config::DEFAULT_CLEANUP_TIMEOUT;
use super::step::StepAction;
use crate::cloud::{CloudClients, ImageReference, JobReference, Network, PvmInstance};
use crate::error::BuildError;
use crate::progress::ProgressHandler;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// State owned by a single pipeline run
///
/// The handles are seeded by the builder; the optional fields are filled in
/// by the steps in execution order:
///
/// | field | written by |
/// |---|---|
/// | `source_image` | image import |
/// | `network`, `networks`, `dhcp_server_id` | network |
/// | `instance` | instance creation |
/// | `ssh_host` | connect |
/// | `capture_job` | capture |
pub struct BuildState {
    pub clients: CloudClients,
    pub ui: Arc<dyn ProgressHandler>,
    pub cancel: CancellationToken,

    pub source_image: Option<ImageReference>,
    pub network: Option<Network>,
    /// Subnets to attach instead of `network` when the operator supplied several
    pub networks: Option<Vec<String>>,
    pub dhcp_server_id: Option<String>,
    pub instance: Option<PvmInstance>,
    pub ssh_host: Option<String>,
    pub capture_job: Option<JobReference>,

    /// Values exposed to provisioners and the final artifact
    pub generated_data: BTreeMap<String, String>,
    /// Set by the step that halted the pipeline
    pub error: Option<BuildError>,
    /// Bound on each deletion wait while unwinding
    pub cleanup_timeout: Duration,
}

impl BuildState {
    pub fn new(
        clients: CloudClients,
        ui: Arc<dyn ProgressHandler>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            clients,
            ui,
            cancel,
            source_image: None,
            network: None,
            networks: None,
            dhcp_server_id: None,
            instance: None,
            ssh_host: None,
            capture_job: None,
            generated_data: BTreeMap::new(),
            error: None,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    pub fn source_image(&self) -> Result<&ImageReference, BuildError> {
        self.source_image
            .as_ref()
            .ok_or(BuildError::MissingState("source_image"))
    }

    pub fn network(&self) -> Result<&Network, BuildError> {
        self.network
            .as_ref()
            .ok_or(BuildError::MissingState("network"))
    }

    pub fn instance(&self) -> Result<&PvmInstance, BuildError> {
        self.instance
            .as_ref()
            .ok_or(BuildError::MissingState("instance"))
    }

    pub fn ssh_host(&self) -> Result<&str, BuildError> {
        self.ssh_host
            .as_deref()
            .ok_or(BuildError::MissingState("ssh_host"))
    }

    /// Network ids a new instance should attach to; an explicit subnet list wins
    pub fn attach_network_ids(&self) -> Result<Vec<String>, BuildError> {
        match &self.networks {
            Some(ids) if !ids.is_empty() => Ok(ids.clone()),
            _ => Ok(vec![self.network()?.network_id.clone()]),
        }
    }

    pub fn record(&mut self, key: &str, value: impl Into<String>) {
        self.generated_data.insert(key.to_string(), value.into());
    }

    pub fn is_halted(&self) -> bool {
        self.error.is_some()
    }

    /// Reports the error to the UI and stores it for the builder
    pub fn halt(&mut self, error: BuildError) -> StepAction {
        self.ui.error(&error.to_string());
        self.error = Some(error);
        StepAction::Halt
    }

    pub fn finish(&mut self, result: Result<(), BuildError>) -> StepAction {
        match result {
            Ok(()) => StepAction::Continue,
            Err(error) => self.halt(error),
        }
    }
}

impl std::fmt::Debug for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildState")
            .field("source_image", &self.source_image)
            .field("network", &self.network)
            .field("networks", &self.networks)
            .field("dhcp_server_id", &self.dhcp_server_id)
            .field("instance", &self.instance)
            .field("ssh_host", &self.ssh_host)
            .field("capture_job", &self.capture_job)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloud;
    use crate::progress::RecordingHandler;

    fn empty_state() -> (BuildState, Arc<RecordingHandler>) {
        let ui = Arc::new(RecordingHandler::new());
        let state = BuildState::new(
            CloudClients::from_shared(Arc::new(MockCloud::new())),
            ui.clone(),
            CancellationToken::new(),
        );
        (state, ui)
    }

    #[test]
    fn test_missing_state_is_reported_by_name() {
        let (state, _) = empty_state();
        match state.instance() {
            Err(BuildError::MissingState(key)) => assert_eq!(key, "instance"),
            other => panic!("Expected MissingState, got {:?}", other),
        }
    }

    #[test]
    fn test_subnet_list_wins_over_single_network() {
        let (mut state, _) = empty_state();
        state.network = Some(Network {
            network_id: "net-1".to_string(),
            name: "net".to_string(),
            network_type: None,
            cidr: None,
        });
        assert_eq!(state.attach_network_ids().unwrap(), vec!["net-1"]);

        state.networks = Some(vec!["subnet-a".to_string(), "subnet-b".to_string()]);
        assert_eq!(
            state.attach_network_ids().unwrap(),
            vec!["subnet-a", "subnet-b"]
        );
    }

    #[test]
    fn test_halt_stores_error_and_reports_it() {
        let (mut state, ui) = empty_state();
        let action = state.halt(BuildError::EmptyInstanceList);

        assert_eq!(action, StepAction::Halt);
        assert!(state.is_halted());
        assert_eq!(
            ui.errors(),
            vec!["instance creation returned an empty id list".to_string()]
        );
    }
}
