use crate::error::BuildError;
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{Step, StepAction};
use crate::provision::{ProvisionHook, ProvisionTarget};
use async_trait::async_trait;
use std::sync::Arc;

/// Hands the connected instance to the provisioning hook
pub struct ProvisionStep {
    hook: Arc<dyn ProvisionHook>,
    port: u16,
}

impl ProvisionStep {
    pub fn new(hook: Arc<dyn ProvisionHook>, port: u16) -> Self {
        Self { hook, port }
    }

    async fn execute(&self, state: &BuildState) -> Result<(), BuildError> {
        state.ui.say("Provisioning the instance");
        let target = ProvisionTarget {
            host: state.ssh_host()?.to_string(),
            port: self.port,
            instance_id: state.instance()?.pvm_instance_id.clone(),
        };
        self.hook
            .provision(&target, state.ui.as_ref(), &state.cancel)
            .await
    }
}

#[async_trait]
impl Step for ProvisionStep {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        state.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::*;
    use crate::cloud::PvmInstance;
    use crate::provision::ShellHook;

    #[tokio::test]
    async fn test_hook_receives_target() {
        let mut h = harness();
        h.state.ssh_host = Some("10.0.0.5".to_string());
        h.state.instance = Some(PvmInstance {
            pvm_instance_id: "instance-7".to_string(),
            server_name: "builder".to_string(),
            status: "ACTIVE".to_string(),
            networks: Vec::new(),
        });
        let hook = ShellHook::new(vec!["echo $POWERVS_HOST:$POWERVS_PORT".to_string()]);
        let mut step = ProvisionStep::new(Arc::new(hook), 2222);

        assert_eq!(step.run(&mut h.state).await, StepAction::Continue);
        assert!(h.ui.lines().contains(&"10.0.0.5:2222".to_string()));
    }

    #[tokio::test]
    async fn test_requires_connected_host() {
        let mut h = harness();
        let mut step = ProvisionStep::new(Arc::new(ShellHook::default()), 22);

        assert_eq!(step.run(&mut h.state).await, StepAction::Halt);
        assert!(matches!(
            h.state.error,
            Some(BuildError::MissingState("ssh_host"))
        ));
    }
}
