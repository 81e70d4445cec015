use super::state::BuildState;
use crate::error::BuildError;
use async_trait::async_trait;

/// Outcome of a step's run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    Halt,
}

/// What a step knows about the remote resource it is responsible for
///
/// Only `Submitted` and `Created` resources are deleted on cleanup; a
/// `Reused` resource belongs to the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResourceState {
    #[default]
    NotStarted,
    Reused { id: String },
    /// The service accepted a creation request but the id is not known yet
    Submitted { name: String },
    Created { id: String },
    Failed,
}

impl ResourceState {
    pub fn needs_cleanup(&self) -> bool {
        matches!(
            self,
            ResourceState::Submitted { .. } | ResourceState::Created { .. }
        )
    }

    /// Records a failed run unless something was already created
    pub fn mark_failed(&mut self) {
        if *self == ResourceState::NotStarted {
            *self = ResourceState::Failed;
        }
    }
}

/// A unit of provisioning work with a compensating cleanup
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Performs the step. A `Halt` must leave an error in `state.error`.
    async fn run(&mut self, state: &mut BuildState) -> StepAction;

    /// Undoes whatever `run` created. Called in reverse order while unwinding.
    async fn cleanup(&mut self, _state: &BuildState) -> Result<(), BuildError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_owned_resources_need_cleanup() {
        assert!(!ResourceState::NotStarted.needs_cleanup());
        assert!(!ResourceState::Failed.needs_cleanup());
        assert!(!ResourceState::Reused {
            id: "subnet-1".to_string()
        }
        .needs_cleanup());
        assert!(ResourceState::Created {
            id: "network-1".to_string()
        }
        .needs_cleanup());
        assert!(ResourceState::Submitted {
            name: "image".to_string()
        }
        .needs_cleanup());
    }

    #[test]
    fn test_mark_failed_keeps_created() {
        let mut state = ResourceState::Created {
            id: "instance-1".to_string(),
        };
        state.mark_failed();
        assert!(state.needs_cleanup());

        let mut state = ResourceState::NotStarted;
        state.mark_failed();
        assert_eq!(state, ResourceState::Failed);
    }
}
