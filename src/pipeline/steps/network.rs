use super::cleanup_failed;
use crate::cloud::{DhcpServerCreate, NetworkCreate, NETWORK_TYPE_PUBLIC_VLAN};
use crate::config::{ConfigError, NetworkSettings};
use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::{poll_for, PollPolicy};
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{ResourceState, Step, StepAction};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const DHCP_NETWORK_POLL: PollPolicy = PollPolicy::new(
    "DHCP server network",
    Duration::from_secs(60),
    Duration::from_secs(15 * 60),
);

const PUBLIC_DNS_SERVERS: [&str; 2] = ["8.8.8.8", "9.9.9.9"];
const DHCP_DNS_SERVER: &str = "8.8.8.8";

/// Which kind of network the step owns once it has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetworkMode {
    Subnet,
    Dhcp,
    PublicVlan,
}

/// Provides the network the build instance attaches to
pub struct NetworkStep {
    settings: NetworkSettings,
    mode: NetworkMode,
    network: ResourceState,
}

impl NetworkStep {
    pub fn new(settings: NetworkSettings) -> Self {
        let mode = if settings.subnet_id.is_some() || !settings.subnet_ids.is_empty() {
            NetworkMode::Subnet
        } else if settings.dhcp {
            NetworkMode::Dhcp
        } else {
            NetworkMode::PublicVlan
        };
        Self {
            settings,
            mode,
            network: ResourceState::NotStarted,
        }
    }

    pub fn resource(&self) -> &ResourceState {
        &self.network
    }

    async fn reuse_subnets(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        let networks = &*state.clients.network;
        let primary = match (self.settings.subnet_ids.first(), &self.settings.subnet_id) {
            (Some(id), _) | (None, Some(id)) => id.clone(),
            (None, None) => return Err(ConfigError::MissingField("network.subnet_id").into()),
        };

        state
            .ui
            .message(&format!("Using existing subnet {}", primary));
        let network = networks.get_network(&primary).await.during("fetch subnet")?;

        if !self.settings.subnet_ids.is_empty() {
            for id in &self.settings.subnet_ids {
                networks.get_network(id).await.during("fetch subnet")?;
            }
            state.networks = Some(self.settings.subnet_ids.clone());
        }

        self.network = ResourceState::Reused {
            id: network.network_id.clone(),
        };
        state.network = Some(network);
        Ok(())
    }

    async fn create_dhcp(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        let ui = &*state.ui;
        let dhcp = &*state.clients.dhcp;

        ui.message("Creating DHCP server");
        let server = dhcp
            .create_dhcp_server(&DhcpServerCreate {
                cidr: None,
                dns_server: Some(DHCP_DNS_SERVER.to_string()),
                name: None,
            })
            .await
            .during("create DHCP server")?;
        self.network = ResourceState::Created {
            id: server.id.clone(),
        };
        ui.message(&format!("DHCP server created, ID: {}", server.id));

        let server_id = server.id.as_str();
        let network_id = poll_for(&DHCP_NETWORK_POLL, &state.cancel, move || async move {
            let detail = dhcp
                .get_dhcp_server(server_id)
                .await
                .during("fetch DHCP server")?;
            match detail.network {
                Some(network) if !network.id.is_empty() => Ok(Some(network.id)),
                _ => {
                    ui.message("Waiting for the DHCP server network to be attached");
                    Ok(None)
                }
            }
        })
        .await?;

        let network = state
            .clients
            .network
            .get_network(&network_id)
            .await
            .during("fetch DHCP network")?;
        ui.message(&format!(
            "Network attached to DHCP server, Name: {}, ID: {}",
            network.name, network.network_id
        ));

        state.dhcp_server_id = Some(server.id);
        state.network = Some(network);
        Ok(())
    }

    async fn create_public(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        state.ui.message("Creating network");
        let network = state
            .clients
            .network
            .create_network(&NetworkCreate {
                network_type: NETWORK_TYPE_PUBLIC_VLAN.to_string(),
                dns_servers: PUBLIC_DNS_SERVERS.iter().map(|s| s.to_string()).collect(),
                name: None,
            })
            .await
            .during("create network")?;
        state.ui.message(&format!(
            "Network created, Name: {}, ID: {}",
            network.name, network.network_id
        ));

        self.network = ResourceState::Created {
            id: network.network_id.clone(),
        };
        state.network = Some(network);
        Ok(())
    }
}

#[async_trait]
impl Step for NetworkStep {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        state.ui.say("Setting up the network");
        debug!("Network mode: {:?}", self.mode);

        let result = match self.mode {
            NetworkMode::Subnet => self.reuse_subnets(state).await,
            NetworkMode::Dhcp => self.create_dhcp(state).await,
            NetworkMode::PublicVlan => self.create_public(state).await,
        };
        if result.is_err() {
            self.network.mark_failed();
        }
        state.finish(result)
    }

    async fn cleanup(&mut self, state: &BuildState) -> Result<(), BuildError> {
        let ResourceState::Created { id } = &self.network else {
            return Ok(());
        };
        let ui = &*state.ui;

        match self.mode {
            NetworkMode::Dhcp => {
                ui.say("Deleting the DHCP server");
                state
                    .clients
                    .dhcp
                    .delete_dhcp_server(id)
                    .await
                    .during("delete DHCP server")
                    .map_err(|err| cleanup_failed(ui, "DHCP server", id, err))?;
            }
            _ => {
                ui.say("Deleting the network");
                let name = state
                    .network
                    .as_ref()
                    .map(|network| network.name.as_str())
                    .unwrap_or(id.as_str());
                state
                    .clients
                    .network
                    .delete_network(id)
                    .await
                    .during("delete network")
                    .map_err(|err| cleanup_failed(ui, "network", name, err))?;
            }
        }
        Ok(())
    }
}
