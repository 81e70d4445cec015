use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::{poll_for, PollPolicy};
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{Step, StepAction};
use crate::provision::Communicator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// 25 retries, one minute apart
pub const HOST_DISCOVERY_POLL: PollPolicy = PollPolicy::new(
    "instance address",
    Duration::from_secs(60),
    Duration::from_secs(25 * 60),
);

/// Discovers the instance address and waits for it to accept connections
pub struct ConnectStep {
    communicator: Arc<dyn Communicator>,
    port: u16,
}

impl ConnectStep {
    pub fn new(communicator: Arc<dyn Communicator>, port: u16) -> Self {
        Self { communicator, port }
    }

    async fn execute(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        state.ui.say("Waiting for the instance to become reachable");
        let instance_id = state.instance()?.pvm_instance_id.clone();

        let host = discover_host(state, &instance_id)
            .await
            .map_err(|err| match err {
                BuildError::Timeout { .. } => BuildError::HostNotFound(instance_id.clone()),
                other => other,
            })?;

        state
            .ui
            .message(&format!("Connecting to {}:{}", host, self.port));
        self.communicator
            .connect(&host, self.port, &state.cancel)
            .await?;
        state.ui.message(&format!("Connected to {}", host));

        state.record("Host", host.clone());
        state.ssh_host = Some(host);
        Ok(())
    }
}

/// Prefers an external address; falls back to the DHCP lease of the NIC on
/// the build network when a DHCP server was created
async fn discover_host(state: &BuildState, instance_id: &str) -> Result<String, BuildError> {
    let instances = &*state.clients.instance;
    let dhcp = &*state.clients.dhcp;
    let ui = &*state.ui;
    let dhcp_server_id = state.dhcp_server_id.as_deref();
    let network_id = state.network.as_ref().map(|network| network.network_id.as_str());

    ui.message("Fetching IP for machine");
    poll_for(&HOST_DISCOVERY_POLL, &state.cancel, move || async move {
        let instance = instances
            .get_instance(instance_id)
            .await
            .during("fetch instance")?;

        if let Some(ip) = instance
            .networks
            .iter()
            .rev()
            .map(|nic| nic.external_ip.as_str())
            .find(|ip| !ip.is_empty())
        {
            return Ok(Some(ip.to_string()));
        }

        let Some(server_id) = dhcp_server_id else {
            ui.message("Machine IP is not yet found, trying again");
            return Ok(None);
        };
        let Some(nic) = instance
            .networks
            .iter()
            .find(|nic| Some(nic.network_id.as_str()) == network_id)
        else {
            ui.message("Build network is not attached to the instance yet, trying again");
            return Ok(None);
        };

        ui.message("Getting instance IP from the DHCP server");
        let detail = dhcp
            .get_dhcp_server(server_id)
            .await
            .during("fetch DHCP server")?;
        match detail
            .leases
            .iter()
            .find(|lease| lease.instance_mac_address == nic.mac_address)
        {
            Some(lease) => {
                ui.message(&format!(
                    "Found internal IP {} in the DHCP leases",
                    lease.instance_ip
                ));
                Ok(Some(lease.instance_ip.clone()))
            }
            None => {
                ui.message("Machine IP is not yet found in the DHCP leases, trying again");
                Ok(None)
            }
        }
    })
    .await
}

#[async_trait]
impl Step for ConnectStep {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        state.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{harness, Harness};
    use super::*;
    use crate::cloud::{
        DhcpApi, DhcpServerCreate, InstanceApi, InstanceCreate, InstanceNetworkRef, NetworkApi,
        NetworkCreate, NETWORK_TYPE_PUBLIC_VLAN,
    };
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct FakeCommunicator {
        connected: Mutex<Vec<(String, u16)>>,
        refuse: bool,
    }

    #[async_trait]
    impl Communicator for FakeCommunicator {
        async fn connect(
            &self,
            host: &str,
            port: u16,
            _cancel: &CancellationToken,
        ) -> Result<(), BuildError> {
            if self.refuse {
                return Err(BuildError::timeout("communicator connection", Duration::from_secs(5)));
            }
            self.connected.lock().unwrap().push((host.to_string(), port));
            Ok(())
        }
    }

    async fn launch(h: &mut Harness, network_id: &str) {
        let created = h
            .cloud
            .create_instance(&InstanceCreate {
                image_id: "image-1".to_string(),
                key_pair_name: None,
                memory: 2.0,
                networks: vec![InstanceNetworkRef {
                    network_id: network_id.to_string(),
                }],
                proc_type: "shared".to_string(),
                processors: 0.5,
                server_name: "builder".to_string(),
                storage_type: None,
                user_data: None,
            })
            .await
            .unwrap();
        h.state.instance = Some(created[0].clone());
        h.state.network = Some(h.cloud.get_network(network_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_external_ip_is_preferred() {
        let mut h = harness();
        let network = h
            .cloud
            .create_network(&NetworkCreate {
                network_type: NETWORK_TYPE_PUBLIC_VLAN.to_string(),
                dns_servers: Vec::new(),
                name: None,
            })
            .await
            .unwrap();
        launch(&mut h, &network.network_id).await;
        let communicator = Arc::new(FakeCommunicator::default());
        let mut step = ConnectStep::new(communicator.clone(), 22);

        assert_eq!(step.run(&mut h.state).await, StepAction::Continue);

        let host = h.state.ssh_host().unwrap().to_string();
        assert!(host.starts_with("169.48."));
        assert_eq!(*communicator.connected.lock().unwrap(), vec![(host.clone(), 22)]);
        assert_eq!(h.state.generated_data.get("Host"), Some(&host));
    }

    #[tokio::test]
    async fn test_dhcp_lease_is_used_without_external_ip() {
        let mut h = harness();
        let server = h
            .cloud
            .create_dhcp_server(&DhcpServerCreate {
                cidr: None,
                dns_server: None,
                name: None,
            })
            .await
            .unwrap();
        let network_id = h
            .cloud
            .get_dhcp_server(&server.id)
            .await
            .unwrap()
            .network
            .unwrap()
            .id;
        launch(&mut h, &network_id).await;
        h.state.dhcp_server_id = Some(server.id);
        let mut step = ConnectStep::new(Arc::new(FakeCommunicator::default()), 2222);

        assert_eq!(step.run(&mut h.state).await, StepAction::Continue);
        assert!(h.state.ssh_host().unwrap().starts_with("192.168."));
        assert!(h
            .ui
            .lines()
            .iter()
            .any(|line| line.starts_with("Found internal IP")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_address_gives_up_after_retries() {
        let mut h = harness();
        let subnet = h.cloud.add_network("private");
        launch(&mut h, &subnet).await;
        let mut step = ConnectStep::new(Arc::new(FakeCommunicator::default()), 22);

        assert_eq!(step.run(&mut h.state).await, StepAction::Halt);
        assert!(matches!(h.state.error, Some(BuildError::HostNotFound(_))));
        assert_eq!(h.cloud.call_count("instance.get"), 26);
    }

    #[tokio::test]
    async fn test_unreachable_host_halts() {
        let mut h = harness();
        let network = h
            .cloud
            .create_network(&NetworkCreate {
                network_type: NETWORK_TYPE_PUBLIC_VLAN.to_string(),
                dns_servers: Vec::new(),
                name: None,
            })
            .await
            .unwrap();
        launch(&mut h, &network.network_id).await;
        let communicator = Arc::new(FakeCommunicator {
            refuse: true,
            ..FakeCommunicator::default()
        });
        let mut step = ConnectStep::new(communicator, 22);

        assert_eq!(step.run(&mut h.state).await, StepAction::Halt);
        assert!(matches!(h.state.error, Some(BuildError::Timeout { .. })));
        assert!(h.state.ssh_host.is_none());
    }
}
