//! Scripted in-memory cloud used to exercise the pipeline without a real account
//!
//! `MockCloud` implements every capability trait. Remote asynchronous behavior
//! (job progress, image activation, shutdown, DHCP network attachment, delayed
//! instance visibility) is driven by scripts set up before the run, and every
//! call is appended to a log so tests can assert the order of operations.

use super::client::{DhcpApi, ImageApi, InstanceApi, JobApi, NetworkApi};
use super::error::ApiError;
use super::types::{
    CosImageImport, DhcpLease, DhcpNetwork, DhcpServer, DhcpServerCreate, DhcpServerDetail,
    Image, ImageCreate, ImageReference, InstanceAction, InstanceCapture, InstanceCreate,
    InstanceNetwork, Job, JobReference, JobStatus, Network, NetworkCreate, PvmInstance,
    IMAGE_STATE_ACTIVE, INSTANCE_STATUS_SHUTOFF, NETWORK_TYPE_PUBLIC_VLAN,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub struct MockCloud {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    calls: Vec<String>,
    failures: HashMap<String, VecDeque<ApiError>>,

    networks: BTreeMap<String, Network>,
    instances: BTreeMap<String, MockInstance>,
    images: BTreeMap<String, MockImage>,
    stock_images: Vec<ImageReference>,
    jobs: HashMap<String, MockJob>,
    dhcp_servers: BTreeMap<String, MockDhcp>,

    job_scripts: VecDeque<Vec<String>>,
    image_script: Option<Vec<String>>,
    shutdown_script: Option<Vec<String>>,
    instance_hidden_polls: usize,
    dhcp_pending_polls: usize,
    delete_linger_polls: usize,
    return_no_instances: bool,
    extra_instances: usize,
    instance_requests: Vec<InstanceCreate>,
    capture_requests: Vec<InstanceCapture>,
}

struct MockInstance {
    instance: PvmInstance,
    hidden_polls: usize,
    statuses: VecDeque<String>,
    deleted: bool,
    linger_polls: usize,
}

struct MockImage {
    reference: ImageReference,
    states: VecDeque<String>,
    deleted: bool,
    linger_polls: usize,
}

struct MockJob {
    states: VecDeque<String>,
    on_complete: Option<ImageReference>,
}

struct MockDhcp {
    network: DhcpNetwork,
    pending_polls: usize,
}

impl MockState {
    fn record(&mut self, op: &str, id: Option<&str>) -> Result<(), ApiError> {
        match id {
            Some(id) => self.calls.push(format!("{}:{}", op, id)),
            None => self.calls.push(op.to_string()),
        }
        match self.failures.get_mut(op).and_then(|queue| queue.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn new_job(&mut self, on_complete: Option<ImageReference>) -> JobReference {
        let id = self.next_id("job");
        let states = self
            .job_scripts
            .pop_front()
            .unwrap_or_else(|| vec!["completed".to_string()]);
        self.jobs.insert(
            id.clone(),
            MockJob {
                states: states.into(),
                on_complete,
            },
        );
        JobReference { id }
    }

    fn insert_image(
        &mut self,
        name: &str,
        storage_type: Option<String>,
        states: Vec<String>,
    ) -> String {
        let id = self.next_id("image");
        let state = states
            .first()
            .cloned()
            .unwrap_or_else(|| IMAGE_STATE_ACTIVE.to_string());
        self.images.insert(
            id.clone(),
            MockImage {
                reference: ImageReference {
                    image_id: id.clone(),
                    name: name.to_string(),
                    state,
                    storage_type,
                },
                states: states.into(),
                deleted: false,
                linger_polls: 0,
            },
        );
        id
    }
}

/// Pops the next scripted value, holding on to the last one
fn advance(queue: &mut VecDeque<String>) -> Option<String> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl MockCloud {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds an image that already exists in the workspace
    pub fn add_image(&self, name: &str, storage_type: &str) -> String {
        self.state()
            .insert_image(name, Some(storage_type.to_string()), Vec::new())
    }

    /// Adds an image to the stock catalog
    pub fn add_stock_image(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.next_id("stock");
        state.stock_images.push(ImageReference {
            image_id: id.clone(),
            name: name.to_string(),
            state: IMAGE_STATE_ACTIVE.to_string(),
            storage_type: Some("tier3".to_string()),
        });
        id
    }

    /// Adds a pre-existing subnet owned by the operator
    pub fn add_network(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.next_id("subnet");
        state.networks.insert(
            id.clone(),
            Network {
                network_id: id.clone(),
                name: name.to_string(),
                network_type: Some("vlan".to_string()),
                cidr: Some("10.0.0.0/24".to_string()),
            },
        );
        id
    }

    /// Scripts the states reported by the next job created (import or capture)
    pub fn push_job_states(&self, states: &[&str]) {
        self.state()
            .job_scripts
            .push_back(states.iter().map(|s| s.to_string()).collect());
    }

    /// Scripts the states reported by images copied from the stock catalog
    pub fn set_image_states(&self, states: &[&str]) {
        self.state().image_script = Some(states.iter().map(|s| s.to_string()).collect());
    }

    /// Scripts the statuses reported after a stop action
    pub fn set_shutdown_statuses(&self, statuses: &[&str]) {
        self.state().shutdown_script = Some(statuses.iter().map(|s| s.to_string()).collect());
    }

    /// New instances answer "not found" to this many fetches before appearing
    pub fn set_instance_hidden_polls(&self, polls: usize) {
        self.state().instance_hidden_polls = polls;
    }

    /// DHCP servers report no network for this many fetches
    pub fn set_dhcp_pending_polls(&self, polls: usize) {
        self.state().dhcp_pending_polls = polls;
    }

    /// Deleted instances and images stay fetchable for this many polls
    pub fn set_delete_linger_polls(&self, polls: usize) {
        self.state().delete_linger_polls = polls;
    }

    /// Instance creation succeeds but returns no handles
    pub fn return_no_instances(&self) {
        self.state().return_no_instances = true;
    }

    /// Makes instance creation answer with `count` additional handles
    pub fn return_extra_instances(&self, count: usize) {
        self.state().extra_instances = count;
    }

    /// The next call of `op` (e.g. `"instance.create"`) fails with `err`
    pub fn fail_next(&self, op: &str, err: ApiError) {
        self.state()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// Removes the external address from every NIC, leaving DHCP leases as the only source
    pub fn hide_external_ips(&self) {
        for entry in self.state().instances.values_mut() {
            for nic in &mut entry.instance.networks {
                nic.external_ip.clear();
            }
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Instance creation bodies received, oldest first
    pub fn instance_requests(&self) -> Vec<InstanceCreate> {
        self.state().instance_requests.clone()
    }

    pub fn capture_requests(&self) -> Vec<InstanceCapture> {
        self.state().capture_requests.clone()
    }

    pub fn network_ids(&self) -> Vec<String> {
        self.state().networks.keys().cloned().collect()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.state()
            .instances
            .iter()
            .filter(|(_, entry)| !entry.deleted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn image_names(&self) -> Vec<String> {
        self.state()
            .images
            .values()
            .filter(|image| !image.deleted)
            .map(|image| image.reference.name.clone())
            .collect()
    }

    pub fn dhcp_server_ids(&self) -> Vec<String> {
        self.state().dhcp_servers.keys().cloned().collect()
    }
}

impl Default for MockCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MockCloud")
            .field("calls", &state.calls.len())
            .field("networks", &state.networks.len())
            .field("instances", &state.instances.len())
            .field("images", &state.images.len())
            .finish()
    }
}

#[async_trait]
impl NetworkApi for MockCloud {
    async fn create_network(&self, body: &NetworkCreate) -> Result<Network, ApiError> {
        let mut state = self.state();
        state.record("network.create", None)?;
        let id = state.next_id("network");
        let network = Network {
            network_id: id.clone(),
            name: body.name.clone().unwrap_or_else(|| format!("public-{}", id)),
            network_type: Some(body.network_type.clone()),
            cidr: None,
        };
        state.networks.insert(id, network.clone());
        Ok(network)
    }

    async fn get_network(&self, id: &str) -> Result<Network, ApiError> {
        let mut state = self.state();
        state.record("network.get", Some(id))?;
        state
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("network", id))
    }

    async fn delete_network(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record("network.delete", Some(id))?;
        state
            .networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ApiError::not_found("network", id))
    }
}

#[async_trait]
impl InstanceApi for MockCloud {
    async fn create_instance(&self, body: &InstanceCreate) -> Result<Vec<PvmInstance>, ApiError> {
        let mut state = self.state();
        state.record("instance.create", None)?;
        state.instance_requests.push(body.clone());
        if state.return_no_instances {
            return Ok(Vec::new());
        }

        let mut handles = Vec::new();
        for _ in 0..=state.extra_instances {
            let id = state.next_id("instance");
            let octet = state.next_id;
            let mut nics = Vec::new();
            for (index, net) in body.networks.iter().enumerate() {
                let mac = format!("fa:16:3e:00:{:02x}:{:02x}", octet % 256, index);
                let ip = format!("192.168.{}.{}", index, octet % 250 + 2);
                let public = state
                    .networks
                    .get(&net.network_id)
                    .and_then(|n| n.network_type.as_deref())
                    == Some(NETWORK_TYPE_PUBLIC_VLAN);
                nics.push(InstanceNetwork {
                    network_id: net.network_id.clone(),
                    external_ip: if public {
                        format!("169.48.{}.{}", index, octet % 250 + 2)
                    } else {
                        String::new()
                    },
                    ip_address: ip,
                    mac_address: mac,
                });
            }

            let instance = PvmInstance {
                pvm_instance_id: id.clone(),
                server_name: body.server_name.clone(),
                status: "ACTIVE".to_string(),
                networks: nics,
            };
            let hidden_polls = state.instance_hidden_polls;
            state.instances.insert(
                id,
                MockInstance {
                    instance: instance.clone(),
                    hidden_polls,
                    statuses: VecDeque::new(),
                    deleted: false,
                    linger_polls: 0,
                },
            );

            let handle = PvmInstance {
                status: "BUILD".to_string(),
                networks: Vec::new(),
                ..instance
            };
            handles.push(handle);
        }
        Ok(handles)
    }

    async fn get_instance(&self, id: &str) -> Result<PvmInstance, ApiError> {
        let mut state = self.state();
        state.record("instance.get", Some(id))?;
        let entry = state
            .instances
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("instance", id))?;

        if entry.deleted {
            if entry.linger_polls == 0 {
                return Err(ApiError::not_found("instance", id));
            }
            entry.linger_polls -= 1;
            entry.instance.status = "DELETING".to_string();
            return Ok(entry.instance.clone());
        }
        if entry.hidden_polls > 0 {
            entry.hidden_polls -= 1;
            return Err(ApiError::not_found("instance", id));
        }
        if let Some(status) = advance(&mut entry.statuses) {
            entry.instance.status = status;
        }
        Ok(entry.instance.clone())
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record("instance.delete", Some(id))?;
        let linger = state.delete_linger_polls;
        let entry = state
            .instances
            .get_mut(id)
            .filter(|entry| !entry.deleted)
            .ok_or_else(|| ApiError::not_found("instance", id))?;
        entry.deleted = true;
        entry.linger_polls = linger;
        Ok(())
    }

    async fn instance_action(&self, id: &str, body: &InstanceAction) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record("instance.action", Some(&format!("{}:{}", id, body.action)))?;
        let script = state
            .shutdown_script
            .clone()
            .unwrap_or_else(|| vec![INSTANCE_STATUS_SHUTOFF.to_string()]);
        let entry = state
            .instances
            .get_mut(id)
            .filter(|entry| !entry.deleted)
            .ok_or_else(|| ApiError::not_found("instance", id))?;
        if body.action == "stop" {
            entry.statuses = script.into();
        }
        Ok(())
    }

    async fn capture_instance(
        &self,
        id: &str,
        body: &InstanceCapture,
    ) -> Result<JobReference, ApiError> {
        let mut state = self.state();
        state.record("instance.capture", Some(id))?;
        state.capture_requests.push(body.clone());
        if !state.instances.contains_key(id) {
            return Err(ApiError::not_found("instance", id));
        }
        let catalog_copy = (body.capture_destination != "cloud-storage").then(|| ImageReference {
            image_id: String::new(),
            name: body.capture_name.clone(),
            state: IMAGE_STATE_ACTIVE.to_string(),
            storage_type: Some("tier1".to_string()),
        });
        Ok(state.new_job(catalog_copy))
    }
}

#[async_trait]
impl ImageApi for MockCloud {
    async fn import_cos_image(&self, body: &CosImageImport) -> Result<JobReference, ApiError> {
        let mut state = self.state();
        state.record("image.import_cos", None)?;
        let imported = ImageReference {
            image_id: String::new(),
            name: body.image_name.clone(),
            state: IMAGE_STATE_ACTIVE.to_string(),
            storage_type: Some(body.storage_type.clone()),
        };
        Ok(state.new_job(Some(imported)))
    }

    async fn create_image(&self, body: &ImageCreate) -> Result<Image, ApiError> {
        let mut state = self.state();
        state.record("image.create", None)?;
        let stock = state
            .stock_images
            .iter()
            .find(|image| image.image_id == body.image_id)
            .cloned()
            .ok_or_else(|| ApiError::not_found("stock image", &body.image_id))?;
        let script = state
            .image_script
            .clone()
            .unwrap_or_else(|| vec!["queued".to_string(), IMAGE_STATE_ACTIVE.to_string()]);
        let id = state.insert_image(&stock.name, stock.storage_type.clone(), script);
        let reference = &state.images[&id].reference;
        Ok(Image {
            image_id: id.clone(),
            name: reference.name.clone(),
            state: "queued".to_string(),
            storage_type: reference.storage_type.clone(),
        })
    }

    async fn get_image(&self, id: &str) -> Result<Image, ApiError> {
        let mut state = self.state();
        state.record("image.get", Some(id))?;
        let entry = state
            .images
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("image", id))?;
        if entry.deleted {
            if entry.linger_polls == 0 {
                return Err(ApiError::not_found("image", id));
            }
            entry.linger_polls -= 1;
            entry.reference.state = "deleting".to_string();
        } else if let Some(next) = advance(&mut entry.states) {
            entry.reference.state = next;
        }
        let reference = &entry.reference;
        Ok(Image {
            image_id: reference.image_id.clone(),
            name: reference.name.clone(),
            state: reference.state.clone(),
            storage_type: reference.storage_type.clone(),
        })
    }

    async fn list_images(&self) -> Result<Vec<ImageReference>, ApiError> {
        let mut state = self.state();
        state.record("image.list", None)?;
        Ok(state
            .images
            .values()
            .filter(|image| !image.deleted)
            .map(|image| image.reference.clone())
            .collect())
    }

    async fn list_stock_images(&self) -> Result<Vec<ImageReference>, ApiError> {
        let mut state = self.state();
        state.record("image.list_stock", None)?;
        Ok(state.stock_images.clone())
    }

    async fn delete_image(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record("image.delete", Some(id))?;
        let linger = state.delete_linger_polls;
        let entry = state
            .images
            .get_mut(id)
            .filter(|image| !image.deleted)
            .ok_or_else(|| ApiError::not_found("image", id))?;
        entry.deleted = true;
        entry.linger_polls = linger;
        Ok(())
    }
}

#[async_trait]
impl JobApi for MockCloud {
    async fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        let mut state = self.state();
        state.record("job.get", Some(id))?;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("job", id))?;
        let current = advance(&mut job.states).unwrap_or_else(|| "completed".to_string());
        let produced = if current == "completed" {
            job.on_complete.take()
        } else {
            None
        };

        if let Some(image) = produced {
            state.insert_image(&image.name, image.storage_type, Vec::new());
        }

        Ok(Job {
            id: id.to_string(),
            status: JobStatus {
                progress: Some(if current == "completed" { "100" } else { "50" }.to_string()),
                message: (current == "failed").then(|| "job failed on the service".to_string()),
                state: current,
            },
        })
    }
}

#[async_trait]
impl DhcpApi for MockCloud {
    async fn create_dhcp_server(&self, body: &DhcpServerCreate) -> Result<DhcpServer, ApiError> {
        let mut state = self.state();
        state.record("dhcp.create", None)?;
        let id = state.next_id("dhcp");
        let network_id = state.next_id("network");
        let network = Network {
            network_id: network_id.clone(),
            name: body
                .name
                .clone()
                .unwrap_or_else(|| format!("DHCPSERVER{}_Private", id)),
            network_type: Some("vlan".to_string()),
            cidr: body.cidr.clone(),
        };
        let pending_polls = state.dhcp_pending_polls;
        state.dhcp_servers.insert(
            id.clone(),
            MockDhcp {
                network: DhcpNetwork {
                    id: network_id.clone(),
                    name: network.name.clone(),
                },
                pending_polls,
            },
        );
        state.networks.insert(network_id, network);
        Ok(DhcpServer {
            id,
            network: None,
            status: "BUILD".to_string(),
        })
    }

    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServerDetail, ApiError> {
        let mut state = self.state();
        state.record("dhcp.get", Some(id))?;
        let server = state
            .dhcp_servers
            .get_mut(id)
            .ok_or_else(|| ApiError::not_found("dhcp server", id))?;
        if server.pending_polls > 0 {
            server.pending_polls -= 1;
            return Ok(DhcpServerDetail {
                id: id.to_string(),
                network: None,
                leases: Vec::new(),
                status: "BUILD".to_string(),
            });
        }

        let network = server.network.clone();
        let leases = state
            .instances
            .values()
            .filter(|entry| !entry.deleted)
            .flat_map(|entry| entry.instance.networks.iter())
            .filter(|nic| nic.network_id == network.id)
            .map(|nic| DhcpLease {
                instance_ip: nic.ip_address.clone(),
                instance_mac_address: nic.mac_address.clone(),
            })
            .collect();

        Ok(DhcpServerDetail {
            id: id.to_string(),
            network: Some(network),
            leases,
            status: "ACTIVE".to_string(),
        })
    }

    async fn delete_dhcp_server(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state();
        state.record("dhcp.delete", Some(id))?;
        let server = state
            .dhcp_servers
            .remove(id)
            .ok_or_else(|| ApiError::not_found("dhcp server", id))?;
        state.networks.remove(&server.network.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_script_holds_last_state() {
        let cloud = MockCloud::new();
        cloud.push_job_states(&["queued", "running", "completed"]);
        let job = cloud
            .import_cos_image(&CosImageImport {
                image_name: "rhel".to_string(),
                bucket_name: "bucket".to_string(),
                bucket_access: "public".to_string(),
                region: "us-south".to_string(),
                image_filename: "rhel.ova.gz".to_string(),
                storage_type: "tier1".to_string(),
            })
            .await
            .unwrap();

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(cloud.get_job(&job.id).await.unwrap().status.state);
        }

        assert_eq!(seen, vec!["queued", "running", "completed", "completed"]);
        assert_eq!(cloud.image_names(), vec!["rhel".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let cloud = MockCloud::new();
        cloud.fail_next(
            "network.create",
            ApiError::Status {
                status: 500,
                message: "boom".to_string(),
            },
        );
        let body = NetworkCreate {
            network_type: NETWORK_TYPE_PUBLIC_VLAN.to_string(),
            dns_servers: Vec::new(),
            name: None,
        };

        assert!(cloud.create_network(&body).await.is_err());
        assert!(cloud.create_network(&body).await.is_ok());
        assert_eq!(cloud.call_count("network.create"), 2);
    }

    #[tokio::test]
    async fn test_hidden_instance_becomes_visible() {
        let cloud = MockCloud::new();
        cloud.set_instance_hidden_polls(1);
        let created = cloud
            .create_instance(&InstanceCreate {
                image_id: "img".to_string(),
                key_pair_name: None,
                memory: 2.0,
                networks: Vec::new(),
                proc_type: "shared".to_string(),
                processors: 0.5,
                server_name: "vm".to_string(),
                storage_type: None,
                user_data: None,
            })
            .await
            .unwrap();
        let id = &created[0].pvm_instance_id;

        assert!(cloud.get_instance(id).await.unwrap_err().is_not_found());
        assert_eq!(cloud.get_instance(id).await.unwrap().status, "ACTIVE");
    }
}
