//! Wire models for the Power Virtual Server API
//!
//! Field names follow the JSON the service speaks (`camelCase`, with the
//! upper-case `ID`/`IP` suffixes it uses). Resources are treated as opaque
//! values: the pipeline only passes them along and deletes them on cleanup.

use crate::config::Secret;
use serde::{Deserialize, Serialize};

/// Network type used when the builder creates its own network
pub const NETWORK_TYPE_PUBLIC_VLAN: &str = "pub-vlan";

/// Instance status reported once a stop action has completed
pub const INSTANCE_STATUS_SHUTOFF: &str = "SHUTOFF";

/// Image state reported once a catalog copy is usable
pub const IMAGE_STATE_ACTIVE: &str = "active";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    #[serde(rename = "networkID")]
    pub network_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkCreate {
    #[serde(rename = "type")]
    pub network_type: String,
    pub dns_servers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceNetwork {
    #[serde(rename = "networkID", default)]
    pub network_id: String,
    #[serde(rename = "externalIP", default)]
    pub external_ip: String,
    #[serde(rename = "ipAddress", default)]
    pub ip_address: String,
    #[serde(rename = "macAddress", default)]
    pub mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvmInstance {
    #[serde(rename = "pvmInstanceID", default)]
    pub pvm_instance_id: String,
    #[serde(rename = "serverName", default)]
    pub server_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub networks: Vec<InstanceNetwork>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceNetworkRef {
    #[serde(rename = "networkID")]
    pub network_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceCreate {
    #[serde(rename = "imageID")]
    pub image_id: String,
    #[serde(rename = "keyPairName", skip_serializing_if = "Option::is_none")]
    pub key_pair_name: Option<String>,
    pub memory: f64,
    pub networks: Vec<InstanceNetworkRef>,
    #[serde(rename = "procType")]
    pub proc_type: String,
    pub processors: f64,
    #[serde(rename = "serverName")]
    pub server_name: String,
    #[serde(rename = "storageType", skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    #[serde(rename = "userData", skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAction {
    pub action: String,
}

impl InstanceAction {
    pub fn stop() -> Self {
        Self {
            action: "stop".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCapture {
    pub capture_destination: String,
    pub capture_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_storage_access_key: Option<Secret>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_storage_image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_storage_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_storage_secret_key: Option<Secret>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReference {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: String,
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
}

/// Interpretation of a job's free-text state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Failed,
    InProgress(String),
}

impl JobStatus {
    pub fn job_state(&self) -> JobState {
        match self.state.as_str() {
            "completed" => JobState::Completed,
            "failed" => JobState::Failed,
            other => JobState::InProgress(other.to_string()),
        }
    }

    /// One-line summary in the form the UI streams while waiting
    pub fn summary(&self) -> String {
        format!(
            "Job state: {}, progress: {}, message: {}",
            self.state,
            self.progress.as_deref().unwrap_or("-"),
            self.message.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CosImageImport {
    pub image_name: String,
    pub bucket_name: String,
    pub bucket_access: String,
    pub region: String,
    pub image_filename: String,
    pub storage_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCreate {
    #[serde(rename = "imageID")]
    pub image_id: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "imageID")]
    pub image_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "storageType", default)]
    pub storage_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReference {
    #[serde(rename = "imageID")]
    pub image_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "storageType", default)]
    pub storage_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Images {
    #[serde(default)]
    pub images: Vec<ImageReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhcpServerCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpNetwork {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpServer {
    pub id: String,
    #[serde(default)]
    pub network: Option<DhcpNetwork>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpLease {
    #[serde(rename = "instanceIP")]
    pub instance_ip: String,
    #[serde(rename = "instanceMacAddress")]
    pub instance_mac_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhcpServerDetail {
    pub id: String,
    #[serde(default)]
    pub network: Option<DhcpNetwork>,
    #[serde(default)]
    pub leases: Vec<DhcpLease>,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_state_mapping() {
        let status = |state: &str| JobStatus {
            state: state.to_string(),
            progress: None,
            message: None,
        };
        assert_eq!(status("completed").job_state(), JobState::Completed);
        assert_eq!(status("failed").job_state(), JobState::Failed);
        assert_eq!(
            status("running").job_state(),
            JobState::InProgress("running".to_string())
        );
    }

    #[test]
    fn test_instance_decodes_service_field_names() {
        let instance: PvmInstance = serde_json::from_value(json!({
            "pvmInstanceID": "ins-1",
            "serverName": "builder",
            "status": "ACTIVE",
            "networks": [{"networkID": "net-1", "externalIP": "1.2.3.4", "macAddress": "fa:16"}]
        }))
        .unwrap();

        assert_eq!(instance.pvm_instance_id, "ins-1");
        assert_eq!(instance.networks[0].external_ip, "1.2.3.4");
        assert_eq!(instance.networks[0].ip_address, "");
    }

    #[test]
    fn test_capture_keeps_credentials_on_the_wire_only() {
        let body = InstanceCapture {
            capture_destination: "cloud-storage".to_string(),
            capture_name: "golden".to_string(),
            cloud_storage_access_key: Some(Secret::new("AKID-123")),
            cloud_storage_image_path: Some("captures".to_string()),
            cloud_storage_region: Some("us-east".to_string()),
            cloud_storage_secret_key: Some(Secret::new("s3cr3t-value")),
        };

        let debug = format!("{:?}", body);
        assert!(!debug.contains("AKID-123"));
        assert!(!debug.contains("s3cr3t-value"));

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["cloudStorageAccessKey"], "AKID-123");
        assert_eq!(value["cloudStorageSecretKey"], "s3cr3t-value");
    }

    #[test]
    fn test_instance_create_omits_unset_fields() {
        let body = InstanceCreate {
            image_id: "img".to_string(),
            key_pair_name: None,
            memory: 2.0,
            networks: vec![InstanceNetworkRef {
                network_id: "net".to_string(),
            }],
            proc_type: "shared".to_string(),
            processors: 0.5,
            server_name: "vm".to_string(),
            storage_type: Some("tier1".to_string()),
            user_data: None,
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["imageID"], "img");
        assert_eq!(value["networks"][0]["networkID"], "net");
        assert!(value.get("keyPairName").is_none());
        assert!(value.get("userData").is_none());
    }
}
