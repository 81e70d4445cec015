//! Build configuration
//!
//! A build is described by a TOML file with one table per concern. Access
//! credentials can also come from the environment, which takes precedence
//! over the file:
//!
//! - `POWERVS_API_KEY`: IBM Cloud API key
//! - `POWERVS_ACCOUNT_ID`: account owning the workspace; discovered from the key when unset
//! - `POWERVS_REGION`: API region; derived from the zone when unset
//! - `POWERVS_ZONE`: zone hosting the workspace (e.g. `dal10`)
//! - `POWERVS_SERVICE_INSTANCE_ID`: workspace (cloud instance) id
//!
//! # Example
//!
//! ```toml
//! [access]
//! zone = "dal10"
//! service_instance_id = "7f3c..."
//!
//! [instance]
//! name = "rhel-builder"
//! key_pair_name = "builder-key"
//!
//! [source.stock_image]
//! name = "RHEL9-SP2"
//!
//! [capture]
//! name = "rhel-golden"
//! destination = "image-catalog"
//! ```

use crate::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MEMORY_GB: f64 = 2.0;
const DEFAULT_PROCESSORS: f64 = 0.5;
const DEFAULT_PROC_TYPE: &str = "shared";
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CLEANUP_TIMEOUT_SECS: u64 = 900;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required value is absent from both the file and the environment
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// A credential that never shows up in logs or debug output
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub api_key: Secret,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub service_instance_id: String,
    /// Overrides the regional Power Virtual Server endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Overrides the IAM endpoint
    #[serde(default)]
    pub iam_endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSettings {
    pub name: String,
    #[serde(default)]
    pub key_pair_name: Option<String>,
    /// Plain text; encoded before it is sent
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default = "default_memory")]
    pub memory: f64,
    #[serde(default = "default_processors")]
    pub processors: f64,
    #[serde(default = "default_proc_type")]
    pub proc_type: String,
}

impl InstanceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_pair_name: None,
            user_data: None,
            memory: DEFAULT_MEMORY_GB,
            processors: DEFAULT_PROCESSORS,
            proc_type: DEFAULT_PROC_TYPE.to_string(),
        }
    }
}

/// Which network the build instance is attached to
///
/// With nothing set a public VLAN is created for the build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Existing subnet to reuse
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Existing subnets to attach; takes precedence over `subnet_id` at attach time
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Create a private network behind a DHCP server
    #[serde(default)]
    pub dhcp: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosSource {
    pub bucket: String,
    pub object: String,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockImageSource {
    pub name: String,
}

/// Where the base image comes from
///
/// With neither `cos` nor `stock_image` set, `name` must name an image that
/// already exists in the workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cos: Option<CosSource>,
    #[serde(default)]
    pub stock_image: Option<StockImageSource>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureDestination {
    #[default]
    CloudStorage,
    ImageCatalog,
    Both,
}

impl CaptureDestination {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureDestination::CloudStorage => "cloud-storage",
            CaptureDestination::ImageCatalog => "image-catalog",
            CaptureDestination::Both => "both",
        }
    }

    pub fn includes_cloud_storage(&self) -> bool {
        !matches!(self, CaptureDestination::ImageCatalog)
    }
}

impl fmt::Display for CaptureDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureCos {
    pub bucket: String,
    pub region: String,
    pub access_key: Secret,
    pub secret_key: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub name: String,
    #[serde(default)]
    pub destination: CaptureDestination,
    #[serde(default)]
    pub cos: Option<CaptureCos>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicatorKind {
    #[default]
    Ssh,
    /// No remote access; connect and provision are skipped
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicatorSettings {
    #[serde(rename = "type", default)]
    pub kind: CommunicatorKind,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,
}

impl Default for CommunicatorSettings {
    fn default() -> Self {
        Self {
            kind: CommunicatorKind::default(),
            port: DEFAULT_SSH_PORT,
            timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionSettings {
    /// Shell commands run on the build host once the instance is reachable
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub teardown_on_success: bool,
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            teardown_on_success: false,
            cleanup_timeout_secs: DEFAULT_CLEANUP_TIMEOUT_SECS,
        }
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        PipelineConfig::new()
            .with_teardown_on_success(settings.teardown_on_success)
            .with_cleanup_timeout(Duration::from_secs(settings.cleanup_timeout_secs))
    }
}

fn default_memory() -> f64 {
    DEFAULT_MEMORY_GB
}

fn default_processors() -> f64 {
    DEFAULT_PROCESSORS
}

fn default_proc_type() -> String {
    DEFAULT_PROC_TYPE.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_cleanup_timeout() -> u64 {
    DEFAULT_CLEANUP_TIMEOUT_SECS
}

/// Complete description of one image build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub access: AccessConfig,
    pub instance: InstanceSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub source: SourceSettings,
    pub capture: CaptureSettings,
    #[serde(default)]
    pub communicator: CommunicatorSettings,
    #[serde(default)]
    pub provision: ProvisionSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

impl BuildConfig {
    /// Reads a configuration file without consulting the environment
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a file, applies environment overrides and validates the result
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env("POWERVS_API_KEY") {
            self.access.api_key = Secret::new(key);
        }
        if let Some(account) = non_empty_env("POWERVS_ACCOUNT_ID") {
            self.access.account_id = Some(account);
        }
        if let Some(region) = non_empty_env("POWERVS_REGION") {
            self.access.region = Some(region);
        }
        if let Some(zone) = non_empty_env("POWERVS_ZONE") {
            self.access.zone = zone;
        }
        if let Some(id) = non_empty_env("POWERVS_SERVICE_INSTANCE_ID") {
            self.access.service_instance_id = id;
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns the first problem found, as `MissingField` for absent required
    /// values and `ValidationFailed` for inconsistent combinations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access.api_key.is_empty() {
            return Err(ConfigError::MissingField("access.api_key"));
        }
        if self.access.zone.trim().is_empty() {
            return Err(ConfigError::MissingField("access.zone"));
        }
        if self.access.service_instance_id.trim().is_empty() {
            return Err(ConfigError::MissingField("access.service_instance_id"));
        }
        if self.instance.name.trim().is_empty() {
            return Err(ConfigError::MissingField("instance.name"));
        }
        if self.capture.name.trim().is_empty() {
            return Err(ConfigError::MissingField("capture.name"));
        }

        if self.instance.memory <= 0.0 || self.instance.processors <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "instance memory and processors must be positive".to_string(),
            ));
        }

        let source = &self.source;
        match (&source.cos, &source.stock_image) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::ValidationFailed(
                    "source.cos and source.stock_image are mutually exclusive".to_string(),
                ))
            }
            (Some(cos), None) => {
                if cos.bucket.is_empty() || cos.object.is_empty() || cos.region.is_empty() {
                    return Err(ConfigError::ValidationFailed(
                        "source.cos requires bucket, object and region".to_string(),
                    ));
                }
            }
            (None, Some(stock)) => {
                if stock.name.is_empty() {
                    return Err(ConfigError::MissingField("source.stock_image.name"));
                }
            }
            (None, None) => {
                if source.name.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::ValidationFailed(
                        "source.name is required when no cos or stock_image source is given"
                            .to_string(),
                    ));
                }
            }
        }

        if self.capture.destination.includes_cloud_storage() && self.capture.cos.is_none() {
            return Err(ConfigError::ValidationFailed(format!(
                "capture destination '{}' requires a [capture.cos] section",
                self.capture.destination
            )));
        }

        let network = &self.network;
        if network.subnet_id.is_some() && !network.subnet_ids.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "network.subnet_id and network.subnet_ids are mutually exclusive".to_string(),
            ));
        }
        if network.dhcp && (network.subnet_id.is_some() || !network.subnet_ids.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "network.dhcp cannot be combined with network.subnet_id or network.subnet_ids"
                    .to_string(),
            ));
        }

        if self.communicator.kind == CommunicatorKind::Ssh && self.communicator.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "communicator.timeout_secs must be at least 1 second".to_string(),
            ));
        }

        Ok(())
    }

    /// API region; the zone without its trailing digits when not configured
    pub fn region(&self) -> String {
        match &self.access.region {
            Some(region) if !region.is_empty() => region.clone(),
            _ => self
                .access
                .zone
                .trim_end_matches(|c: char| c.is_ascii_digit())
                .to_string(),
        }
    }

    pub fn endpoint_url(&self) -> String {
        match &self.access.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.power-iaas.cloud.ibm.com", self.region()),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::from(&self.pipeline)
    }
}

impl fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Configuration:")?;
        writeln!(f, "  Zone: {} (region {})", self.access.zone, self.region())?;
        writeln!(f, "  Endpoint: {}", self.endpoint_url())?;
        writeln!(f, "  Workspace: {}", self.access.service_instance_id)?;
        writeln!(f, "  Instance: {}", self.instance.name)?;
        let source = match (&self.source.cos, &self.source.stock_image) {
            (Some(cos), _) => format!("cos://{}/{}", cos.bucket, cos.object),
            (None, Some(stock)) => format!("stock image {}", stock.name),
            (None, None) => format!(
                "existing image {}",
                self.source.name.as_deref().unwrap_or("")
            ),
        };
        writeln!(f, "  Source: {}", source)?;
        writeln!(
            f,
            "  Capture: {} -> {}",
            self.capture.name, self.capture.destination
        )?;
        writeln!(f, "  Communicator: {:?}", self.communicator.kind)?;
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}
