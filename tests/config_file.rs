//! Loading build configuration files from disk

use powervs_builder::config::{CaptureDestination, CommunicatorKind};
use powervs_builder::{BuildConfig, ConfigError};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const FULL_CONFIG: &str = r##"
[access]
api_key = "file-key"
zone = "wdc06"
service_instance_id = "workspace-9"

[instance]
name = "packer-builder"
key_pair_name = "ops"
user_data = "#cloud-config"
memory = 4.0
processors = 1.0

[network]
subnet_ids = ["subnet-a", "subnet-b"]

[source.stock_image]
name = "RHEL9-SP2"

[capture]
name = "rhel9-golden"
destination = "both"

[capture.cos]
bucket = "captures"
region = "us-east"
access_key = "hmac-access"
secret_key = "hmac-secret"

[communicator]
type = "ssh"
port = 22
timeout_secs = 600

[provision]
commands = ["ansible-playbook -i $POWERVS_HOST, site.yml"]

[pipeline]
cleanup_timeout_secs = 300
"##;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

struct EnvGuard {
    keys: Vec<&'static str>,
}

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        for (key, value) in vars {
            env::set_var(key, value);
        }
        Self {
            keys: vars.iter().map(|(key, _)| *key).collect(),
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn test_load_full_config() {
    let file = write_config(FULL_CONFIG);
    let config = BuildConfig::load(file.path()).unwrap();

    assert_eq!(config.region(), "wdc");
    assert_eq!(config.endpoint_url(), "https://wdc.power-iaas.cloud.ibm.com");
    assert_eq!(config.instance.memory, 4.0);
    assert_eq!(config.network.subnet_ids.len(), 2);
    assert_eq!(config.capture.destination, CaptureDestination::Both);
    assert_eq!(config.communicator.kind, CommunicatorKind::Ssh);
    assert_eq!(config.provision.commands.len(), 1);
    assert_eq!(
        config.pipeline_config().cleanup_timeout,
        Duration::from_secs(300)
    );
    assert!(!config.pipeline_config().teardown_on_success);
}

#[test]
#[serial]
fn test_environment_overrides_file_values() {
    let file = write_config(FULL_CONFIG);
    let _guard = EnvGuard::set(&[("POWERVS_API_KEY", "env-key"), ("POWERVS_ZONE", "syd04")]);

    let config = BuildConfig::load(file.path()).unwrap();
    assert_eq!(config.access.api_key.expose(), "env-key");
    assert_eq!(config.region(), "syd");
}

#[test]
#[serial]
fn test_secrets_are_not_printed() {
    let file = write_config(FULL_CONFIG);
    let config = BuildConfig::load(file.path()).unwrap();

    let rendered = format!("{:?}\n{}", config, config);
    assert!(!rendered.contains("file-key"));
    assert!(!rendered.contains("hmac-secret"));
    assert!(!rendered.contains("hmac-access"));
}

#[test]
#[serial]
fn test_missing_file_reports_path() {
    let err = BuildConfig::load(std::path::Path::new("/nonexistent/build.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
    assert!(err.to_string().contains("/nonexistent/build.toml"));
}

#[test]
#[serial]
fn test_capture_to_cloud_storage_requires_credentials() {
    let content = FULL_CONFIG.replace(
        "[capture.cos]\nbucket = \"captures\"\nregion = \"us-east\"\naccess_key = \"hmac-access\"\nsecret_key = \"hmac-secret\"\n",
        "",
    );
    let file = write_config(&content);

    let err = BuildConfig::load(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationFailed(_)), "{:?}", err);
}
