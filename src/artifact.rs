//! Result of a successful build

use crate::config::CaptureDestination;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Captured image produced by a build
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub builder_id: String,
    pub capture_name: String,
    pub destination: CaptureDestination,
    pub capture_job_id: Option<String>,
    pub instance_id: Option<String>,
    pub source_image: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Values recorded by the steps, keyed by their published names
    pub generated_data: BTreeMap<String, String>,
}

impl Artifact {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Captured image '{}' ({})",
            self.capture_name, self.destination
        )?;
        if let Some(job) = &self.capture_job_id {
            write!(f, ", capture job {}", job)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact {
            builder_id: "powervs.builder".to_string(),
            capture_name: "golden".to_string(),
            destination: CaptureDestination::ImageCatalog,
            capture_job_id: Some("job-7".to_string()),
            instance_id: Some("ins-1".to_string()),
            source_image: Some("centos-stream".to_string()),
            created_at: Utc::now(),
            generated_data: BTreeMap::from([("InstanceID".to_string(), "ins-1".to_string())]),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            artifact().to_string(),
            "Captured image 'golden' (image-catalog), capture job job-7"
        );
    }

    #[test]
    fn test_json_uses_kebab_destination() {
        let value: serde_json::Value = serde_json::from_str(&artifact().to_json().unwrap()).unwrap();
        assert_eq!(value["destination"], "image-catalog");
        assert_eq!(value["generated_data"]["InstanceID"], "ins-1");
    }
}
