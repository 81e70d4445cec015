//! Rendering of build results for the terminal

use anyhow::{Context, Result};

use super::commands::OutputFormatArg;
use crate::artifact::Artifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// Human-readable formatted text
    Human,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_artifact(&self, artifact: &Artifact) -> Result<String> {
        match self.format {
            OutputFormat::Json => artifact
                .to_json()
                .context("Failed to serialize artifact to JSON"),
            OutputFormat::Human => Ok(Self::format_artifact_human(artifact)),
        }
    }

    fn format_artifact_human(artifact: &Artifact) -> String {
        let mut output = String::new();
        output.push_str(&format!("Build '{}' finished.\n", artifact.builder_id));
        output.push_str(&format!("  {}\n", artifact));
        if let Some(source) = &artifact.source_image {
            output.push_str(&format!("  Source image: {}\n", source));
        }
        output.push_str(&format!(
            "  Created at: {}\n",
            artifact.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        if !artifact.generated_data.is_empty() {
            output.push_str("  Generated data:\n");
            for (key, value) in &artifact.generated_data {
                output.push_str(&format!("    {}: {}\n", key, value));
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureDestination;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn artifact() -> Artifact {
        Artifact {
            builder_id: "powervs.builder".to_string(),
            capture_name: "golden".to_string(),
            destination: CaptureDestination::Both,
            capture_job_id: Some("job-1".to_string()),
            instance_id: None,
            source_image: Some("rhel-9".to_string()),
            created_at: Utc::now(),
            generated_data: BTreeMap::from([("Host".to_string(), "169.48.0.4".to_string())]),
        }
    }

    #[test]
    fn test_human_output() {
        let output = OutputFormatter::new(OutputFormat::Human)
            .format_artifact(&artifact())
            .unwrap();
        assert!(output.contains("Captured image 'golden' (both)"));
        assert!(output.contains("Source image: rhel-9"));
        assert!(output.contains("Host: 169.48.0.4"));
    }

    #[test]
    fn test_json_output() {
        let output = OutputFormatter::new(OutputFormat::Json)
            .format_artifact(&artifact())
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["capture_job_id"], "job-1");
    }
}
