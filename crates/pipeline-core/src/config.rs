//! Pipeline configuration: bucket names, connection handles, classifier
//! model identifiers. Loaded from a YAML file and layered with environment
//! overrides, the way the rest of this workspace's binaries load their
//! pipeline specs.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top-level pipeline configuration, deserialized from YAML and overridable
/// by `DATAGRUNT_*` environment variables via the layered `config` crate.
///
/// Every field here corresponds to a "Recognized environment option" in the
/// external-interfaces configuration contract. Missing required values fail
/// startup rather than falling back to a silent default.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    #[validate(length(min = 1))]
    pub inbox_bucket: String,
    #[validate(length(min = 1))]
    pub staging_bucket: String,
    #[validate(length(min = 1))]
    pub archive_bucket: String,
    #[validate(length(min = 1))]
    pub event_topic: String,
    #[validate(length(min = 1))]
    pub lakehouse_connection: String,
    #[validate(length(min = 1))]
    pub iceberg_base_path: String,

    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    #[serde(default)]
    pub output_dir: Option<String>,

    #[serde(default)]
    pub classifiers: ClassifierConfig,
}

/// Model identifiers for the external header-detection and PII-detection
/// classifiers. These name an external service; the pipeline never embeds
/// a model itself (see [`crate::classifier::Classifier`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_header_model")]
    pub header_detection_model: String,
    #[serde(default = "default_pii_model")]
    pub pii_detection_model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            header_detection_model: default_header_model(),
            pii_detection_model: default_pii_model(),
        }
    }
}

fn default_header_model() -> String {
    "header-detector-v1".to_string()
}

fn default_pii_model() -> String {
    "pii-detector-v1".to_string()
}

fn default_working_dir() -> String {
    "/tmp/datagrunt".to_string()
}

impl PipelineConfig {
    /// Load configuration from a YAML file, then layer `DATAGRUNT_*`
    /// environment variables on top (e.g. `DATAGRUNT_INBOX_BUCKET`).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("DATAGRUNT").separator("__"));

        let settings = builder
            .build()
            .map_err(|e| PipelineError::validation(format!("failed to load config: {e}")))?;

        let parsed: PipelineConfig = settings
            .try_deserialize()
            .map_err(|e| PipelineError::validation(format!("invalid config: {e}")))?;

        parsed
            .validate()
            .map_err(|e| PipelineError::validation(format!("config validation failed: {e}")))?;

        Ok(parsed)
    }

    pub fn output_dir(&self) -> String {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
inbox_bucket: my-inbox
staging_bucket: my-staging
archive_bucket: my-archive
event_topic: pipeline-events
lakehouse_connection: my-project.us-central1.biglake-conn
iceberg_base_path: gs://iceberg-warehouse
"#
    }

    #[test]
    fn loads_with_defaults() {
        let cfg: PipelineConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(cfg.working_dir, "/tmp/datagrunt");
        assert_eq!(cfg.output_dir(), "/tmp/datagrunt");
        assert_eq!(cfg.classifiers.header_detection_model, "header-detector-v1");
    }

    #[test]
    fn rejects_empty_required_field() {
        let mut cfg: PipelineConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        cfg.inbox_bucket = String::new();
        assert!(cfg.validate().is_err());
    }
}
