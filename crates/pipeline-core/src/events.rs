//! Wire contracts for the pipeline's external collaborators (§6): the
//! inbound object-created event, the outbound load request, and the
//! outbound completion/failure events. The object-storage event source,
//! message bus, and state registry that carry these are out of scope; only
//! their shapes are specified here.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inbound object-created event. `name` is the full object key within
/// `bucket`, e.g. `orders/2024-01.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub bucket: String,
    pub name: String,
    pub size: u64,
}

impl InputEvent {
    /// Directories and dotfiles are not ingestible; the orchestrator skips
    /// them before doing any work.
    pub fn should_skip(&self) -> bool {
        self.name.ends_with('/') || self.name.rsplit('/').next().is_some_or(|n| n.starts_with('.'))
    }

    /// Target table name: the first path segment, or the filename stem if
    /// the object key has only one segment.
    pub fn target_table(&self) -> String {
        let mut segments = self.name.split('/');
        let first = segments.next().unwrap_or_default();
        if segments.clone().next().is_some() {
            first.to_string()
        } else {
            std::path::Path::new(first)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(first)
                .to_string()
        }
    }

    /// The full `gs://bucket/name` URI this event refers to.
    pub fn uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.name)
    }

    /// SHA-256 of the object's URI, the stable identifier carried through
    /// every downstream event for this file.
    pub fn file_hash(&self) -> String {
        file_hash(&self.uri())
    }
}

pub fn file_hash(uri: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(uri.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Write mode for a lakehouse load request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMode {
    Append,
    Overwrite,
    Upsert,
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::Append
    }
}

/// Outbound request asking the (external) lakehouse loader to merge a
/// staged Parquet file into a target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub file_hash: String,
    pub parquet_uri: String,
    pub target_namespace: String,
    pub target_table: String,
    pub original_file_uri: String,
    #[serde(default)]
    pub write_mode: WriteMode,
    pub row_count: u64,
    #[serde(default)]
    pub upsert_keys: Vec<String>,
}

impl LoadRequest {
    pub fn new(
        file_hash: String,
        parquet_uri: String,
        target_namespace: String,
        target_table: String,
        original_file_uri: String,
        row_count: u64,
    ) -> Self {
        Self {
            event_type: "LOAD_REQUEST".to_string(),
            file_hash,
            parquet_uri,
            target_namespace,
            target_table,
            original_file_uri,
            write_mode: WriteMode::Append,
            row_count,
            upsert_keys: Vec::new(),
        }
    }

    /// Validates the request the way the source's `parse_load_request`
    /// does: required fields must be present (enforced by the type system
    /// here) and UPSERT must carry at least one key.
    pub fn validate(&self) -> Result<()> {
        if self.write_mode == WriteMode::Upsert && self.upsert_keys.is_empty() {
            return Err(PipelineError::validation(
                "UPSERT write mode requires at least one upsert key",
            ));
        }
        Ok(())
    }
}

/// The four completion/failure event shapes the orchestrator and the
/// (external) lakehouse loader publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CompletionEvent {
    #[serde(rename = "AGENT_CLEANING_COMPLETE")]
    AgentCleaningComplete {
        file_hash: String,
        table_name: String,
        parquet_uri: String,
        row_count: u64,
    },
    #[serde(rename = "AGENT_CLEANING_FAILED")]
    AgentCleaningFailed {
        file_hash: String,
        error_stage: String,
        error_code: String,
        error_message: String,
    },
    #[serde(rename = "LOADER_BIGQUERY_COMPLETE")]
    LoaderBigqueryComplete {
        file_hash: String,
        target_namespace: String,
        target_table: String,
        iceberg_snapshot_id: String,
        write_mode: WriteMode,
        row_count_loaded: u64,
        original_file_uri: String,
        archive_uri: String,
        load_duration_seconds: f64,
    },
    #[serde(rename = "LOADER_BIGQUERY_FAILED")]
    LoaderBigqueryFailed {
        file_hash: String,
        target_namespace: String,
        target_table: String,
        parquet_uri: String,
        error_message: String,
        error_code: String,
        retry_count: u32,
        load_duration_seconds: f64,
    },
}

/// Envelope fields the publisher attaches at send time, not by the stage
/// that built the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedEvent {
    pub message_id: String,
    pub published_at: String,
    #[serde(flatten)]
    pub payload: CompletionEvent,
}

impl PublishedEvent {
    pub fn wrap(payload: CompletionEvent) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            published_at: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_directories_and_dotfiles() {
        let dir_event = InputEvent {
            bucket: "b".into(),
            name: "orders/".into(),
            size: 0,
        };
        assert!(dir_event.should_skip());

        let dotfile_event = InputEvent {
            bucket: "b".into(),
            name: "orders/.keep".into(),
            size: 0,
        };
        assert!(dotfile_event.should_skip());

        let real_event = InputEvent {
            bucket: "b".into(),
            name: "orders/2024-01.csv".into(),
            size: 10,
        };
        assert!(!real_event.should_skip());
    }

    #[test]
    fn target_table_uses_first_segment_or_stem() {
        let nested = InputEvent {
            bucket: "b".into(),
            name: "orders/2024-01.csv".into(),
            size: 10,
        };
        assert_eq!(nested.target_table(), "orders");

        let flat = InputEvent {
            bucket: "b".into(),
            name: "orders.csv".into(),
            size: 10,
        };
        assert_eq!(flat.target_table(), "orders");
    }

    #[test]
    fn upsert_without_keys_is_a_validation_error() {
        let mut req = LoadRequest::new(
            "hash".into(),
            "gs://staging/parquet/orders/orders.parquet".into(),
            "bronze".into(),
            "orders".into(),
            "gs://inbox/orders/orders.csv".into(),
            10,
        );
        req.write_mode = WriteMode::Upsert;
        assert!(req.validate().is_err());
        req.upsert_keys.push("id".into());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn file_hash_is_stable_sha256() {
        let event = InputEvent {
            bucket: "inbox".into(),
            name: "orders/2024-01.csv".into(),
            size: 10,
        };
        let hash_a = event.file_hash();
        let hash_b = file_hash(&event.uri());
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a.len(), 64);
    }
}
