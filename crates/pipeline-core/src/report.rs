//! The two JSON report shapes produced by the Report Builders (§4.K): the
//! quality report and the cleaning report. Both carry a stable schema
//! version and a random `dqr_`/`dcr_`-prefixed report id.

use crate::model::{
    generate_report_id, Finding, IdentifierColumn, NumericPrecisionFlag, PiiReportEntry,
    SeverityCounts, SCHEMA_VERSION,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMeta {
    pub file_path: String,
    pub file_name: String,
    pub detected_format: String,
    pub detected_encoding: Option<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub status: String,
    pub table_name: String,
    pub source_row_count: u64,
    pub loaded_row_count: u64,
    pub empty_rows_removed: u64,
    pub rows_lost: u64,
    pub delimiter: Option<String>,
    pub parse_strategy: Option<String>,
    pub is_header_detected: Option<bool>,
    #[serde(default)]
    pub columns_renamed: HashMap<String, String>,
    #[serde(default)]
    pub types_coerced: HashMap<String, String>,
    #[serde(default)]
    pub overflow_columns_repaired: Vec<String>,
    #[serde(default)]
    pub overflow_rows_flagged: u64,
    pub json_repair: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_lossy_transcode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchemaEntry {
    pub column_name: String,
    pub column_type: String,
    pub null_count: u64,
    pub null_rate: f64,
    pub approx_unique: Option<u64>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub avg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetExportStatus {
    pub status: String,
    pub output_path: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub processed_at: Option<String>,
    pub parquet_export: ParquetExportStatus,
    pub quality_scan: StageStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatus {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySection {
    pub findings: Vec<Finding>,
    pub severity_counts: SeverityCounts,
}

/// Quality report: source metadata, ingestion summary, schema snapshot,
/// findings, pipeline status, and an overall pass/warn/fail verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub report_id: String,
    pub schema_version: String,
    pub generated_at: String,
    pub source: SourceMeta,
    pub ingestion: IngestionSummary,
    pub schema: Vec<ColumnSchemaEntry>,
    pub quality: QualitySection,
    pub pipeline: PipelineStatus,
    pub overall_status: String,
    pub overall_status_reason: Option<String>,
}

impl QualityReport {
    pub fn new(
        source: SourceMeta,
        ingestion: IngestionSummary,
        schema: Vec<ColumnSchemaEntry>,
        findings: Vec<Finding>,
        severity_counts: SeverityCounts,
        pipeline: PipelineStatus,
    ) -> Self {
        let (status, reason) = severity_counts.overall_status();
        Self {
            report_id: generate_report_id("dqr"),
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            source,
            ingestion,
            schema,
            quality: QualitySection {
                findings,
                severity_counts,
            },
            pipeline,
            overall_status: status.to_string(),
            overall_status_reason: reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningSourceMeta {
    pub file_path: String,
    pub file_name: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub before_rows: u64,
    pub after_rows: u64,
    pub before_columns: u64,
    pub after_columns: u64,
    pub columns_added: u64,
    pub columns_removed: u64,
    pub operations_applied: u64,
}

/// Cleaning report: before/after summary, the ordered operations list, and
/// the best-effort PII/identifier/precision annotations. `after_rows` is
/// the single authoritative row-count field; the source's `after.rows`
/// typo is not reproduced here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningReport {
    pub report_id: String,
    pub schema_version: String,
    pub generated_at: String,
    pub source: CleaningSourceMeta,
    pub summary: CleaningSummary,
    pub operations: Vec<crate::model::OperationRecord>,
    pub pii_detection: Vec<PiiReportEntry>,
    pub identifier_columns: Vec<IdentifierColumn>,
    pub numeric_precision_flags: Vec<NumericPrecisionFlag>,
    pub quality_findings_input: u64,
    pub overall_status: String,
}

impl CleaningReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: CleaningSourceMeta,
        before_rows: u64,
        after_rows: u64,
        before_columns: u64,
        after_columns: u64,
        operations: Vec<crate::model::OperationRecord>,
        pii_detection: Vec<PiiReportEntry>,
        identifier_columns: Vec<IdentifierColumn>,
        numeric_precision_flags: Vec<NumericPrecisionFlag>,
        quality_findings_input: u64,
    ) -> Self {
        let columns_added = after_columns.saturating_sub(before_columns);
        // mirrors the source's max(0, before - after + added)
        let columns_removed =
            (before_columns as i64 - after_columns as i64 + columns_added as i64).max(0) as u64;
        let overall_status = if operations.is_empty() {
            "no_action_needed"
        } else {
            "cleaned"
        };
        Self {
            report_id: generate_report_id("dcr"),
            schema_version: SCHEMA_VERSION.to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            source,
            summary: CleaningSummary {
                before_rows,
                after_rows,
                before_columns,
                after_columns,
                columns_added,
                columns_removed,
                operations_applied: operations.len() as u64,
            },
            operations,
            pii_detection,
            identifier_columns,
            numeric_precision_flags,
            quality_findings_input,
            overall_status: overall_status.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_operations_yields_no_action_needed() {
        let report = CleaningReport::new(
            CleaningSourceMeta {
                file_path: "f.csv".into(),
                file_name: "f.csv".into(),
                table_name: "t".into(),
            },
            5,
            5,
            4,
            4,
            vec![],
            vec![],
            vec![],
            vec![],
            0,
        );
        assert_eq!(report.overall_status, "no_action_needed");
        assert_eq!(report.summary.columns_added, 0);
        assert_eq!(report.summary.columns_removed, 0);
    }
}
