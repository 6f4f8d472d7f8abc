//! Report Builders (§4.K): wires Quality Scanner and Cleaning Engine
//! output into the two persisted report shapes and writes them to a
//! working directory keyed by the source stem.

use crate::cleaner::CleanOutcome;
use crate::scanner::ScanOutcome;
use pipeline_core::report::{
    CleaningReport, CleaningSourceMeta, IngestionSummary, ParquetExportStatus, PipelineStatus,
    QualityReport, SourceMeta, StageStatus,
};
use pipeline_core::{PipelineError, Result, SeverityCounts};
use std::path::{Path, PathBuf};
use tracing::instrument;

/// Builds the quality report from one scan pass and the ingestion
/// metadata the loader recorded.
pub fn build_quality_report(
    source: SourceMeta,
    ingestion: IngestionSummary,
    scan: &ScanOutcome,
    parquet_export: ParquetExportStatus,
) -> QualityReport {
    let mut severity_counts = SeverityCounts::default();
    for finding in &scan.findings {
        severity_counts.record(finding.severity);
    }

    let pipeline = PipelineStatus {
        processed_at: Some(chrono::Utc::now().to_rfc3339()),
        parquet_export,
        quality_scan: StageStatus {
            status: "completed".to_string(),
        },
    };

    QualityReport::new(
        source,
        ingestion,
        scan.schema.clone(),
        scan.findings.clone(),
        severity_counts,
        pipeline,
    )
}

/// Builds the cleaning report from the cleaning outcome, the pre-clean
/// row/column counts, and the number of findings the cleaner consumed.
pub fn build_cleaning_report(
    source: CleaningSourceMeta,
    before_rows: u64,
    before_columns: u64,
    clean: CleanOutcome,
    quality_findings_input: u64,
) -> CleaningReport {
    CleaningReport::new(
        source,
        before_rows,
        clean.after_rows,
        before_columns,
        clean.after_columns,
        clean.operations,
        clean.pii_entries,
        clean.identifier_columns,
        clean.numeric_precision_flags,
        quality_findings_input,
    )
}

/// Persists `report` as `<working_dir>/<stem>_quality.json`.
#[instrument(skip(report))]
pub fn write_quality_report(working_dir: &Path, stem: &str, report: &QualityReport) -> Result<PathBuf> {
    write_report_json(working_dir, &format!("{stem}_quality.json"), report)
}

/// Persists `report` as `<working_dir>/<stem>_cleaning.json`.
#[instrument(skip(report))]
pub fn write_cleaning_report(working_dir: &Path, stem: &str, report: &CleaningReport) -> Result<PathBuf> {
    write_report_json(working_dir, &format!("{stem}_cleaning.json"), report)
}

fn write_report_json<T: serde::Serialize>(
    working_dir: &Path,
    file_name: &str,
    report: &T,
) -> Result<PathBuf> {
    std::fs::create_dir_all(working_dir)?;
    let path = working_dir.join(file_name);
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| PipelineError::external("report_builder", anyhow::anyhow!(e)))?;
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::model::{Finding, FindingCategory, Severity};

    fn sample_scan() -> ScanOutcome {
        ScanOutcome {
            findings: vec![Finding {
                severity: Severity::Warning,
                category: FindingCategory::ConstantColumns {
                    columns: vec!["flag".to_string()],
                },
            }],
            schema: vec![],
        }
    }

    #[test]
    fn quality_report_overall_status_reflects_findings() {
        let source = SourceMeta {
            file_path: "f.csv".to_string(),
            file_name: "f.csv".to_string(),
            detected_format: "CSV".to_string(),
            detected_encoding: None,
            size_bytes: 10,
        };
        let ingestion = IngestionSummary {
            status: "loaded".to_string(),
            table_name: "t".to_string(),
            source_row_count: 3,
            loaded_row_count: 3,
            empty_rows_removed: 0,
            rows_lost: 0,
            delimiter: Some(",".to_string()),
            parse_strategy: Some("fast_path".to_string()),
            is_header_detected: Some(true),
            columns_renamed: Default::default(),
            types_coerced: Default::default(),
            overflow_columns_repaired: vec![],
            overflow_rows_flagged: 0,
            json_repair: None,
            is_lossy_transcode: false,
        };
        let parquet_export = ParquetExportStatus {
            status: "completed".to_string(),
            output_path: Some("t.parquet".to_string()),
            size_bytes: Some(512),
        };
        let report = build_quality_report(source, ingestion, &sample_scan(), parquet_export);
        assert_eq!(report.overall_status, "warn");
    }

    #[test]
    fn reports_are_written_to_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = SourceMeta {
            file_path: "f.csv".to_string(),
            file_name: "f.csv".to_string(),
            detected_format: "CSV".to_string(),
            detected_encoding: None,
            size_bytes: 10,
        };
        let ingestion = IngestionSummary {
            status: "loaded".to_string(),
            table_name: "t".to_string(),
            source_row_count: 3,
            loaded_row_count: 3,
            empty_rows_removed: 0,
            rows_lost: 0,
            delimiter: None,
            parse_strategy: None,
            is_header_detected: None,
            columns_renamed: Default::default(),
            types_coerced: Default::default(),
            overflow_columns_repaired: vec![],
            overflow_rows_flagged: 0,
            json_repair: None,
            is_lossy_transcode: false,
        };
        let parquet_export = ParquetExportStatus {
            status: "completed".to_string(),
            output_path: None,
            size_bytes: None,
        };
        let report = build_quality_report(source, ingestion, &sample_scan(), parquet_export);
        let path = write_quality_report(dir.path(), "f", &report).unwrap();
        assert!(path.exists());
    }
}
