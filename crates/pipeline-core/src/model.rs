//! Domain model shared by every stage: file classification, the analytic
//! session's table registry, and the tagged-union findings/operations that
//! flow from the Quality Scanner into the Cleaning Engine and the reports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A file's classified format. Each tag knows whether the analytic engine
/// can load it natively and whether it is binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Csv,
    Tsv,
    Json,
    Jsonl,
    Parquet,
    Excel,
    Unknown,
}

impl FileFormat {
    pub fn is_native_loadable(&self) -> bool {
        !matches!(self, FileFormat::Unknown)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FileFormat::Parquet | FileFormat::Excel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "CSV",
            FileFormat::Tsv => "TSV",
            FileFormat::Json => "JSON",
            FileFormat::Jsonl => "JSONL",
            FileFormat::Parquet => "PARQUET",
            FileFormat::Excel => "EXCEL",
            FileFormat::Unknown => "UNKNOWN",
        }
    }
}

/// Registry entry for one table held by the analytic session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    pub source_path: String,
    pub source_format: FileFormat,
    pub row_count: u64,
    pub column_count: u64,
    /// Row count of the raw source file, when known independently of the
    /// loaded row count (used for atomic-load reconciliation).
    pub source_row_count: u64,
}

/// Severity assigned to a [`Finding`] or derived into report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A suggested cast for a VARCHAR column, computed by the Quality Scanner
/// and consumed by the Cleaning Engine's type-coercion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SuggestedCast {
    Double,
    Date,
    Boolean,
}

/// Tagged union over the seven finding categories the Quality Scanner
/// produces. Every step downstream pattern-matches on this rather than a
/// loosely typed dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FindingCategory {
    NullAnalysis {
        column: String,
        null_count: u64,
        null_rate: f64,
    },
    NullLikeStrings {
        column: String,
        total_count: u64,
        values: HashMap<String, u64>,
    },
    Whitespace {
        column: String,
        affected_count: u64,
        affected_rate: f64,
    },
    TypeAnalysis {
        column: String,
        numeric_castable_rate: f64,
        date_castable_rate: f64,
        boolean_castable_rate: f64,
        leading_zero_count: u64,
        suggested_cast: Option<SuggestedCast>,
    },
    ConstantColumns {
        columns: Vec<String>,
    },
    Duplicates {
        approximate_count: u64,
    },
    Outliers {
        column: String,
        outlier_count: u64,
        lower_bound: f64,
        upper_bound: f64,
    },
}

/// A single finding produced by the Quality Scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    #[serde(flatten)]
    pub category: FindingCategory,
}

impl Finding {
    /// The column this finding is about, when it names exactly one.
    pub fn primary_column(&self) -> Option<&str> {
        match &self.category {
            FindingCategory::NullAnalysis { column, .. }
            | FindingCategory::NullLikeStrings { column, .. }
            | FindingCategory::Whitespace { column, .. }
            | FindingCategory::TypeAnalysis { column, .. }
            | FindingCategory::Outliers { column, .. } => Some(column),
            FindingCategory::ConstantColumns { .. } | FindingCategory::Duplicates { .. } => None,
        }
    }
}

/// Severity counts, used to derive `overall_status` for both reports.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub info: u64,
    pub warning: u64,
    pub critical: u64,
}

impl SeverityCounts {
    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Info => self.info += 1,
            Severity::Warning => self.warning += 1,
            Severity::Critical => self.critical += 1,
        }
    }

    /// (critical>0 -> fail) and (critical=0 and warning>0 -> warn) and
    /// (critical=0 and warning=0 -> pass).
    pub fn overall_status(&self) -> (&'static str, Option<String>) {
        if self.critical > 0 {
            ("fail", Some(format!("{} critical finding(s)", self.critical)))
        } else if self.warning > 0 {
            ("warn", Some(format!("{} warning finding(s)", self.warning)))
        } else {
            ("pass", None)
        }
    }
}

/// The 12 canonical cleaning step tags, in their fixed order. Used both to
/// drive the Cleaning Engine and to assert the subsequence property in
/// tests.
pub const CANONICAL_OPERATION_ORDER: &[&str] = &[
    "unknown_char_replacement",
    "whitespace_trimming",
    "empty_string_normalization",
    "null_like_normalization",
    "date_standardization",
    "type_coercion",
    "mixed_case_normalization",
    "soft_dedup",
    "high_null_column_removal",
    "constant_column_removal",
    "pii_detection",
    "numeric_precision_flag",
];

/// One record produced by a Cleaning Engine step. `operation` must be one of
/// [`CANONICAL_OPERATION_ORDER`]; `metrics` carries step-specific detail as
/// a JSON object, matching the source's loosely typed per-step payloads
/// without forcing every step into one rigid struct shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation: String,
    pub columns: Vec<String>,
    #[serde(flatten)]
    pub metrics: serde_json::Value,
}

/// An identifier column preserved as text because its values carry leading
/// zeros (zip codes, phone numbers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierColumn {
    pub column: String,
    pub pattern: String,
    pub preserved_as: String,
}

/// A flagged PII column from the best-effort external classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFinding {
    pub column: String,
    pub pii_type: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiReportEntry {
    pub column: String,
    pub pii_type: String,
    pub confidence: f64,
    pub recommendation: String,
}

/// A precision mismatch across a numeric column's observed decimal places.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericPrecisionFlag {
    pub column: String,
    pub min_decimals: i64,
    pub max_decimals: i64,
    pub recommendation: String,
}

pub const SCHEMA_VERSION: &str = "1.0.0";

pub fn generate_report_id(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_counts_overall_status() {
        let mut counts = SeverityCounts::default();
        assert_eq!(counts.overall_status().0, "pass");
        counts.record(Severity::Warning);
        assert_eq!(counts.overall_status().0, "warn");
        counts.record(Severity::Critical);
        assert_eq!(counts.overall_status().0, "fail");
    }

    #[test]
    fn canonical_order_has_twelve_steps() {
        assert_eq!(CANONICAL_OPERATION_ORDER.len(), 12);
    }
}
