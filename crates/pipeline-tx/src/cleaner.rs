//! Cleaning Engine (§4.J): a strict, ordered, idempotent protocol over a
//! scanned table. Every step is row-preserving; no step ever deletes a
//! row. Order follows [`CANONICAL_OPERATION_ORDER`] exactly and a step
//! that performs no action is simply omitted from the returned
//! operations list.

use datafusion::arrow::array::{Array, StringArray};
use datafusion::arrow::record_batch::RecordBatch;
use pipeline_core::model::{FindingCategory, IdentifierColumn, NumericPrecisionFlag, PiiFinding, SuggestedCast};
use pipeline_core::{Classifier, ColumnSample, Finding, OperationRecord, Result};
use pipeline_core::classifier::detect_pii_fail_open;
use pipeline_io::AnalyticSession;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

const PROTECTED_COLUMNS: &[&str] = &["processed_at", "is_duplicate"];
const MOJIBAKE_TABLE: &[(&str, &str)] = &[
    ("\u{00e2}\u{20ac}\u{2122}", "'"),
    ("\u{00e2}\u{20ac}\u{0153}", "\u{201c}"),
    ("\u{00e2}\u{20ac}\u{009d}", "\u{201d}"),
    ("\u{00e2}\u{20ac}\u{201c}", "\u{2013}"),
    ("\u{00c3}\u{00a9}", "\u{00e9}"),
];

pub struct CleanOutcome {
    pub operations: Vec<OperationRecord>,
    pub identifier_columns: Vec<IdentifierColumn>,
    pub pii_entries: Vec<pipeline_core::model::PiiReportEntry>,
    pub numeric_precision_flags: Vec<NumericPrecisionFlag>,
    pub after_rows: u64,
    pub after_columns: u64,
}

#[instrument(skip(session, findings, classifier), fields(table_name))]
pub async fn clean_table(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
    classifier: &dyn Classifier,
) -> Result<CleanOutcome> {
    let mut operations = Vec::new();
    let mut identifier_columns = Vec::new();
    let mut numeric_precision_flags = Vec::new();

    let varchar_columns = varchar_columns(session, table_name).await?;

    if let Some(op) = unknown_char_replacement(session, table_name, &varchar_columns).await? {
        operations.push(op);
    }
    if let Some(op) = whitespace_trim(session, table_name, &varchar_columns).await? {
        operations.push(op);
    }
    if let Some(op) = empty_to_null(session, table_name, &varchar_columns).await? {
        operations.push(op);
    }
    if let Some(op) = null_like_normalization(session, table_name, findings).await? {
        operations.push(op);
    }
    if let Some(op) = date_standardization(session, table_name, findings).await? {
        operations.push(op);
    }
    let (coercion_op, skipped_identifiers) =
        type_coercion(session, table_name, findings).await?;
    identifier_columns.extend(skipped_identifiers);
    if let Some(op) = coercion_op {
        operations.push(op);
    }
    if let Some(op) = mixed_case_normalization(session, table_name, &varchar_columns).await? {
        operations.push(op);
    }
    if let Some(op) = soft_dedup(session, table_name, findings).await? {
        operations.push(op);
    }
    if let Some(op) = high_null_column_removal(session, table_name, findings).await? {
        operations.push(op);
    }
    if let Some(op) = constant_column_removal(session, table_name, findings).await? {
        operations.push(op);
    }
    let (pii_op, pii_entries) = pii_detection(session, table_name, classifier).await?;
    if let Some(op) = pii_op {
        operations.push(op);
    }
    let (precision_op, flags) = numeric_precision_flag(session, table_name).await?;
    numeric_precision_flags = flags;
    if let Some(op) = precision_op {
        operations.push(op);
    }

    let after_rows = session.row_count(table_name).await?;
    let after_columns = session.column_names(table_name).await?.len() as u64;

    Ok(CleanOutcome {
        operations,
        identifier_columns,
        pii_entries,
        numeric_precision_flags,
        after_rows,
        after_columns,
    })
}

async fn varchar_columns(session: &AnalyticSession, table_name: &str) -> Result<Vec<String>> {
    let batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| std::sync::Arc::new(datafusion::arrow::datatypes::Schema::empty()));
    Ok(schema
        .fields()
        .iter()
        .filter(|f| {
            matches!(f.data_type(), datafusion::arrow::datatypes::DataType::Utf8)
                && !PROTECTED_COLUMNS.contains(&f.name().as_str())
        })
        .map(|f| f.name().clone())
        .collect())
}

/// Step 1: replace the Unicode replacement character and a fixed table of
/// Windows-1252-derived mojibake sequences with their intended codepoints.
async fn unknown_char_replacement(
    session: &mut AnalyticSession,
    table_name: &str,
    columns: &[String],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for column in columns {
        let mut expr = format!("\"{column}\"");
        expr = format!("replace({expr}, '\u{fffd}', '')");
        for (bad, good) in MOJIBAKE_TABLE {
            expr = format!("replace({expr}, '{bad}', '{good}')");
        }
        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} WHERE \"{column}\" != {expr}"
        );
        let changed = scalar_count(session, &count_sql).await?;
        if changed > 0 {
            rebuild_with_expr(session, table_name, column, &expr).await?;
            touched.push(column.clone());
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "unknown_char_replacement".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 2: `v := trim(v)` where `v != trim(v)`.
async fn whitespace_trim(
    session: &mut AnalyticSession,
    table_name: &str,
    columns: &[String],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for column in columns {
        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} \
             WHERE \"{column}\" IS NOT NULL AND \"{column}\" != trim(\"{column}\")"
        );
        let changed = scalar_count(session, &count_sql).await?;
        if changed > 0 {
            rebuild_with_expr(session, table_name, column, &format!("trim(\"{column}\")")).await?;
            touched.push(column.clone());
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "whitespace_trimming".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 3: rows with `trim(v) = ''` become NULL.
async fn empty_to_null(
    session: &mut AnalyticSession,
    table_name: &str,
    columns: &[String],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for column in columns {
        let count_sql = format!(
            "SELECT COUNT(*) AS n FROM {table_name} WHERE trim(\"{column}\") = ''"
        );
        let changed = scalar_count(session, &count_sql).await?;
        if changed > 0 {
            let expr = format!(
                "CASE WHEN trim(\"{column}\") = '' THEN NULL ELSE \"{column}\" END"
            );
            rebuild_with_expr(session, table_name, column, &expr).await?;
            touched.push(column.clone());
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "empty_string_normalization".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 4: sentinel tokens from `NullLikeStrings` findings become NULL.
async fn null_like_normalization(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for finding in findings {
        if let FindingCategory::NullLikeStrings { column, values, .. } = &finding.category {
            if values.is_empty() {
                continue;
            }
            let tokens = values
                .keys()
                .map(|t| format!("'{t}'"))
                .collect::<Vec<_>>()
                .join(", ");
            let expr = format!(
                "CASE WHEN lower(trim(\"{column}\")) IN ({tokens}) THEN NULL ELSE \"{column}\" END"
            );
            rebuild_with_expr(session, table_name, column, &expr).await?;
            touched.push(column.clone());
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "null_like_normalization".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 5: columns flagged by type analysis with `date_castable_rate > 0.9`
/// are cast to DATE then formatted back to `YYYY-MM-DD` text.
async fn date_standardization(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for finding in findings {
        if let FindingCategory::TypeAnalysis {
            column,
            date_castable_rate,
            ..
        } = &finding.category
        {
            if *date_castable_rate > 0.9 {
                let expr = format!(
                    "to_char(try_cast(\"{column}\" AS DATE), '%Y-%m-%d')"
                );
                rebuild_with_expr(session, table_name, column, &expr).await?;
                touched.push(column.clone());
            }
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "date_standardization".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 6: cast columns with a suggested cast and zero leading zeros;
/// columns with leading zeros are recorded as identifier columns instead.
async fn type_coercion(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<(Option<OperationRecord>, Vec<IdentifierColumn>)> {
    let mut touched = HashMap::new();
    let mut identifier_columns = Vec::new();

    for finding in findings {
        if let FindingCategory::TypeAnalysis {
            column,
            suggested_cast,
            leading_zero_count,
            ..
        } = &finding.category
        {
            if *leading_zero_count > 0 {
                identifier_columns.push(IdentifierColumn {
                    column: column.clone(),
                    pattern: "leading_zero".to_string(),
                    preserved_as: "text".to_string(),
                });
                continue;
            }
            let target = match suggested_cast {
                Some(SuggestedCast::Date) => continue,
                Some(SuggestedCast::Double) => "DOUBLE",
                Some(SuggestedCast::Boolean) => "BOOLEAN",
                None => continue,
            };
            let expr = format!("try_cast(\"{column}\" AS {target})");
            rebuild_with_expr(session, table_name, column, &expr).await?;
            touched.insert(column.clone(), target.to_string());
        }
    }

    if touched.is_empty() {
        return Ok((None, identifier_columns));
    }
    Ok((
        Some(OperationRecord {
            operation: "type_coercion".to_string(),
            columns: touched.keys().cloned().collect(),
            metrics: json!({ "types_coerced": touched }),
        }),
        identifier_columns,
    ))
}

/// Step 7: lowercase VARCHAR columns with distinct count < 50 that contain
/// any value differing from its lowercase form.
async fn mixed_case_normalization(
    session: &mut AnalyticSession,
    table_name: &str,
    columns: &[String],
) -> Result<Option<OperationRecord>> {
    let mut touched = Vec::new();
    for column in columns {
        let sql = format!(
            "SELECT approx_distinct(\"{column}\") AS distinct_count, \
             COUNT(*) FILTER (WHERE \"{column}\" != lower(\"{column}\")) AS mixed_case_count \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let (distinct_count, mixed_case_count) = match first_row(&batches) {
            Some(row) => (
                scalar_i64(&row, 0).unwrap_or(i64::MAX),
                scalar_i64(&row, 1).unwrap_or(0),
            ),
            None => continue,
        };
        if distinct_count < 50 && mixed_case_count > 0 {
            rebuild_with_expr(session, table_name, column, &format!("lower(\"{column}\")")).await?;
            touched.push(column.clone());
        }
    }
    if touched.is_empty() {
        return Ok(None);
    }
    Ok(Some(OperationRecord {
        operation: "mixed_case_normalization".to_string(),
        columns: touched,
        metrics: json!({}),
    }))
}

/// Step 8: add a boolean `is_duplicate` column marking all-but-first
/// occurrence over the hash of non-protected columns. Never deletes rows.
async fn soft_dedup(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<Option<OperationRecord>> {
    let has_duplicates = findings
        .iter()
        .any(|f| matches!(f.category, FindingCategory::Duplicates { .. }));
    if !has_duplicates {
        return Ok(None);
    }

    let columns = session.column_names(table_name).await?;
    let compare_columns: Vec<&String> = columns
        .iter()
        .filter(|c| !PROTECTED_COLUMNS.contains(&c.as_str()))
        .collect();
    if compare_columns.is_empty() {
        return Ok(None);
    }
    let select_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let hash_expr = compare_columns
        .iter()
        .map(|c| format!("CAST(\"{c}\" AS VARCHAR)"))
        .collect::<Vec<_>>()
        .join(", '\u{1}', ");
    let sql = format!(
        "SELECT {select_list}, \
         ROW_NUMBER() OVER (PARTITION BY md5(concat_ws('', {hash_expr})) ORDER BY \"{pk}\") > 1 AS is_duplicate \
         FROM {table_name}",
        pk = columns[0]
    );
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(table_name, batches)?;

    Ok(Some(OperationRecord {
        operation: "soft_dedup".to_string(),
        columns: vec!["is_duplicate".to_string()],
        metrics: json!({}),
    }))
}

/// Step 9: drop columns with `null_rate > 0.9` (from findings).
async fn high_null_column_removal(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<Option<OperationRecord>> {
    let to_drop: Vec<&str> = findings
        .iter()
        .filter_map(|f| match &f.category {
            FindingCategory::NullAnalysis {
                column, null_rate, ..
            } if *null_rate > 0.9 => Some(column.as_str()),
            _ => None,
        })
        .collect();
    if to_drop.is_empty() {
        return Ok(None);
    }
    drop_columns(session, table_name, &to_drop).await?;
    Ok(Some(OperationRecord {
        operation: "high_null_column_removal".to_string(),
        columns: to_drop.iter().map(|c| c.to_string()).collect(),
        metrics: json!({}),
    }))
}

/// Step 10: drop columns named in the constant-columns finding.
async fn constant_column_removal(
    session: &mut AnalyticSession,
    table_name: &str,
    findings: &[Finding],
) -> Result<Option<OperationRecord>> {
    let to_drop: Vec<&str> = findings
        .iter()
        .filter_map(|f| match &f.category {
            FindingCategory::ConstantColumns { columns } => {
                Some(columns.iter().map(|c| c.as_str()))
            }
            _ => None,
        })
        .flatten()
        .collect();
    if to_drop.is_empty() {
        return Ok(None);
    }
    drop_columns(session, table_name, &to_drop).await?;
    Ok(Some(OperationRecord {
        operation: "constant_column_removal".to_string(),
        columns: to_drop.iter().map(|c| c.to_string()).collect(),
        metrics: json!({}),
    }))
}

/// Step 11: sample up to five distinct non-null values per column and
/// submit one combined classification request. Failures return an empty
/// list, never fatal (handled by the fail-open classifier wrapper).
async fn pii_detection(
    session: &AnalyticSession,
    table_name: &str,
    classifier: &dyn Classifier,
) -> Result<(Option<OperationRecord>, Vec<pipeline_core::model::PiiReportEntry>)> {
    let columns = session.column_names(table_name).await?;
    let mut samples = Vec::new();
    for column in &columns {
        if PROTECTED_COLUMNS.contains(&column.as_str()) {
            continue;
        }
        let sql = format!(
            "SELECT DISTINCT \"{column}\" AS v FROM {table_name} WHERE \"{column}\" IS NOT NULL LIMIT 5"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let values = string_values(&batches);
        if !values.is_empty() {
            samples.push(ColumnSample {
                column: column.clone(),
                values,
            });
        }
    }

    if samples.is_empty() {
        return Ok((None, Vec::new()));
    }

    let pii_findings: Vec<PiiFinding> = detect_pii_fail_open(classifier, &samples).await;
    if pii_findings.is_empty() {
        return Ok((None, Vec::new()));
    }

    let entries: Vec<pipeline_core::model::PiiReportEntry> = pii_findings
        .iter()
        .map(|f| pipeline_core::model::PiiReportEntry {
            column: f.column.clone(),
            pii_type: f.pii_type.clone(),
            confidence: f.confidence,
            recommendation: format!("mask or tokenize {} before downstream export", f.column),
        })
        .collect();

    let touched: Vec<String> = pii_findings.iter().map(|f| f.column.clone()).collect();
    Ok((
        Some(OperationRecord {
            operation: "pii_detection".to_string(),
            columns: touched,
            metrics: json!({}),
        }),
        entries,
    ))
}

/// Step 12: min/max decimal places observed per numeric column; flag when
/// they differ.
async fn numeric_precision_flag(
    session: &AnalyticSession,
    table_name: &str,
) -> Result<(Option<OperationRecord>, Vec<NumericPrecisionFlag>)> {
    let batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let schema = batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| std::sync::Arc::new(datafusion::arrow::datatypes::Schema::empty()));
    let numeric_columns: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| {
            matches!(
                f.data_type(),
                datafusion::arrow::datatypes::DataType::Float32
                    | datafusion::arrow::datatypes::DataType::Float64
            )
        })
        .map(|f| f.name().clone())
        .collect();

    let mut flags = Vec::new();
    let mut touched = Vec::new();
    for column in numeric_columns {
        let sql = format!(
            "SELECT \
             MIN(length(split_part(CAST(\"{column}\" AS VARCHAR), '.', 2))) AS min_d, \
             MAX(length(split_part(CAST(\"{column}\" AS VARCHAR), '.', 2))) AS max_d \
             FROM {table_name} WHERE \"{column}\" IS NOT NULL"
        );
        let result = session.execute_unchecked(&sql).await?;
        let row = match first_row(&result) {
            Some(row) => row,
            None => continue,
        };
        let min_d = scalar_i64(&row, 0).unwrap_or(0);
        let max_d = scalar_i64(&row, 1).unwrap_or(0);
        if min_d != max_d {
            flags.push(NumericPrecisionFlag {
                column: column.clone(),
                min_decimals: min_d,
                max_decimals: max_d,
                recommendation: format!(
                    "standardize {column} to a fixed number of decimal places"
                ),
            });
            touched.push(column);
        }
    }

    if flags.is_empty() {
        return Ok((None, flags));
    }
    Ok((
        Some(OperationRecord {
            operation: "numeric_precision_flag".to_string(),
            columns: touched,
            metrics: json!({}),
        }),
        flags,
    ))
}

async fn drop_columns(
    session: &mut AnalyticSession,
    table_name: &str,
    drop: &[&str],
) -> Result<()> {
    let remaining: Vec<String> = session
        .column_names(table_name)
        .await?
        .into_iter()
        .filter(|c| !drop.contains(&c.as_str()))
        .collect();
    let select_list = remaining
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {table_name}");
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(table_name, batches)?;
    Ok(())
}

/// Rebuilds `table_name` replacing `column` with `expr`, keeping every
/// other column unchanged and in its original position.
async fn rebuild_with_expr(
    session: &mut AnalyticSession,
    table_name: &str,
    column: &str,
    expr: &str,
) -> Result<()> {
    let columns = session.column_names(table_name).await?;
    let select_list = columns
        .iter()
        .map(|c| {
            if c == column {
                format!("{expr} AS \"{c}\"")
            } else {
                format!("\"{c}\"")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {table_name}");
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(table_name, batches)?;
    Ok(())
}

async fn scalar_count(session: &AnalyticSession, sql: &str) -> Result<i64> {
    let batches = session.execute_unchecked(sql).await?;
    Ok(first_row(&batches).and_then(|row| scalar_i64(&row, 0)).unwrap_or(0))
}

fn first_row(batches: &[RecordBatch]) -> Option<RecordBatch> {
    batches.iter().find(|b| b.num_rows() > 0).cloned()
}

fn scalar_i64(batch: &RecordBatch, col: usize) -> Option<i64> {
    use datafusion::arrow::array::{Int64Array, UInt64Array};
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<Int64Array>()
        .map(|a| a.value(0))
        .or_else(|| {
            array
                .as_any()
                .downcast_ref::<UInt64Array>()
                .map(|a| a.value(0) as i64)
        })
}

fn string_values(batches: &[RecordBatch]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for batch in batches {
        if let Some(array) = batch.column(0).as_any().downcast_ref::<StringArray>() {
            for i in 0..array.len() {
                if !array.is_null(i) {
                    let value = array.value(i).to_string();
                    if seen.insert(value.clone()) {
                        out.push(value);
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::classifier::HeaderVerdict;
    use pipeline_core::{FailOpenClassifier, Severity};
    use datafusion::arrow::array::{Int64Array as ArrowIntArray, StringArray as ArrowStrArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    struct AlwaysFlagsNameClassifier;

    #[async_trait::async_trait]
    impl Classifier for AlwaysFlagsNameClassifier {
        async fn detect_header(&self, _first_lines: &[String]) -> anyhow::Result<HeaderVerdict> {
            Ok(HeaderVerdict::Headers)
        }

        async fn detect_pii(&self, samples: &[ColumnSample]) -> anyhow::Result<Vec<PiiFinding>> {
            Ok(samples
                .iter()
                .filter(|s| s.column == "name")
                .map(|s| PiiFinding {
                    column: s.column.clone(),
                    pii_type: "person_name".to_string(),
                    confidence: 0.99,
                })
                .collect())
        }
    }

    fn dirty_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(ArrowIntArray::from(vec![1, 2, 3])),
                Arc::new(ArrowStrArray::from(vec![Some("  Bob "), Some("n/a"), Some("alice")])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn whitespace_and_null_like_are_cleaned() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![dirty_batch()]).unwrap();

        let columns = varchar_columns(&session, "t").await.unwrap();
        assert!(columns.contains(&"name".to_string()));

        let op = whitespace_trim(&mut session, "t", &columns).await.unwrap();
        assert!(op.is_some());

        let finding = Finding {
            severity: Severity::Warning,
            category: FindingCategory::NullLikeStrings {
                column: "name".to_string(),
                total_count: 1,
                values: HashMap::from([("n/a".to_string(), 1)]),
            },
        };
        let op = null_like_normalization(&mut session, "t", &[finding])
            .await
            .unwrap();
        assert!(op.is_some());

        let batches = session.execute_unchecked("SELECT name FROM t").await.unwrap();
        let values = string_values(&batches);
        assert!(values.contains(&"Bob".to_string()));
        assert!(values.contains(&"alice".to_string()));
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn no_findings_yields_no_operations() {
        let mut session = AnalyticSession::new();
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(ArrowIntArray::from(vec![1, 2, 3]))]).unwrap();
        session.register_table("t", vec![batch]).unwrap();

        let outcome = clean_table(&mut session, "t", &[], &FailOpenClassifier)
            .await
            .unwrap();
        assert!(outcome.operations.is_empty());
    }

    #[tokio::test]
    async fn injected_classifier_flags_pii_in_clean_table() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![dirty_batch()]).unwrap();

        let outcome = clean_table(&mut session, "t", &[], &AlwaysFlagsNameClassifier)
            .await
            .unwrap();
        assert_eq!(outcome.pii_entries.len(), 1);
        assert_eq!(outcome.pii_entries[0].column, "name");
        assert_eq!(outcome.pii_entries[0].pii_type, "person_name");
    }
}
