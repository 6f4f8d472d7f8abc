//! Profiling utilities (§10.7): `profile_columns`, `profile_table`, and
//! `sample_data`, independent of the Quality Scanner's findings pipeline.
//! Supplementary diagnostics, not part of the fixed ingestion sequence.

use datafusion::arrow::array::{Array, Float64Array, Int64Array, StringArray, UInt64Array};
use datafusion::arrow::record_batch::RecordBatch;
use pipeline_core::{PipelineError, Result};
use pipeline_io::AnalyticSession;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnStat {
    pub column: String,
    pub column_type: String,
    pub approx_unique: Option<u64>,
    pub null_percentage: f64,
    pub min: Option<String>,
    pub max: Option<String>,
    pub avg: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeCoercionSuggestion {
    pub column: String,
    pub suggested_types: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub table_name: String,
    pub total_rows: u64,
    pub total_columns: u64,
    pub column_stats: Vec<ColumnStat>,
    pub type_coercion_suggestions: Vec<TypeCoercionSuggestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NullSummaryEntry {
    pub column: String,
    pub null_count: u64,
    pub null_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaEntry {
    pub name: String,
    pub column_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableProfile {
    pub table_name: String,
    pub total_rows: u64,
    pub total_columns: u64,
    pub schema: Vec<SchemaEntry>,
    pub null_summary: Vec<NullSummaryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataSample {
    pub table_name: String,
    pub rows_returned: u64,
    pub sample: String,
}

/// Per-column statistics in one batch operation, plus type-coercion
/// suggestions for VARCHAR columns that look numeric or date-like.
pub async fn profile_columns(session: &AnalyticSession, table_name: &str) -> Result<ColumnProfile> {
    let total_rows = session.row_count(table_name).await?;
    let columns = session.column_names(table_name).await?;

    let describe_batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let schema = describe_batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| std::sync::Arc::new(datafusion::arrow::datatypes::Schema::empty()));

    let mut column_stats = Vec::new();
    let mut type_coercion_suggestions = Vec::new();

    for column in &columns {
        let arrow_type = schema
            .field_with_name(column)
            .map(|f| f.data_type().clone())
            .unwrap_or(datafusion::arrow::datatypes::DataType::Utf8);

        let sql = format!(
            "SELECT COUNT(*) - COUNT(\"{column}\") AS null_count, \
             approx_distinct(\"{column}\") AS approx_unique, \
             MIN(\"{column}\") AS min_v, MAX(\"{column}\") AS max_v, \
             AVG(try_cast(\"{column}\" AS DOUBLE)) AS avg_v \
             FROM {table_name}"
        );
        let batches = session.execute_unchecked(&sql).await?;
        let row = first_row(&batches);

        let null_count = row.as_ref().and_then(|b| scalar_i64(b, 0)).unwrap_or(0).max(0) as u64;
        let null_percentage = if total_rows == 0 {
            0.0
        } else {
            (null_count as f64 * 100.0 / total_rows as f64 * 100.0).round() / 100.0
        };

        column_stats.push(ColumnStat {
            column: column.clone(),
            column_type: format!("{arrow_type:?}"),
            approx_unique: row.as_ref().and_then(|b| scalar_u64(b, 1)),
            null_percentage,
            min: row.as_ref().and_then(|b| scalar_string(b, 2)),
            max: row.as_ref().and_then(|b| scalar_string(b, 3)),
            avg: row.as_ref().and_then(|b| scalar_f64(b, 4)).map(|v| v.to_string()),
        });

        if !matches!(arrow_type, datafusion::arrow::datatypes::DataType::Utf8) {
            continue;
        }

        let potential_sql = format!(
            "SELECT \
             COUNT(*) FILTER (WHERE try_cast(regexp_replace(\"{column}\", '[$%,]', '', 'g') AS DOUBLE) IS NOT NULL) AS number_count, \
             COUNT(*) FILTER (WHERE try_cast(\"{column}\" AS DATE) IS NOT NULL) AS date_count, \
             COUNT(*) FILTER (WHERE \"{column}\" IS NOT NULL) AS non_null_count \
             FROM {table_name}"
        );
        let potential_batches = session.execute_unchecked(&potential_sql).await?;
        let potential_row = match first_row(&potential_batches) {
            Some(row) => row,
            None => continue,
        };
        let non_null_count = scalar_i64(&potential_row, 2).unwrap_or(0).max(0) as u64;
        if non_null_count == 0 {
            continue;
        }
        let number_count = scalar_i64(&potential_row, 0).unwrap_or(0).max(0) as u64;
        let date_count = scalar_i64(&potential_row, 1).unwrap_or(0).max(0) as u64;

        let mut suggested_types = Vec::new();
        if number_count as f64 / non_null_count as f64 > 0.9 {
            suggested_types.push("DOUBLE");
        }
        if date_count as f64 / non_null_count as f64 > 0.9 {
            suggested_types.push("DATE");
        }
        if !suggested_types.is_empty() {
            type_coercion_suggestions.push(TypeCoercionSuggestion {
                column: column.clone(),
                suggested_types,
            });
        }
    }

    Ok(ColumnProfile {
        table_name: table_name.to_string(),
        total_rows,
        total_columns: columns.len() as u64,
        column_stats,
        type_coercion_suggestions,
    })
}

/// Table-level summary: row count, column count, and a per-column null
/// summary.
pub async fn profile_table(session: &AnalyticSession, table_name: &str) -> Result<TableProfile> {
    let total_rows = session.row_count(table_name).await?;
    let columns = session.column_names(table_name).await?;

    let describe_batches = session
        .execute_unchecked(&format!("SELECT * FROM {table_name} LIMIT 0"))
        .await?;
    let arrow_schema = describe_batches
        .first()
        .map(|b| b.schema())
        .unwrap_or_else(|| std::sync::Arc::new(datafusion::arrow::datatypes::Schema::empty()));

    let mut schema = Vec::new();
    let mut null_summary = Vec::new();

    for column in &columns {
        let column_type = arrow_schema
            .field_with_name(column)
            .map(|f| format!("{:?}", f.data_type()))
            .unwrap_or_else(|_| "Utf8".to_string());
        schema.push(SchemaEntry {
            name: column.clone(),
            column_type,
        });

        let sql = format!("SELECT COUNT(*) - COUNT(\"{column}\") AS null_count FROM {table_name}");
        let batches = session.execute_unchecked(&sql).await?;
        let null_count = first_row(&batches)
            .and_then(|row| scalar_i64(&row, 0))
            .unwrap_or(0)
            .max(0) as u64;
        let null_percentage = if total_rows == 0 {
            0.0
        } else {
            (null_count as f64 * 100.0 / total_rows as f64 * 100.0).round() / 100.0
        };
        null_summary.push(NullSummaryEntry {
            column: column.clone(),
            null_count,
            null_percentage,
        });
    }

    Ok(TableProfile {
        table_name: table_name.to_string(),
        total_rows,
        total_columns: columns.len() as u64,
        schema,
        null_summary,
    })
}

/// N sample rows rendered as a markdown table, clamped to `[1, 100]`.
pub async fn sample_data(session: &AnalyticSession, table_name: &str, n: u32) -> Result<DataSample> {
    let limit = n.clamp(1, 100) as usize;
    let markdown = session.markdown_snapshot(table_name, limit).await?;
    let row_count_sql = format!("SELECT COUNT(*) AS n FROM (SELECT * FROM {table_name} LIMIT {limit})");
    let batches = session.execute_unchecked(&row_count_sql).await?;
    let rows_returned = first_row(&batches)
        .and_then(|row| scalar_i64(&row, 0))
        .unwrap_or(0)
        .max(0) as u64;

    Ok(DataSample {
        table_name: table_name.to_string(),
        rows_returned,
        sample: markdown,
    })
}

pub fn table_not_found(table_name: &str) -> PipelineError {
    PipelineError::validation(format!("table '{table_name}' not found; use load_file first"))
}

fn first_row(batches: &[RecordBatch]) -> Option<RecordBatch> {
    batches.iter().find(|b| b.num_rows() > 0).cloned()
}

fn scalar_i64(batch: &RecordBatch, col: usize) -> Option<i64> {
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

fn scalar_u64(batch: &RecordBatch, col: usize) -> Option<u64> {
    scalar_i64(batch, col).map(|v| v.max(0) as u64)
}

fn scalar_f64(batch: &RecordBatch, col: usize) -> Option<f64> {
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array.as_any().downcast_ref::<Float64Array>().map(|a| a.value(0))
}

fn scalar_string(batch: &RecordBatch, col: usize) -> Option<String> {
    if batch.num_rows() == 0 {
        return None;
    }
    let array = batch.column(col);
    if array.is_null(0) {
        return None;
    }
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .map(|a| a.value(0).to_string())
        .or_else(|| {
            use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
            ArrayFormatter::try_new(array.as_ref(), &FormatOptions::default())
                .ok()
                .map(|f| f.value(0).to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[tokio::test]
    async fn profile_table_reports_schema_and_nulls() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("note", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, None])),
            ],
        )
        .unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![batch]).unwrap();

        let profile = profile_table(&session, "t").await.unwrap();
        assert_eq!(profile.total_rows, 3);
        assert_eq!(profile.total_columns, 2);
        let note_nulls = profile
            .null_summary
            .iter()
            .find(|n| n.column == "note")
            .unwrap();
        assert_eq!(note_nulls.null_count, 2);
    }

    #[tokio::test]
    async fn sample_data_clamps_to_max_rows() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2]))]).unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![batch]).unwrap();

        let sample = sample_data(&session, "t", 500).await.unwrap();
        assert_eq!(sample.rows_returned, 2);
    }
}
