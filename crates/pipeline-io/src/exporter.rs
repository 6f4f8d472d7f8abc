//! Canonical Exporter (§4.L) and ad hoc export utilities (§10.6).
//!
//! The canonical path always writes Parquet at `<output_dir>/<stem>.parquet`
//! through the engine's native write path; the ad hoc paths are operator
//! diagnostics reachable from the CLI, grounded in the source's
//! `export_csv`/`export_json`/`export_jsonl`/`export_excel` tool functions.

use crate::session::AnalyticSession;
use datafusion::dataframe::{DataFrameWriteOptions, DataFrame};
use pipeline_core::{PipelineError, Result};
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Jsonl,
    Excel,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub output_path: PathBuf,
    pub format: &'static str,
    pub rows_exported: u64,
}

/// Writes the cleaned table to `<output_dir>/<stem>.parquet` and reports
/// the byte size of the written file.
#[instrument(skip(session))]
pub async fn export_canonical_parquet(
    session: &AnalyticSession,
    table_name: &str,
    output_dir: &Path,
    stem: &str,
) -> Result<(PathBuf, u64)> {
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::external("export", e))?;
    let output_path = output_dir.join(format!("{stem}.parquet"));

    let df = table_dataframe(session, table_name).await?;
    df.write_parquet(
        output_path.to_string_lossy().as_ref(),
        DataFrameWriteOptions::new().with_single_file_output(true),
        None,
    )
    .await?;

    let size_bytes = std::fs::metadata(&output_path)
        .map_err(|e| PipelineError::external("export", e))?
        .len();
    Ok((output_path, size_bytes))
}

/// Ad hoc export of any registered table to CSV/JSON/JSONL/Excel, for
/// operator diagnostics. Not part of the orchestrator's fixed sequence.
#[instrument(skip(session))]
pub async fn export_table(
    session: &AnalyticSession,
    table_name: &str,
    format: ExportFormat,
    output_path: Option<PathBuf>,
) -> Result<ExportOutcome> {
    if !session.registered_tables().iter().any(|t| t == table_name) {
        return Err(PipelineError::validation(format!(
            "table '{table_name}' not found"
        )));
    }

    let (default_ext, label) = match format {
        ExportFormat::Csv => ("csv", "csv"),
        ExportFormat::Json => ("json", "json"),
        ExportFormat::Jsonl => ("jsonl", "jsonl"),
        ExportFormat::Excel => ("xlsx", "xlsx"),
    };
    let output_path =
        output_path.unwrap_or_else(|| PathBuf::from(format!("{table_name}_export.{default_ext}")));

    let df = table_dataframe(session, table_name).await?;

    match format {
        ExportFormat::Csv => {
            df.write_csv(
                output_path.to_string_lossy().as_ref(),
                DataFrameWriteOptions::new().with_single_file_output(true),
                None,
            )
            .await?;
        }
        ExportFormat::Json => {
            write_json_array(df, &output_path).await?;
        }
        ExportFormat::Jsonl => {
            write_jsonl(df, &output_path).await?;
        }
        ExportFormat::Excel => {
            write_excel(df, &output_path).await?;
        }
    }

    let rows_exported = session.row_count(table_name).await?;
    Ok(ExportOutcome {
        output_path,
        format: label,
        rows_exported,
    })
}

async fn table_dataframe(session: &AnalyticSession, table_name: &str) -> Result<DataFrame> {
    session.dataframe(&format!("SELECT * FROM {table_name}")).await
}

async fn write_json_array(df: DataFrame, output_path: &Path) -> Result<()> {
    let batches = df.collect().await?;
    let mut records = Vec::new();
    for batch in &batches {
        records.extend(batch_to_json_rows(batch)?);
    }
    let text = serde_json::to_string_pretty(&records)?;
    std::fs::write(output_path, text).map_err(|e| PipelineError::external("export", e))?;
    Ok(())
}

async fn write_jsonl(df: DataFrame, output_path: &Path) -> Result<()> {
    let batches = df.collect().await?;
    let mut out = String::new();
    for batch in &batches {
        for row in batch_to_json_rows(batch)? {
            out.push_str(&serde_json::to_string(&row)?);
            out.push('\n');
        }
    }
    std::fs::write(output_path, out).map_err(|e| PipelineError::external("export", e))?;
    Ok(())
}

fn batch_to_json_rows(
    batch: &datafusion::arrow::array::RecordBatch,
) -> Result<Vec<serde_json::Value>> {
    use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
    let options = FormatOptions::default();
    let formatters: Vec<_> = (0..batch.num_columns())
        .map(|col| ArrayFormatter::try_new(batch.column(col).as_ref(), &options))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| PipelineError::external("export", anyhow::anyhow!(e)))?;
    let names: Vec<String> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let mut rows = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut object = serde_json::Map::new();
        for (col, name) in names.iter().enumerate() {
            if batch.column(col).is_null(row) {
                object.insert(name.clone(), serde_json::Value::Null);
            } else {
                object.insert(
                    name.clone(),
                    serde_json::Value::String(formatters[col].value(row).to_string()),
                );
            }
        }
        rows.push(serde_json::Value::Object(object));
    }
    Ok(rows)
}

async fn write_excel(df: DataFrame, output_path: &Path) -> Result<()> {
    use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};

    let names: Vec<String> = df
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let batches = df.collect().await?;

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, name) in names.iter().enumerate() {
        sheet
            .write_string(0, col as u16, name)
            .map_err(|e| PipelineError::external("export", anyhow::anyhow!(e)))?;
    }

    let options = FormatOptions::default();
    let mut row_offset = 1u32;
    for batch in &batches {
        let formatters: Vec<_> = (0..batch.num_columns())
            .map(|col| ArrayFormatter::try_new(batch.column(col).as_ref(), &options))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| PipelineError::external("export", anyhow::anyhow!(e)))?;
        for row in 0..batch.num_rows() {
            for (col, formatter) in formatters.iter().enumerate() {
                if !batch.column(col).is_null(row) {
                    sheet
                        .write_string(row_offset, col as u16, formatter.value(row).to_string())
                        .map_err(|e| PipelineError::external("export", anyhow::anyhow!(e)))?;
                }
            }
            row_offset += 1;
        }
    }

    workbook
        .save(output_path)
        .map_err(|e| PipelineError::external("export", anyhow::anyhow!(e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample_session() -> AnalyticSession {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = datafusion::arrow::array::RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("a"), None])),
            ],
        )
        .unwrap();
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![batch]).unwrap();
        session
    }

    #[tokio::test]
    async fn canonical_parquet_export_writes_a_nonempty_file() {
        let session = sample_session();
        let dir = std::env::temp_dir().join("pipeline-io-exporter-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let (path, size) = export_canonical_parquet(&session, "t", &dir, "t_stem")
            .await
            .unwrap();
        assert!(path.exists());
        assert!(size > 0);
    }

    #[tokio::test]
    async fn jsonl_export_writes_one_object_per_line() {
        let session = sample_session();
        let dir = std::env::temp_dir().join("pipeline-io-exporter-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let output_path = dir.join("t.jsonl");
        let outcome = export_table(
            &session,
            "t",
            ExportFormat::Jsonl,
            Some(output_path.clone()),
        )
        .await
        .unwrap();
        assert_eq!(outcome.rows_exported, 2);
        let contents = std::fs::read_to_string(&output_path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn export_of_unknown_table_is_a_validation_error() {
        let session = sample_session();
        let result = export_table(&session, "missing", ExportFormat::Csv, None).await;
        assert!(result.is_err());
    }
}
