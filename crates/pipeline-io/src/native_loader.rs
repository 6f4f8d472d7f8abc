//! Native Loaders (§4.H): Parquet goes straight through the engine's own
//! reader; spreadsheets are read with `calamine` and converted into record
//! batches. Neither format has a recovery path; column names are
//! normalized after load, same as every other loader.

use crate::column_namer::{apply_column_names, normalize_columns};
use crate::session::AnalyticSession;
use calamine::{open_workbook_auto, Data, Reader};
use datafusion::arrow::array::{ArrayRef, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::ParquetReadOptions;
use pipeline_core::{PipelineError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct NativeLoadOutcome {
    pub table_name: String,
    pub loaded_rows: u64,
}

#[instrument(skip(session), fields(table_name))]
pub async fn load_parquet(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
) -> Result<NativeLoadOutcome> {
    let df = session
        .context()
        .read_parquet(path.to_string_lossy().as_ref(), ParquetReadOptions::default())
        .await?;
    let batches = df.collect().await?;
    if batches.is_empty() {
        return Err(PipelineError::format("Parquet file produced no batches"));
    }

    let raw_columns: Vec<String> = batches[0]
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let (final_names, _) = normalize_columns(&raw_columns);
    let batches = apply_column_names(batches, &final_names)
        .map_err(|e| PipelineError::external("parquet_load", e))?;

    let loaded_rows = batches.iter().map(|b| b.num_rows() as u64).sum();
    session.register_table(table_name, batches)?;
    Ok(NativeLoadOutcome {
        table_name: table_name.to_string(),
        loaded_rows,
    })
}

/// Reads the first worksheet of a spreadsheet, treats the first row as
/// headers, and loads every remaining row as a text column (spreadsheet
/// cell typing is unreliable enough across vendors that the Quality
/// Scanner's own type analysis is the better place to recover real types).
#[instrument(skip(session), fields(table_name))]
pub async fn load_excel(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
) -> Result<NativeLoadOutcome> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| PipelineError::external("excel_load", e))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| PipelineError::format("workbook has no worksheets"))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| PipelineError::external("excel_load", e))?;

    let mut rows = range.rows();
    let header_row = rows
        .next()
        .ok_or_else(|| PipelineError::format("worksheet has no rows"))?;
    let raw_columns: Vec<String> = header_row.iter().map(cell_to_string).collect();

    let num_columns = raw_columns.len();
    let mut column_values: Vec<Vec<Option<String>>> = vec![Vec::new(); num_columns];
    let mut row_count = 0u64;
    for row in rows {
        for col in 0..num_columns {
            let value = row.get(col).map(cell_to_string).filter(|s| !s.is_empty());
            column_values[col].push(value);
        }
        row_count += 1;
    }

    let (final_names, _) = normalize_columns(&raw_columns);
    let fields: Vec<Field> = final_names
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));
    let arrays: Vec<ArrayRef> = column_values
        .into_iter()
        .map(|col| Arc::new(StringArray::from(col)) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new(schema, arrays)
        .map_err(|e| PipelineError::external("excel_load", e))?;

    session.register_table(table_name, vec![batch])?;

    Ok(NativeLoadOutcome {
        table_name: table_name.to_string(),
        loaded_rows: row_count,
    })
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::Int64Array;
    use datafusion::parquet::arrow::arrow_writer::ArrowWriter;

    fn write_temp_parquet(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("pipeline-io-native-loader-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef],
        )
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        path
    }

    #[tokio::test]
    async fn parquet_loads_directly() {
        let path = write_temp_parquet("sample.parquet");
        let mut session = AnalyticSession::new();
        let outcome = load_parquet(&mut session, &path, "sample").await.unwrap();
        assert_eq!(outcome.loaded_rows, 3);
    }
}
