//! Analytic Session (§4.D): a single embedded columnar OLAP connection that
//! every loader, scanner, and cleaner step in this workspace shares.
//!
//! Registers one table per loaded file and exposes two execution paths:
//! `execute_unchecked` for controlled internal DDL (ADD/DROP COLUMN,
//! rename-by-swap) and `execute_safe` for anything ultimately driven by
//! external input, which refuses statements that could destroy data.

use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use datafusion::dataframe::DataFrame;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use pipeline_core::{PipelineError, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, instrument};

static DESTRUCTIVE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(DELETE|DROP\s+TABLE|TRUNCATE|DROP\s+DATABASE)\b").unwrap()
});

const MARKDOWN_MAX_COLUMNS: usize = 10;
const MARKDOWN_CELL_TRUNCATE: usize = 40;

/// Owns the embedded engine's session context and the table registry built
/// up as files are loaded through this run.
pub struct AnalyticSession {
    ctx: SessionContext,
    tables: Vec<String>,
}

impl Default for AnalyticSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticSession {
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
            tables: Vec::new(),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn registered_tables(&self) -> &[String] {
        &self.tables
    }

    /// Registers `batches` under `table_name`, unregistering any prior
    /// table of the same name first (a reload replaces, it does not
    /// union).
    pub fn register_table(
        &mut self,
        table_name: &str,
        batches: Vec<RecordBatch>,
    ) -> Result<()> {
        if batches.is_empty() {
            return Err(PipelineError::format(format!(
                "cannot register table {table_name} with zero record batches"
            )));
        }
        let schema = batches[0].schema();
        let table = MemTable::try_new(schema, vec![batches])?;
        self.ctx.deregister_table(table_name).ok();
        self.ctx.register_table(table_name, Arc::new(table))?;
        if !self.tables.iter().any(|t| t == table_name) {
            self.tables.push(table_name.to_string());
        }
        Ok(())
    }

    /// Drops a table from the registry. Called on cleanup and when a
    /// recovery path swaps a repaired table in under the original name.
    pub fn unregister_table(&mut self, table_name: &str) {
        self.ctx.deregister_table(table_name).ok();
        self.tables.retain(|t| t != table_name);
    }

    /// Internal DDL and other statements this workspace constructs itself,
    /// never built from externally supplied text.
    #[instrument(skip(self))]
    pub async fn execute_unchecked(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        debug!(sql, "executing unchecked SQL");
        let df = self.ctx.sql(sql).await?;
        Ok(df.collect().await?)
    }

    /// Execution path for anything whose shape is influenced by external
    /// input (a user-provided column name, a cast target). Rejects
    /// DELETE/DROP TABLE/TRUNCATE/DROP DATABASE at the statement start.
    pub async fn execute_safe(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        if DESTRUCTIVE_STATEMENT.is_match(sql) {
            return Err(PipelineError::destructive_sql(sql.to_string()));
        }
        let df = self.ctx.sql(sql).await?;
        Ok(df.collect().await?)
    }

    pub async fn dataframe(&self, sql: &str) -> Result<DataFrame> {
        if DESTRUCTIVE_STATEMENT.is_match(sql) {
            return Err(PipelineError::destructive_sql(sql.to_string()));
        }
        Ok(self.ctx.sql(sql).await?)
    }

    pub async fn row_count(&self, table_name: &str) -> Result<u64> {
        self.validate_table(table_name)?;
        let sql = format!("SELECT COUNT(*) AS n FROM {table_name}");
        let batches = self.execute_unchecked(&sql).await?;
        Ok(scalar_u64(&batches)?)
    }

    pub async fn column_names(&self, table_name: &str) -> Result<Vec<String>> {
        self.validate_table(table_name)?;
        let provider = self.ctx.table_provider(table_name).await?;
        let names = provider
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        Ok(names)
    }

    /// Returns an error when `path` is empty or does not exist on the
    /// local filesystem. Object-store URIs are validated by the caller
    /// before this point, since existence there requires network access.
    pub fn validate_path(path: &str) -> Result<()> {
        if path.trim().is_empty() {
            return Err(PipelineError::validation("path must not be empty"));
        }
        if !path.contains("://") && !std::path::Path::new(path).exists() {
            return Err(PipelineError::validation(format!(
                "path does not exist: {path}"
            )));
        }
        Ok(())
    }

    fn validate_table(&self, table_name: &str) -> Result<()> {
        if self.tables.iter().any(|t| t == table_name) {
            Ok(())
        } else {
            Err(PipelineError::validation(format!(
                "unknown table: {table_name}"
            )))
        }
    }

    /// Validates that `column` exists in `table_name`; on failure, the
    /// error lists every column that was available.
    pub async fn validate_column(&self, table_name: &str, column: &str) -> Result<()> {
        let columns = self.column_names(table_name).await?;
        if columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(PipelineError::Engine {
                message: format!("unknown column: {column}"),
                available_columns: Some(columns),
            })
        }
    }

    /// A markdown table snapshot of up to 10 columns, with every cell
    /// truncated to 40 characters, for human-facing diagnostics.
    pub async fn markdown_snapshot(&self, table_name: &str, limit: usize) -> Result<String> {
        self.validate_table(table_name)?;
        let columns = self.column_names(table_name).await?;
        let shown: Vec<&String> = columns.iter().take(MARKDOWN_MAX_COLUMNS).collect();
        let select_list = shown
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {select_list} FROM {table_name} LIMIT {limit}");
        let batches = self.execute_unchecked(&sql).await?;

        let mut out = String::new();
        out.push_str("| ");
        out.push_str(
            &shown
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
        );
        out.push_str(" |\n|");
        out.push_str(&"---|".repeat(shown.len()));
        out.push('\n');

        let options = FormatOptions::default();
        for batch in &batches {
            let formatters: Vec<_> = (0..batch.num_columns())
                .map(|col| ArrayFormatter::try_new(batch.column(col).as_ref(), &options))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| PipelineError::external("markdown_snapshot", anyhow::anyhow!(e)))?;
            for row in 0..batch.num_rows() {
                out.push_str("| ");
                let cells: Vec<String> = formatters
                    .iter()
                    .map(|f| truncate_cell(&f.value(row).to_string()))
                    .collect();
                out.push_str(&cells.join(" | "));
                out.push_str(" |\n");
            }
        }
        Ok(out)
    }
}

fn truncate_cell(value: &str) -> String {
    if value.chars().count() > MARKDOWN_CELL_TRUNCATE {
        let truncated: String = value.chars().take(MARKDOWN_CELL_TRUNCATE).collect();
        format!("{truncated}...")
    } else {
        value.to_string()
    }
}

fn scalar_u64(batches: &[RecordBatch]) -> Result<u64> {
    use datafusion::arrow::array::Int64Array;
    for batch in batches {
        if batch.num_rows() == 0 {
            continue;
        }
        let array = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| PipelineError::Engine {
                message: "expected a scalar integer result".to_string(),
                available_columns: None,
            })?;
        return Ok(array.value(0) as u64);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Int64Array, StringArray};
    use datafusion::arrow::datatypes::{DataType, Field, Schema};

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b"), None])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn register_and_count_rows() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![sample_batch()]).unwrap();
        assert_eq!(session.row_count("t").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn safe_execution_rejects_delete() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![sample_batch()]).unwrap();
        let result = session.execute_safe("DELETE FROM t").await;
        assert!(matches!(result, Err(PipelineError::DestructiveSql { .. })));
    }

    #[tokio::test]
    async fn safe_execution_allows_select() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![sample_batch()]).unwrap();
        let result = session.execute_safe("SELECT * FROM t").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_column_lists_available_columns() {
        let mut session = AnalyticSession::new();
        session.register_table("t", vec![sample_batch()]).unwrap();
        let err = session.validate_column("t", "missing").await.unwrap_err();
        match err {
            PipelineError::Engine {
                available_columns: Some(cols),
                ..
            } => {
                assert!(cols.contains(&"id".to_string()));
                assert!(cols.contains(&"name".to_string()));
            }
            other => panic!("expected Engine error, got {other:?}"),
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(AnalyticSession::validate_path("").is_err());
    }
}
