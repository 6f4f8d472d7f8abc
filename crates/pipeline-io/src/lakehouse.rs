//! Lakehouse Loader (§4.M): evolve and load a remote Iceberg table
//! identified by (namespace, table_name).
//!
//! The target warehouse (BigQuery-over-BigLake in the grounding source) is
//! an external system this crate never talks to directly; a
//! [`LakehouseConnection`] is the seam, the same pattern the core crate
//! uses for header/PII classifiers. SQL text is built exactly the way
//! `bigquery_manager.py` builds it: a temp external table over the staged
//! Parquet file to probe its schema, `ALTER TABLE ADD COLUMN` for additive
//! evolution, and a cast-SELECT for append/overwrite/upsert.

use async_trait::async_trait;
use pipeline_core::events::WriteMode;
use pipeline_core::{PipelineError, Result};
use tracing::{info, instrument};
use uuid::Uuid;

/// One column of the target table's schema, as reported by the connection.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
}

/// Abstraction over the remote lakehouse connection. A call submits SQL
/// text and returns an opaque job id, mirroring `job.job_id` in the
/// grounding source.
#[async_trait]
pub trait LakehouseConnection: Send + Sync {
    async fn table_exists(&self, namespace: &str, table_name: &str) -> Result<bool>;
    async fn table_schema(&self, namespace: &str, table_name: &str) -> Result<Vec<ColumnSchema>>;
    async fn probe_parquet_schema(&self, parquet_uri: &str) -> Result<Vec<ColumnSchema>>;
    async fn execute(&self, sql: &str) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct LoadResult {
    pub load_id: String,
    pub columns_added: Vec<String>,
}

fn quoted_table(namespace: &str, table_name: &str) -> String {
    format!("`{namespace}.{table_name}`")
}

/// Additive schema evolution: add any column present in the source parquet
/// but absent from the target, leaving existing columns untouched.
#[instrument(skip(conn))]
pub async fn evolve_schema(
    conn: &dyn LakehouseConnection,
    namespace: &str,
    table_name: &str,
    parquet_uri: &str,
) -> Result<Vec<String>> {
    let existing = conn.table_schema(namespace, table_name).await?;
    let existing_names: std::collections::HashSet<String> = existing
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();

    let source_schema = conn.probe_parquet_schema(parquet_uri).await?;
    let new_columns: Vec<&ColumnSchema> = source_schema
        .iter()
        .filter(|c| !existing_names.contains(&c.name.to_ascii_lowercase()))
        .collect();

    if new_columns.is_empty() {
        return Ok(Vec::new());
    }

    let table_ref = quoted_table(namespace, table_name);
    let mut added = Vec::new();
    for column in &new_columns {
        let sql = format!(
            "ALTER TABLE {table_ref} ADD COLUMN `{}` {}",
            column.name, column.data_type
        );
        conn.execute(&sql).await?;
        added.push(column.name.clone());
    }

    info!(namespace, table_name, added = ?added, "evolved target schema");
    Ok(added)
}

/// Creates a new Iceberg-backed table from a temp external view over the
/// staged parquet, then drops the probe. Returns the job id as the load id.
#[instrument(skip(conn))]
pub async fn create_table(
    conn: &dyn LakehouseConnection,
    namespace: &str,
    table_name: &str,
    parquet_uri: &str,
    connection_handle: &str,
    iceberg_base_path: &str,
) -> Result<String> {
    let temp_suffix = &Uuid::new_v4().simple().to_string()[..8];
    let temp_table = format!("`{namespace}._schema_probe_{temp_suffix}`");
    let table_ref = quoted_table(namespace, table_name);
    let storage_uri = format!("{iceberg_base_path}/{namespace}/{table_name}");

    conn.execute(&format!(
        "CREATE OR REPLACE EXTERNAL TABLE {temp_table} OPTIONS (format = 'PARQUET', uris = ['{parquet_uri}'])"
    ))
    .await?;

    let create_result = conn
        .execute(&format!(
            "CREATE TABLE {table_ref} WITH CONNECTION `{connection_handle}` OPTIONS ( \
             file_format = 'PARQUET', table_format = 'ICEBERG', storage_uri = '{storage_uri}' \
             ) AS SELECT * FROM {temp_table}"
        ))
        .await;

    conn.execute(&format!("DROP EXTERNAL TABLE IF EXISTS {temp_table}"))
        .await
        .ok();

    let load_id = create_result?;
    info!(namespace, table_name, load_id, "created lakehouse table");
    Ok(load_id)
}

/// Builds the cast-SELECT that maps, column by column in target order,
/// either the same-typed source column, a `SAFE_CAST` when types differ,
/// or `NULL` when the source is missing the column. Extra source columns
/// not present in the target are appended at the end.
fn build_cast_select(
    target_schema: &[ColumnSchema],
    source_schema: &[ColumnSchema],
    source_ref: &str,
) -> String {
    let source_by_name: std::collections::HashMap<String, &ColumnSchema> = source_schema
        .iter()
        .map(|c| (c.name.to_ascii_lowercase(), c))
        .collect();

    let mut select_list = Vec::new();
    for target_col in target_schema {
        match source_by_name.get(&target_col.name.to_ascii_lowercase()) {
            Some(source_col) if source_col.data_type == target_col.data_type => {
                select_list.push(format!("`{}`", source_col.name));
            }
            Some(source_col) => {
                select_list.push(format!(
                    "SAFE_CAST(`{}` AS {}) AS `{}`",
                    source_col.name, target_col.data_type, target_col.name
                ));
            }
            None => {
                select_list.push(format!("NULL AS `{}`", target_col.name));
            }
        }
    }

    let target_names: std::collections::HashSet<String> = target_schema
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();
    for source_col in source_schema {
        if !target_names.contains(&source_col.name.to_ascii_lowercase()) {
            select_list.push(format!("`{}`", source_col.name));
        }
    }

    format!("SELECT {} FROM {source_ref}", select_list.join(", "))
}

/// Appends or overwrites data into an existing table: evolve schema, probe
/// the parquet again via a temp external view, build the cast-SELECT, and
/// for OVERWRITE delete all rows first.
#[instrument(skip(conn))]
pub async fn append_or_overwrite(
    conn: &dyn LakehouseConnection,
    namespace: &str,
    table_name: &str,
    parquet_uri: &str,
    write_mode: WriteMode,
) -> Result<LoadResult> {
    if write_mode == WriteMode::Upsert {
        return Err(PipelineError::validation(
            "append_or_overwrite does not accept UPSERT; use upsert()",
        ));
    }

    let columns_added = evolve_schema(conn, namespace, table_name, parquet_uri).await?;
    let target_schema = conn.table_schema(namespace, table_name).await?;
    let source_schema = conn.probe_parquet_schema(parquet_uri).await?;

    let table_ref = quoted_table(namespace, table_name);
    let temp_suffix = &Uuid::new_v4().simple().to_string()[..8];
    let temp_table = format!("`{namespace}._load_probe_{temp_suffix}`");

    conn.execute(&format!(
        "CREATE OR REPLACE EXTERNAL TABLE {temp_table} OPTIONS (format = 'PARQUET', uris = ['{parquet_uri}'])"
    ))
    .await?;

    if write_mode == WriteMode::Overwrite {
        conn.execute(&format!("DELETE FROM {table_ref} WHERE TRUE"))
            .await?;
    }

    let select = build_cast_select(&target_schema, &source_schema, &temp_table);
    let insert_sql = format!("INSERT INTO {table_ref} {select}");
    let load_result = conn.execute(&insert_sql).await;

    conn.execute(&format!("DROP EXTERNAL TABLE IF EXISTS {temp_table}"))
        .await
        .ok();

    let load_id = load_result?;
    info!(namespace, table_name, ?write_mode, load_id, "loaded data");
    Ok(LoadResult {
        load_id,
        columns_added,
    })
}

/// Deletes target rows matching any incoming key tuple, then inserts the
/// cast-SELECT of the new data. Requires at least one upsert key.
#[instrument(skip(conn))]
pub async fn upsert(
    conn: &dyn LakehouseConnection,
    namespace: &str,
    table_name: &str,
    parquet_uri: &str,
    upsert_keys: &[String],
) -> Result<LoadResult> {
    if upsert_keys.is_empty() {
        return Err(PipelineError::validation(
            "UPSERT write mode requires at least one upsert key",
        ));
    }

    let columns_added = evolve_schema(conn, namespace, table_name, parquet_uri).await?;
    let target_schema = conn.table_schema(namespace, table_name).await?;
    let source_schema = conn.probe_parquet_schema(parquet_uri).await?;

    let table_ref = quoted_table(namespace, table_name);
    let temp_suffix = &Uuid::new_v4().simple().to_string()[..8];
    let temp_table = format!("`{namespace}._upsert_probe_{temp_suffix}`");

    conn.execute(&format!(
        "CREATE OR REPLACE EXTERNAL TABLE {temp_table} OPTIONS (format = 'PARQUET', uris = ['{parquet_uri}'])"
    ))
    .await?;

    let join_condition = upsert_keys
        .iter()
        .map(|key| format!("target.`{key}` = source.`{key}`"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let delete_sql = format!(
        "DELETE FROM {table_ref} AS target WHERE EXISTS ( \
         SELECT 1 FROM {temp_table} AS source WHERE {join_condition} )"
    );

    let load_result: Result<String> = async {
        conn.execute(&delete_sql).await?;
        let select = build_cast_select(&target_schema, &source_schema, &temp_table);
        conn.execute(&format!("INSERT INTO {table_ref} {select}")).await
    }
    .await;

    conn.execute(&format!("DROP EXTERNAL TABLE IF EXISTS {temp_table}"))
        .await
        .ok();

    let load_id = load_result?;
    info!(namespace, table_name, load_id, "upserted data");
    Ok(LoadResult {
        load_id,
        columns_added,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeConnection {
        existing: Mutex<Vec<ColumnSchema>>,
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LakehouseConnection for FakeConnection {
        async fn table_exists(&self, _namespace: &str, _table_name: &str) -> Result<bool> {
            Ok(!self.existing.lock().unwrap().is_empty())
        }

        async fn table_schema(&self, _namespace: &str, _table_name: &str) -> Result<Vec<ColumnSchema>> {
            Ok(self.existing.lock().unwrap().clone())
        }

        async fn probe_parquet_schema(&self, _parquet_uri: &str) -> Result<Vec<ColumnSchema>> {
            Ok(vec![
                ColumnSchema { name: "id".into(), data_type: "INT64".into() },
                ColumnSchema { name: "amount".into(), data_type: "FLOAT64".into() },
                ColumnSchema { name: "region".into(), data_type: "STRING".into() },
            ])
        }

        async fn execute(&self, sql: &str) -> Result<String> {
            self.executed.lock().unwrap().push(sql.to_string());
            Ok(format!("job_{}", self.executed.lock().unwrap().len()))
        }
    }

    #[tokio::test]
    async fn evolve_schema_adds_missing_columns_only() {
        let conn = FakeConnection {
            existing: Mutex::new(vec![ColumnSchema { name: "id".into(), data_type: "INT64".into() }]),
            executed: Mutex::new(Vec::new()),
        };
        let added = evolve_schema(&conn, "bronze", "orders", "gs://staging/parquet/orders/x.parquet")
            .await
            .unwrap();
        assert_eq!(added, vec!["amount".to_string(), "region".to_string()]);
    }

    #[tokio::test]
    async fn upsert_without_keys_is_rejected() {
        let conn = FakeConnection::default();
        let result = upsert(&conn, "bronze", "orders", "gs://x.parquet", &[]).await;
        assert!(result.is_err());
    }

    #[test]
    fn cast_select_uses_safe_cast_for_type_mismatch_and_null_for_missing() {
        let target = vec![
            ColumnSchema { name: "id".into(), data_type: "INT64".into() },
            ColumnSchema { name: "amount".into(), data_type: "FLOAT64".into() },
            ColumnSchema { name: "new_flag".into(), data_type: "BOOL".into() },
        ];
        let source = vec![
            ColumnSchema { name: "id".into(), data_type: "INT64".into() },
            ColumnSchema { name: "amount".into(), data_type: "STRING".into() },
        ];
        let sql = build_cast_select(&target, &source, "`temp`");
        assert!(sql.contains("`id`"));
        assert!(sql.contains("SAFE_CAST(`amount` AS FLOAT64)"));
        assert!(sql.contains("NULL AS `new_flag`"));
    }
}
