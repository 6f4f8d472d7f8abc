//! Object-storage I/O (§6): download inbox objects to a local working
//! directory, upload staged Parquet/report artifacts, and move the
//! original file into the archive bucket on success.
//!
//! Every path in this module is a `gs://bucket/key` URI; the concrete
//! backend is resolved through `object_store`'s URL-based builders so the
//! same code exercises against GCS in production and against an
//! S3-compatible test double in integration tests.

use object_store::path::Path as ObjectPath;
use object_store::{parse_url, ObjectStore};
use pipeline_core::{PipelineError, Result};
use std::path::Path as FsPath;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

/// A parsed `gs://bucket/key`-style URI split into its store and object
/// path components.
pub struct ParsedUri {
    pub store: Arc<dyn ObjectStore>,
    pub object_path: ObjectPath,
}

pub fn parse_object_uri(uri: &str) -> Result<ParsedUri> {
    let url = Url::parse(uri).map_err(|e| PipelineError::validation(format!("invalid URI {uri}: {e}")))?;
    let (store, object_path) =
        parse_url(&url).map_err(|e| PipelineError::external("object_store", e))?;
    Ok(ParsedUri {
        store: Arc::from(store),
        object_path,
    })
}

/// Downloads `uri` to `local_path`, creating parent directories as needed.
#[instrument(skip_all, fields(uri))]
pub async fn download(uri: &str, local_path: &FsPath) -> Result<u64> {
    let parsed = parse_object_uri(uri)?;
    let result = parsed
        .store
        .get(&parsed.object_path)
        .await
        .map_err(|e| PipelineError::external("storage_download", e))?;
    let bytes = result
        .bytes()
        .await
        .map_err(|e| PipelineError::external("storage_download", e))?;

    if let Some(parent) = local_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::external("storage_download", e))?;
    }
    std::fs::write(local_path, &bytes).map_err(|e| PipelineError::external("storage_download", e))?;
    info!(uri, bytes = bytes.len(), "downloaded object");
    Ok(bytes.len() as u64)
}

/// Uploads the contents of `local_path` to `uri`.
#[instrument(skip_all, fields(uri))]
pub async fn upload(local_path: &FsPath, uri: &str) -> Result<u64> {
    let parsed = parse_object_uri(uri)?;
    let bytes = std::fs::read(local_path).map_err(|e| PipelineError::external("storage_upload", e))?;
    let len = bytes.len() as u64;
    parsed
        .store
        .put(&parsed.object_path, bytes.into())
        .await
        .map_err(|e| PipelineError::external("storage_upload", e))?;
    info!(uri, bytes = len, "uploaded object");
    Ok(len)
}

/// Moves an object from `source_uri` to `dest_uri` within the same store
/// family (copy then delete, since GCS object moves across buckets are not
/// a single atomic server-side operation in every backend this crate
/// targets).
#[instrument(skip_all, fields(source_uri, dest_uri))]
pub async fn archive_move(source_uri: &str, dest_uri: &str) -> Result<()> {
    let source = parse_object_uri(source_uri)?;
    let dest = parse_object_uri(dest_uri)?;

    let bytes = source
        .store
        .get(&source.object_path)
        .await
        .map_err(|e| PipelineError::external("storage_archive", e))?
        .bytes()
        .await
        .map_err(|e| PipelineError::external("storage_archive", e))?;
    dest.store
        .put(&dest.object_path, bytes.into())
        .await
        .map_err(|e| PipelineError::external("storage_archive", e))?;
    source
        .store
        .delete(&source.object_path)
        .await
        .map_err(|e| PipelineError::external("storage_archive", e))?;
    info!(source_uri, dest_uri, "archived original object");
    Ok(())
}

/// Builds the staging URIs for a table + file stem, per §6's path layout.
pub struct StagingPaths;

impl StagingPaths {
    pub fn parquet(staging_bucket: &str, table: &str, stem: &str) -> String {
        format!("gs://{staging_bucket}/parquet/{table}/{stem}.parquet")
    }

    pub fn quality_report(staging_bucket: &str, table: &str, stem: &str) -> String {
        format!("gs://{staging_bucket}/reports/quality/{table}/{stem}_quality.json")
    }

    pub fn cleaning_report(staging_bucket: &str, table: &str, stem: &str) -> String {
        format!("gs://{staging_bucket}/reports/cleaning/{table}/{stem}_cleaning.json")
    }

    pub fn archive(archive_bucket: &str, table: &str, file: &str) -> String {
        format!("gs://{archive_bucket}/{table}/{file}")
    }

    pub fn inbox(inbox_bucket: &str, table: &str, file: &str) -> String {
        format!("gs://{inbox_bucket}/{table}/{file}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_paths_match_the_fixed_layout() {
        assert_eq!(
            StagingPaths::parquet("staging", "orders", "orders_2024"),
            "gs://staging/parquet/orders/orders_2024.parquet"
        );
        assert_eq!(
            StagingPaths::quality_report("staging", "orders", "orders_2024"),
            "gs://staging/reports/quality/orders/orders_2024_quality.json"
        );
        assert_eq!(
            StagingPaths::cleaning_report("staging", "orders", "orders_2024"),
            "gs://staging/reports/cleaning/orders/orders_2024_cleaning.json"
        );
        assert_eq!(
            StagingPaths::archive("archive", "orders", "orders_2024.csv"),
            "gs://archive/orders/orders_2024.csv"
        );
    }

    #[tokio::test]
    async fn local_file_round_trips_through_the_memory_backend() {
        let dir = std::env::temp_dir().join("pipeline-io-storage-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let local_in = dir.join("in.csv");
        std::fs::write(&local_in, b"a,b\n1,2\n").unwrap();

        let uri = format!("memory:///orders/in.csv");
        upload(&local_in, &uri).await.unwrap();

        let local_out = dir.join("out.csv");
        let bytes = download(&uri, &local_out).await.unwrap();
        assert_eq!(bytes, 8);
        assert_eq!(std::fs::read(&local_out).unwrap(), b"a,b\n1,2\n");
    }
}
