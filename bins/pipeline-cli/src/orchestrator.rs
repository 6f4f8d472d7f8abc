//! Pipeline Orchestrator (§4.N): the fixed per-file sequence triggered by
//! one object-created event. Each stage is tagged so a failure can publish
//! a failure event naming exactly where it happened before re-raising.

use pipeline_core::events::{CompletionEvent, LoadRequest, PublishedEvent, WriteMode};
use pipeline_core::model::FileFormat;
use pipeline_core::report::{
    CleaningSourceMeta, IngestionSummary, ParquetExportStatus, SourceMeta,
};
use pipeline_core::{Classifier, InputEvent, PipelineConfig, PipelineError};
use pipeline_io::lakehouse::LakehouseConnection;
use pipeline_io::{
    export_canonical_parquet, inspect_file, lakehouse, load_csv, load_excel, load_json,
    load_parquet, recover_if_needed, storage, AnalyticSession,
};
use pipeline_tx::{build_cleaning_report, build_quality_report, scan_table, write_cleaning_report, write_quality_report};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

const CANONICAL_TIMESTAMP_COLUMN: &str = "processed_at";

/// One stage of the fixed sequence, used to tag a failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Load,
    Stamp,
    ExportInitial,
    Scan,
    Clean,
    ExportFinal,
    Upload,
    LakehouseLoad,
    Publish,
    Archive,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Load => "load",
            Stage::Stamp => "stamp_timestamp",
            Stage::ExportInitial => "export_initial",
            Stage::Scan => "quality_scan",
            Stage::Clean => "cleaning",
            Stage::ExportFinal => "export_final",
            Stage::Upload => "upload",
            Stage::LakehouseLoad => "lakehouse_load",
            Stage::Publish => "publish",
            Stage::Archive => "archive",
        }
    }
}

pub struct StageError {
    pub stage: Stage,
    pub error: PipelineError,
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} failed: {}", self.stage.as_str(), self.error)
    }
}

impl std::error::Error for StageError {}

trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T, PipelineError> {
    fn stage(self, stage: Stage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// What the orchestrator reads back after a successful run, used to build
/// the success completion event and for the CLI to report file locations.
pub struct OrchestrationOutcome {
    pub completion: CompletionEvent,
    pub quality_report_path: PathBuf,
    pub cleaning_report_path: PathBuf,
    pub parquet_path: PathBuf,
}

/// Drives one file through the fixed load -> scan -> clean -> export ->
/// lakehouse-load -> publish -> archive sequence.
///
/// `local_input_path` is the file already downloaded (or, for local
/// testing, the file the caller pointed directly at) to a working
/// directory the caller owns and is responsible for cleaning up.
#[instrument(skip(config, lakehouse_conn, classifier), fields(table = %target_table))]
pub async fn run_pipeline(
    event: &InputEvent,
    local_input_path: &Path,
    target_table: &str,
    config: &PipelineConfig,
    lakehouse_conn: &dyn LakehouseConnection,
    classifier: &dyn Classifier,
    dry_run: bool,
) -> Result<OrchestrationOutcome, StageError> {
    let working_dir = PathBuf::from(&config.working_dir).join(&event.file_hash());
    std::fs::create_dir_all(&working_dir)
        .map_err(PipelineError::from)
        .stage(Stage::Download)?;

    let diagnostics = inspect_file(local_input_path).stage(Stage::Load)?;
    if diagnostics.format == FileFormat::Unknown {
        return Err(StageError {
            stage: Stage::Load,
            error: PipelineError::format(format!(
                "could not classify format of {}",
                local_input_path.display()
            )),
        });
    }

    let recovery = if !diagnostics.format.is_binary() {
        recover_if_needed(local_input_path).stage(Stage::Load)?
    } else {
        pipeline_io::text_recovery::RecoveryOutcome {
            encoding_name: "binary",
            was_recovered: false,
            recovered_path: None,
        }
    };
    let load_path = recovery
        .recovered_path
        .clone()
        .unwrap_or_else(|| local_input_path.to_path_buf());

    let mut session = AnalyticSession::new();
    let mut ingestion = load_into_session(&mut session, &load_path, target_table, diagnostics.format, classifier)
        .await
        .stage(Stage::Load)?;
    ingestion.is_lossy_transcode = recovery.was_recovered;

    stamp_timestamp(&mut session, target_table)
        .await
        .stage(Stage::Stamp)?;

    let output_dir = PathBuf::from(config.output_dir());
    let stem = target_table.to_string();

    let (initial_parquet_path, initial_size) =
        export_canonical_parquet(&session, target_table, &output_dir, &stem)
            .await
            .stage(Stage::ExportInitial)?;

    let scan = scan_table(&session, target_table)
        .await
        .stage(Stage::Scan)?;

    let before_rows = session.row_count(target_table).await.stage(Stage::Scan)?;
    let before_columns = session.column_names(target_table).await.stage(Stage::Scan)?.len() as u64;

    let quality_report = build_quality_report(
        SourceMeta {
            file_path: local_input_path.display().to_string(),
            file_name: file_name(local_input_path),
            detected_format: diagnostics.format.as_str().to_string(),
            detected_encoding: Some(recovery.encoding_name.to_string()),
            size_bytes: (diagnostics.size_mb * 1_000_000.0) as u64,
        },
        ingestion.clone(),
        &scan,
        ParquetExportStatus {
            status: "completed".to_string(),
            output_path: Some(initial_parquet_path.display().to_string()),
            size_bytes: Some(initial_size),
        },
    );

    let clean = pipeline_tx::clean_table(&mut session, target_table, &scan.findings, classifier)
        .await
        .stage(Stage::Clean)?;

    let quality_findings_input = scan.findings.len() as u64;
    let cleaning_report = build_cleaning_report(
        CleaningSourceMeta {
            file_path: local_input_path.display().to_string(),
            file_name: file_name(local_input_path),
            table_name: target_table.to_string(),
        },
        before_rows,
        before_columns,
        clean,
        quality_findings_input,
    );

    let quality_report_path =
        write_quality_report(&working_dir, &stem, &quality_report).stage(Stage::Scan)?;
    let cleaning_report_path =
        write_cleaning_report(&working_dir, &stem, &cleaning_report).stage(Stage::Clean)?;

    let (final_parquet_path, _final_size) =
        export_canonical_parquet(&session, target_table, &output_dir, &stem)
            .await
            .stage(Stage::ExportFinal)?;

    if dry_run {
        info!("dry run: skipping upload, lakehouse load, publish, and archive");
        let final_rows = session.row_count(target_table).await.stage(Stage::ExportFinal)?;
        let completion = CompletionEvent::AgentCleaningComplete {
            file_hash: event.file_hash(),
            table_name: target_table.to_string(),
            parquet_uri: final_parquet_path.display().to_string(),
            row_count: final_rows,
        };
        return Ok(OrchestrationOutcome {
            completion,
            quality_report_path,
            cleaning_report_path,
            parquet_path: final_parquet_path,
        });
    }

    let parquet_uri = storage::StagingPaths::parquet(&config.staging_bucket, target_table, &stem);
    let quality_uri = storage::StagingPaths::quality_report(&config.staging_bucket, target_table, &stem);
    let cleaning_uri = storage::StagingPaths::cleaning_report(&config.staging_bucket, target_table, &stem);

    storage::upload(&final_parquet_path, &parquet_uri)
        .await
        .stage(Stage::Upload)?;
    storage::upload(&quality_report_path, &quality_uri)
        .await
        .stage(Stage::Upload)?;
    storage::upload(&cleaning_report_path, &cleaning_uri)
        .await
        .stage(Stage::Upload)?;

    let final_rows = session.row_count(target_table).await.stage(Stage::LakehouseLoad)?;
    let namespace = "bronze";
    let exists = lakehouse_conn
        .table_exists(namespace, target_table)
        .await
        .stage(Stage::LakehouseLoad)?;
    let load_result = if exists {
        lakehouse::append_or_overwrite(
            lakehouse_conn,
            namespace,
            target_table,
            &parquet_uri,
            WriteMode::Append,
        )
        .await
        .stage(Stage::LakehouseLoad)?
    } else {
        let load_id = lakehouse::create_table(
            lakehouse_conn,
            namespace,
            target_table,
            &parquet_uri,
            &config.lakehouse_connection,
            &config.iceberg_base_path,
        )
        .await
        .stage(Stage::LakehouseLoad)?;
        pipeline_io::lakehouse::LoadResult {
            load_id,
            columns_added: Vec::new(),
        }
    };

    let load_request = LoadRequest::new(
        event.file_hash(),
        parquet_uri.clone(),
        namespace.to_string(),
        target_table.to_string(),
        event.uri(),
        final_rows,
    );
    load_request.validate().stage(Stage::Publish)?;

    let archive_uri = storage::StagingPaths::archive(&config.archive_bucket, target_table, &file_name_only(event));
    let completion = CompletionEvent::LoaderBigqueryComplete {
        file_hash: event.file_hash(),
        target_namespace: namespace.to_string(),
        target_table: target_table.to_string(),
        iceberg_snapshot_id: load_result.load_id,
        write_mode: WriteMode::Append,
        row_count_loaded: final_rows,
        original_file_uri: event.uri(),
        archive_uri: archive_uri.clone(),
        load_duration_seconds: 0.0,
    };

    publish(completion.clone()).stage(Stage::Publish)?;

    storage::archive_move(&event.uri(), &archive_uri)
        .await
        .stage(Stage::Archive)?;

    Ok(OrchestrationOutcome {
        completion,
        quality_report_path,
        cleaning_report_path,
        parquet_path: final_parquet_path,
    })
}

/// Builds the failure completion event for a stage error, the way §4.N
/// requires ("publish a failure event including error class and stage,
/// then re-raise").
pub fn failure_event(event: &InputEvent, err: &StageError) -> CompletionEvent {
    CompletionEvent::AgentCleaningFailed {
        file_hash: event.file_hash(),
        error_stage: err.stage.as_str().to_string(),
        error_code: err.error.error_code().to_string(),
        error_message: err.error.to_string(),
    }
}

/// The message bus is an external collaborator (§1 Non-goals); publishing
/// here means handing the envelope to `tracing` so an operator or a log
/// shipper downstream can pick it up, not a real send.
fn publish(payload: CompletionEvent) -> Result<(), PipelineError> {
    let envelope = PublishedEvent::wrap(payload);
    let json = serde_json::to_string(&envelope)?;
    info!(event = %json, "published completion event");
    Ok(())
}

async fn load_into_session(
    session: &mut AnalyticSession,
    path: &Path,
    table_name: &str,
    format: FileFormat,
    classifier: &dyn Classifier,
) -> Result<IngestionSummary, PipelineError> {
    match format {
        FileFormat::Csv | FileFormat::Tsv => {
            let outcome = load_csv(session, path, table_name, classifier).await?;
            Ok(IngestionSummary {
                status: "loaded".to_string(),
                table_name: outcome.table_name,
                source_row_count: outcome.source_rows,
                loaded_row_count: outcome.loaded_rows,
                empty_rows_removed: outcome.empty_rows_removed,
                rows_lost: outcome.source_rows.saturating_sub(outcome.loaded_rows),
                delimiter: Some(outcome.delimiter.to_string()),
                parse_strategy: Some(outcome.parse_strategy),
                is_header_detected: Some(outcome.is_header_detected),
                columns_renamed: Default::default(),
                types_coerced: Default::default(),
                overflow_columns_repaired: outcome.overflow_columns_repaired,
                overflow_rows_flagged: outcome.overflow_rows_flagged,
                json_repair: None,
                is_lossy_transcode: false,
            })
        }
        FileFormat::Json | FileFormat::Jsonl => {
            let outcome = load_json(session, path, table_name).await?;
            Ok(IngestionSummary {
                status: "loaded".to_string(),
                table_name: outcome.table_name,
                source_row_count: outcome.loaded_rows,
                loaded_row_count: outcome.loaded_rows,
                empty_rows_removed: 0,
                rows_lost: 0,
                delimiter: None,
                parse_strategy: Some(format!("{:?}", outcome.shape)),
                is_header_detected: None,
                columns_renamed: Default::default(),
                types_coerced: Default::default(),
                overflow_columns_repaired: Vec::new(),
                overflow_rows_flagged: 0,
                json_repair: if outcome.was_repaired {
                    Some(serde_json::json!({ "repaired": true }))
                } else {
                    None
                },
                is_lossy_transcode: false,
            })
        }
        FileFormat::Parquet => {
            let outcome = load_parquet(session, path, table_name).await?;
            Ok(native_summary(outcome))
        }
        FileFormat::Excel => {
            let outcome = load_excel(session, path, table_name).await?;
            Ok(native_summary(outcome))
        }
        FileFormat::Unknown => Err(PipelineError::format("unknown file format")),
    }
}

fn native_summary(outcome: pipeline_io::NativeLoadOutcome) -> IngestionSummary {
    IngestionSummary {
        status: "loaded".to_string(),
        table_name: outcome.table_name,
        source_row_count: outcome.loaded_rows,
        loaded_row_count: outcome.loaded_rows,
        empty_rows_removed: 0,
        rows_lost: 0,
        delimiter: None,
        parse_strategy: Some("native".to_string()),
        is_header_detected: None,
        columns_renamed: Default::default(),
        types_coerced: Default::default(),
        overflow_columns_repaired: Vec::new(),
        overflow_rows_flagged: 0,
        json_repair: None,
        is_lossy_transcode: false,
    }
}

/// Stamps every row with one UTC timestamp read back from the engine's
/// own `current_timestamp`, so every row in one table shares exactly one
/// canonical ingestion instant.
async fn stamp_timestamp(session: &mut AnalyticSession, table_name: &str) -> Result<(), PipelineError> {
    let columns = session.column_names(table_name).await?;
    let select_list = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {select_list}, current_timestamp() AS \"{CANONICAL_TIMESTAMP_COLUMN}\" FROM {table_name}"
    );
    let batches = session.execute_unchecked(&sql).await?;
    session.register_table(table_name, batches)?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_name_only(event: &InputEvent) -> String {
    event
        .name
        .rsplit('/')
        .next()
        .unwrap_or(&event.name)
        .to_string()
}

