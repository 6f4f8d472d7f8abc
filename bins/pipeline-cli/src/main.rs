//! Single-invocation CLI (§10.4): runs one file through the full
//! download -> load -> scan -> clean -> export -> lakehouse-load ->
//! publish -> archive sequence, or drives the ad hoc export/profile
//! utilities directly against a local file.

mod orchestrator;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use pipeline_core::{FailOpenClassifier, InputEvent, PipelineConfig, PipelineError};
use pipeline_io::lakehouse::{ColumnSchema, LakehouseConnection};
use pipeline_io::{detect_format, export_table, AnalyticSession, ExportFormat};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs one file through the orchestrated sequence, or an ad hoc
/// export/profile utility against a local file directly.
#[derive(Parser, Debug)]
#[command(name = "pipeline-cli")]
#[command(about = "Drives one tabular file through load, quality scan, cleaning, and export")]
struct Args {
    /// Path to the source file. Required unless a subcommand is given.
    input: Option<PathBuf>,

    /// Treat `input` as a JSON-encoded InputEvent rather than a bare file
    /// path; the file is expected to already sit at the path `InputEvent`
    /// resolves to locally (used for local testing, per the config's
    /// working directory convention rather than a real object store).
    #[arg(long)]
    as_event: bool,

    /// Pipeline configuration file.
    #[arg(long, default_value = "pipeline.yaml")]
    config: PathBuf,

    /// Run load, scan, clean, and export only; skip upload, the lakehouse
    /// load, event publication, and archiving.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ad hoc export of a local file to CSV, JSON, JSON-Lines, or Excel,
    /// bypassing the quality scan and cleaning stages entirely (§10.6).
    Export {
        path: PathBuf,
        #[arg(long, default_value = "csv")]
        format: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Profiling utilities over a local file, independent of the findings
    /// pipeline (§10.7).
    Profile {
        path: PathBuf,
        #[arg(long, default_value_t = 10)]
        rows: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Some(Command::Export { path, format, output }) => run_export(&path, &format, output).await,
        Some(Command::Profile { path, rows }) => run_profile(&path, rows).await,
        None => run_ingest(args).await,
    }
}

async fn run_export(path: &PathBuf, format: &str, output: Option<PathBuf>) -> Result<()> {
    let export_format = match format.to_ascii_lowercase().as_str() {
        "csv" => ExportFormat::Csv,
        "json" => ExportFormat::Json,
        "jsonl" => ExportFormat::Jsonl,
        "excel" | "xlsx" => ExportFormat::Excel,
        other => bail!("unsupported export format '{other}'"),
    };

    let table_name = table_name_for(path);
    let mut session = AnalyticSession::new();
    load_local_file(&mut session, path, &table_name).await?;

    let outcome = export_table(&session, &table_name, export_format, output)
        .await
        .context("ad hoc export failed")?;
    println!(
        "wrote {} rows as {} to {}",
        outcome.rows_exported,
        outcome.format,
        outcome.output_path.display()
    );
    Ok(())
}

async fn run_profile(path: &PathBuf, rows: u32) -> Result<()> {
    let table_name = table_name_for(path);
    let mut session = AnalyticSession::new();
    load_local_file(&mut session, path, &table_name).await?;

    let profile = pipeline_tx::profile_columns(&session, &table_name)
        .await
        .context("profiling failed")?;
    println!("{}", serde_json::to_string_pretty(&profile)?);

    let sample = pipeline_tx::sample_data(&session, &table_name, rows)
        .await
        .context("sampling failed")?;
    println!("\n{}", sample.sample);
    Ok(())
}

async fn run_ingest(args: Args) -> Result<()> {
    let config = PipelineConfig::load(&args.config).context("loading pipeline configuration")?;

    let input = args
        .input
        .clone()
        .context("an input file path is required when no subcommand is given")?;

    let event = if args.as_event {
        let raw = std::fs::read_to_string(&input).context("reading input event JSON")?;
        serde_json::from_str::<InputEvent>(&raw).context("parsing input event JSON")?
    } else {
        InputEvent {
            bucket: "local".to_string(),
            name: input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            size: std::fs::metadata(&input).map(|m| m.len()).unwrap_or(0),
        }
    };

    if event.should_skip() {
        bail!("input event {} is a directory or dotfile; nothing to do", event.name);
    }

    let target_table = event.target_table();
    let local_path = if args.as_event {
        PathBuf::from(&config.working_dir).join(&event.name)
    } else {
        input.clone()
    };

    let lakehouse_conn = UnimplementedLakehouseConnection;
    let classifier = FailOpenClassifier;

    let outcome = orchestrator::run_pipeline(
        &event,
        &local_path,
        &target_table,
        &config,
        &lakehouse_conn,
        &classifier,
        args.dry_run,
    )
    .await
    .map_err(|stage_err| {
        let failure = orchestrator::failure_event(&event, &stage_err);
        tracing::error!(event = ?failure, "{stage_err}");
        anyhow::anyhow!(stage_err.to_string())
    })?;

    println!(
        "quality report: {}\ncleaning report: {}\nparquet: {}",
        outcome.quality_report_path.display(),
        outcome.cleaning_report_path.display(),
        outcome.parquet_path.display()
    );
    Ok(())
}

fn table_name_for(path: &PathBuf) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "table".to_string())
}

async fn load_local_file(session: &mut AnalyticSession, path: &PathBuf, table_name: &str) -> Result<()> {
    let format = detect_format(path).context("detecting file format")?;
    match format {
        pipeline_core::model::FileFormat::Csv | pipeline_core::model::FileFormat::Tsv => {
            pipeline_io::load_csv(session, path, table_name, &FailOpenClassifier).await?;
        }
        pipeline_core::model::FileFormat::Json | pipeline_core::model::FileFormat::Jsonl => {
            pipeline_io::load_json(session, path, table_name).await?;
        }
        pipeline_core::model::FileFormat::Parquet => {
            pipeline_io::load_parquet(session, path, table_name).await?;
        }
        pipeline_core::model::FileFormat::Excel => {
            pipeline_io::load_excel(session, path, table_name).await?;
        }
        pipeline_core::model::FileFormat::Unknown => bail!("could not classify format of {}", path.display()),
    }
    Ok(())
}

/// Stands in for a real BigQuery/Iceberg connection when none is
/// configured. Every method fails with a descriptive external error
/// rather than silently no-op'ing, so a non-dry-run invocation without a
/// real warehouse behind it fails loudly at the lakehouse-load stage
/// instead of reporting false success.
struct UnimplementedLakehouseConnection;

#[async_trait]
impl LakehouseConnection for UnimplementedLakehouseConnection {
    async fn table_exists(&self, _namespace: &str, _table_name: &str) -> pipeline_core::Result<bool> {
        Err(unconfigured())
    }

    async fn table_schema(
        &self,
        _namespace: &str,
        _table_name: &str,
    ) -> pipeline_core::Result<Vec<ColumnSchema>> {
        Err(unconfigured())
    }

    async fn probe_parquet_schema(&self, _parquet_uri: &str) -> pipeline_core::Result<Vec<ColumnSchema>> {
        Err(unconfigured())
    }

    async fn execute(&self, _sql: &str) -> pipeline_core::Result<String> {
        Err(unconfigured())
    }
}

fn unconfigured() -> PipelineError {
    PipelineError::external(
        "lakehouse_load",
        anyhow::anyhow!("no lakehouse connection configured; run with --dry-run or wire a real connection"),
    )
}
