//! Analytic session, file-format classification, text recovery, column
//! naming, delimiter inference, the CSV/JSON/native loaders, object-storage
//! I/O, the canonical Parquet exporter, and the lakehouse loader.
//!
//! Built on the same embedded columnar engine this workspace already uses
//! for local analytics, generalized here into a file-ingestion pipeline
//! rather than a streaming operator graph.

pub mod column_namer;
pub mod csv_loader;
pub mod delimiter;
pub mod exporter;
pub mod format;
pub mod json_loader;
pub mod lakehouse;
pub mod native_loader;
pub mod session;
pub mod storage;
pub mod text_recovery;

pub use column_namer::normalize_columns;
pub use csv_loader::{load_csv, CsvLoadOutcome};
pub use delimiter::infer_delimiter;
pub use exporter::{export_canonical_parquet, export_table, ExportFormat, ExportOutcome};
pub use format::{detect_format, inspect_file, is_blank_file, FileDiagnostics};
pub use json_loader::{load_json, JsonLoadOutcome, JsonShape};
pub use lakehouse::{append_or_overwrite, create_table, evolve_schema, upsert, LakehouseConnection};
pub use native_loader::{load_excel, load_parquet, NativeLoadOutcome};
pub use session::AnalyticSession;
pub use text_recovery::{recover_if_needed, RecoveryOutcome};
