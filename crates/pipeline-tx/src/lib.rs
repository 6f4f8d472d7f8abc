//! Quality Scanner, Cleaning Engine, Report Builders, and Profiling
//! utilities: the transformation half of the pipeline, built on top of
//! the loaders and analytic session in `pipeline-io`.

pub mod cleaner;
pub mod profiler;
pub mod report_builder;
pub mod scanner;

pub use cleaner::{clean_table, CleanOutcome};
pub use profiler::{profile_columns, profile_table, sample_data, ColumnProfile, DataSample, TableProfile};
pub use report_builder::{
    build_cleaning_report, build_quality_report, write_cleaning_report, write_quality_report,
};
pub use scanner::{scan_table, ScanOutcome};
