//! Core error types, configuration, domain model, classifier abstraction,
//! and external-event contracts shared by every pipeline stage.
//!
//! This crate has no dependency on the analytic engine's concrete session
//! type or on object storage; it is the seam every other crate in this
//! workspace builds against, the way `rde-core` is the seam for the rest of
//! this workspace's operators.

pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod report;

pub use classifier::{Classifier, ColumnSample, FailOpenClassifier, HeaderVerdict};
pub use config::{ClassifierConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use events::{CompletionEvent, InputEvent, LoadRequest, PublishedEvent, WriteMode};
pub use model::{
    Finding, FindingCategory, OperationRecord, Severity, SeverityCounts, SuggestedCast,
    TableMetadata, CANONICAL_OPERATION_ORDER,
};
pub use report::{CleaningReport, QualityReport};
