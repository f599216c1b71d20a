//! Multi-stage extraction pipeline.
//!
//! Document text flows through an ordered list of [`StageSpec`]s. Each stage
//! is rendered into a prompt with its declared upstream results as context,
//! sent once to the model, and checked against its schema by the
//! [`SchemaRegistry`]. The [`PipelineOrchestrator`] runs stages in order and
//! halts on model failures or strict schema violations; the
//! [`ReportAssembler`] consolidates the terminal report.

pub mod models;
pub mod presets;
pub mod prompts;
mod orchestrator;
mod report;
mod runner;
mod schema;
mod stage;

pub use models::{
    ClassificationResult, DocumentType, DynamicExtractionResult, FinalReport, InvoiceData,
    LineItem, ReviewResult,
};
pub use orchestrator::{
    HaltCause, Pipeline, PipelineError, PipelineEvent, PipelineHalted, PipelineOrchestrator,
    PipelineOutput, PipelineRun, RunState, Terminal,
};
pub use presets::{ExtractionMode, PipelineKind};
pub use report::ReportAssembler;
pub use runner::{StageError, StageRunner};
pub use schema::{extract_json, SchemaKind, SchemaRegistry, StructuredValue, ValidationFailure};
pub use stage::{StageOutcome, StageRecord, StageResult, StageSpec, UpstreamResults};
