//! Built-in pipelines.

use serde::{Deserialize, Serialize};

use super::orchestrator::{Pipeline, PipelineError, Terminal};
use super::prompts::{self, Persona};
use super::schema::SchemaKind;
use super::stage::StageSpec;

pub const EXTRACT_ENTITIES: &str = "extract_entities";
pub const VALIDATE_ENTITIES: &str = "validate_entities";
pub const CLASSIFY: &str = "classify";
pub const VALIDATE_CLASSIFICATION: &str = "validate_classification";
pub const EXTRACT: &str = "extract";
pub const REVIEW: &str = "review";

/// Which built-in pipeline to run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Extract entities, then fact-check them (two stages)
    #[default]
    Dynamic,
    /// Classify, validate, extract, review, then consolidate a report
    Report,
}

/// Extraction schema for the report pipeline.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// Keys chosen by the model from the document's own labels
    #[default]
    Dynamic,
    /// Fixed invoice fields and line items
    Invoice,
}

fn stage(name: &str, persona: &Persona, template: &str, expected: &str) -> StageSpec {
    StageSpec::new(name, template)
        .with_persona(persona.role, persona.goal, persona.backstory)
        .with_expected_output(expected)
}

/// Two-stage pipeline producing a `DynamicExtractionResult`.
pub fn dynamic_pipeline() -> Result<Pipeline, PipelineError> {
    let stages = vec![
        stage(
            EXTRACT_ENTITIES,
            &prompts::DYNAMIC_EXTRACTOR,
            prompts::EXTRACT_ENTITIES_TEMPLATE,
            prompts::EXTRACT_ENTITIES_EXPECTED,
        ),
        stage(
            VALIDATE_ENTITIES,
            &prompts::FACT_CHECKER,
            prompts::VALIDATE_ENTITIES_TEMPLATE,
            prompts::VALIDATE_ENTITIES_EXPECTED,
        )
        .with_schema(SchemaKind::DynamicExtraction)
        .depends_on(EXTRACT_ENTITIES)
        .strict(),
    ];

    Pipeline::new(
        "dynamic",
        stages,
        Terminal::Stage(VALIDATE_ENTITIES.to_string()),
    )
}

/// Five-step pipeline producing a `FinalReport`.
pub fn report_pipeline(mode: ExtractionMode) -> Result<Pipeline, PipelineError> {
    let extract = match mode {
        ExtractionMode::Invoice => stage(
            EXTRACT,
            &prompts::INVOICE_EXTRACTOR,
            prompts::EXTRACT_INVOICE_TEMPLATE,
            prompts::EXTRACT_INVOICE_EXPECTED,
        )
        .with_schema(SchemaKind::InvoiceData),
        ExtractionMode::Dynamic => stage(
            EXTRACT,
            &prompts::DYNAMIC_EXTRACTOR,
            prompts::EXTRACT_DYNAMIC_TEMPLATE,
            prompts::EXTRACT_DYNAMIC_EXPECTED,
        )
        .with_schema(SchemaKind::EntityMap),
    };

    let stages = vec![
        stage(
            CLASSIFY,
            &prompts::CLASSIFIER,
            prompts::CLASSIFY_TEMPLATE,
            prompts::CLASSIFY_EXPECTED,
        )
        .with_schema(SchemaKind::Classification),
        stage(
            VALIDATE_CLASSIFICATION,
            &prompts::CLASSIFICATION_VALIDATOR,
            prompts::VALIDATE_CLASSIFICATION_TEMPLATE,
            prompts::VALIDATE_CLASSIFICATION_EXPECTED,
        )
        .with_schema(SchemaKind::Classification)
        .depends_on(CLASSIFY),
        extract.depends_on(VALIDATE_CLASSIFICATION),
        stage(
            REVIEW,
            &prompts::REVIEWER,
            prompts::REVIEW_TEMPLATE,
            prompts::REVIEW_EXPECTED,
        )
        .with_schema(SchemaKind::Review)
        .depends_on(EXTRACT)
        .strict(),
    ];

    let name = match mode {
        ExtractionMode::Invoice => "report-invoice",
        ExtractionMode::Dynamic => "report",
    };

    Pipeline::new(
        name,
        stages,
        Terminal::Report {
            classification: vec![VALIDATE_CLASSIFICATION.to_string(), CLASSIFY.to_string()],
            review: REVIEW.to_string(),
        },
    )
}

/// Build the pipeline selected on the command line or in config.
pub fn build(kind: PipelineKind, mode: ExtractionMode) -> Result<Pipeline, PipelineError> {
    match kind {
        PipelineKind::Dynamic => dynamic_pipeline(),
        PipelineKind::Report => report_pipeline(mode),
    }
}
