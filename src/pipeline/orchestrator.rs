//! Linear pipeline execution.
//!
//! A [`Pipeline`] is an ordered list of stages whose dependencies form a DAG
//! pointing strictly backwards. The orchestrator runs them one at a time in
//! declared order, hands each stage only the results it declared, and stops
//! at the first model failure or strict schema violation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{ClassificationResult, DynamicExtractionResult, FinalReport};
use super::report::ReportAssembler;
use super::runner::{StageError, StageRunner};
use super::schema::SchemaRegistry;
use super::stage::{StageOutcome, StageRecord, StageResult, StageSpec, UpstreamResults};
use crate::llm::{is_sentinel, ModelBoundary};
use crate::ocr::DocumentText;

/// How a pipeline turns its stage results into output.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// The named stage's `DynamicExtractionResult` is the output.
    Stage(String),
    /// Consolidate a classification and a review into a [`FinalReport`].
    Report {
        /// Stages to take the classification from, most preferred first.
        classification: Vec<String>,
        review: String,
    },
}

/// Structural problems found when building a pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("pipeline has no stages")]
    Empty,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage '{stage}' depends on '{dependency}', which runs after it")]
    ForwardDependency { stage: String, dependency: String },

    #[error("first stage '{0}' cannot have dependencies")]
    RootHasDependencies(String),

    #[error("stage '{0}' does not depend on the first stage")]
    Disconnected(String),

    #[error("terminal refers to unknown stage '{0}'")]
    UnknownTerminal(String),
}

/// A validated, immutable stage sequence.
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    stages: Vec<StageSpec>,
    terminal: Terminal,
    registry: Arc<SchemaRegistry>,
}

impl Pipeline {
    pub fn new(
        name: &str,
        stages: Vec<StageSpec>,
        terminal: Terminal,
    ) -> Result<Self, PipelineError> {
        let first = stages.first().ok_or(PipelineError::Empty)?;
        if !first.depends_on.is_empty() {
            return Err(PipelineError::RootHasDependencies(first.name.clone()));
        }

        let all: HashSet<&str> = stages.iter().map(|s| s.name.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        // Stages that (transitively) depend on the first one.
        let mut rooted: HashSet<&str> = HashSet::new();

        for (index, stage) in stages.iter().enumerate() {
            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineError::DuplicateStage(stage.name.clone()));
            }
            for dep in &stage.depends_on {
                if !all.contains(dep.as_str()) {
                    return Err(PipelineError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !seen.contains(dep.as_str()) || dep == &stage.name {
                    return Err(PipelineError::ForwardDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if index == 0 || stage.depends_on.iter().any(|d| rooted.contains(d.as_str())) {
                rooted.insert(stage.name.as_str());
            } else {
                return Err(PipelineError::Disconnected(stage.name.clone()));
            }
        }

        let terminal_stages: Vec<&String> = match &terminal {
            Terminal::Stage(name) => vec![name],
            Terminal::Report {
                classification,
                review,
            } => classification.iter().chain(std::iter::once(review)).collect(),
        };
        for name in terminal_stages {
            if !all.contains(name.as_str()) {
                return Err(PipelineError::UnknownTerminal(name.clone()));
            }
        }

        let registry = SchemaRegistry::from_stages(
            stages.iter().map(|s| (s.name.as_str(), s.schema)),
        );

        Ok(Self {
            name: name.to_string(),
            stages,
            terminal,
            registry: Arc::new(registry),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry)
    }
}

/// Terminal output of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineOutput {
    Extraction(DynamicExtractionResult),
    Report(FinalReport),
}

/// A completed run with every stage result, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub pipeline: String,
    pub output: PipelineOutput,
    pub stages: Vec<StageRecord>,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltCause {
    #[error("model call failed: {error}")]
    ModelCallFailure { error: String },

    #[error("strict schema violation: {detail}")]
    SchemaViolation { detail: String, raw: String },

    #[error("dependency '{dependency}' has no result")]
    MissingUpstream { dependency: String },

    #[error("terminal output unusable: {detail}")]
    InvalidOutput { detail: String },

    #[error("{detail}")]
    Internal { detail: String },
}

/// A run that stopped before producing output.
///
/// `completed` holds every stage result recorded before the halting stage.
#[derive(Debug, Clone, Error, Serialize)]
#[error("pipeline halted at stage '{stage}': {cause}")]
pub struct PipelineHalted {
    pub run_id: Uuid,
    pub stage: String,
    pub cause: HaltCause,
    pub completed: Vec<StageRecord>,
}

/// Orchestrator state for the current (or last) run.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RunState {
    #[default]
    NotStarted,
    /// Index of the stage being executed.
    Running(usize),
    Completed,
    Halted { at_stage: String, cause: HaltCause },
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run started
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        total_stages: usize,
    },
    /// Stage started
    StageStarted { index: usize, stage: String },
    /// Stage produced a result
    StageCompleted {
        stage: String,
        outcome: StageOutcome,
        duration_ms: u64,
    },
    /// Output assembled
    RunCompleted { run_id: Uuid },
    /// Run stopped at a stage
    RunHalted { stage: String, cause: String },
}

/// Drives one document at a time through a pipeline.
///
/// Instances share nothing mutable; run several for concurrent documents.
pub struct PipelineOrchestrator {
    pipeline: Arc<Pipeline>,
    runner: StageRunner,
    events: Option<mpsc::Sender<PipelineEvent>>,
    state: RunState,
}

impl PipelineOrchestrator {
    pub fn new(pipeline: Arc<Pipeline>, model: Arc<dyn ModelBoundary>) -> Self {
        let runner = StageRunner::new(model, pipeline.registry());
        Self {
            pipeline,
            runner,
            events: None,
            state: RunState::NotStarted,
        }
    }

    pub fn with_runner_options(
        mut self,
        call_timeout: Option<Duration>,
        max_document_chars: Option<usize>,
    ) -> Self {
        self.runner = self
            .runner
            .with_timeout(call_timeout)
            .with_max_document_chars(max_document_chars);
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Run every stage in order and assemble the terminal output.
    ///
    /// Results never carry over between calls.
    pub async fn run(&mut self, document: &DocumentText) -> Result<PipelineRun, PipelineHalted> {
        let pipeline = Arc::clone(&self.pipeline);
        let run_id = Uuid::new_v4();

        info!(
            "Starting pipeline '{}' run {} ({} stages)",
            pipeline.name(),
            run_id,
            pipeline.stages().len()
        );
        self.state = RunState::Running(0);
        self.emit(PipelineEvent::RunStarted {
            run_id,
            pipeline: pipeline.name().to_string(),
            total_stages: pipeline.stages().len(),
        })
        .await;

        let mut results = UpstreamResults::new();
        let mut records: Vec<StageRecord> = Vec::new();

        for (index, spec) in pipeline.stages().iter().enumerate() {
            self.state = RunState::Running(index);
            self.emit(PipelineEvent::StageStarted {
                index,
                stage: spec.name.clone(),
            })
            .await;

            let upstream: UpstreamResults = spec
                .depends_on
                .iter()
                .filter_map(|dep| results.get(dep).map(|r| (dep.clone(), r.clone())))
                .collect();

            let started = Instant::now();
            let outcome = self.runner.run(spec, document, &upstream).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(StageResult::ModelCallFailure { error }) => {
                    let cause = HaltCause::ModelCallFailure { error };
                    return Err(self.halt(run_id, &spec.name, cause, records).await);
                }
                Ok(result) => result,
                Err(StageError::StrictSchemaViolation { raw, failure, .. }) => {
                    let cause = HaltCause::SchemaViolation {
                        detail: failure.to_string(),
                        raw,
                    };
                    return Err(self.halt(run_id, &spec.name, cause, records).await);
                }
                Err(StageError::MissingUpstream { missing, .. }) => {
                    let cause = HaltCause::MissingUpstream {
                        dependency: missing,
                    };
                    return Err(self.halt(run_id, &spec.name, cause, records).await);
                }
                Err(e @ StageError::Unregistered { .. }) => {
                    let cause = HaltCause::Internal {
                        detail: e.to_string(),
                    };
                    return Err(self.halt(run_id, &spec.name, cause, records).await);
                }
            };

            info!(
                "Stage '{}' finished: {} ({} ms)",
                spec.name,
                result.outcome(),
                duration_ms
            );
            self.emit(PipelineEvent::StageCompleted {
                stage: spec.name.clone(),
                outcome: result.outcome(),
                duration_ms,
            })
            .await;

            records.push(StageRecord {
                stage: spec.name.clone(),
                result: result.clone(),
                duration_ms,
                completed_at: Utc::now(),
            });
            results.insert(spec.name.clone(), result);
        }

        let output = match assemble_output(pipeline.terminal(), &results) {
            Ok(output) => output,
            Err((stage, cause)) => return Err(self.halt(run_id, &stage, cause, records).await),
        };

        self.state = RunState::Completed;
        self.emit(PipelineEvent::RunCompleted { run_id }).await;
        info!("Pipeline '{}' run {} completed", pipeline.name(), run_id);

        Ok(PipelineRun {
            run_id,
            pipeline: pipeline.name().to_string(),
            output,
            stages: records,
        })
    }

    async fn halt(
        &mut self,
        run_id: Uuid,
        stage: &str,
        cause: HaltCause,
        completed: Vec<StageRecord>,
    ) -> PipelineHalted {
        warn!("Pipeline halted at stage '{}': {}", stage, cause);
        self.state = RunState::Halted {
            at_stage: stage.to_string(),
            cause: cause.clone(),
        };
        self.emit(PipelineEvent::RunHalted {
            stage: stage.to_string(),
            cause: cause.to_string(),
        })
        .await;
        PipelineHalted {
            run_id,
            stage: stage.to_string(),
            cause,
            completed,
        }
    }
}

/// Build the terminal output, or name the stage whose result was unusable.
fn assemble_output(
    terminal: &Terminal,
    results: &UpstreamResults,
) -> Result<PipelineOutput, (String, HaltCause)> {
    match terminal {
        Terminal::Stage(name) => {
            let result = results.get(name).ok_or_else(|| {
                (
                    name.clone(),
                    HaltCause::MissingUpstream {
                        dependency: name.clone(),
                    },
                )
            })?;
            if result.structured().is_some_and(is_sentinel) {
                warn!("Stage '{}' output is the model error placeholder", name);
            }
            let extraction = result.parse_as::<DynamicExtractionResult>().ok_or_else(|| {
                (
                    name.clone(),
                    HaltCause::InvalidOutput {
                        detail: format!(
                            "stage '{}' produced {} output, not a DynamicExtractionResult",
                            name,
                            result.outcome()
                        ),
                    },
                )
            })?;
            Ok(PipelineOutput::Extraction(extraction))
        }
        Terminal::Report {
            classification,
            review,
        } => {
            let review_result = results.get(review).ok_or_else(|| {
                (
                    review.clone(),
                    HaltCause::MissingUpstream {
                        dependency: review.clone(),
                    },
                )
            })?;
            let classification = classification
                .iter()
                .find_map(|name| results.get(name)?.parse_as::<ClassificationResult>())
                .unwrap_or_else(|| {
                    ClassificationResult::unknown("No stage produced a valid classification")
                });
            Ok(PipelineOutput::Report(ReportAssembler::assemble(
                &classification,
                review_result,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm::LlmError;
    use crate::pipeline::schema::SchemaKind;

    /// Replies with `reply-to:<first template line>`, recording prompts.
    #[derive(Default)]
    struct Echo {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelBoundary for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if prompt.starts_with("final") {
                return Ok(r#"{"review_summary":"ok","extracted_entities":{"k":"v"}}"#.to_string());
            }
            let first = prompt.lines().next().unwrap_or_default();
            Ok(format!("reply-to:{}", first))
        }
    }

    fn chain() -> Vec<StageSpec> {
        vec![
            StageSpec::new("a", "a-stage\n{document_text}"),
            StageSpec::new("b", "b-stage\n{context}").depends_on("a"),
            StageSpec::new("c", "c-stage\n{context}").depends_on("b"),
            StageSpec::new("final", "final\n{context}")
                .depends_on("c")
                .with_schema(SchemaKind::DynamicExtraction)
                .strict(),
        ]
    }

    fn doc() -> DocumentText {
        DocumentText::new("the document").unwrap()
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(
            Pipeline::new("p", vec![], Terminal::Stage("x".into())).unwrap_err(),
            PipelineError::Empty
        );
    }

    #[test]
    fn test_rejects_duplicates() {
        let stages = vec![StageSpec::new("a", ""), StageSpec::new("a", "").depends_on("a")];
        assert!(matches!(
            Pipeline::new("p", stages, Terminal::Stage("a".into())),
            Err(PipelineError::DuplicateStage(_))
        ));
    }

    #[test]
    fn test_rejects_forward_and_unknown_dependencies() {
        let forward = vec![
            StageSpec::new("a", ""),
            StageSpec::new("b", "").depends_on("c"),
            StageSpec::new("c", "").depends_on("a"),
        ];
        assert!(matches!(
            Pipeline::new("p", forward, Terminal::Stage("c".into())),
            Err(PipelineError::ForwardDependency { .. })
        ));

        let unknown = vec![StageSpec::new("a", ""), StageSpec::new("b", "").depends_on("z")];
        assert!(matches!(
            Pipeline::new("p", unknown, Terminal::Stage("b".into())),
            Err(PipelineError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_rejects_self_dependency() {
        let stages = vec![StageSpec::new("a", ""), StageSpec::new("b", "").depends_on("b")];
        assert!(matches!(
            Pipeline::new("p", stages, Terminal::Stage("b".into())),
            Err(PipelineError::ForwardDependency { .. })
        ));
    }

    #[test]
    fn test_rejects_disconnected_stage() {
        let stages = vec![StageSpec::new("a", ""), StageSpec::new("b", "")];
        assert_eq!(
            Pipeline::new("p", stages, Terminal::Stage("b".into())).unwrap_err(),
            PipelineError::Disconnected("b".to_string())
        );
    }

    #[test]
    fn test_rejects_rooted_first_stage_and_unknown_terminal() {
        let stages = vec![StageSpec::new("a", "").depends_on("a")];
        assert!(matches!(
            Pipeline::new("p", stages, Terminal::Stage("a".into())),
            Err(PipelineError::RootHasDependencies(_))
        ));

        let stages = vec![StageSpec::new("a", "")];
        assert_eq!(
            Pipeline::new(
                "p",
                stages,
                Terminal::Report {
                    classification: vec!["a".into()],
                    review: "review".into()
                }
            )
            .unwrap_err(),
            PipelineError::UnknownTerminal("review".to_string())
        );
    }

    #[tokio::test]
    async fn test_stages_see_only_declared_context() {
        let pipeline = Arc::new(Pipeline::new("p", chain(), Terminal::Stage("final".into())).unwrap());
        let model = Arc::new(Echo::default());
        let mut orchestrator = PipelineOrchestrator::new(pipeline, model.clone());
        assert_eq!(orchestrator.state(), &RunState::NotStarted);

        let run = orchestrator.run(&doc()).await.unwrap();
        assert_eq!(orchestrator.state(), &RunState::Completed);
        assert_eq!(
            run.stages.iter().map(|r| r.stage.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "final"]
        );

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("reply-to:a-stage"));
        // c depends on b only.
        assert!(prompts[2].contains("reply-to:b-stage"));
        assert!(!prompts[2].contains("reply-to:a-stage"));
        assert!(!prompts[2].contains("the document"));
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let pipeline = Arc::new(Pipeline::new("p", chain(), Terminal::Stage("final".into())).unwrap());
        let (tx, mut rx) = mpsc::channel(64);
        let mut orchestrator =
            PipelineOrchestrator::new(pipeline, Arc::new(Echo::default())).with_events(tx);
        orchestrator.run(&doc()).await.unwrap();
        drop(orchestrator);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                PipelineEvent::RunStarted { total_stages, .. } => format!("run:{}", total_stages),
                PipelineEvent::StageStarted { stage, .. } => format!("start:{}", stage),
                PipelineEvent::StageCompleted { stage, .. } => format!("done:{}", stage),
                PipelineEvent::RunCompleted { .. } => "completed".to_string(),
                PipelineEvent::RunHalted { .. } => "halted".to_string(),
            });
        }
        assert_eq!(kinds.first().map(String::as_str), Some("run:4"));
        assert_eq!(kinds.last().map(String::as_str), Some("completed"));
        let start_b = kinds.iter().position(|k| k == "start:b").unwrap();
        let done_a = kinds.iter().position(|k| k == "done:a").unwrap();
        assert!(done_a < start_b);
    }

    #[tokio::test]
    async fn test_unusable_terminal_output_halts() {
        let stages = vec![
            StageSpec::new("a", "a-stage"),
            StageSpec::new("b", "b-stage").depends_on("a"),
        ];
        let pipeline = Arc::new(Pipeline::new("p", stages, Terminal::Stage("b".into())).unwrap());
        let mut orchestrator = PipelineOrchestrator::new(pipeline, Arc::new(Echo::default()));
        let halted = orchestrator.run(&doc()).await.unwrap_err();
        assert_eq!(halted.stage, "b");
        assert!(matches!(halted.cause, HaltCause::InvalidOutput { .. }));
        assert_eq!(halted.completed.len(), 2);
        assert!(matches!(orchestrator.state(), RunState::Halted { at_stage, .. } if at_stage == "b"));
    }
}
