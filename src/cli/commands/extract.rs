//! Pipeline extraction command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};

use crate::cli::icons::{dim_arrow, error, info, success, warn};
use crate::cli::summary::{render_summary, summary_parts};
use crate::config::{expand_path, Config, PipelineConfig};
use crate::llm::{DegradingModel, LlmClient, ModelBoundary};
use crate::ocr::{ExtractionError, TextExtractor};
use crate::pipeline::{
    presets, Pipeline, PipelineEvent, PipelineHalted, PipelineOrchestrator, PipelineOutput,
    PipelineRun,
};

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Terminal output only, as indented JSON
    Json,
    /// The whole run including every stage result
    FullJson,
    /// Grouped human-readable summary
    Summary,
}

/// Result of processing a single document.
enum DocumentOutcome {
    Completed(PipelineRun),
    Halted(PipelineHalted),
    ExtractionFailed(ExtractionError),
}

/// Shared, read-only handles for a batch of documents.
struct BatchContext {
    extractor: Arc<TextExtractor>,
    pipeline: Arc<Pipeline>,
    model: Arc<dyn ModelBoundary>,
    settings: PipelineConfig,
    progress: MultiProgress,
}

/// Build the model handle, wrapping it so faults degrade to the sentinel payload.
fn build_model(config: &Config) -> anyhow::Result<Arc<dyn ModelBoundary>> {
    let client = LlmClient::new(config.llm.clone())?;
    Ok(if config.llm.degrade_errors {
        Arc::new(DegradingModel::new(client))
    } else {
        Arc::new(client)
    })
}

/// Run the configured pipeline over every document.
pub async fn cmd_extract(
    config: &Config,
    paths: &[PathBuf],
    output: OutputFormat,
) -> anyhow::Result<()> {
    let pipeline = presets::build(config.pipeline.kind, config.pipeline.mode)?;
    let model = build_model(config)?;

    eprintln!(
        "{} Running '{}' pipeline with {} ({})",
        info(),
        pipeline.name(),
        model.name(),
        config.llm.provider
    );

    let ctx = Arc::new(BatchContext {
        extractor: Arc::new(TextExtractor::new(&config.extraction)),
        pipeline: Arc::new(pipeline),
        model,
        settings: config.pipeline.clone(),
        progress: MultiProgress::new(),
    });

    let semaphore = Arc::new(Semaphore::new(config.pipeline.jobs.max(1)));
    let mut handles = Vec::with_capacity(paths.len());
    for path in paths.iter().map(|p| expand_path(p)) {
        let ctx = Arc::clone(&ctx);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = process_document(&ctx, &path).await;
            (path, outcome)
        }));
    }

    // Handles are awaited in input order, so output order matches the arguments
    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await?);
    }

    let total = outcomes.len();
    let mut failed = 0;
    for (path, outcome) in &outcomes {
        match outcome {
            DocumentOutcome::Completed(run) => {
                eprintln!(
                    "{} {} ({} stages)",
                    success(),
                    path.display(),
                    run.stages.len()
                );
            }
            DocumentOutcome::Halted(halted) => {
                failed += 1;
                report_halt(path, halted);
            }
            DocumentOutcome::ExtractionFailed(e) => {
                failed += 1;
                eprintln!("{} {}: {}", error(), path.display(), e);
            }
        }
    }

    print_results(&outcomes, output)?;

    if failed > 0 {
        anyhow::bail!("{} of {} documents failed", failed, total);
    }
    Ok(())
}

async fn process_document(ctx: &BatchContext, path: &Path) -> DocumentOutcome {
    let extractor = Arc::clone(&ctx.extractor);
    let owned_path = path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(&owned_path))
        .await
        .map_err(|e| ExtractionError::Fault(e.to_string()))
        .and_then(|result| result);

    let document = match extracted {
        Ok(result) => result.text,
        Err(e) => return DocumentOutcome::ExtractionFailed(e),
    };

    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let pb = ctx.progress.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(format!("{}: starting", label));

    let (event_tx, mut event_rx) = mpsc::channel::<PipelineEvent>(32);
    let pb_events = pb.clone();
    let event_handler = tokio::spawn(async move {
        let mut total_stages = 0;
        while let Some(event) = event_rx.recv().await {
            match event {
                PipelineEvent::RunStarted { total_stages: n, .. } => total_stages = n,
                PipelineEvent::StageStarted { index, stage } => {
                    pb_events.set_message(format!(
                        "{}: [{}/{}] {}",
                        label,
                        index + 1,
                        total_stages,
                        stage
                    ));
                }
                PipelineEvent::StageCompleted {
                    stage,
                    outcome,
                    duration_ms,
                } => {
                    pb_events.println(format!(
                        "  {} {}: {} {} ({} ms)",
                        dim_arrow(),
                        label,
                        stage,
                        outcome,
                        duration_ms
                    ));
                }
                PipelineEvent::RunCompleted { .. } | PipelineEvent::RunHalted { .. } => {}
            }
        }
    });

    let mut orchestrator =
        PipelineOrchestrator::new(Arc::clone(&ctx.pipeline), Arc::clone(&ctx.model))
            .with_runner_options(ctx.settings.stage_timeout(), ctx.settings.max_document_chars)
            .with_events(event_tx);

    let result = orchestrator.run(&document).await;
    drop(orchestrator);
    let _ = event_handler.await;
    pb.finish_and_clear();

    match result {
        Ok(run) => DocumentOutcome::Completed(run),
        Err(halted) => DocumentOutcome::Halted(halted),
    }
}

/// Explain a halt on stderr. The halted run itself goes to stdout with the
/// other results.
fn report_halt(path: &Path, halted: &PipelineHalted) {
    eprintln!(
        "{} {}: pipeline halted at stage '{}'",
        error(),
        path.display(),
        halted.stage
    );
    eprintln!("  {} {}", dim_arrow(), halted.cause);
    if halted.completed.is_empty() {
        eprintln!("  {} No stages completed", warn());
    } else {
        eprintln!(
            "  {} {} completed stage result(s) kept in the output",
            dim_arrow(),
            halted.completed.len()
        );
    }
}

/// JSON entry for one input, labelled with its file.
fn labelled_entry(
    path: &Path,
    outcome: &DocumentOutcome,
    output: OutputFormat,
) -> serde_json::Result<Value> {
    let file = path.display().to_string();
    Ok(match outcome {
        DocumentOutcome::Completed(run) if output == OutputFormat::FullJson => {
            json!({ "file": file, "run": run })
        }
        DocumentOutcome::Completed(run) => json!({ "file": file, "output": run.output }),
        DocumentOutcome::Halted(halted) => {
            json!({ "file": file, "halted": serde_json::to_value(halted)? })
        }
        DocumentOutcome::ExtractionFailed(e) => json!({ "file": file, "error": e.to_string() }),
    })
}

/// The single JSON document written for a batch: the bare result for one
/// input, otherwise an array with an entry per input.
fn results_json(
    outcomes: &[(PathBuf, DocumentOutcome)],
    output: OutputFormat,
) -> serde_json::Result<Value> {
    match outcomes {
        [(_, DocumentOutcome::Completed(run))] if output == OutputFormat::Json => {
            serde_json::to_value(&run.output)
        }
        [(_, DocumentOutcome::Halted(halted))] => serde_json::to_value(halted),
        [(path, outcome)] => labelled_entry(path, outcome, output),
        _ => outcomes
            .iter()
            .map(|(path, outcome)| labelled_entry(path, outcome, output))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn print_results(
    outcomes: &[(PathBuf, DocumentOutcome)],
    output: OutputFormat,
) -> anyhow::Result<()> {
    if output == OutputFormat::Summary {
        for (path, outcome) in outcomes {
            if let DocumentOutcome::Completed(run) = outcome {
                print_summary(path, &run.output);
            }
        }
        return Ok(());
    }

    let value = results_json(outcomes, output)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_summary(path: &Path, output: &PipelineOutput) {
    let rule = "=".repeat(50);
    println!("{}", rule);
    println!("{}", style(format!("Entity Summary: {}", path.display())).bold());
    if let PipelineOutput::Report(report) = output {
        println!(
            "Document type: {}{}",
            report.final_document_type,
            if report.is_flagged_by_reviewer {
                style(" (flagged by reviewer)").yellow().to_string()
            } else {
                String::new()
            }
        );
        println!("{}", style(&report.extraction_summary).dim());
    }
    println!("{}", rule);

    let (entities, comments) = summary_parts(output);
    print!("{}", render_summary(&entities, comments));
    println!("{}", rule);
}
