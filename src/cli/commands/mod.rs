//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod check;
mod config_cmd;
mod extract;
mod text;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{expand_path, Config};
use crate::pipeline::{ExtractionMode, PipelineKind};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(about = "Extract structured data from invoices, disclosures and resumes")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction pipeline on one or more documents
    Extract {
        /// Documents to process (PDF, PNG, JPG/JPEG, TXT)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Pipeline to run [default: from config, else dynamic]
        #[arg(short, long, value_enum)]
        pipeline: Option<PipelineKind>,
        /// Extraction schema for the report pipeline
        #[arg(short, long, value_enum)]
        mode: Option<ExtractionMode>,
        /// Documents processed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Deadline for each model call in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print a grouped human-readable summary instead of JSON
        #[arg(short, long)]
        summary: bool,
        /// Include every stage result in the JSON output
        #[arg(long, conflicts_with = "summary")]
        full: bool,
    },

    /// Extract and print document text without calling the model
    Text {
        /// Document to read
        path: PathBuf,
    },

    /// Check external tools and model endpoint availability
    Check,

    /// Show the effective configuration
    Config,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => {
            let path = expand_path(path);
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(&path)
                .await
                .map_err(|e| anyhow::anyhow!(e))?
        }
        None => Config::load().await,
    };

    match cli.command {
        Commands::Extract {
            paths,
            pipeline,
            mode,
            jobs,
            timeout,
            summary,
            full,
        } => {
            let mut config = config;
            if let Some(kind) = pipeline {
                config.pipeline.kind = kind;
            }
            if let Some(mode) = mode {
                config.pipeline.mode = mode;
            }
            if let Some(jobs) = jobs {
                config.pipeline.jobs = jobs;
            }
            if timeout.is_some() {
                config.pipeline.stage_timeout_secs = timeout;
            }
            let output = if summary {
                extract::OutputFormat::Summary
            } else if full {
                extract::OutputFormat::FullJson
            } else {
                extract::OutputFormat::Json
            };
            extract::cmd_extract(&config, &paths, output).await
        }
        Commands::Text { path } => text::cmd_text(&config, &path).await,
        Commands::Check => check::cmd_check(&config).await,
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
