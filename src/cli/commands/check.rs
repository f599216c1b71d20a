//! Environment check command.

use console::style;

use crate::cli::icons::{error, success, warn};
use crate::config::Config;
use crate::llm::LlmClient;
use crate::ocr::CommandBackend;

/// Report availability of the extraction tools and the model endpoint.
pub async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    println!("{}", style("External tools").bold());
    let mut missing = 0;
    for (tool, available) in CommandBackend::check_tools() {
        if available {
            println!("  {} {}", success(), tool);
        } else {
            missing += 1;
            println!("  {} {} (not found in PATH)", error(), tool);
        }
    }

    println!();
    println!("{}", style("Model").bold());
    println!("  Provider: {}", config.llm.provider);
    println!("  Model:    {}", config.llm.model);
    println!("  Endpoint: {}", config.llm.endpoint);
    println!(
        "  API key:  {}",
        if config.llm.api_key.is_some() {
            "configured"
        } else {
            "not set"
        }
    );

    let client = LlmClient::new(config.llm.clone())?;
    if client.is_available().await {
        println!("  {} Endpoint reachable", success());
    } else {
        println!("  {} Endpoint not reachable", warn());
    }

    if missing > 0 {
        println!();
        println!(
            "{} {} tool(s) missing; scanned PDFs and images cannot be processed",
            warn(),
            missing
        );
    }
    Ok(())
}
