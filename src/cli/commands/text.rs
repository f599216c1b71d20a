//! Text extraction command.

use std::path::Path;

use crate::cli::icons::success;
use crate::config::{expand_path, Config};
use crate::ocr::TextExtractor;

/// Extract text from a document and print it.
pub async fn cmd_text(config: &Config, path: &Path) -> anyhow::Result<()> {
    let path = expand_path(path);
    let extractor = TextExtractor::new(&config.extraction);

    let display = path.display().to_string();
    let result = tokio::task::spawn_blocking(move || extractor.extract(&path)).await??;

    eprintln!(
        "{} {} ({:?}{}, {} chars)",
        success(),
        display,
        result.method,
        result
            .ocr_pages
            .map(|n| format!(", {} pages", n))
            .unwrap_or_default(),
        result.text.len()
    );
    println!("{}", result.text);
    Ok(())
}
