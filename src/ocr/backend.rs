//! Tool backend for text extraction.
//!
//! The extractor decides *what* to do with a document; a backend knows *how*
//! to read a PDF text layer, rasterize pages, and OCR an image. The default
//! [`CommandBackend`] shells out to Poppler (`pdftotext`, `pdftoppm`) and
//! Tesseract.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};

use super::extractor::ExtractionError;

/// OCR settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract language (e.g., "eng", "eng+deu").
    #[serde(default = "default_language")]
    pub language: String,
    /// Rasterization resolution for scanned PDFs.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_language() -> String {
    "eng".to_string()
}

fn default_dpi() -> u32 {
    300
}

impl Default for OcrConfig {
    fn default() -> Self {
        let mut config = Self {
            language: default_language(),
            dpi: default_dpi(),
        };
        if let Ok(lang) = std::env::var("DOCSIFT_OCR_LANG") {
            config.language = lang;
        }
        if let Some(dpi) = std::env::var("DOCSIFT_OCR_DPI")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.dpi = dpi;
        }
        config
    }
}

/// Low-level document operations used by the extractor.
pub trait ExtractionBackend: Send + Sync {
    /// Read the native text layer of a PDF (all pages).
    fn pdf_text(&self, pdf_path: &Path) -> Result<String, ExtractionError>;

    /// Render every page of a PDF to an image in `output_dir`, in page order.
    fn rasterize_pdf(
        &self,
        pdf_path: &Path,
        dpi: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError>;

    /// Run OCR on a single image.
    fn ocr_image(&self, image_path: &Path) -> Result<String, ExtractionError>;
}

/// Backend driving Poppler and Tesseract binaries.
pub struct CommandBackend {
    language: String,
}

impl CommandBackend {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            language: config.language.clone(),
        }
    }

    /// Check if required tools are available.
    pub fn check_tools() -> Vec<(String, bool)> {
        ["pdftotext", "pdftoppm", "tesseract"]
            .iter()
            .map(|tool| (tool.to_string(), which::which(tool).is_ok()))
            .collect()
    }
}

impl Default for CommandBackend {
    fn default() -> Self {
        Self::new(&OcrConfig::default())
    }
}

/// Handle command output, extracting stdout on success or returning appropriate error.
fn handle_cmd_output(
    result: std::io::Result<std::process::Output>,
    tool_hint: &str,
    error_prefix: &str,
) -> Result<String, ExtractionError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(ExtractionError::Fault(format!(
                    "{}: {}",
                    error_prefix,
                    stderr.trim()
                )))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExtractionError::Fault(
            format!("external tool not found: {}", tool_hint),
        )),
        Err(e) => Err(ExtractionError::Fault(format!("{}: {}", error_prefix, e))),
    }
}

impl ExtractionBackend for CommandBackend {
    fn pdf_text(&self, pdf_path: &Path) -> Result<String, ExtractionError> {
        let output = Command::new("pdftotext")
            .args(["-layout", "-enc", "UTF-8"])
            .arg(pdf_path)
            .arg("-") // Output to stdout
            .output();

        handle_cmd_output(output, "pdftotext (install poppler-utils)", "pdftotext failed")
    }

    fn rasterize_pdf(
        &self,
        pdf_path: &Path,
        dpi: u32,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        let dpi = dpi.to_string();
        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &dpi])
            .arg(pdf_path)
            .arg(output_dir.join("page"))
            .output();

        handle_cmd_output(
            output,
            "pdftoppm (install poppler-utils)",
            "pdftoppm failed to convert PDF",
        )?;

        // pdftoppm zero-pads page numbers consistently within one run
        // (page-01.png, page-02.png, ...), so a lexical sort is page order.
        let mut images: Vec<PathBuf> = std::fs::read_dir(output_dir)
            .map_err(|e| ExtractionError::Fault(format!("reading rendered pages: {}", e)))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        images.sort();
        Ok(images)
    }

    fn ocr_image(&self, image_path: &Path) -> Result<String, ExtractionError> {
        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output();

        handle_cmd_output(output, "tesseract (install tesseract-ocr)", "tesseract failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_tools() {
        let tools = CommandBackend::check_tools();
        assert_eq!(tools.len(), 3);
        assert!(tools.iter().any(|(name, _)| name == "tesseract"));
    }

    #[test]
    fn test_missing_binary_is_fault() {
        let result = handle_cmd_output(
            Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
            "tesseract (install tesseract-ocr)",
            "tesseract failed",
        );
        match result {
            Err(ExtractionError::Fault(msg)) => assert!(msg.contains("install tesseract-ocr")),
            other => panic!("expected fault, got {:?}", other),
        }
    }
}
