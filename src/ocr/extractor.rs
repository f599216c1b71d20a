//! Document-to-text extraction with OCR fallback.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::backend::{CommandBackend, ExtractionBackend, OcrConfig};

/// Marker appended after each OCR'd page of a scanned PDF.
pub const PAGE_END_MARKER: &str = "\n\n--- Page End ---\n\n";

/// Errors that can occur during text extraction.
///
/// The messages keep the `Error:` wording callers historically grepped for.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Error: File not found at '{0}'")]
    NotFound(String),

    #[error("Error: Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction Error: No text found in the document.")]
    NoTextFound,

    #[error("Error: An unexpected error occurred during file processing: {0}")]
    Fault(String),
}

/// Supported input formats, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
    PlainText,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(Self::Pdf),
            "png" | "jpg" | "jpeg" => Ok(Self::Image),
            "txt" => Ok(Self::PlainText),
            "" => Err(ExtractionError::UnsupportedFormat("(no extension)".to_string())),
            other => Err(ExtractionError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

/// Normalized document text. Never empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentText(Arc<str>);

impl DocumentText {
    pub fn new(text: impl Into<String>) -> Result<Self, ExtractionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ExtractionError::NoTextFound);
        }
        Ok(Self(Arc::from(text)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Method used to extract text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    /// Native PDF text layer.
    TextLayer,
    /// Per-page OCR of a rasterized PDF.
    PdfOcr,
    /// OCR of an image file.
    ImageOcr,
    /// Plain text read verbatim.
    Plain,
}

/// Result of text extraction.
#[derive(Debug)]
pub struct ExtractionResult {
    pub text: DocumentText,
    pub method: ExtractionMethod,
    /// Number of pages OCR'd (scanned PDFs only).
    pub ocr_pages: Option<usize>,
}

/// Converts documents to text, falling back to OCR for image-only PDFs.
pub struct TextExtractor {
    backend: Box<dyn ExtractionBackend>,
    dpi: u32,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(&OcrConfig::default())
    }
}

impl TextExtractor {
    /// Create an extractor backed by Poppler and Tesseract.
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            backend: Box::new(CommandBackend::new(config)),
            dpi: config.dpi,
        }
    }

    /// Create an extractor with a custom backend.
    pub fn with_backend(backend: Box<dyn ExtractionBackend>) -> Self {
        Self {
            backend,
            dpi: OcrConfig::default().dpi,
        }
    }

    /// Extract text from a file.
    pub fn extract(&self, file_path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let display_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());
        info!("Extracting text from '{}'", display_name);

        let format = DocumentFormat::from_path(file_path)?;
        if !file_path.exists() {
            return Err(ExtractionError::NotFound(file_path.display().to_string()));
        }

        let result = match format {
            DocumentFormat::Pdf => self.extract_pdf(file_path)?,
            DocumentFormat::Image => ExtractionResult {
                text: DocumentText::new(self.backend.ocr_image(file_path)?)?,
                method: ExtractionMethod::ImageOcr,
                ocr_pages: None,
            },
            DocumentFormat::PlainText => ExtractionResult {
                text: DocumentText::new(read_plain_text(file_path)?)?,
                method: ExtractionMethod::Plain,
                ocr_pages: None,
            },
        };

        info!(
            "Text extraction successful ({:?}, {} chars)",
            result.method,
            result.text.len()
        );
        Ok(result)
    }

    /// Read the text layer; OCR every page if it holds only whitespace.
    fn extract_pdf(&self, file_path: &Path) -> Result<ExtractionResult, ExtractionError> {
        let text_layer = self.backend.pdf_text(file_path)?;
        if !text_layer.trim().is_empty() {
            debug!("Text-based PDF detected");
            return Ok(ExtractionResult {
                text: DocumentText::new(text_layer)?,
                method: ExtractionMethod::TextLayer,
                ocr_pages: None,
            });
        }

        info!("No selectable text found, falling back to OCR at {} DPI", self.dpi);
        let temp_dir = TempDir::new()
            .map_err(|e| ExtractionError::Fault(format!("creating temp dir: {}", e)))?;
        let pages = self
            .backend
            .rasterize_pdf(file_path, self.dpi, temp_dir.path())?;

        if pages.is_empty() {
            return Err(ExtractionError::Fault(
                "No images generated from PDF".to_string(),
            ));
        }

        let mut combined = String::new();
        let mut recognized_any = false;
        for (i, page) in pages.iter().enumerate() {
            match self.backend.ocr_image(page) {
                Ok(text) => {
                    recognized_any |= !text.trim().is_empty();
                    combined.push_str(&text);
                }
                Err(e) => warn!("OCR failed for page {}: {}", i + 1, e),
            }
            combined.push_str(PAGE_END_MARKER);
        }

        if !recognized_any {
            return Err(ExtractionError::NoTextFound);
        }

        Ok(ExtractionResult {
            text: DocumentText::new(combined)?,
            method: ExtractionMethod::PdfOcr,
            ocr_pages: Some(pages.len()),
        })
    }
}

fn read_plain_text(file_path: &Path) -> Result<String, ExtractionError> {
    std::fs::read_to_string(file_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            ExtractionError::NotFound(file_path.display().to_string())
        }
        _ => ExtractionError::Fault(e.to_string()),
    })
}
