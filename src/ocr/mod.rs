//! Text extraction module.
//!
//! Extracts text from documents using:
//! - pdftotext (Poppler) for the native PDF text layer
//! - pdftoppm + Tesseract OCR for image-only PDFs, page by page
//! - Tesseract OCR for PNG/JPEG images
//! - a verbatim read for plain text
//!
//! Any other format is rejected before touching the file.

mod backend;
mod extractor;

pub use backend::{CommandBackend, ExtractionBackend, OcrConfig};
pub use extractor::{
    DocumentFormat, DocumentText, ExtractionError, ExtractionMethod, ExtractionResult,
    TextExtractor, PAGE_END_MARKER,
};
