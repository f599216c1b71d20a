//! docsift - structured data extraction from unstructured documents.
//!
//! Documents (PDF, scanned PDF, PNG/JPEG, plain text) are turned into text,
//! then driven through a sequence of model-backed stages (classify, validate,
//! extract, review) whose outputs are checked against typed schemas and
//! consolidated into a final report.

pub mod cli;
pub mod config;
pub mod llm;
pub mod ocr;
pub mod pipeline;
