//! Model boundary used by pipeline stages.
//!
//! Every stage talks to a language model through [`ModelBoundary`]: prompt
//! text in, response text out. [`LlmClient`] speaks to Gemini, Ollama and
//! OpenAI-compatible endpoints. [`DegradingModel`] wraps any boundary and
//! turns call faults into the sentinel JSON payload so schema-driven parsing
//! downstream still has something to consume.

mod client;
mod degrade;

use async_trait::async_trait;

pub use client::{LlmClient, LlmConfig, LlmError, LlmProvider};
pub use degrade::{is_sentinel, sentinel_payload, DegradingModel, API_ERROR_KEY};

/// A text-in/text-out language model.
///
/// Implementations own their transport, authentication and rate limiting.
/// Callers treat a single `call` as at-least-once and never retry it.
#[async_trait]
pub trait ModelBoundary: Send + Sync {
    /// Model identifier for logs and diagnostics.
    fn name(&self) -> &str;

    /// Send a prompt and return the raw response text.
    async fn call(&self, prompt: &str) -> Result<String, LlmError>;
}
