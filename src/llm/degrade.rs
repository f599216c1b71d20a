//! Degrade-to-JSON wrapper for model faults.
//!
//! A failing model call is reported as a well-formed extraction payload whose
//! entity map carries the `API_Error` key. Stages whose schema accepts that
//! shape keep going and the sentinel surfaces as a flagged result; stages
//! whose schema rejects it degrade or halt exactly as any other bad output.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::error;

use super::{LlmError, ModelBoundary};

/// Entity key marking a response substituted for a model fault.
pub const API_ERROR_KEY: &str = "API_Error";

const API_ERROR_HINT: &str = "The AI model could not be reached. Please check your API plan and billing details or try again later.";

/// Build the sentinel payload for a model fault.
pub fn sentinel_payload(error: &LlmError) -> String {
    let mut entities = Map::new();
    entities.insert(
        API_ERROR_KEY.to_string(),
        Value::String(API_ERROR_HINT.to_string()),
    );

    let mut payload = Map::new();
    payload.insert(
        "review_summary".to_string(),
        Value::String(format!(
            "A critical error occurred with the LLM API: {}",
            error
        )),
    );
    payload.insert("extracted_entities".to_string(), Value::Object(entities));

    Value::Object(payload).to_string()
}

/// Whether a structured value is (or embeds) the sentinel entity map.
pub fn is_sentinel(value: &Value) -> bool {
    value
        .get("extracted_entities")
        .and_then(Value::as_object)
        .is_some_and(|entities| entities.contains_key(API_ERROR_KEY))
}

/// Wraps a model boundary so faults come back as the sentinel payload.
pub struct DegradingModel<M> {
    inner: M,
}

impl<M: ModelBoundary> DegradingModel<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M: ModelBoundary> ModelBoundary for DegradingModel<M> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        match self.inner.call(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                error!("Model call via {} failed: {}", self.inner.name(), e);
                Ok(sentinel_payload(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl ModelBoundary for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn call(&self, _prompt: &str) -> Result<String, LlmError> {
            Err(LlmError::Api("HTTP 429: quota exceeded".to_string()))
        }
    }

    #[test]
    fn test_sentinel_shape() {
        let payload = sentinel_payload(&LlmError::Connection("refused".to_string()));
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert!(value["review_summary"]
            .as_str()
            .unwrap()
            .contains("Connection error: refused"));
        assert!(is_sentinel(&value));
    }

    #[test]
    fn test_is_sentinel_ignores_regular_output() {
        let value: Value =
            serde_json::from_str(r#"{"review_summary":"ok","extracted_entities":{"Total":1}}"#)
                .unwrap();
        assert!(!is_sentinel(&value));
    }

    #[tokio::test]
    async fn test_degrading_model_swallows_fault() {
        let model = DegradingModel::new(Broken);
        let text = model.call("anything").await.unwrap();
        assert!(text.contains(API_ERROR_KEY));
        assert!(text.contains("quota exceeded"));
        assert_eq!(model.name(), "broken");
    }
}
