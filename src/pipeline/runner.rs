//! Single-stage execution: render, call, validate.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::schema::{SchemaRegistry, ValidationFailure};
use super::stage::{StageResult, StageSpec, UpstreamResults};
use crate::llm::{LlmError, ModelBoundary};
use crate::ocr::DocumentText;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(document_text|context|expected_output)\}").unwrap());

/// Failures that stop a stage from producing any result.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage '{stage}' ran before its dependency '{missing}' completed")]
    MissingUpstream { stage: String, missing: String },

    #[error("stage '{stage}' is not registered")]
    Unregistered { stage: String },

    #[error("stage '{stage}' returned output that violates its schema: {failure}")]
    StrictSchemaViolation {
        stage: String,
        raw: String,
        failure: ValidationFailure,
    },
}

/// Executes one stage against the shared model boundary.
///
/// Holds only shared, immutable handles, so one runner can serve many
/// concurrent document runs.
#[derive(Clone)]
pub struct StageRunner {
    model: Arc<dyn ModelBoundary>,
    registry: Arc<SchemaRegistry>,
    call_timeout: Option<Duration>,
    max_document_chars: Option<usize>,
}

impl StageRunner {
    pub fn new(model: Arc<dyn ModelBoundary>, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            model,
            registry,
            call_timeout: None,
            max_document_chars: None,
        }
    }

    /// Bound each model call; an elapsed deadline counts as a model failure.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Truncate document text in prompts to this many characters.
    pub fn with_max_document_chars(mut self, max: Option<usize>) -> Self {
        self.max_document_chars = max;
        self
    }

    /// Render the full prompt for a stage.
    ///
    /// Every declared dependency must be present in `upstream`.
    pub fn render_prompt(
        &self,
        spec: &StageSpec,
        document: &DocumentText,
        upstream: &UpstreamResults,
    ) -> Result<String, StageError> {
        let mut context = String::new();
        for dep in &spec.depends_on {
            let result = upstream.get(dep).ok_or_else(|| StageError::MissingUpstream {
                stage: spec.name.clone(),
                missing: dep.clone(),
            })?;
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(&format!(
                "--- OUTPUT OF STAGE '{}' ---\n{}\n--- END OUTPUT ---",
                dep,
                result.as_context()
            ));
        }

        let schema = self
            .registry
            .schema_for(&spec.name)
            .map_err(|_| StageError::Unregistered {
                stage: spec.name.clone(),
            })?;
        let expected = match schema {
            Some(schema) => format!(
                "{}\nRespond with a single JSON object of the form:\n{}",
                spec.expected_output,
                schema.expected_output()
            ),
            None => spec.expected_output.clone(),
        };

        let document_text = self.document_for_prompt(&spec.name, document);

        // One pass so placeholders inside the document are never expanded.
        let body = PLACEHOLDER.replace_all(&spec.template, |caps: &Captures| {
            match &caps[1] {
                "document_text" => document_text.to_string(),
                "context" => context.clone(),
                _ => expected.clone(),
            }
        });

        let mut prompt = String::new();
        if !spec.role.is_empty() {
            prompt.push_str(&format!("You are {}.\n", spec.role));
        }
        if !spec.goal.is_empty() {
            prompt.push_str(&format!("Your goal: {}\n", spec.goal));
        }
        if !spec.backstory.is_empty() {
            prompt.push_str(&spec.backstory);
            prompt.push('\n');
        }
        if !prompt.is_empty() {
            prompt.push('\n');
        }
        prompt.push_str(&body);

        if !context.is_empty() && !spec.template.contains("{context}") {
            prompt.push_str("\n\nThis is the context you're working with:\n");
            prompt.push_str(&context);
        }
        if !expected.trim().is_empty() && !spec.template.contains("{expected_output}") {
            prompt.push_str("\n\nThis is the expected output for your answer:\n");
            prompt.push_str(expected.trim());
        }

        Ok(prompt)
    }

    fn document_for_prompt<'a>(&self, stage: &str, document: &'a DocumentText) -> &'a str {
        let text = document.as_str();
        let Some(max) = self.max_document_chars else {
            return text;
        };
        match text.char_indices().nth(max) {
            Some((cut, _)) => {
                warn!(
                    "Document truncated to {} characters for stage '{}'",
                    max, stage
                );
                &text[..cut]
            }
            None => text,
        }
    }

    /// Run a stage once. The model is called exactly once; no retries.
    pub async fn run(
        &self,
        spec: &StageSpec,
        document: &DocumentText,
        upstream: &UpstreamResults,
    ) -> Result<StageResult, StageError> {
        let prompt = self.render_prompt(spec, document, upstream)?;
        debug!(
            "Stage '{}' prompt rendered ({} chars)",
            spec.name,
            prompt.len()
        );

        let raw = match self.call_model(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Stage '{}' model call failed: {}", spec.name, e);
                return Ok(StageResult::ModelCallFailure {
                    error: e.to_string(),
                });
            }
        };

        if matches!(self.registry.schema_for(&spec.name), Ok(None)) {
            return Ok(StageResult::Unstructured { raw, reason: None });
        }

        match self.registry.validate(&spec.name, &raw) {
            Ok(value) => Ok(StageResult::Structured { value, raw }),
            Err(failure) if spec.strict => Err(StageError::StrictSchemaViolation {
                stage: spec.name.clone(),
                raw,
                failure,
            }),
            Err(failure) => {
                info!(
                    "Stage '{}' output kept as unstructured text: {}",
                    spec.name, failure
                );
                Ok(StageResult::Unstructured {
                    raw,
                    reason: Some(failure.to_string()),
                })
            }
        }
    }

    async fn call_model(&self, prompt: &str) -> Result<String, LlmError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.model.call(prompt))
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => self.model.call(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::pipeline::schema::SchemaKind;

    /// Returns a canned response and records the prompt.
    struct Canned {
        response: Result<String, String>,
        prompts: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl Canned {
        fn ok(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                prompts: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn err(message: &str) -> Self {
            Self {
                response: Err(message.to_string()),
                prompts: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ModelBoundary for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn call(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.clone().map_err(LlmError::Api)
        }
    }

    fn setup(model: Canned, stages: &[&StageSpec]) -> (Arc<Canned>, StageRunner) {
        let model = Arc::new(model);
        let registry = SchemaRegistry::from_stages(
            stages.iter().map(|s| (s.name.as_str(), s.schema)),
        );
        let runner = StageRunner::new(model.clone(), Arc::new(registry));
        (model, runner)
    }

    fn doc(text: &str) -> DocumentText {
        DocumentText::new(text).unwrap()
    }

    fn classify() -> StageSpec {
        StageSpec::new("classify", "Classify:\n{document_text}\n{expected_output}")
            .with_schema(SchemaKind::Classification)
            .with_expected_output("The document category.")
    }

    #[tokio::test]
    async fn test_structured_result() {
        let spec = classify();
        let (_, runner) = setup(
            Canned::ok(r#"{"document_type":"Invoice","confidence_score":0.97,"reasoning":"Has a total"}"#),
            &[&spec],
        );
        let result = runner
            .run(&spec, &doc("Invoice #123"), &UpstreamResults::new())
            .await
            .unwrap();
        assert_eq!(result.structured().unwrap()["document_type"], "Invoice");
    }

    #[tokio::test]
    async fn test_prompt_contains_document_and_shape() {
        let spec = classify().with_persona("Document Classifier", "Classify documents", "");
        let (model, runner) = setup(Canned::ok("{}"), &[&spec]);
        let _ = runner
            .run(&spec, &doc("Invoice #123"), &UpstreamResults::new())
            .await;
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("You are Document Classifier.\nYour goal: Classify documents\n"));
        assert!(prompt.contains("Invoice #123"));
        assert!(prompt.contains("confidence_score"));
    }

    #[tokio::test]
    async fn test_placeholders_in_document_not_expanded() {
        let spec = classify();
        let (model, runner) = setup(Canned::ok("{}"), &[&spec]);
        let _ = runner
            .run(&spec, &doc("literal {context} here"), &UpstreamResults::new())
            .await;
        assert!(model.prompts.lock().unwrap()[0].contains("literal {context} here"));
    }

    #[tokio::test]
    async fn test_context_in_declared_order() {
        let spec = StageSpec::new("merge", "Merge.\n{context}")
            .depends_on("b")
            .depends_on("a");
        let (model, runner) = setup(Canned::ok("merged"), &[&spec]);

        let mut upstream = UpstreamResults::new();
        upstream.insert(
            "a".to_string(),
            StageResult::Unstructured { raw: "from a".to_string(), reason: None },
        );
        upstream.insert(
            "b".to_string(),
            StageResult::Structured { value: json!({"from": "b"}), raw: String::new() },
        );

        let result = runner.run(&spec, &doc("text"), &upstream).await.unwrap();
        assert_eq!(
            result,
            StageResult::Unstructured { raw: "merged".to_string(), reason: None }
        );

        let prompt = model.prompts.lock().unwrap()[0].clone();
        let b = prompt.find("--- OUTPUT OF STAGE 'b' ---").unwrap();
        let a = prompt.find("--- OUTPUT OF STAGE 'a' ---").unwrap();
        assert!(b < a);
        assert!(prompt.contains("from a"));
    }

    #[tokio::test]
    async fn test_context_appended_without_placeholder() {
        let spec = StageSpec::new("next", "Do the thing.").depends_on("first");
        let (model, runner) = setup(Canned::ok("done"), &[&spec]);
        let mut upstream = UpstreamResults::new();
        upstream.insert(
            "first".to_string(),
            StageResult::Unstructured { raw: "earlier".to_string(), reason: None },
        );
        runner.run(&spec, &doc("text"), &upstream).await.unwrap();
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("This is the context you're working with:"));
        assert!(prompt.contains("earlier"));
    }

    #[tokio::test]
    async fn test_missing_upstream_is_fatal() {
        let spec = StageSpec::new("validate", "{context}").depends_on("extract");
        let (model, runner) = setup(Canned::ok("x"), &[&spec]);
        let err = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingUpstream { ref missing, .. } if missing == "extract"));
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lenient_violation_degrades() {
        let spec = classify();
        let (_, runner) = setup(Canned::ok("It is probably an invoice."), &[&spec]);
        let result = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap();
        match result {
            StageResult::Unstructured { raw, reason } => {
                assert_eq!(raw, "It is probably an invoice.");
                assert!(reason.is_some());
            }
            other => panic!("expected unstructured, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_violation_is_fatal() {
        let spec = classify().strict();
        let (_, runner) = setup(Canned::ok(r#"{"document_type":"Invoice"}"#), &[&spec]);
        let err = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap_err();
        match err {
            StageError::StrictSchemaViolation { raw, .. } => {
                assert_eq!(raw, r#"{"document_type":"Invoice"}"#)
            }
            other => panic!("expected strict violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_becomes_result() {
        let spec = classify().strict();
        let (_, runner) = setup(Canned::err("HTTP 503"), &[&spec]);
        let result = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap();
        assert!(matches!(result, StageResult::ModelCallFailure { ref error } if error.contains("HTTP 503")));
    }

    #[tokio::test]
    async fn test_timeout_is_model_failure() {
        let spec = classify();
        let mut model = Canned::ok("{}");
        model.delay = Some(Duration::from_millis(200));
        let (_, runner) = setup(model, &[&spec]);
        let runner = runner.with_timeout(Some(Duration::from_millis(10)));
        let result = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap();
        assert!(matches!(result, StageResult::ModelCallFailure { ref error } if error.contains("timed out")));
    }

    #[tokio::test]
    async fn test_document_truncation_is_char_safe() {
        let spec = classify();
        let (model, runner) = setup(Canned::ok("{}"), &[&spec]);
        let runner = runner.with_max_document_chars(Some(3));
        let _ = runner
            .run(&spec, &doc("ééééé"), &UpstreamResults::new())
            .await;
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Classify:\nééé\n"));
        assert!(!prompt.contains("éééé"));
    }

    #[tokio::test]
    async fn test_unregistered_stage() {
        let spec = classify();
        let other = StageSpec::new("other", "x");
        let (_, runner) = setup(Canned::ok("{}"), &[&other]);
        let err = runner
            .run(&spec, &doc("text"), &UpstreamResults::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Unregistered { .. }));
    }
}
