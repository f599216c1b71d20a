//! Stage definitions and per-stage results.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::schema::{SchemaKind, StructuredValue};

/// One model-backed transformation step.
///
/// Stages are plain data; a single runner interprets all of them. The
/// template may reference `{document_text}`, `{context}` and
/// `{expected_output}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub template: String,
    /// Human description of the expected answer, shown to the model.
    pub expected_output: String,
    /// `None` means the stage emits freeform text.
    pub schema: Option<SchemaKind>,
    /// Stages whose results are injected as context, in this order.
    pub depends_on: Vec<String>,
    /// A schema violation halts the run instead of degrading.
    pub strict: bool,
}

impl StageSpec {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            role: String::new(),
            goal: String::new(),
            backstory: String::new(),
            template: template.to_string(),
            expected_output: String::new(),
            schema: None,
            depends_on: Vec::new(),
            strict: false,
        }
    }

    pub fn with_persona(mut self, role: &str, goal: &str, backstory: &str) -> Self {
        self.role = role.to_string();
        self.goal = goal.to_string();
        self.backstory = backstory.to_string();
        self
    }

    pub fn with_expected_output(mut self, expected_output: &str) -> Self {
        self.expected_output = expected_output.to_string();
        self
    }

    pub fn with_schema(mut self, schema: SchemaKind) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn depends_on(mut self, stage: &str) -> Self {
        self.depends_on.push(stage.to_string());
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

/// Which variant a [`StageResult`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Structured,
    Unstructured,
    ModelCallFailure,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Structured => "structured",
            Self::Unstructured => "unstructured",
            Self::ModelCallFailure => "model call failure",
        };
        f.write_str(s)
    }
}

/// Output of one stage execution. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    /// Response matched the stage schema.
    Structured { value: StructuredValue, raw: String },
    /// Freeform stage output, or a lenient stage whose response failed its schema.
    Unstructured {
        raw: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// The model boundary returned an error.
    ModelCallFailure { error: String },
}

impl StageResult {
    pub fn outcome(&self) -> StageOutcome {
        match self {
            Self::Structured { .. } => StageOutcome::Structured,
            Self::Unstructured { .. } => StageOutcome::Unstructured,
            Self::ModelCallFailure { .. } => StageOutcome::ModelCallFailure,
        }
    }

    pub fn structured(&self) -> Option<&StructuredValue> {
        match self {
            Self::Structured { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Raw model text, if the model answered at all.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            Self::Structured { raw, .. } | Self::Unstructured { raw, .. } => Some(raw),
            Self::ModelCallFailure { .. } => None,
        }
    }

    /// Text injected into downstream prompts.
    pub fn as_context(&self) -> String {
        match self {
            Self::Structured { value, raw } => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| raw.clone())
            }
            Self::Unstructured { raw, .. } => raw.clone(),
            Self::ModelCallFailure { error } => format!("(stage failed: {})", error),
        }
    }

    /// Deserialize the structured value into a typed model.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.structured()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// A completed stage as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub result: StageResult,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Results visible to a stage, keyed by stage name.
pub type UpstreamResults = HashMap<String, StageResult>;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::models::DynamicExtractionResult;

    #[test]
    fn test_builder() {
        let spec = StageSpec::new("review", "{context}")
            .with_schema(SchemaKind::Review)
            .depends_on("extract")
            .depends_on("classify")
            .strict();
        assert_eq!(spec.depends_on, vec!["extract", "classify"]);
        assert!(spec.strict);
        assert_eq!(spec.schema, Some(SchemaKind::Review));
    }

    #[test]
    fn test_result_tagging() {
        let result = StageResult::Unstructured {
            raw: "prose".to_string(),
            reason: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"outcome": "unstructured", "raw": "prose"}));
        assert_eq!(result.outcome(), StageOutcome::Unstructured);
        assert_eq!(result.raw_text(), Some("prose"));
    }

    #[test]
    fn test_parse_as() {
        let result = StageResult::Structured {
            value: json!({"review_summary": "fine", "extracted_entities": {"Total": 5}}),
            raw: String::new(),
        };
        let parsed: DynamicExtractionResult = result.parse_as().unwrap();
        assert_eq!(parsed.extracted_entities["Total"], Some(json!(5)));

        let failure = StageResult::ModelCallFailure {
            error: "boom".to_string(),
        };
        assert!(failure.parse_as::<DynamicExtractionResult>().is_none());
        assert!(failure.as_context().contains("boom"));
    }

    #[test]
    fn test_structured_context_is_json() {
        let result = StageResult::Structured {
            value: json!({"a": 1}),
            raw: "```json\n{\"a\":1}\n```".to_string(),
        };
        let context = result.as_context();
        assert!(!context.contains("```"));
        assert_eq!(serde_json::from_str::<serde_json::Value>(&context).unwrap(), json!({"a": 1}));
    }
}
