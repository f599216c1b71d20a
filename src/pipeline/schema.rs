//! Output contracts for pipeline stages.
//!
//! Each stage either declares a [`SchemaKind`] or emits freeform text. The
//! registry locates the JSON payload inside a raw model response and checks
//! that it has the declared shape. It never checks facts against the document.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::models::{
    ClassificationResult, DynamicExtractionResult, FinalReport, InvoiceData, LineItem,
    ReviewResult,
};

/// A schema-conforming value, normalized through its typed model.
pub type StructuredValue = Value;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").unwrap());

/// Output contracts a stage may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Classification,
    LineItem,
    InvoiceData,
    /// Flat map of entity label to value, keys chosen by the model.
    EntityMap,
    DynamicExtraction,
    Review,
    FinalReport,
}

impl SchemaKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Classification => "ClassificationResult",
            Self::LineItem => "LineItem",
            Self::InvoiceData => "InvoiceData",
            Self::EntityMap => "EntityMap",
            Self::DynamicExtraction => "DynamicExtractionResult",
            Self::Review => "ReviewResult",
            Self::FinalReport => "FinalReport",
        }
    }

    /// Shape description rendered into prompts.
    pub fn expected_output(&self) -> &'static str {
        match self {
            Self::Classification => {
                r#"{"document_type": "Invoice" | "LoanDisclosure" | "Resume" | "Unknown", "confidence_score": <number between 0 and 1>, "reasoning": "<string>"}"#
            }
            Self::LineItem => {
                r#"{"description": "<string or null>", "quantity": <number or null>, "unit_price": <number or null>, "total_price": <number or null>}"#
            }
            Self::InvoiceData => {
                r#"{"vendor_name": "<string or null>", "buyer_name": "<string or null>", "invoice_number": "<string or null>", "invoice_date": "<string or null>", "total_due": <number or null>, "line_items": [{"description": ..., "quantity": ..., "unit_price": ..., "total_price": ...}]}"#
            }
            Self::EntityMap => r#"{"<label from the document>": <value>, ...}"#,
            Self::DynamicExtraction => {
                r#"{"review_summary": "<string>", "extracted_entities": {"<label>": <value or null>, ...}}"#
            }
            Self::Review => {
                r#"{"review_summary": "<string>", "extracted_entities": {"<label>": <value or null>, ...}, "corrections_made": <true if you changed, removed or added anything>}"#
            }
            Self::FinalReport => {
                r#"{"final_document_type": "<string>", "extraction_summary": "<string>", "is_flagged_by_reviewer": <bool>, "reviewer_comments": "<string>", "structured_data": {"<key>": <value>, ...}}"#
            }
        }
    }

    /// Type-check a JSON value, returning its normalized form.
    pub fn conform(&self, value: Value) -> Result<StructuredValue, ValidationFailure> {
        match self {
            Self::Classification => {
                let parsed: ClassificationResult = self.typed(value)?;
                parsed.check().map_err(|detail| self.mismatch(detail))?;
                self.normalized(&parsed)
            }
            Self::LineItem => self.round_trip::<LineItem>(value),
            Self::InvoiceData => {
                let parsed: InvoiceData = self.typed(value)?;
                parsed.check().map_err(|detail| self.mismatch(detail))?;
                self.normalized(&parsed)
            }
            Self::EntityMap => self.round_trip::<BTreeMap<String, Option<Value>>>(value),
            Self::DynamicExtraction => self.round_trip::<DynamicExtractionResult>(value),
            Self::Review => self.round_trip::<ReviewResult>(value),
            Self::FinalReport => self.round_trip::<FinalReport>(value),
        }
    }

    fn round_trip<T: DeserializeOwned + Serialize>(
        &self,
        value: Value,
    ) -> Result<StructuredValue, ValidationFailure> {
        let parsed: T = self.typed(value)?;
        self.normalized(&parsed)
    }

    fn typed<T: DeserializeOwned>(&self, value: Value) -> Result<T, ValidationFailure> {
        serde_json::from_value(value).map_err(|e| self.mismatch(e.to_string()))
    }

    fn normalized<T: Serialize>(&self, parsed: &T) -> Result<StructuredValue, ValidationFailure> {
        serde_json::to_value(parsed).map_err(|e| self.mismatch(e.to_string()))
    }

    fn mismatch(&self, detail: String) -> ValidationFailure {
        ValidationFailure::Mismatch {
            schema: self.name(),
            detail,
        }
    }
}

/// Why a raw response did not satisfy its stage's schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("no schema registered for stage '{0}'")]
    UnknownStage(String),

    #[error("response contains no JSON object")]
    NoJson,

    #[error("response does not match {schema}: {detail}")]
    Mismatch {
        schema: &'static str,
        detail: String,
    },
}

/// Locate the JSON object in a model response.
///
/// Tried in order: the whole response, each fenced code block, then the span
/// from the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Option<Value> {
    let as_object = |text: &str| {
        serde_json::from_str::<Value>(text.trim())
            .ok()
            .filter(Value::is_object)
    };

    if let Some(value) = as_object(raw) {
        return Some(value);
    }

    for caps in FENCED_JSON.captures_iter(raw) {
        if let Some(value) = caps.get(1).and_then(|m| as_object(m.as_str())) {
            return Some(value);
        }
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&raw[start..=end])
}

/// Stage name to output contract. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Option<SchemaKind>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(stage name, schema)` pairs; `None` marks a freeform stage.
    pub fn from_stages<'a>(
        stages: impl IntoIterator<Item = (&'a str, Option<SchemaKind>)>,
    ) -> Self {
        let mut registry = Self::new();
        for (name, schema) in stages {
            registry.register(name, schema);
        }
        registry
    }

    pub fn register(&mut self, stage: &str, schema: Option<SchemaKind>) {
        self.schemas.insert(stage.to_string(), schema);
    }

    /// `Ok(None)` for freeform stages.
    pub fn schema_for(&self, stage: &str) -> Result<Option<SchemaKind>, ValidationFailure> {
        self.schemas
            .get(stage)
            .copied()
            .ok_or_else(|| ValidationFailure::UnknownStage(stage.to_string()))
    }

    /// Validate a raw response for `stage`.
    ///
    /// Freeform stages accept any text and yield it as a JSON string.
    pub fn validate(&self, stage: &str, raw: &str) -> Result<StructuredValue, ValidationFailure> {
        match self.schema_for(stage)? {
            None => Ok(Value::String(raw.to_string())),
            Some(schema) => {
                let value = extract_json(raw).ok_or(ValidationFailure::NoJson)?;
                schema.conform(value)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_stages([
            ("classify", Some(SchemaKind::Classification)),
            ("extract", Some(SchemaKind::InvoiceData)),
            ("notes", None),
        ])
    }

    #[test]
    fn test_extract_bare_json() {
        let value = extract_json(r#"  {"a": 1} "#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_extract_fenced_json() {
        let raw = "Here you go:\n```json\n{\"a\": {\"b\": 2}}\n```\nAnything else?";
        assert_eq!(extract_json(raw).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn test_extract_embedded_braces() {
        let raw = "Final Answer: {\"Lender\": \"Ficus Bank\"} -- done";
        assert_eq!(extract_json(raw).unwrap(), json!({"Lender": "Ficus Bank"}));
    }

    #[test]
    fn test_extract_rejects_non_objects() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("} backwards {").is_none());
    }

    #[test]
    fn test_validate_classification() {
        let value = registry()
            .validate(
                "classify",
                r#"{"document_type": "Loan Disclosure", "confidence_score": 0.8, "reasoning": "APR table"}"#,
            )
            .unwrap();
        assert_eq!(value["document_type"], "LoanDisclosure");
    }

    #[test]
    fn test_validate_confidence_out_of_range() {
        let err = registry()
            .validate(
                "classify",
                r#"{"document_type": "Invoice", "confidence_score": 7, "reasoning": "x"}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationFailure::Mismatch { schema: "ClassificationResult", .. }
        ));
    }

    #[test]
    fn test_validate_missing_required_key() {
        let err = registry()
            .validate("classify", r#"{"document_type": "Invoice"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("confidence_score"));
    }

    #[test]
    fn test_freeform_stage_accepts_text() {
        let value = registry().validate("notes", "just prose").unwrap();
        assert_eq!(value, json!("just prose"));
    }

    #[test]
    fn test_unknown_stage() {
        assert_eq!(
            registry().validate("missing", "{}").unwrap_err(),
            ValidationFailure::UnknownStage("missing".to_string())
        );
    }

    #[test]
    fn test_invoice_rejects_other_shapes() {
        let err = registry()
            .validate("extract", r#"{"Vendor": "Acme", "Total": 500}"#)
            .unwrap_err();
        assert!(matches!(err, ValidationFailure::Mismatch { schema: "InvoiceData", .. }));

        let sentinel = r#"{"review_summary": "A critical error occurred", "extracted_entities": {"API_Error": "quota"}}"#;
        assert!(registry().validate("extract", sentinel).is_err());

        let err = registry().validate("extract", "{}").unwrap_err();
        assert!(err.to_string().contains("no invoice fields present"));
    }

    #[test]
    fn test_validate_invoice() {
        let value = registry()
            .validate(
                "extract",
                r#"{"vendor_name": "Acme", "total_due": "$500.00", "line_items": []}"#,
            )
            .unwrap();
        assert_eq!(value["vendor_name"], "Acme");
        assert_eq!(value["total_due"], json!(500.0));
        assert_eq!(value["invoice_number"], Value::Null);
    }

    #[test]
    fn test_conform_line_item() {
        let value = SchemaKind::LineItem
            .conform(json!({"description": "Widget", "quantity": "3", "total_price": 30}))
            .unwrap();
        assert_eq!(value["quantity"], json!(3.0));
        assert_eq!(value["unit_price"], Value::Null);

        assert!(SchemaKind::LineItem
            .conform(json!({"description": "Widget", "colour": "red"}))
            .is_err());
    }

    #[test]
    fn test_conform_final_report() {
        let report = json!({
            "final_document_type": "Loan Disclosure",
            "extraction_summary": "2 fields extracted",
            "is_flagged_by_reviewer": false,
            "reviewer_comments": "Looks right",
            "structured_data": {"Lender": "Ficus Bank", "APR": 4.5}
        });
        let value = SchemaKind::FinalReport.conform(report).unwrap();
        assert_eq!(value["final_document_type"], "LoanDisclosure");
        assert_eq!(value["structured_data"]["APR"], json!(4.5));

        let err = SchemaKind::FinalReport
            .conform(json!({"final_document_type": "Invoice"}))
            .unwrap_err();
        assert!(err.to_string().contains("FinalReport"));
    }

    #[test]
    fn test_no_json_for_schema_stage() {
        assert_eq!(
            registry().validate("extract", "I could not read it").unwrap_err(),
            ValidationFailure::NoJson
        );
    }
}
