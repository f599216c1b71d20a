//! Final report consolidation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::models::{ClassificationResult, FinalReport};
use super::stage::StageResult;
use crate::llm::{is_sentinel, API_ERROR_KEY};

/// Keys of a review payload that describe the review rather than the document.
const REVIEW_META_KEYS: &[&str] = &["review_summary", "corrections_made", "extracted_entities"];

/// Merges classification and review outputs into a [`FinalReport`].
///
/// Pure data composition; never calls a model.
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(classification: &ClassificationResult, review: &StageResult) -> FinalReport {
        let (reviewer_comments, is_flagged, structured_data) = match review {
            StageResult::Structured { value, raw } => {
                let comments = value
                    .get("review_summary")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.clone());
                let corrections = value
                    .get("corrections_made")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let flagged = corrections || is_sentinel(value);
                (comments, flagged, review_data(value))
            }
            StageResult::Unstructured { raw, .. } => (raw.clone(), true, BTreeMap::new()),
            StageResult::ModelCallFailure { error } => {
                (format!("Review failed: {}", error), true, BTreeMap::new())
            }
        };

        let extraction_summary = format!(
            "{} fields extracted from {} document (classification confidence {:.2})",
            structured_data
                .keys()
                .filter(|k| k.as_str() != API_ERROR_KEY)
                .count(),
            classification.document_type,
            classification.confidence_score
        );

        FinalReport {
            final_document_type: classification.document_type,
            extraction_summary,
            is_flagged_by_reviewer: is_flagged,
            reviewer_comments,
            structured_data,
        }
    }
}

/// Entity map of a review, flattened; falls back to the whole payload.
fn review_data(value: &Value) -> BTreeMap<String, Value> {
    let mut data = BTreeMap::new();
    match value.get("extracted_entities").and_then(Value::as_object) {
        Some(entities) => flatten_into(&mut data, None, entities),
        None => {
            if let Some(object) = value.as_object() {
                let rest: Map<String, Value> = object
                    .iter()
                    .filter(|(k, _)| !REVIEW_META_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                flatten_into(&mut data, None, &rest);
            }
        }
    }
    data
}

/// Nested objects become dotted keys; nulls are dropped; arrays stay intact.
fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: Option<&str>, object: &Map<String, Value>) {
    for (key, value) in object {
        let full_key = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Null => {}
            Value::Object(inner) => flatten_into(out, Some(&full_key), inner),
            other => {
                out.insert(full_key, other.clone());
            }
        }
    }
}
