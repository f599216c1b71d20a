//! Structured outputs produced by pipeline stages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Document categories the classifier may choose from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DocumentType {
    #[serde(alias = "invoice", alias = "INVOICE")]
    Invoice,
    #[serde(
        alias = "Loan Disclosure",
        alias = "loan_disclosure",
        alias = "loan disclosure",
        alias = "LOAN_DISCLOSURE"
    )]
    LoanDisclosure,
    #[serde(alias = "resume", alias = "Résumé", alias = "RESUME")]
    Resume,
    #[default]
    #[serde(alias = "unknown", alias = "UNKNOWN")]
    Unknown,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "Invoice",
            Self::LoanDisclosure => "Loan Disclosure",
            Self::Resume => "Resume",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the classification and classification-validation stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub document_type: DocumentType,
    /// Classifier confidence in [0, 1].
    pub confidence_score: f64,
    pub reasoning: String,
}

impl ClassificationResult {
    /// Fallback used when no stage produced a usable classification.
    pub fn unknown(reasoning: impl Into<String>) -> Self {
        Self {
            document_type: DocumentType::Unknown,
            confidence_score: 0.0,
            reasoning: reasoning.into(),
        }
    }

    /// Range checks serde cannot express.
    pub fn check(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence_score {} is outside [0, 1]",
                self.confidence_score
            ));
        }
        Ok(())
    }
}

/// One row of an invoice. Quantities are not reconciled against totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_price: Option<f64>,
}

/// Fields extracted from an invoice.
///
/// Unknown keys are rejected so an answer in some other shape is not read
/// as an empty invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InvoiceData {
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_due: Option<f64>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl InvoiceData {
    /// Reject an invoice with no field filled in.
    pub fn check(&self) -> Result<(), String> {
        if *self == Self::default() {
            return Err("no invoice fields present".to_string());
        }
        Ok(())
    }
}

/// Entity map for documents whose keys are not known in advance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicExtractionResult {
    /// Corrections, additions, or reasons for concern.
    pub review_summary: String,
    pub extracted_entities: BTreeMap<String, Option<Value>>,
}

/// Output of the review stage.
///
/// `corrections_made` is the reviewer's own judgement of whether it changed
/// or added anything; the report flag is taken from it verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub review_summary: String,
    pub extracted_entities: BTreeMap<String, Option<Value>>,
    pub corrections_made: bool,
}

/// Consolidated report built from classification and review outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub final_document_type: DocumentType,
    pub extraction_summary: String,
    pub is_flagged_by_reviewer: bool,
    pub reviewer_comments: String,
    pub structured_data: BTreeMap<String, Value>,
}

/// Accept `12.5`, `"12.50"` and `"$1,234.00"`; reject non-numeric strings.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(Value::String(s)) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | ' '))
                .collect();
            if cleaned.is_empty() {
                return Ok(None);
            }
            cleaned
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected an amount, got {:?}", s)))
        }
        Some(other) => Err(D::Error::custom(format!(
            "expected an amount, got {}",
            other
        ))),
    }
}
