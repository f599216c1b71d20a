//! Human-readable entity summary.
//!
//! Entities are grouped by keywords in their labels; anything unmatched goes
//! under "Other Information". Empty values are skipped.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::pipeline::PipelineOutput;

const OTHER: &str = "Other Information";

/// Category name and the label keywords that select it, in display order.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Parties / People",
        &["seller", "buyer", "vendor", "lender", "borrower"],
    ),
    ("Addresses", &["address"]),
    ("Dates", &["date"]),
    (
        "Financials",
        &["amount", "total", "subtotal", "tax", "price", "rate", "interest"],
    ),
    ("Identifiers", &["number", "id", "mic"]),
];

/// Entities and reviewer comments of a pipeline output.
pub fn summary_parts(output: &PipelineOutput) -> (BTreeMap<String, Value>, &str) {
    match output {
        PipelineOutput::Extraction(result) => (
            result
                .extracted_entities
                .iter()
                .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
                .collect(),
            &result.review_summary,
        ),
        PipelineOutput::Report(report) => {
            (report.structured_data.clone(), &report.reviewer_comments)
        }
    }
}

/// Group entities into display categories, keeping category order.
pub fn group_entities(entities: &BTreeMap<String, Value>) -> Vec<(&'static str, Vec<(String, String)>)> {
    let mut groups: Vec<(&'static str, Vec<(String, String)>)> = CATEGORIES
        .iter()
        .map(|(name, _)| (*name, Vec::new()))
        .chain(std::iter::once((OTHER, Vec::new())))
        .collect();

    for (key, value) in entities {
        if is_empty_value(value) {
            continue;
        }
        let lower = key.to_lowercase();
        let index = CATEGORIES
            .iter()
            .position(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
            .unwrap_or(CATEGORIES.len());
        groups[index]
            .1
            .push((display_key(key), display_value(value)));
    }

    groups.retain(|(_, items)| !items.is_empty());
    groups
}

/// Render the grouped summary followed by the reviewer comments.
pub fn render_summary(entities: &BTreeMap<String, Value>, comments: &str) -> String {
    let mut out = String::new();
    for (category, items) in group_entities(entities) {
        out.push_str(&format!("{}:\n", category));
        for (key, value) in items {
            out.push_str(&format!("  - {}: {}\n", key, value));
        }
        out.push('\n');
    }
    out.push_str("--- Reviewer Comments ---\n");
    out.push_str(comments);
    out.push('\n');
    out
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// `loan_amount` -> `Loan Amount`.
fn display_key(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Number(n) if n.is_f64() => n.as_f64().map(format_currency).unwrap_or_default(),
        Value::String(s) => s.replace('\n', ", "),
        other => other.to_string().replace('\n', ", "),
    }
}

/// `162000.5` -> `$162,000.50`.
fn format_currency(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::new();
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}${}.{}", sign, grouped, cents)
}
