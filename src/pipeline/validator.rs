//! Model output validation.
//!
//! Raw model text goes through a two-stage extractor before parsing:
//!
//! 1. If a fenced code block is present, its inner text is taken.
//! 2. From that text, the span from the first `{` to the last `}` is taken.
//!
//! When the output holds several JSON objects, stage 2 spans all of them and
//! the parse fails; the first complete object is deliberately not picked out.
//!
//! The parsed value must then satisfy the response schema exactly: every enum
//! value known, every number within range, every string within its length
//! cap. Nothing is coerced.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::pipeline::types::{
    Category, EVIDENCE_VALUE_MAX_LENGTH, EXPLANATION_MAX_LENGTH, Evidence, EvidenceType,
    FalsePositiveRisk, RecommendedAction, ScanResponse,
};

/// Sentinel returned whenever no valid model output could be obtained.
pub static FAILURE_RESPONSE: LazyLock<ScanResponse> = LazyLock::new(|| ScanResponse {
    score: 0,
    categories: vec![Category::Spam],
    explanation: "AI output validation failed - manual review required".to_string(),
    recommended_action: RecommendedAction::LogOnly,
    confidence: 0.0,
    false_positive_risk: FalsePositiveRisk::High,
    evidence: Vec::new(),
});

/// Owned copy of [`FAILURE_RESPONSE`].
pub fn failure_response() -> ScanResponse {
    FAILURE_RESPONSE.clone()
}

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?\s*([\s\S]*?)```").expect("static fenced-block pattern")
});

/// Why model output was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("JSON parse error: {0}")]
    Parse(String),

    #[error("{}", .0.join("; "))]
    Schema(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawEvidence {
    #[serde(rename = "type")]
    kind: EvidenceType,
    value: String,
}

#[derive(Debug, Deserialize)]
struct RawScanResponse {
    score: f64,
    categories: Vec<Category>,
    explanation: String,
    recommended_action: RecommendedAction,
    confidence: f64,
    false_positive_risk: FalsePositiveRisk,
    evidence: Vec<RawEvidence>,
}

/// Pull the JSON candidate out of free-form model text.
pub fn extract_json(text: &str) -> &str {
    let mut cleaned = text.trim();

    if let Some(inner) = FENCED_BLOCK.captures(cleaned).and_then(|c| c.get(1)) {
        cleaned = inner.as_str().trim();
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}'))
        && end > start
    {
        cleaned = &cleaned[start..=end];
    }

    cleaned
}

/// Parse and schema-check raw model output.
pub fn validate(raw: &str) -> Result<ScanResponse, ValidationError> {
    let candidate = extract_json(raw);
    let parsed: RawScanResponse =
        serde_json::from_str(candidate).map_err(|e| ValidationError::Parse(e.to_string()))?;
    check_schema(parsed)
}

fn check_schema(raw: RawScanResponse) -> Result<ScanResponse, ValidationError> {
    let mut issues = Vec::new();

    if !raw.score.is_finite() || !(0.0..=100.0).contains(&raw.score) {
        issues.push(format!("score: {} is outside [0, 100]", raw.score));
    } else if raw.score.fract() != 0.0 {
        issues.push(format!("score: {} is not an integer", raw.score));
    }

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        issues.push(format!("confidence: {} is outside [0, 1]", raw.confidence));
    }

    let explanation_len = raw.explanation.chars().count();
    if explanation_len > EXPLANATION_MAX_LENGTH {
        issues.push(format!(
            "explanation: {explanation_len} chars exceeds {EXPLANATION_MAX_LENGTH}"
        ));
    }

    for (i, item) in raw.evidence.iter().enumerate() {
        let len = item.value.chars().count();
        if len > EVIDENCE_VALUE_MAX_LENGTH {
            issues.push(format!(
                "evidence.{i}.value: {len} chars exceeds {EVIDENCE_VALUE_MAX_LENGTH}"
            ));
        }
    }

    if !issues.is_empty() {
        return Err(ValidationError::Schema(issues));
    }

    let mut categories: Vec<Category> = Vec::with_capacity(raw.categories.len());
    for category in raw.categories {
        if !categories.contains(&category) {
            categories.push(category);
        }
    }

    Ok(ScanResponse {
        score: raw.score as u8,
        categories,
        explanation: raw.explanation,
        recommended_action: raw.recommended_action,
        confidence: raw.confidence,
        false_positive_risk: raw.false_positive_risk,
        evidence: raw
            .evidence
            .into_iter()
            .map(|e| Evidence {
                kind: e.kind,
                value: e.value,
            })
            .collect(),
    })
}
