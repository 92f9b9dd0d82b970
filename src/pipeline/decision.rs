//! Auto-action eligibility and severity triage.
//!
//! `should_auto_act` is the only gate that may trigger enforcement without a
//! human. The severity helpers are for triage display and are independent of
//! it: a response can match none of them.

use serde::Serialize;

use crate::pipeline::types::{FalsePositiveRisk, RecommendedAction, ScanResponse};

/// Minimum score for automatic enforcement.
pub const AUTO_ACT_MIN_SCORE: u8 = 80;

/// Minimum confidence for automatic enforcement.
pub const AUTO_ACT_MIN_CONFIDENCE: f64 = 0.85;

/// Whether the response is strong enough to enforce without review.
pub fn should_auto_act(response: &ScanResponse) -> bool {
    response.score >= AUTO_ACT_MIN_SCORE
        && response.confidence >= AUTO_ACT_MIN_CONFIDENCE
        && response.false_positive_risk == FalsePositiveRisk::Low
        && !matches!(
            response.recommended_action,
            RecommendedAction::None | RecommendedAction::LogOnly
        )
}

pub fn is_high_severity(response: &ScanResponse) -> bool {
    response.score >= 70 && response.confidence >= 0.7
}

pub fn is_medium_severity(response: &ScanResponse) -> bool {
    (40..70).contains(&response.score) && response.confidence >= 0.5
}

pub fn is_low_severity(response: &ScanResponse) -> bool {
    response.score < 40 || response.confidence < 0.5
}

/// Triage bucket for reviewer-facing display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// First matching bucket, checked high → medium → low.
    pub fn of(response: &ScanResponse) -> Option<Self> {
        if is_high_severity(response) {
            Some(Self::High)
        } else if is_medium_severity(response) {
            Some(Self::Medium)
        } else if is_low_severity(response) {
            Some(Self::Low)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(
        score: u8,
        confidence: f64,
        risk: FalsePositiveRisk,
        action: RecommendedAction,
    ) -> ScanResponse {
        ScanResponse {
            score,
            categories: vec![],
            explanation: String::new(),
            recommended_action: action,
            confidence,
            false_positive_risk: risk,
            evidence: vec![],
        }
    }

    #[test]
    fn auto_act_boundaries() {
        use FalsePositiveRisk::*;
        use RecommendedAction::*;

        assert!(!should_auto_act(&response(79, 0.9, Low, Delete)));
        assert!(should_auto_act(&response(80, 0.85, Low, Delete)));
        assert!(!should_auto_act(&response(80, 0.85, Medium, Delete)));
        assert!(!should_auto_act(&response(80, 0.85, Low, LogOnly)));
        assert!(!should_auto_act(&response(80, 0.85, Low, None)));
        assert!(!should_auto_act(&response(95, 0.84, Low, Timeout)));
        assert!(!should_auto_act(&response(100, 1.0, High, TimeoutAndDelete)));
    }

    #[test]
    fn auto_act_accepts_every_enforcing_action() {
        use RecommendedAction::*;
        for action in [WarnDm, Delete, Timeout, TimeoutAndDelete] {
            assert!(should_auto_act(&response(90, 0.95, FalsePositiveRisk::Low, action)));
        }
    }

    #[test]
    fn severity_high() {
        let r = response(70, 0.7, FalsePositiveRisk::Medium, RecommendedAction::Delete);
        assert!(is_high_severity(&r));
        assert_eq!(Severity::of(&r), Some(Severity::High));
    }

    #[test]
    fn severity_medium() {
        let r = response(40, 0.5, FalsePositiveRisk::Medium, RecommendedAction::WarnDm);
        assert!(is_medium_severity(&r));
        assert!(!is_high_severity(&r));
        assert_eq!(Severity::of(&r), Some(Severity::Medium));
    }

    #[test]
    fn severity_low_by_score_or_confidence() {
        let by_score = response(39, 0.99, FalsePositiveRisk::Low, RecommendedAction::None);
        let by_confidence = response(90, 0.4, FalsePositiveRisk::Low, RecommendedAction::Delete);
        assert!(is_low_severity(&by_score));
        assert!(is_low_severity(&by_confidence));
        assert_eq!(Severity::of(&by_confidence), Some(Severity::Low));
    }

    #[test]
    fn severity_gap_matches_nothing() {
        // High score, confidence between the medium and high cut-offs.
        let r = response(75, 0.6, FalsePositiveRisk::Low, RecommendedAction::Delete);
        assert!(!is_high_severity(&r));
        assert!(!is_medium_severity(&r));
        assert!(!is_low_severity(&r));
        assert_eq!(Severity::of(&r), None);
    }

    #[test]
    fn high_severity_is_not_auto_act() {
        let r = response(75, 0.8, FalsePositiveRisk::Low, RecommendedAction::Delete);
        assert!(is_high_severity(&r));
        assert!(!should_auto_act(&r));
    }
}
