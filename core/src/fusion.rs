//! Final fusion of the ML, prior, and qualitative signals.

use crate::config::FusionWeights;
use serde::{Deserialize, Serialize};

/// Minimum final score once any hard rule fires.
pub const HARD_RULE_FLOOR: f64 = 0.70;
/// Band edges for the three-way label.
pub const HIGH_BAND: f64 = 0.70;
pub const MEDIUM_BAND: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLabel {
    High,
    Medium,
    Low,
}

impl RiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLabel::High => "high",
            RiskLabel::Medium => "medium",
            RiskLabel::Low => "low",
        }
    }

    /// Band partition: high iff ≥ 0.70, medium iff ≥ 0.40, else low.
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_BAND {
            RiskLabel::High
        } else if score >= MEDIUM_BAND {
            RiskLabel::Medium
        } else {
            RiskLabel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedScore {
    pub final_score: f64,
    pub is_suspicious: bool,
    pub label: RiskLabel,
}

/// Weighted linear mix, raised by the qualitative floor when one is set,
/// clamped to [0, 1], then forced to at least 0.70 by a hard-rule hit.
pub fn combine(
    p_ml: f64,
    p_prior: f64,
    p_qual: f64,
    hard_rule_fired: bool,
    floor: Option<f64>,
    weights: &FusionWeights,
) -> FusedScore {
    let mut linear = weights.w_ml * p_ml + weights.w_prior * p_prior + weights.w_llm * p_qual;

    if let Some(floor) = floor {
        if floor > linear {
            linear = floor;
        }
    }

    let mut final_score = linear.clamp(0.0, 1.0);
    if hard_rule_fired {
        final_score = final_score.max(HARD_RULE_FLOOR);
    }

    let is_suspicious = hard_rule_fired || final_score >= weights.threshold;
    let label = RiskLabel::from_score(final_score);

    FusedScore {
        final_score,
        is_suspicious,
        label,
    }
}
