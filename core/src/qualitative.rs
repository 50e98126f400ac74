//! Qualitative verdicts from the external reasoning service.
//!
//! The client object — transport, auth, prompting — is owned by the
//! orchestration layer; its results arrive here as a `QualitativeVerdict`,
//! or as nothing at all when the call failed or timed out. This module only converts a verdict (or its absence) into a
//! probability and an optional score floor; it never blocks on the service.

use crate::{config::HeuristicsConfig, signals::TxSignals, store::TransactionFact};
use serde::{Deserialize, Serialize};

/// Conservative probability substituted when the service is unavailable.
/// Chosen below every floor gate so degraded scoring can never floor.
pub const DEGRADED_PROBABILITY: f64 = 0.2;

/// The external service's risk verdict: a label plus optional numeric
/// confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitativeVerdict {
    pub label: String,
    pub confidence: Option<f64>,
}

impl QualitativeVerdict {
    pub fn labelled(label: &str) -> Self {
        Self {
            label: label.to_string(),
            confidence: None,
        }
    }
}

/// Map a verdict to a probability in [0, 1]. An explicit finite confidence
/// wins outright (clamped); otherwise the label keyword decides:
/// high-risk → 1.0, medium-risk → 0.5, anything else → 0.2.
pub fn verdict_to_probability(verdict: &QualitativeVerdict) -> f64 {
    if let Some(confidence) = verdict.confidence {
        if confidence.is_finite() {
            return confidence.clamp(0.0, 1.0);
        }
    }
    let label = verdict.label.trim().to_lowercase();
    if label.contains("high") {
        1.0
    } else if label.contains("medium") {
        0.5
    } else {
        0.2
    }
}

fn is_round_amount(amount: f64, moduli: &[f64]) -> bool {
    amount > 0.0 && moduli.iter().any(|m| *m > 0.0 && amount % m == 0.0)
}

/// Minimum final score enforced when the service is confidently high-risk
/// but the quantitative signals are weak. `None` when no floor applies.
///
/// With at least one weak corroborating signal — a high-risk purpose
/// keyword, a round amount, a short transit chain, or a purpose anomaly —
/// the floor reaches almost-medium; without corroboration it stays at the
/// base level, below the hard-escalation threshold either way.
pub fn soft_floor(
    fact: &TransactionFact,
    signals: &TxSignals,
    p_qual: f64,
    cfg: &HeuristicsConfig,
) -> Option<f64> {
    if p_qual < cfg.floor_confidence_gate {
        return None;
    }

    let purpose = fact.purpose.to_lowercase();
    let has_high_kw = cfg
        .high_risk_keywords
        .iter()
        .any(|w| purpose.contains(w.as_str()));
    let round_amount = is_round_amount(fact.amount_or_zero(), &cfg.round_amount_moduli);
    let transit_short = signals
        .chain_duration_hours
        .is_some_and(|h| h < cfg.short_transit_hours);
    let purpose_anomaly = signals
        .purpose_anomaly
        .is_some_and(|a| a >= cfg.purpose_anomaly_threshold);

    if has_high_kw || round_amount || transit_short || purpose_anomaly {
        Some(cfg.floor_corroborated)
    } else {
        Some(cfg.floor_base)
    }
}
