//! Prior probability of suspicion derived from counterparty history.
//!
//! A hand-tuned logistic over both sides' aggregates: historical
//! suspicious rate and count, recency of activity, accumulated
//! high-confidence qualitative flags, and how far the amount sits above
//! the entity's own p95.

use crate::{config::HeuristicsConfig, store::CounterpartyAggregate, types::days_since};
use chrono::{DateTime, Utc};
use serde::Serialize;

// ── Logistic weights ─────────────────────────────────────────────────────────

const W_SUSP_RATE: f64 = 3.0;
const W_CNT_SUSP: f64 = 0.8;
const W_RECENCY: f64 = 1.2;
const W_LLM_SOFT: f64 = 0.4;
const W_AMOUNT_OUTLIER: f64 = 0.7;
const BIAS: f64 = -1.5;

/// Every intermediate of the prior formula, kept for audit reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PriorComponents {
    pub susp_rate: f64,
    pub cnt_susp: f64,
    pub last_days: f64,
    pub recency: f64,
    pub llm_soft_rate: f64,
    pub amount_outlier: f64,
    pub z: f64,
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Prior in [0, 1] plus its components. Both aggregates may be the
/// zero-value default; a fresh entity lands at logistic(-1.5).
pub fn compute_prior(
    debit: &CounterpartyAggregate,
    credit: &CounterpartyAggregate,
    amount: f64,
    now: DateTime<Utc>,
    cfg: &HeuristicsConfig,
) -> (f64, PriorComponents) {
    let susp_rate = debit.susp_rate.max(credit.susp_rate);
    let cnt_susp = debit.cnt_suspicious.max(credit.cnt_suspicious) as f64;
    let last_days = days_since(debit.last_seen_ts.as_deref(), now)
        .min(days_since(credit.last_seen_ts.as_deref(), now));

    // Linear decay: full weight at 0 days, none at or beyond the window.
    let window = cfg.recency_window_days;
    let recency = (window - last_days).clamp(0.0, window) / window;

    let llm_flags = debit.llm_flags_total.max(credit.llm_flags_total) as f64;
    let llm_soft_rate = (llm_flags / cfg.llm_flag_saturation).min(1.0);

    let amount = if amount.is_finite() { amount } else { 0.0 };
    let mut amount_outlier = 0.0f64;
    for p95 in [debit.p95, credit.p95].into_iter().flatten() {
        if p95 > 0.0 && amount > p95 {
            amount_outlier = amount_outlier.max(amount / p95 - 1.0);
        }
    }

    let z = W_SUSP_RATE * susp_rate
        + W_CNT_SUSP * (1.0 + cnt_susp).ln()
        + W_RECENCY * recency
        + W_LLM_SOFT * llm_soft_rate
        + W_AMOUNT_OUTLIER * amount_outlier
        + BIAS;
    let prior = logistic(z);

    (
        prior,
        PriorComponents {
            susp_rate,
            cnt_susp,
            last_days,
            recency,
            llm_soft_rate,
            amount_outlier,
            z,
        },
    )
}
