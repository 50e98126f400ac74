//! Deterministic escalation rules.
//!
//! Evaluated in id order; several rules may fire on one transaction. A hit
//! forces the final score up regardless of the fused probability.

use crate::{
    config::HeuristicsConfig,
    store::{CounterpartyAggregate, TransactionFact},
    types::days_since,
};
use chrono::{DateTime, Utc};

pub const R1_WATCHLIST_BIG_RECENT: &str = "R1_watchlist_big_recent";
pub const R2_HEAVY_HISTORY_BIG_RECENT: &str = "R2_heavy_history_big_recent";

/// Returns whether any rule fired plus the ids of all matches, in id order.
pub fn apply_hard_rules(
    fact: &TransactionFact,
    debit: &CounterpartyAggregate,
    credit: &CounterpartyAggregate,
    now: DateTime<Utc>,
    cfg: &HeuristicsConfig,
) -> (bool, Vec<String>) {
    let mut hits = Vec::new();

    let amount = fact.amount_or_zero();
    let susp_rate = debit.susp_rate.max(credit.susp_rate);
    let cnt_susp = debit.cnt_suspicious.max(credit.cnt_suspicious) as f64;
    let last_days = days_since(debit.last_seen_ts.as_deref(), now)
        .min(days_since(credit.last_seen_ts.as_deref(), now));
    let p95 = debit
        .p95
        .unwrap_or(0.0)
        .max(credit.p95.unwrap_or(0.0));
    let watchlisted = debit.watchlisted || credit.watchlisted;
    let big_amount = p95 > 0.0 && amount > p95;

    if watchlisted && big_amount && last_days <= cfg.watchlist_recent_days {
        hits.push(R1_WATCHLIST_BIG_RECENT.to_string());
    }
    if susp_rate >= cfg.heavy_history_susp_rate
        && cnt_susp >= cfg.heavy_history_cnt
        && last_days <= cfg.heavy_history_recent_days
        && big_amount
    {
        hits.push(R2_HEAVY_HISTORY_BIG_RECENT.to_string());
    }

    (!hits.is_empty(), hits)
}
