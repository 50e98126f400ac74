//! The scoring engine — one decision per transaction.
//!
//! SEQUENCE (fixed, mirrors the persisted audit trail):
//!   1. Read both counterparty aggregates.
//!   2. Prior from history.
//!   3. Hard rules.
//!   4. Qualitative probability (degraded fallback when absent).
//!   5. Soft floor, only for a confidently high-risk verdict.
//!   6. Fusion → DecisionRecord.
//!   7. record_decision: persist, then recompute both sides so the next
//!      transaction's prior sees this one.
//!
//! The qualitative step is the only part allowed to be missing; the engine
//! always yields a decision.

use crate::{
    config::ScoreConfig,
    error::{ScoreError, ScoreResult},
    fusion,
    prior::{compute_prior, PriorComponents},
    qualitative::{self, QualitativeVerdict},
    rules::apply_hard_rules,
    signals::TxSignals,
    store::{DecisionRecord, ScoreStore, TransactionFact},
    types::format_ts,
};
use chrono::{DateTime, Utc};

/// A scored transaction: the persisted record plus the audit components
/// downstream reporting consumes.
#[derive(Debug, Clone)]
pub struct Decision {
    pub record: DecisionRecord,
    pub prior: PriorComponents,
    /// True when the qualitative signal was unavailable and the
    /// conservative substitute was used.
    pub degraded: bool,
}

pub struct ScoringEngine {
    store: ScoreStore,
    config: ScoreConfig,
}

impl ScoringEngine {
    pub fn new(store: ScoreStore, config: ScoreConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &ScoreStore {
        &self.store
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    /// Bulk-load an incoming batch before any scoring, so priors already
    /// reflect full-batch recency and quantiles.
    pub fn preload(&self, facts: &[TransactionFact]) -> ScoreResult<usize> {
        self.store.preload(facts)
    }

    /// Score one transaction against the wall clock.
    pub fn score(
        &self,
        fact: &TransactionFact,
        ml_score: f64,
        signals: &TxSignals,
        verdict: Option<&QualitativeVerdict>,
    ) -> ScoreResult<Decision> {
        self.score_at(fact, ml_score, signals, verdict, Utc::now())
    }

    /// Score one transaction as seen from `now` (injectable for replay and
    /// tests).
    pub fn score_at(
        &self,
        fact: &TransactionFact,
        ml_score: f64,
        signals: &TxSignals,
        verdict: Option<&QualitativeVerdict>,
        now: DateTime<Utc>,
    ) -> ScoreResult<Decision> {
        if fact.tx_id.trim().is_empty() {
            return Err(ScoreError::InvalidTransactionId {
                reason: "empty transaction id".into(),
            });
        }

        let p_ml = if ml_score.is_finite() {
            ml_score.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let debit = self.store.read_counterparty_aggregate(&fact.debit_id)?;
        let credit = self.store.read_counterparty_aggregate(&fact.credit_id)?;

        let (p_prior, components) = compute_prior(
            &debit,
            &credit,
            fact.amount_or_zero(),
            now,
            &self.config.heuristics,
        );
        let (hard_hit, rule_hits) =
            apply_hard_rules(fact, &debit, &credit, now, &self.config.heuristics);

        let degraded = verdict.is_none();
        let p_qual = match verdict {
            Some(v) => qualitative::verdict_to_probability(v),
            None => qualitative::DEGRADED_PROBABILITY,
        };
        // Degraded mode never floors: 0.2 cannot clear the confidence gate.
        let floor = verdict
            .and_then(|_| qualitative::soft_floor(fact, signals, p_qual, &self.config.heuristics));

        let fused = fusion::combine(p_ml, p_prior, p_qual, hard_hit, floor, &self.config.weights);

        let mut reasons = rule_hits.clone();
        if let Some(floor) = floor {
            reasons.push(format!("qualitative_floor={floor:.2}"));
        }
        if degraded {
            reasons.push("qualitative_unavailable".to_string());
        }

        let record = DecisionRecord {
            tx_id: fact.tx_id.clone(),
            p_ml,
            p_prior,
            p_llm: p_qual,
            p_final: fused.final_score,
            label: fused.label.as_str().to_string(),
            is_suspicious: fused.is_suspicious,
            rule_hits,
            reasons,
            inserted_at: format_ts(now),
        };

        self.store.record_decision(fact, &record)?;

        if let Some(v) = verdict {
            self.store.log_assessment(
                &format_ts(now),
                "qualitative.verdict",
                &serde_json::json!({ "tx_id": fact.tx_id, "amount": fact.amount_or_zero() }),
                &serde_json::to_value(v)?,
                &serde_json::json!({ "p_qual": p_qual }),
            )?;
        }

        log::debug!(
            "tx={} p_ml={p_ml:.3} p_prior={p_prior:.3} p_llm={p_qual:.3} p_final={:.3} label={} rules={:?}",
            fact.tx_id,
            fused.final_score,
            record.label,
            record.rule_hits
        );

        Ok(Decision {
            record,
            prior: components,
            degraded,
        })
    }
}
