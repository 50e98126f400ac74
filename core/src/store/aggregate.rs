//! Counterparty aggregates — materialized per-entity statistics.
//!
//! RULE: An aggregate row is always a pure function of the tx_fact and
//! decision rows referencing its entity, with one exception: `watchlisted`
//! is curated out of band and must survive every recompute. Recomputation
//! is idempotent and order-independent; there are no running counters to
//! drift on replay.

use super::ScoreStore;
use crate::{error::ScoreResult, types::EntityId};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Decisions whose qualitative probability reaches this count as soft flags.
const SOFT_FLAG_MIN_SCORE: f64 = 0.99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyAggregate {
    pub entity_id: EntityId,
    pub cnt_total: i64,
    pub cnt_suspicious: i64,
    pub susp_rate: f64,
    pub amt_total: f64,
    pub amt_suspicious: f64,
    pub last_seen_ts: Option<String>,
    /// Manually curated; recomputation never writes a new value for it.
    pub watchlisted: bool,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    /// Decisions whose qualitative score reached the soft-flag threshold.
    pub llm_flags_total: i64,
    pub llm_last_seen_ts: Option<String>,
}

impl CounterpartyAggregate {
    /// The documented zero-value default: "no history" is a valid state,
    /// not an error.
    pub fn empty(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            cnt_total: 0,
            cnt_suspicious: 0,
            susp_rate: 0.0,
            amt_total: 0.0,
            amt_suspicious: 0.0,
            last_seen_ts: None,
            watchlisted: false,
            p50: None,
            p75: None,
            p90: None,
            p95: None,
            llm_flags_total: 0,
            llm_last_seen_ts: None,
        }
    }
}

/// Linear-interpolation percentile over a sorted slice
/// (rank = q/100 * (n-1), fractional ranks interpolate between neighbors).
fn percentile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

impl ScoreStore {
    /// Stored aggregate row, or the zero-value default when the entity has
    /// no history. Never fails on absence.
    pub fn read_counterparty_aggregate(
        &self,
        entity_id: &str,
    ) -> ScoreResult<CounterpartyAggregate> {
        let row = self
            .conn
            .query_row(
                "SELECT cnt_total, cnt_suspicious, susp_rate, amt_total, amt_suspicious,
                        last_seen_ts, watchlisted, p50, p75, p90, p95,
                        llm_flags_total, llm_last_seen_ts
                 FROM agg_counterparty WHERE entity_id = ?1",
                params![entity_id],
                |row| {
                    Ok(CounterpartyAggregate {
                        entity_id: entity_id.to_string(),
                        cnt_total: row.get(0)?,
                        cnt_suspicious: row.get(1)?,
                        susp_rate: row.get(2)?,
                        amt_total: row.get(3)?,
                        amt_suspicious: row.get(4)?,
                        last_seen_ts: row.get(5)?,
                        watchlisted: row.get::<_, i32>(6)? != 0,
                        p50: row.get(7)?,
                        p75: row.get(8)?,
                        p90: row.get(9)?,
                        p95: row.get(10)?,
                        llm_flags_total: row.get(11)?,
                        llm_last_seen_ts: row.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_else(|| CounterpartyAggregate::empty(entity_id)))
    }

    /// Out-of-band curation: flag or unflag an entity on the watchlist.
    /// Creates a zero-stat row when the entity has no history yet.
    pub fn set_watchlisted(&self, entity_id: &str, watchlisted: bool) -> ScoreResult<()> {
        self.conn.execute(
            "INSERT INTO agg_counterparty (entity_id, watchlisted) VALUES (?1, ?2)
             ON CONFLICT(entity_id) DO UPDATE SET watchlisted = excluded.watchlisted",
            params![entity_id, if watchlisted { 1i32 } else { 0i32 }],
        )?;
        log::info!("watchlist: {entity_id} -> {watchlisted}");
        Ok(())
    }

    /// Rebuild one entity's aggregate from its facts and decisions.
    ///
    /// Facts without a decision are expected (preloaded rows before
    /// scoring) and contribute nothing to the suspicious counters. The
    /// write is a single all-fields upsert; `watchlisted` is preserved by
    /// re-writing the prior value.
    pub(crate) fn recompute_aggregate(&self, entity_id: &str) -> ScoreResult<()> {
        if entity_id.is_empty() {
            return Ok(());
        }

        // Every fact where the entity appears on either side.
        let mut stmt = self.conn.prepare(
            "SELECT tx_id, amount, ts FROM tx_fact
             WHERE debit_id = ?1 OR credit_id = ?1",
        )?;
        let facts: Vec<(String, f64, Option<String>)> = stmt
            .query_map(params![entity_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, Option<f64>>(1)?.unwrap_or(0.0),
                    row.get(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if facts.is_empty() {
            // Never-seen entity: nothing to write. A curated watchlist row,
            // if one exists, is left untouched.
            return Ok(());
        }

        let by_tx: HashMap<&str, (f64, Option<&str>)> = facts
            .iter()
            .map(|(tx_id, amount, ts)| {
                (
                    tx_id.as_str(),
                    (finite_or_zero(*amount), ts.as_deref()),
                )
            })
            .collect();

        let cnt_total = facts.len() as i64;
        let amt_total: f64 = by_tx.values().map(|(amount, _)| amount).sum();
        let last_seen_ts: Option<String> = facts
            .iter()
            .filter_map(|(_, _, ts)| ts.as_deref())
            .filter(|ts| !ts.is_empty())
            .max()
            .map(String::from);

        // Join decisions. Gaps are expected until every fact is scored.
        let mut stmt = self.conn.prepare(
            "SELECT d.tx_id, d.is_suspicious, d.p_llm
             FROM decision d
             JOIN tx_fact t ON t.tx_id = d.tx_id
             WHERE t.debit_id = ?1 OR t.credit_id = ?1",
        )?;
        let decisions: Vec<(String, i32, f64)> = stmt
            .query_map(params![entity_id], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut cnt_suspicious = 0i64;
        let mut amt_suspicious = 0.0f64;
        let mut llm_flags_total = 0i64;
        let mut llm_seen: Vec<&str> = Vec::new();
        for (tx_id, is_suspicious, p_llm) in &decisions {
            let (amount, ts) = by_tx.get(tx_id.as_str()).copied().unwrap_or((0.0, None));
            if *is_suspicious != 0 {
                cnt_suspicious += 1;
                amt_suspicious += amount;
            }
            if *p_llm >= SOFT_FLAG_MIN_SCORE {
                llm_flags_total += 1;
                if let Some(ts) = ts {
                    llm_seen.push(ts);
                }
            }
        }
        // The flag's recency is tracked apart from transaction recency.
        let llm_last_seen_ts = llm_seen.into_iter().max().map(String::from);

        let susp_rate = cnt_suspicious as f64 / cnt_total as f64;

        let mut amounts: Vec<f64> = by_tx.values().map(|(amount, _)| *amount).collect();
        amounts.sort_by(|a, b| a.total_cmp(b));
        let p50 = percentile(&amounts, 50.0);
        let p75 = percentile(&amounts, 75.0);
        let p90 = percentile(&amounts, 90.0);
        let p95 = percentile(&amounts, 95.0);

        // Preserve the curated flag: recomputation re-writes the prior
        // value and the conflict clause pins it on update.
        let watchlisted: i64 = self
            .conn
            .query_row(
                "SELECT watchlisted FROM agg_counterparty WHERE entity_id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        self.conn.execute(
            "INSERT INTO agg_counterparty
                (entity_id, cnt_total, cnt_suspicious, susp_rate, amt_total,
                 amt_suspicious, last_seen_ts, watchlisted, p50, p75, p90, p95,
                 llm_flags_total, llm_last_seen_ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(entity_id) DO UPDATE SET
                cnt_total        = excluded.cnt_total,
                cnt_suspicious   = excluded.cnt_suspicious,
                susp_rate        = excluded.susp_rate,
                amt_total        = excluded.amt_total,
                amt_suspicious   = excluded.amt_suspicious,
                last_seen_ts     = excluded.last_seen_ts,
                p50              = excluded.p50,
                p75              = excluded.p75,
                p90              = excluded.p90,
                p95              = excluded.p95,
                llm_flags_total  = excluded.llm_flags_total,
                llm_last_seen_ts = excluded.llm_last_seen_ts,
                watchlisted      = agg_counterparty.watchlisted",
            params![
                entity_id,
                cnt_total,
                cnt_suspicious,
                susp_rate,
                amt_total,
                amt_suspicious,
                last_seen_ts,
                watchlisted,
                p50,
                p75,
                p90,
                p95,
                llm_flags_total,
                llm_last_seen_ts,
            ],
        )?;
        log::debug!("aggregate recomputed: {entity_id} ({cnt_total} facts)");
        Ok(())
    }
}
