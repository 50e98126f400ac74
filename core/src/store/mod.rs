//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Scoring components call store methods — they never execute SQL directly.
//!
//! Three logical tables: transaction facts (immutable, insert-if-absent),
//! decision records (one row per transaction id, full-replacement upserts)
//! and counterparty aggregates (one row per entity id, recomputed from the
//! other two on every relevant write). Plus an audit log for external
//! qualitative assessments.

mod aggregate;

pub use aggregate::CounterpartyAggregate;

use crate::{
    error::{ScoreError, ScoreResult},
    types::{EntityId, TxId},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A raw transaction fact. Immutable once stored; replays are no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFact {
    pub tx_id: TxId,
    pub ts: String,
    pub debit_id: EntityId,
    pub credit_id: EntityId,
    pub amount: f64,
    pub purpose: String,
}

impl TransactionFact {
    /// Amount as the store treats it: non-finite input coerces to 0.
    pub fn amount_or_zero(&self) -> f64 {
        if self.amount.is_finite() {
            self.amount
        } else {
            0.0
        }
    }
}

/// One scored transaction. Upserted by full replacement, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub tx_id: TxId,
    pub p_ml: f64,
    pub p_prior: f64,
    pub p_llm: f64,
    pub p_final: f64,
    pub label: String,
    pub is_suspicious: bool,
    pub rule_hits: Vec<String>,
    pub reasons: Vec<String>,
    pub inserted_at: String,
}

pub struct ScoreStore {
    pub(crate) conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ScoreStore {
    pub fn open(path: &str) -> ScoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ScoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database. Parallel workers each
    /// own a handle; SQLite serializes the writers.
    /// For in-memory databases this returns a fresh, isolated database.
    pub fn reopen(&self) -> ScoreResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order. Idempotent; safe to call at
    /// every process start.
    pub fn migrate(&self) -> ScoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Transaction facts ──────────────────────────────────────

    /// Insert a fact if absent. Returns true when the row is new;
    /// replaying an already-stored fact is a no-op.
    pub fn insert_fact(&self, fact: &TransactionFact) -> ScoreResult<bool> {
        validate_tx_id(&fact.tx_id)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tx_fact (tx_id, ts, debit_id, credit_id, amount, purpose)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fact.tx_id,
                fact.ts,
                fact.debit_id,
                fact.credit_id,
                fact.amount_or_zero(),
                fact.purpose,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Bulk-insert a whole batch and recompute every counterparty seen on
    /// either side. Runs once per incoming batch, before any decisions
    /// exist, so priors already reflect full-batch recency and quantiles.
    pub fn preload(&self, facts: &[TransactionFact]) -> ScoreResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0usize;
        let mut touched: BTreeSet<EntityId> = BTreeSet::new();
        for fact in facts {
            if self.insert_fact(fact)? {
                inserted += 1;
            }
            for side in [&fact.debit_id, &fact.credit_id] {
                if !side.is_empty() {
                    touched.insert(side.clone());
                }
            }
        }
        for entity_id in &touched {
            self.recompute_aggregate(entity_id)?;
        }
        tx.commit()?;
        log::info!(
            "preload: {} facts ({inserted} new), {} counterparties recomputed",
            facts.len(),
            touched.len()
        );
        Ok(inserted)
    }

    // ── Decisions ──────────────────────────────────────────────

    /// Upsert a decision by full replacement; latest write wins.
    fn upsert_decision(&self, d: &DecisionRecord) -> ScoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO decision
                (tx_id, p_ml, p_prior, p_llm, p_final, label, is_suspicious,
                 rule_hits, reasons, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                d.tx_id,
                d.p_ml,
                d.p_prior,
                d.p_llm,
                d.p_final,
                d.label,
                if d.is_suspicious { 1i32 } else { 0i32 },
                serde_json::to_string(&d.rule_hits)?,
                serde_json::to_string(&d.reasons)?,
                d.inserted_at,
            ],
        )?;
        Ok(())
    }

    /// The unit of work invoked once per scored transaction: insert the
    /// fact if absent, upsert the decision, recompute both counterparties.
    /// The whole unit is one SQL transaction, so a cancelled batch never
    /// leaves an aggregate mid-recompute.
    pub fn record_decision(
        &self,
        fact: &TransactionFact,
        decision: &DecisionRecord,
    ) -> ScoreResult<()> {
        validate_tx_id(&fact.tx_id)?;
        if decision.tx_id != fact.tx_id {
            return Err(ScoreError::InvalidTransactionId {
                reason: format!(
                    "decision references '{}' but the fact is '{}'",
                    decision.tx_id, fact.tx_id
                ),
            });
        }
        let tx = self.conn.unchecked_transaction()?;
        self.insert_fact(fact)?;
        self.upsert_decision(decision)?;
        if !fact.debit_id.is_empty() {
            self.recompute_aggregate(&fact.debit_id)?;
        }
        if !fact.credit_id.is_empty() && fact.credit_id != fact.debit_id {
            self.recompute_aggregate(&fact.credit_id)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_decision(&self, tx_id: &str) -> ScoreResult<Option<DecisionRecord>> {
        let row: Option<(f64, f64, f64, f64, String, i32, String, String, String)> = self
            .conn
            .query_row(
                "SELECT p_ml, p_prior, p_llm, p_final, label, is_suspicious,
                        rule_hits, reasons, inserted_at
                 FROM decision WHERE tx_id = ?1",
                params![tx_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                    ))
                },
            )
            .optional()?;
        let Some((p_ml, p_prior, p_llm, p_final, label, suspicious, hits, reasons, at)) = row
        else {
            return Ok(None);
        };
        Ok(Some(DecisionRecord {
            tx_id: tx_id.to_string(),
            p_ml,
            p_prior,
            p_llm,
            p_final,
            label,
            is_suspicious: suspicious != 0,
            rule_hits: serde_json::from_str(&hits)?,
            reasons: serde_json::from_str(&reasons)?,
            inserted_at: at,
        }))
    }

    // ── Assessment audit log ───────────────────────────────────

    /// Append one external-assessment exchange to the audit log.
    pub fn log_assessment(
        &self,
        ts: &str,
        endpoint: &str,
        payload: &serde_json::Value,
        response: &serde_json::Value,
        meta: &serde_json::Value,
    ) -> ScoreResult<()> {
        self.conn.execute(
            "INSERT INTO assessment_log (ts, endpoint, payload, response, meta)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ts,
                endpoint,
                payload.to_string(),
                response.to_string(),
                meta.to_string(),
            ],
        )?;
        Ok(())
    }

    // ── Summary / test helpers ─────────────────────────────────

    pub fn fact_count(&self) -> ScoreResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM tx_fact", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn decision_count(&self) -> ScoreResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM decision", [], |row| row.get(0))
            .map_err(Into::into)
    }

    pub fn suspicious_count(&self) -> ScoreResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM decision WHERE is_suspicious = 1",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Decision counts grouped by label, label-sorted for stable output.
    pub fn label_counts(&self) -> ScoreResult<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT label, COUNT(*) FROM decision GROUP BY label ORDER BY label ASC",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn assessment_log_count(&self) -> ScoreResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM assessment_log", [], |row| row.get(0))
            .map_err(Into::into)
    }
}

fn validate_tx_id(tx_id: &str) -> ScoreResult<()> {
    if tx_id.trim().is_empty() {
        return Err(ScoreError::InvalidTransactionId {
            reason: "empty transaction id".into(),
        });
    }
    Ok(())
}
