//! Aggregate store tests: recompute-from-facts semantics, idempotence,
//! order independence, and watchlist preservation.

use txscore_core::store::{CounterpartyAggregate, DecisionRecord, ScoreStore, TransactionFact};

fn store() -> ScoreStore {
    let store = ScoreStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

fn fact(
    tx_id: &str,
    ts: &str,
    debit: &str,
    credit: &str,
    amount: f64,
    purpose: &str,
) -> TransactionFact {
    TransactionFact {
        tx_id: tx_id.into(),
        ts: ts.into(),
        debit_id: debit.into(),
        credit_id: credit.into(),
        amount,
        purpose: purpose.into(),
    }
}

fn decision(tx_id: &str, suspicious: bool, p_llm: f64) -> DecisionRecord {
    DecisionRecord {
        tx_id: tx_id.into(),
        p_ml: 0.1,
        p_prior: 0.1,
        p_llm,
        p_final: if suspicious { 0.8 } else { 0.1 },
        label: if suspicious { "high" } else { "low" }.into(),
        is_suspicious: suspicious,
        rule_hits: vec![],
        reasons: vec![],
        inserted_at: "2024-03-10 12:00:00".into(),
    }
}

fn batch() -> Vec<TransactionFact> {
    vec![
        fact("t1", "2024-03-01 10:00:00", "ent-a", "ent-b", 10.0, "rent"),
        fact("t2", "2024-03-02 10:00:00", "ent-a", "ent-c", 20.0, "services"),
        fact("t3", "2024-03-03 10:00:00", "ent-b", "ent-a", 30.0, "delivery"),
        fact("t4", "2024-03-04 10:00:00", "ent-c", "ent-a", 40.0, "invoice"),
    ]
}

/// An entity with zero facts resolves to the documented zero-value
/// default, never an error.
#[test]
fn unknown_entity_returns_zero_default() {
    let store = store();
    let agg = store.read_counterparty_aggregate("ghost").unwrap();
    assert_eq!(agg, CounterpartyAggregate::empty("ghost"));
    assert_eq!(agg.cnt_total, 0);
    assert_eq!(agg.susp_rate, 0.0);
    assert_eq!(agg.p95, None);
    assert!(!agg.watchlisted);
    assert_eq!(agg.last_seen_ts, None);
}

/// Preloading N facts sharing one entity yields count N, quantiles over
/// all N amounts, and last-seen equal to the maximum timestamp.
#[test]
fn preload_builds_counts_quantiles_and_last_seen() {
    let store = store();
    store.preload(&batch()).unwrap();

    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(agg.cnt_total, 4);
    assert_eq!(agg.amt_total, 100.0);
    assert_eq!(agg.last_seen_ts.as_deref(), Some("2024-03-04 10:00:00"));
    // Linear interpolation over [10, 20, 30, 40].
    assert_eq!(agg.p50, Some(25.0));
    assert_eq!(agg.p75, Some(32.5));
    assert!((agg.p95.unwrap() - 38.5).abs() < 1e-9);
    // No decisions yet: the partial join is expected, not an error.
    assert_eq!(agg.cnt_suspicious, 0);
    assert_eq!(agg.susp_rate, 0.0);
    assert_eq!(agg.amt_suspicious, 0.0);
    assert_eq!(agg.llm_flags_total, 0);
}

/// Replaying the same batch is a no-op: facts are insert-if-absent and
/// recompute is a pure function of the stored rows.
#[test]
fn preload_is_idempotent() {
    let store = store();
    store.preload(&batch()).unwrap();
    let first = store.read_counterparty_aggregate("ent-a").unwrap();

    let inserted = store.preload(&batch()).unwrap();
    assert_eq!(inserted, 0, "replayed facts must not insert");
    let second = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(first, second);
    assert_eq!(store.fact_count().unwrap(), 4);
}

/// Any permutation of the batch produces identical aggregates.
#[test]
fn preload_is_order_independent() {
    let forward = store();
    forward.preload(&batch()).unwrap();

    let mut reversed_batch = batch();
    reversed_batch.reverse();
    let reversed = store();
    reversed.preload(&reversed_batch).unwrap();

    for entity in ["ent-a", "ent-b", "ent-c"] {
        assert_eq!(
            forward.read_counterparty_aggregate(entity).unwrap(),
            reversed.read_counterparty_aggregate(entity).unwrap(),
            "aggregates diverged for {entity}"
        );
    }
}

/// A suspicious decision feeds the suspicious counters of both sides.
#[test]
fn decision_updates_suspicious_counters() {
    let store = store();
    store.preload(&batch()).unwrap();

    let f = batch().remove(0); // t1: ent-a -> ent-b, 10.0
    store.record_decision(&f, &decision("t1", true, 0.2)).unwrap();

    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(agg.cnt_suspicious, 1);
    assert_eq!(agg.amt_suspicious, 10.0);
    assert_eq!(agg.susp_rate, 0.25);

    let other = store.read_counterparty_aggregate("ent-b").unwrap();
    assert_eq!(other.cnt_suspicious, 1);
}

/// Re-scoring a transaction replaces its decision wholesale; the
/// recompute-from-facts model cannot double count.
#[test]
fn rescoring_latest_decision_wins() {
    let store = store();
    let f = fact("t1", "2024-03-01 10:00:00", "ent-a", "ent-b", 50.0, "rent");

    store.record_decision(&f, &decision("t1", true, 0.2)).unwrap();
    assert_eq!(
        store.read_counterparty_aggregate("ent-a").unwrap().cnt_suspicious,
        1
    );

    store.record_decision(&f, &decision("t1", false, 0.2)).unwrap();
    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(agg.cnt_suspicious, 0);
    assert_eq!(agg.cnt_total, 1, "replay must not duplicate the fact");
    assert_eq!(store.decision_count().unwrap(), 1);

    // The stored row reads back as the latest write.
    let stored = store.get_decision("t1").unwrap().unwrap();
    assert!(!stored.is_suspicious);
    assert_eq!(stored, decision("t1", false, 0.2));
    assert_eq!(store.get_decision("missing").unwrap(), None);
}

/// reopen() hands out a second connection: the same database for files,
/// a fresh isolated one for :memory:.
#[test]
fn reopen_in_memory_is_isolated() {
    let store = store();
    store.preload(&batch()).unwrap();
    let second = store.reopen().unwrap();
    second.migrate().unwrap();
    assert_eq!(second.fact_count().unwrap(), 0);
    assert_eq!(store.fact_count().unwrap(), 4);
}

/// Confident qualitative verdicts accumulate as soft flags, with their
/// own last-seen timestamp.
#[test]
fn soft_flags_counted_separately() {
    let store = store();
    let f1 = fact("t1", "2024-03-01 10:00:00", "ent-a", "ent-b", 10.0, "a");
    let f2 = fact("t2", "2024-03-05 10:00:00", "ent-a", "ent-b", 20.0, "b");

    store.record_decision(&f1, &decision("t1", false, 1.0)).unwrap();
    store.record_decision(&f2, &decision("t2", false, 0.5)).unwrap();

    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(agg.llm_flags_total, 1);
    assert_eq!(agg.llm_last_seen_ts.as_deref(), Some("2024-03-01 10:00:00"));
    assert_eq!(agg.last_seen_ts.as_deref(), Some("2024-03-05 10:00:00"));
    // A confident flag alone is not a suspicious decision.
    assert_eq!(agg.cnt_suspicious, 0);
}

/// The curated watchlist flag survives any number of recomputes.
#[test]
fn watchlist_survives_recompute() {
    let store = store();
    store.set_watchlisted("ent-a", true).unwrap();

    store.preload(&batch()).unwrap();
    let f = batch().remove(0);
    store.record_decision(&f, &decision("t1", true, 1.0)).unwrap();
    store.preload(&batch()).unwrap();

    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert!(agg.watchlisted, "watchlist flag lost by recompute");
    assert_eq!(agg.cnt_total, 4, "stats must still recompute normally");

    // Only the explicit curation call may change it.
    store.set_watchlisted("ent-a", false).unwrap();
    store.preload(&batch()).unwrap();
    assert!(!store.read_counterparty_aggregate("ent-a").unwrap().watchlisted);
}

/// Curating an entity with no history creates a zero-stat row.
#[test]
fn watchlist_on_fresh_entity() {
    let store = store();
    store.set_watchlisted("fresh", true).unwrap();
    let agg = store.read_counterparty_aggregate("fresh").unwrap();
    assert!(agg.watchlisted);
    assert_eq!(agg.cnt_total, 0);
    assert_eq!(agg.p95, None);
}

/// Non-finite amounts are coerced to zero at the boundary.
#[test]
fn non_finite_amount_coerced_to_zero() {
    let store = store();
    store
        .preload(&[fact("t1", "2024-03-01 10:00:00", "ent-a", "ent-b", f64::NAN, "x")])
        .unwrap();
    let agg = store.read_counterparty_aggregate("ent-a").unwrap();
    assert_eq!(agg.amt_total, 0.0);
    assert_eq!(agg.p95, Some(0.0));
}

/// Malformed transaction ids fail fast instead of corrupting aggregates.
#[test]
fn blank_tx_id_is_rejected() {
    let store = store();
    let bad = fact("   ", "2024-03-01 10:00:00", "ent-a", "ent-b", 10.0, "x");
    assert!(store.preload(&[bad.clone()]).is_err());
    assert!(store.record_decision(&bad, &decision("   ", false, 0.2)).is_err());

    let good = fact("t1", "2024-03-01 10:00:00", "ent-a", "ent-b", 10.0, "x");
    let mismatched = decision("other-id", false, 0.2);
    assert!(store.record_decision(&good, &mismatched).is_err());
}

/// Re-running migrations against an existing schema is a safe no-op.
#[test]
fn migrate_is_idempotent() {
    let store = store();
    store.migrate().unwrap();
    store.preload(&batch()).unwrap();
    store.migrate().unwrap();
    assert_eq!(store.fact_count().unwrap(), 4);
}
