//! score-runner: headless batch scorer for txscore-core.
//!
//! Usage:
//!   score-runner --seed 42 --rows 200 --db scores.db
//!   score-runner --input batch.json --db scores.db --data-dir ./data
//!
//! Without --input it generates a deterministic synthetic batch (seeded,
//! reproducible) so the full preload → score → feedback loop can be
//! exercised end to end. ML scores are stubbed and qualitative verdicts
//! are derived from purpose keywords; a slice of rows runs degraded to
//! exercise the fallback path.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::env;
use txscore_core::{
    config::ScoreConfig,
    engine::ScoringEngine,
    qualitative::QualitativeVerdict,
    signals::TxSignals,
    store::{ScoreStore, TransactionFact},
    types::format_ts,
};

const PURPOSES: &[&str] = &[
    "payment for services under contract 118-a",
    "office rent march",
    "logistics and delivery services",
    "marketing consulting fee",
    "loan repayment under agreement 7",
    "crypto exchange top-up",
    "cash withdrawal",
    "equipment purchase, invoice 2291",
    "charity donation",
    "salary advance",
];

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let rows = parse_arg(&args, "--rows", 200usize);
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");
    let input = args
        .windows(2)
        .find(|w| w[0] == "--input")
        .map(|w| w[1].to_string());

    let run_id = uuid::Uuid::new_v4();
    println!("score-runner");
    println!("  run:      {run_id}");
    println!("  seed:     {seed}");
    println!("  db:       {db}");
    println!("  data_dir: {data_dir}");
    println!();

    let store = ScoreStore::open(db)?;
    store.migrate()?;
    let config = ScoreConfig::load(data_dir)?;
    let engine = ScoringEngine::new(store, config);

    let batch: Vec<TransactionFact> = match input {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("cannot read {path}"))?;
            serde_json::from_str(&content).with_context(|| format!("cannot parse {path}"))?
        }
        None => synthetic_batch(seed, rows),
    };

    // Preload first so priors see the whole batch before any decision.
    engine.preload(&batch)?;

    let mut rng = Pcg64Mcg::seed_from_u64(seed ^ 0x5c0e_d11a);
    let mut degraded = 0usize;
    for fact in &batch {
        let ml_score = stub_ml_score(fact, &mut rng);
        let signals = TxSignals::default();
        let verdict = stub_verdict(fact, &mut rng);
        if verdict.is_none() {
            degraded += 1;
        }
        let decision = engine.score(fact, ml_score, &signals, verdict.as_ref())?;
        log::info!(
            "scored tx={} p_final={:.3} label={}",
            fact.tx_id,
            decision.record.p_final,
            decision.record.label
        );
    }

    print_summary(&engine, &run_id, batch.len(), degraded)?;
    Ok(())
}

/// Deterministic demo batch: a small entity pool so counterparties recur
/// and the history feedback is visible within one run.
fn synthetic_batch(seed: u64, rows: usize) -> Vec<TransactionFact> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let entities: Vec<String> = (0..20).map(|i| format!("ent-{i:04}")).collect();
    let now = Utc::now();

    (0..rows)
        .map(|i| {
            let debit = entities[(rng.next_u64() % entities.len() as u64) as usize].clone();
            let mut credit = entities[(rng.next_u64() % entities.len() as u64) as usize].clone();
            if credit == debit {
                credit = entities[(rng.next_u64() % entities.len() as u64) as usize].clone();
            }
            // Pareto-ish amounts with occasional round ones.
            let u = next_f64(&mut rng).max(1e-9);
            let mut amount = (500.0 * u.powf(-0.7)).min(2_000_000.0);
            if rng.next_u64() % 10 == 0 {
                amount = ((amount / 10_000.0).ceil()) * 10_000.0;
            }
            let days_back = (rng.next_u64() % 45) as i64;
            let ts = format_ts(now - Duration::days(days_back));
            let purpose = PURPOSES[(rng.next_u64() % PURPOSES.len() as u64) as usize];
            TransactionFact {
                tx_id: format!("tx-{seed}-{i:06}"),
                ts,
                debit_id: debit,
                credit_id: credit,
                amount: (amount * 100.0).round() / 100.0,
                purpose: purpose.to_string(),
            }
        })
        .collect()
}

/// Stand-in for the pretrained classifier: keyword-sensitive noise.
fn stub_ml_score(fact: &TransactionFact, rng: &mut Pcg64Mcg) -> f64 {
    let mut score = next_f64(rng) * 0.35;
    let purpose = fact.purpose.to_lowercase();
    if purpose.contains("crypto") || purpose.contains("cash") || purpose.contains("loan") {
        score += 0.3;
    }
    score.min(1.0)
}

/// Stand-in for the external reasoning service. Roughly one row in six is
/// left without a verdict to exercise degraded mode.
fn stub_verdict(fact: &TransactionFact, rng: &mut Pcg64Mcg) -> Option<QualitativeVerdict> {
    if rng.next_u64() % 6 == 0 {
        return None;
    }
    let purpose = fact.purpose.to_lowercase();
    if purpose.contains("crypto") || purpose.contains("cash withdrawal") {
        Some(QualitativeVerdict {
            label: "high-risk".into(),
            confidence: Some(1.0),
        })
    } else if purpose.contains("loan") || purpose.contains("charity") {
        Some(QualitativeVerdict::labelled("medium-risk"))
    } else {
        Some(QualitativeVerdict::labelled("low-risk"))
    }
}

fn print_summary(
    engine: &ScoringEngine,
    run_id: &uuid::Uuid,
    batch_len: usize,
    degraded: usize,
) -> Result<()> {
    let store = engine.store();
    let labels: serde_json::Map<String, serde_json::Value> = store
        .label_counts()?
        .into_iter()
        .map(|(label, count)| (label, count.into()))
        .collect();
    let summary = serde_json::json!({
        "run": run_id.to_string(),
        "batch": batch_len,
        "facts": store.fact_count()?,
        "decisions": store.decision_count()?,
        "suspicious": store.suspicious_count()?,
        "degraded": degraded,
        "labels": labels,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

/// Float in [0, 1) from the generator's top 53 bits.
fn next_f64(rng: &mut Pcg64Mcg) -> f64 {
    (rng.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}
