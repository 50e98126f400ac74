//! Prior estimator tests: the logistic history prior and its components.

use chrono::{DateTime, Utc};
use txscore_core::{
    config::HeuristicsConfig,
    prior::compute_prior,
    store::CounterpartyAggregate,
    types::parse_ts,
};

fn now() -> DateTime<Utc> {
    parse_ts("2024-04-01 00:00:00").unwrap()
}

fn cfg() -> HeuristicsConfig {
    HeuristicsConfig::default()
}

/// Two fresh entities land exactly on the logistic bias: z = -1.5.
#[test]
fn fresh_entities_sit_at_the_bias() {
    let empty = CounterpartyAggregate::empty("a");
    let (prior, parts) = compute_prior(&empty, &empty, 10_000.0, now(), &cfg());

    assert!((prior - 0.182_425_523_8).abs() < 1e-6);
    assert_eq!(parts.susp_rate, 0.0);
    assert_eq!(parts.cnt_susp, 0.0);
    assert!(parts.last_days.is_infinite());
    assert_eq!(parts.recency, 0.0);
    assert_eq!(parts.llm_soft_rate, 0.0);
    assert_eq!(parts.amount_outlier, 0.0);
    assert!((parts.z + 1.5).abs() < 1e-12);
}

/// Activity today carries full recency weight; activity at or past the
/// window carries none.
#[test]
fn recency_decays_linearly_over_the_window() {
    let mut seen_today = CounterpartyAggregate::empty("a");
    seen_today.last_seen_ts = Some("2024-04-01 00:00:00".into());
    let empty = CounterpartyAggregate::empty("b");

    let (_, parts) = compute_prior(&seen_today, &empty, 0.0, now(), &cfg());
    assert!((parts.recency - 1.0).abs() < 1e-12);
    assert!((parts.z - (1.2 - 1.5)).abs() < 1e-12);

    let mut seen_long_ago = CounterpartyAggregate::empty("a");
    seen_long_ago.last_seen_ts = Some("2024-02-01 00:00:00".into());
    let (_, parts) = compute_prior(&seen_long_ago, &empty, 0.0, now(), &cfg());
    assert_eq!(parts.recency, 0.0);

    // The fresher side dominates via min(days).
    let (_, parts) = compute_prior(&seen_long_ago, &seen_today, 0.0, now(), &cfg());
    assert!((parts.recency - 1.0).abs() < 1e-12);
}

/// Soft qualitative flags saturate at the configured count.
#[test]
fn soft_flags_saturate() {
    let mut flagged = CounterpartyAggregate::empty("a");
    flagged.llm_flags_total = 2;
    let empty = CounterpartyAggregate::empty("b");
    let (_, parts) = compute_prior(&flagged, &empty, 0.0, now(), &cfg());
    assert!((parts.llm_soft_rate - 0.4).abs() < 1e-12);

    flagged.llm_flags_total = 10;
    let (_, parts) = compute_prior(&flagged, &empty, 0.0, now(), &cfg());
    assert_eq!(parts.llm_soft_rate, 1.0);
}

/// Amounts above an entity's own p95 contribute an excess ratio; amounts
/// within it contribute nothing.
#[test]
fn amount_outlier_measured_against_p95() {
    let mut agg = CounterpartyAggregate::empty("a");
    agg.p95 = Some(100.0);
    let empty = CounterpartyAggregate::empty("b");

    let (_, parts) = compute_prior(&agg, &empty, 150.0, now(), &cfg());
    assert!((parts.amount_outlier - 0.5).abs() < 1e-12);

    let (_, parts) = compute_prior(&agg, &empty, 80.0, now(), &cfg());
    assert_eq!(parts.amount_outlier, 0.0);

    // An undefined or zero p95 never produces an outlier.
    agg.p95 = Some(0.0);
    let (_, parts) = compute_prior(&agg, &empty, 1_000_000.0, now(), &cfg());
    assert_eq!(parts.amount_outlier, 0.0);
}

/// Heavy history pushes the prior toward 1 but never out of range.
#[test]
fn prior_stays_in_range_under_extremes() {
    let mut heavy = CounterpartyAggregate::empty("a");
    heavy.susp_rate = 1.0;
    heavy.cnt_suspicious = 1_000;
    heavy.llm_flags_total = 50;
    heavy.last_seen_ts = Some("2024-04-01 00:00:00".into());
    heavy.p95 = Some(1.0);

    let (prior, _) = compute_prior(&heavy, &heavy, 1e9, now(), &cfg());
    assert!(prior > 0.99 && prior <= 1.0);

    let empty = CounterpartyAggregate::empty("b");
    let (prior, _) = compute_prior(&empty, &empty, f64::NAN, now(), &cfg());
    assert!((0.0..=1.0).contains(&prior));
}
