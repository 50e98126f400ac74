//! Shared primitive types and timestamp helpers used across the scoring core.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// A stable, unique identifier for a counterparty (debit or credit side).
pub type EntityId = String;

/// A stable, unique transaction identifier. Survives replays unchanged.
pub type TxId = String;

/// Canonical timestamp format persisted in the store.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the canonical format and ISO-8601
/// with a `T` separator; anything longer is truncated to seconds first.
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let head = s.get(..19).unwrap_or(s);
    NaiveDateTime::parse_from_str(head, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Days elapsed since `ts`, as seen from `now`.
///
/// A missing or unparsable timestamp means "never seen" and maps to
/// infinity, which composes with `min` across both counterparties and
/// fails every recency check without a magic sentinel.
pub fn days_since(ts: Option<&str>, now: DateTime<Utc>) -> f64 {
    match ts.and_then(parse_ts) {
        Some(then) => {
            let secs = (now - then).num_seconds() as f64;
            (secs / 86_400.0).max(0.0)
        }
        None => f64::INFINITY,
    }
}
