//! Upstream-extracted per-transaction signals.
//!
//! Feature extraction from free text and chain analysis happen outside
//! this crate; these are the values the soft-floor heuristics consume when
//! the upstream pipeline supplies them. Every field is optional and absent
//! by default.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxSignals {
    /// Hop count of a detected transit chain.
    pub chain_length: Option<u32>,
    /// Wall-clock duration of the chain, in hours.
    pub chain_duration_hours: Option<f64>,
    /// Purpose-text anomaly score in [0, 1].
    pub purpose_anomaly: Option<f64>,
}
