//! Scoring tunables.
//!
//! Two groups: the fusion weights (the externally supplied contract of the
//! scoring call) and the keyword/threshold heuristics, which live in data
//! files rather than code so they can be tuned or localized without
//! touching fusion logic. Compiled defaults cover tests and bare installs.

use serde::{Deserialize, Serialize};

/// Weights of the final linear mix plus the suspicion threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionWeights {
    pub w_ml: f64,
    pub w_prior: f64,
    pub w_llm: f64,
    pub threshold: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            w_ml: 0.6,
            w_prior: 0.25,
            w_llm: 0.15,
            threshold: 0.5,
        }
    }
}

/// Keyword and threshold heuristics consumed by the prior, the hard rules,
/// and the qualitative soft floor. All values are tuned constants carried
/// over from production use; none have a stated derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicsConfig {
    /// Lowercase substrings that mark a transaction purpose as high-risk.
    pub high_risk_keywords: Vec<String>,
    /// An amount that is an exact multiple of any of these is "round".
    pub round_amount_moduli: Vec<f64>,
    /// Transit chains completing faster than this many hours corroborate.
    pub short_transit_hours: f64,
    /// Purpose-anomaly score at or above this corroborates.
    pub purpose_anomaly_threshold: f64,
    /// Qualitative probability required before any soft floor applies.
    pub floor_confidence_gate: f64,
    /// Floor when at least one weak corroborating signal exists.
    pub floor_corroborated: f64,
    /// Floor when no corroboration is found.
    pub floor_base: f64,
    /// Window of the linear recency decay in the prior.
    pub recency_window_days: f64,
    /// Accumulated high-confidence qualitative flags that saturate the
    /// prior's soft term.
    pub llm_flag_saturation: f64,
    /// R1: maximum days since last activity for a watchlist escalation.
    pub watchlist_recent_days: f64,
    /// R2: minimum historical suspicious rate.
    pub heavy_history_susp_rate: f64,
    /// R2: minimum historical suspicious count.
    pub heavy_history_cnt: f64,
    /// R2: maximum days since last activity.
    pub heavy_history_recent_days: f64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            high_risk_keywords: [
                "loan",
                "loan repayment",
                "card transfer",
                "personal needs",
                "crypto",
                "bitcoin",
                "usdt",
                "swift",
                "foreign transfer",
                "cash withdrawal",
                "cash-out",
                "charity",
                "donation",
                "agency fee",
                "commission",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            round_amount_moduli: vec![10_000.0, 100_000.0],
            short_transit_hours: 24.0,
            purpose_anomaly_threshold: 0.6,
            floor_confidence_gate: 0.99,
            floor_corroborated: 0.45,
            floor_base: 0.35,
            recency_window_days: 30.0,
            llm_flag_saturation: 5.0,
            watchlist_recent_days: 14.0,
            heavy_history_susp_rate: 0.40,
            heavy_history_cnt: 10.0,
            heavy_history_recent_days: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub weights: FusionWeights,
    pub heuristics: HeuristicsConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct FusionFile {
    weights: FusionWeights,
}

#[derive(Debug, Clone, Deserialize)]
struct HeuristicsFile {
    heuristics: HeuristicsConfig,
}

impl ScoreConfig {
    /// Load from the data/ directory. Missing files fall back to defaults
    /// so a bare checkout still scores.
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let fusion_path = format!("{data_dir}/scoring/fusion.json");
        let weights = match std::fs::read_to_string(&fusion_path) {
            Ok(content) => {
                let file: FusionFile = serde_json::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("Cannot parse {fusion_path}: {e}"))?;
                file.weights
            }
            Err(_) => FusionWeights::default(),
        };

        let heuristics_path = format!("{data_dir}/scoring/heuristics.json");
        let heuristics = match std::fs::read_to_string(&heuristics_path) {
            Ok(content) => {
                let file: HeuristicsFile = serde_json::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("Cannot parse {heuristics_path}: {e}"))?;
                file.heuristics
            }
            Err(_) => HeuristicsConfig::default(),
        };

        Ok(Self { weights, heuristics })
    }
}
