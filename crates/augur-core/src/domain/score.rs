//! Score aggregation: prior scores + current-window sentiment counts -> next score.
//!
//! Pure and deterministic. Rounding is half-away-from-zero (`f64::round`)
//! everywhere in this module.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Score returned when there is neither history nor new signal.
pub const NEUTRAL_SCORE: u8 = 50;

pub const MAX_SCORE: u8 = 100;

/// Sentiment counts observed in the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentCounts {
    #[serde(default)]
    pub positive: u64,
    #[serde(default)]
    pub neutral: u64,
    #[serde(default)]
    pub negative: u64,
}

impl SentimentCounts {
    pub fn new(positive: u64, neutral: u64, negative: u64) -> Self {
        Self {
            positive,
            neutral,
            negative,
        }
    }

    pub fn total(&self) -> u64 {
        self.positive
            .saturating_add(self.neutral)
            .saturating_add(self.negative)
    }

    /// Directional signal in [-1, 1]; `None` when there is no signal at all.
    pub fn raw_signal(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((self.positive as f64 - self.negative as f64) / total as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("weighted mean has zero total weight")]
    ZeroWeight,
}

/// Next score for an instrument. See module docs for the rounding rule.
pub fn compute_score(history: &[u8], counts: SentimentCounts) -> u8 {
    let Some(raw) = counts.raw_signal() else {
        return trend_score(history);
    };

    let normalized = (raw + 1.0) / 2.0 * 100.0;
    let blended = match recency_weighted_mean(history, normalized) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, normalized, "falling back to unweighted signal");
            normalized
        }
    };
    to_score(blended)
}

/// Mean of the prior scores, or [`NEUTRAL_SCORE`] for an empty history.
pub fn trend_score(history: &[u8]) -> u8 {
    if history.is_empty() {
        return NEUTRAL_SCORE;
    }
    let sum: u64 = history.iter().map(|&s| u64::from(s)).sum();
    to_score(sum as f64 / history.len() as f64)
}

/// Entry `i` (oldest first) weighs `i + 1`; the new value weighs `len + 1`.
fn recency_weighted_mean(history: &[u8], newest: f64) -> Result<f64, AggregationError> {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, &score) in history.iter().enumerate() {
        let weight = (i + 1) as f64;
        numerator += f64::from(score) * weight;
        denominator += weight;
    }
    let newest_weight = (history.len() + 1) as f64;
    numerator += newest * newest_weight;
    denominator += newest_weight;

    if denominator == 0.0 {
        return Err(AggregationError::ZeroWeight);
    }
    Ok(numerator / denominator)
}

fn to_score(value: f64) -> u8 {
    value.round().clamp(0.0, f64::from(MAX_SCORE)) as u8
}
