//! TaskPayload trait - 型付き payload の定義

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{SentimentCounts, TaskKind};

/// Binds a payload type to exactly one [`TaskKind`].
///
/// # Trait Bounds
/// - `DeserializeOwned`: transport の JSON object から復元するため
/// - `Send + Sync + 'static`: Arc に格納して blocking thread にも渡せるため
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: TaskKind;
}

/// New sentiment counts for an instrument (or for every tracked instrument
/// when sent to the wildcard key).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    #[serde(flatten)]
    pub counts: SentimentCounts,
}

impl TaskPayload for PriceUpdate {
    const KIND: TaskKind = TaskKind::PriceUpdate;
}

/// No new signal: re-derive the score from the stored trend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recalibrate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TaskPayload for Recalibrate {
    const KIND: TaskKind = TaskKind::Recalibrate;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn price_update_reads_flat_counts_and_defaults_missing_ones() {
        let p: PriceUpdate = serde_json::from_value(json!({"positive": 3, "negative": 1})).unwrap();
        assert_eq!(p.counts, SentimentCounts::new(3, 0, 1));
    }

    #[test]
    fn price_update_rejects_negative_counts() {
        let r: Result<PriceUpdate, _> = serde_json::from_value(json!({"positive": -1}));
        assert!(r.is_err());
    }

    #[test]
    fn recalibrate_accepts_empty_payload() {
        let r: Recalibrate = serde_json::from_value(json!({})).unwrap();
        assert_eq!(r.reason, None);
    }
}
