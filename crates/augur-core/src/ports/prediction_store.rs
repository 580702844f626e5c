//! PredictionStore port - 新スコアの書き込み

use async_trait::async_trait;

use crate::domain::{InstrumentKey, StoreError};

/// Persistence sink, called inside the locked section.
///
/// A failure here is what feeds the retry classifier.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn apply_score(&self, key: InstrumentKey, score: u8) -> Result<(), StoreError>;

    /// Write several scores as one unit.
    ///
    /// The default writes them one by one, so a failure part way leaves the
    /// earlier scores in place. Stores that can write all-or-nothing should
    /// override it.
    async fn apply_scores(&self, scores: &[(InstrumentKey, u8)]) -> Result<(), StoreError> {
        for &(key, score) in scores {
            self.apply_score(key, score).await?;
        }
        Ok(())
    }
}
