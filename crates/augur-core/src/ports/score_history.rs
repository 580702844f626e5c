//! ScoreHistory port - 過去スコアの読み出し

use async_trait::async_trait;

use crate::domain::{InstrumentKey, StoreError};

/// Read-only source of prior scores.
#[async_trait]
pub trait ScoreHistory: Send + Sync {
    /// Prior scores for `key`, oldest first. Unknown keys yield an empty history.
    async fn recent_scores(&self, key: InstrumentKey) -> Result<Vec<u8>, StoreError>;

    /// Every instrument with at least one stored score.
    ///
    /// Wildcard tasks fan out over this set.
    async fn tracked_keys(&self) -> Result<Vec<InstrumentKey>, StoreError>;
}
