//! ScoreHandler - locked section の本体（history 読み出し → 集計 → 永続化）

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::{InstrumentKey, SentimentCounts, TaskError, compute_score};
use crate::ports::{PredictionStore, ScoreHistory};
use crate::typed::{Handler, PriceUpdate, Recalibrate};

/// Applies new scores through the ports. Runs with the key's lock already held.
///
/// Sent to the wildcard key, it fans out over every tracked instrument; the
/// wildcard section is exclusive so no per-key lock is needed for that.
/// Whether a failed fan-out leaves partial writes behind is up to the store's
/// [`PredictionStore::apply_scores`]; the in-memory store writes none.
#[derive(Clone)]
pub struct ScoreHandler {
    history: Arc<dyn ScoreHistory>,
    store: Arc<dyn PredictionStore>,
}

impl ScoreHandler {
    pub fn new(history: Arc<dyn ScoreHistory>, store: Arc<dyn PredictionStore>) -> Self {
        Self { history, store }
    }

    async fn apply(&self, key: InstrumentKey, counts: SentimentCounts) -> Result<(), TaskError> {
        if key.is_wildcard() {
            return self.apply_all(key, counts).await;
        }

        let score = self.next_score(key, counts).await?;
        self.store
            .apply_score(key, score)
            .await
            .map_err(|source| TaskError::Persistence { key, source })?;
        debug!(%key, score, "score applied");
        Ok(())
    }

    /// Wildcard fan-out: every score is computed before anything is written,
    /// then the whole set goes to the store in one `apply_scores` call.
    async fn apply_all(&self, key: InstrumentKey, counts: SentimentCounts) -> Result<(), TaskError> {
        let targets = self
            .history
            .tracked_keys()
            .await
            .map_err(|source| TaskError::History { key, source })?;

        let mut scores = Vec::with_capacity(targets.len());
        for target in targets {
            scores.push((target, self.next_score(target, counts).await?));
        }

        self.store
            .apply_scores(&scores)
            .await
            .map_err(|source| TaskError::Persistence { key, source })?;
        debug!(keys = scores.len(), "wildcard scores applied");
        Ok(())
    }

    async fn next_score(&self, key: InstrumentKey, counts: SentimentCounts) -> Result<u8, TaskError> {
        let prior = self
            .history
            .recent_scores(key)
            .await
            .map_err(|source| TaskError::History { key, source })?;
        Ok(compute_score(&prior, counts))
    }
}

#[async_trait]
impl Handler<PriceUpdate> for ScoreHandler {
    async fn handle(&self, key: InstrumentKey, payload: PriceUpdate) -> Result<(), TaskError> {
        self.apply(key, payload.counts).await
    }
}

#[async_trait]
impl Handler<Recalibrate> for ScoreHandler {
    async fn handle(&self, key: InstrumentKey, _payload: Recalibrate) -> Result<(), TaskError> {
        self.apply(key, SentimentCounts::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreError;
    use crate::impls::InMemoryScoreStore;

    fn handler(store: &Arc<InMemoryScoreStore>) -> ScoreHandler {
        ScoreHandler::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn price_update_blends_with_stored_history() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let key = InstrumentKey::generate();
        store.seed(key, [40, 60]);

        Handler::<PriceUpdate>::handle(
            &handler(&store),
            key,
            PriceUpdate {
                counts: SentimentCounts::new(3, 0, 1),
            },
        )
        .await
        .unwrap();

        assert_eq!(store.latest(key), Some(64));
        assert_eq!(store.history_of(key), vec![40, 60, 64]);
    }

    #[tokio::test]
    async fn recalibrate_uses_the_trend() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let key = InstrumentKey::generate();
        store.seed(key, [2, 3]);

        Handler::<Recalibrate>::handle(&handler(&store), key, Recalibrate::default())
            .await
            .unwrap();

        assert_eq!(store.latest(key), Some(3));
    }

    #[tokio::test]
    async fn wildcard_fans_out_over_tracked_keys() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let a = InstrumentKey::generate();
        let b = InstrumentKey::generate();
        store.seed(a, [10]);
        store.seed(b, [90]);

        Handler::<PriceUpdate>::handle(
            &handler(&store),
            InstrumentKey::WILDCARD,
            PriceUpdate {
                counts: SentimentCounts::new(1, 0, 0),
            },
        )
        .await
        .unwrap();

        // (10*1 + 100*2) / 3 = 70, (90*1 + 100*2) / 3 = 96.67
        assert_eq!(store.latest(a), Some(70));
        assert_eq!(store.latest(b), Some(97));
        assert_eq!(store.latest(InstrumentKey::WILDCARD), None);
    }

    #[tokio::test]
    async fn failed_wildcard_write_leaves_every_key_untouched() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let a = InstrumentKey::generate();
        let b = InstrumentKey::generate();
        store.seed(a, [10]);
        store.seed(b, [90]);
        store.fail_next_writes(1);
        let update = PriceUpdate {
            counts: SentimentCounts::new(1, 0, 0),
        };

        let err = Handler::<PriceUpdate>::handle(&handler(&store), InstrumentKey::WILDCARD, update)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Persistence { key, .. } if key.is_wildcard()));
        assert_eq!(store.history_of(a), vec![10]);
        assert_eq!(store.history_of(b), vec![90]);

        // redelivery applies the update exactly once per key
        Handler::<PriceUpdate>::handle(&handler(&store), InstrumentKey::WILDCARD, update)
            .await
            .unwrap();
        assert_eq!(store.history_of(a), vec![10, 70]);
        assert_eq!(store.history_of(b), vec![90, 97]);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_persistence_error() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        store.fail_next_writes(1);
        let key = InstrumentKey::generate();

        let err = Handler::<Recalibrate>::handle(&handler(&store), key, Recalibrate::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaskError::Persistence { key: k, source: StoreError::Unavailable(_) } if k == key
        ));
        assert_eq!(store.latest(key), None);
    }
}
