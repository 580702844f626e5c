//! InMemoryScoreStore - 開発用・テスト用の score 永続化
//!
//! `ScoreHistory` と `PredictionStore` の両方を実装する。
//! key ごとに直近 `window` 件だけ保持する（古いものから捨てる）。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{InstrumentKey, StoreError};
use crate::ports::{PredictionStore, ScoreHistory};

pub struct InMemoryScoreStore {
    state: Mutex<StoreState>,
    window: usize,
}

#[derive(Default)]
struct StoreState {
    scores: HashMap<InstrumentKey, VecDeque<u8>>,
    /// Remaining writes that fail with `StoreError::Unavailable`.
    failing_writes: u32,
}

impl InMemoryScoreStore {
    pub fn new(window: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            window: window.max(1),
        }
    }

    /// Replace the history of `key` (oldest first).
    pub fn seed(&self, key: InstrumentKey, scores: impl IntoIterator<Item = u8>) {
        let mut history: VecDeque<u8> = scores.into_iter().collect();
        while history.len() > self.window {
            history.pop_front();
        }
        self.state.lock().scores.insert(key, history);
    }

    /// Make the next `n` writes fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.state.lock().failing_writes = n;
    }

    pub fn latest(&self, key: InstrumentKey) -> Option<u8> {
        self.state
            .lock()
            .scores
            .get(&key)
            .and_then(|h| h.back().copied())
    }

    pub fn history_of(&self, key: InstrumentKey) -> Vec<u8> {
        self.state
            .lock()
            .scores
            .get(&key)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Latest score of every tracked key.
    pub fn snapshot(&self) -> Vec<(InstrumentKey, u8)> {
        let state = self.state.lock();
        let mut out: Vec<_> = state
            .scores
            .iter()
            .filter_map(|(key, h)| h.back().map(|s| (*key, *s)))
            .collect();
        out.sort_by_key(|(key, _)| *key);
        out
    }
}

#[async_trait]
impl ScoreHistory for InMemoryScoreStore {
    async fn recent_scores(&self, key: InstrumentKey) -> Result<Vec<u8>, StoreError> {
        Ok(self.history_of(key))
    }

    async fn tracked_keys(&self) -> Result<Vec<InstrumentKey>, StoreError> {
        let state = self.state.lock();
        let mut keys: Vec<_> = state.scores.keys().copied().collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl PredictionStore for InMemoryScoreStore {
    async fn apply_score(&self, key: InstrumentKey, score: u8) -> Result<(), StoreError> {
        self.write_all(&[(key, score)])
    }

    async fn apply_scores(&self, scores: &[(InstrumentKey, u8)]) -> Result<(), StoreError> {
        self.write_all(scores)
    }
}

impl InMemoryScoreStore {
    /// All-or-nothing: every check runs before the first push.
    fn write_all(&self, scores: &[(InstrumentKey, u8)]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(StoreError::Unavailable(format!(
                "injected write failure ({} left)",
                state.failing_writes
            )));
        }
        if let Some(&(key, _)) = scores.iter().find(|(key, _)| key.is_wildcard()) {
            return Err(StoreError::Rejected {
                key,
                reason: "wildcard key has no prediction record".to_string(),
            });
        }

        for &(key, score) in scores {
            let history = state.scores.entry(key).or_default();
            history.push_back(score);
            while history.len() > self.window {
                history.pop_front();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_is_bounded_by_window() {
        let store = InMemoryScoreStore::new(3);
        let key = InstrumentKey::generate();
        for score in [1, 2, 3, 4, 5] {
            store.apply_score(key, score).await.unwrap();
        }
        assert_eq!(store.recent_scores(key).await.unwrap(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn unknown_key_has_empty_history() {
        let store = InMemoryScoreStore::new(3);
        assert!(store
            .recent_scores(InstrumentKey::generate())
            .await
            .unwrap()
            .is_empty());
        assert!(store.tracked_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let store = InMemoryScoreStore::new(3);
        let key = InstrumentKey::generate();
        store.fail_next_writes(2);

        assert!(store.apply_score(key, 10).await.is_err());
        assert!(store.apply_score(key, 10).await.is_err());
        store.apply_score(key, 10).await.unwrap();
        assert_eq!(store.latest(key), Some(10));
    }

    #[tokio::test]
    async fn batch_with_a_wildcard_writes_nothing() {
        let store = InMemoryScoreStore::new(3);
        let key = InstrumentKey::generate();
        let err = store
            .apply_scores(&[(key, 40), (InstrumentKey::WILDCARD, 50)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(store.history_of(key).is_empty());
    }

    #[tokio::test]
    async fn wildcard_writes_are_rejected() {
        let store = InMemoryScoreStore::new(3);
        let err = store
            .apply_score(InstrumentKey::WILDCARD, 50)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
    }
}
