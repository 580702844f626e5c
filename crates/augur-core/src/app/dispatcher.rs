//! Dispatcher - task_type から handler を引いて coordinator の下で実行する
//!
//! # フロー
//! 1. `TaskKind` で DynHandler を解決
//! 2. `KeyCoordinator::run_under_key` で target key のロックを取得して実行
//! 3. 失敗したら `RetryPolicy` で Transient / Fatal に分類（ロックは解放済み）

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::domain::{AttemptCount, DeliveryFailure, FailureClass, RetryPolicy, Task, TaskError};
use crate::lock::{KeyCoordinator, StrategyKind};
use crate::typed::TypedRegistry;

pub struct Dispatcher {
    registry: Arc<TypedRegistry>,
    coordinator: Arc<dyn KeyCoordinator>,
    retry_policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<TypedRegistry>,
        coordinator: Arc<dyn KeyCoordinator>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            coordinator,
            retry_policy,
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.coordinator.strategy()
    }

    pub fn coordinator(&self) -> &Arc<dyn KeyCoordinator> {
        &self.coordinator
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run one task under its key without classifying failures.
    pub async fn execute(&self, task: &Task) -> Result<(), TaskError> {
        let kind = task.task_type();
        let handler = self
            .registry
            .get(kind)
            .ok_or(TaskError::HandlerNotFound(kind))?;

        let key = task.target_key();
        let payload = task.payload().clone();
        let op = async move { handler.handle_dyn(key, payload).await }.boxed();
        self.coordinator.run_under_key(key, op).await
    }

    /// Handle one delivery from the transport.
    ///
    /// Failures come back labelled: fatal ones are logged at error level and must
    /// not be redelivered, transient ones at warn level.
    pub async fn handle(&self, task: &Task, attempt: AttemptCount) -> Result<(), DeliveryFailure> {
        let key = task.target_key();
        let kind = task.task_type();

        let Err(source) = self.execute(task).await else {
            debug!(%key, %kind, %attempt, "task handled");
            return Ok(());
        };

        let class = self.retry_policy.classify(attempt);
        match class {
            FailureClass::Fatal => error!(
                %key,
                %kind,
                %attempt,
                max_retry = self.retry_policy.max_retry,
                error = %source,
                "task failed permanently; discarding"
            ),
            FailureClass::Transient => warn!(
                %key,
                %kind,
                %attempt,
                max_retry = self.retry_policy.max_retry,
                error = %source,
                "task failed; eligible for redelivery"
            ),
        }

        Err(DeliveryFailure {
            class,
            key,
            attempt,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ScoreHandler;
    use crate::domain::{InstrumentKey, StoreError, TaskKind};
    use crate::impls::InMemoryScoreStore;
    use crate::lock::{LockSettings, build_coordinator};
    use crate::typed::{PriceUpdate, Recalibrate};
    use rstest::rstest;
    use serde_json::json;

    fn dispatcher(store: &Arc<InMemoryScoreStore>, strategy: StrategyKind) -> Dispatcher {
        let mut registry = TypedRegistry::new();
        let handler = ScoreHandler::new(store.clone(), store.clone());
        registry.register::<PriceUpdate, _>(handler.clone()).unwrap();
        registry.register::<Recalibrate, _>(handler).unwrap();
        Dispatcher::new(
            Arc::new(registry),
            build_coordinator(&LockSettings::default().with_strategy(strategy)),
            RetryPolicy::default(),
        )
    }

    fn attempt(n: u32) -> AttemptCount {
        AttemptCount::new(n).unwrap()
    }

    #[rstest]
    #[case::blocking(StrategyKind::Blocking)]
    #[case::cooperative(StrategyKind::Cooperative)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn price_update_is_applied(#[case] strategy: StrategyKind) {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let key = InstrumentKey::generate();
        store.seed(key, [40, 60]);
        let dispatcher = dispatcher(&store, strategy);

        let task = Task::from_json(
            key,
            TaskKind::PriceUpdate,
            json!({"positive": 3, "neutral": 0, "negative": 1}),
        );
        dispatcher.handle(&task, AttemptCount::FIRST).await.unwrap();

        assert_eq!(store.latest(key), Some(64));
        assert_eq!(dispatcher.strategy(), strategy);
    }

    #[rstest]
    #[case::transient(4, FailureClass::Transient)]
    #[case::fatal(5, FailureClass::Fatal)]
    #[case::beyond(6, FailureClass::Fatal)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn store_failure_is_classified_by_attempt(#[case] n: u32, #[case] expected: FailureClass) {
        let store = Arc::new(InMemoryScoreStore::new(10));
        store.fail_next_writes(1);
        let key = InstrumentKey::generate();
        let dispatcher = dispatcher(&store, StrategyKind::Blocking);

        let task = Task::from_json(key, TaskKind::Recalibrate, json!({}));
        let failure = dispatcher.handle(&task, attempt(n)).await.unwrap_err();

        assert_eq!(failure.class, expected);
        assert_eq!(failure.key, key);
        assert_eq!(failure.attempt.get(), n);
        assert!(matches!(
            failure.source,
            TaskError::Persistence { source: StoreError::Unavailable(_), .. }
        ));
    }

    #[tokio::test]
    async fn missing_handler_is_a_classified_failure() {
        let dispatcher = Dispatcher::new(
            Arc::new(TypedRegistry::new()),
            build_coordinator(&LockSettings::default().with_strategy(StrategyKind::Cooperative)),
            RetryPolicy::default(),
        );
        let task = Task::from_json(InstrumentKey::generate(), TaskKind::PriceUpdate, json!({}));

        let failure = dispatcher.handle(&task, AttemptCount::FIRST).await.unwrap_err();
        assert_eq!(failure.class, FailureClass::Transient);
        assert_eq!(failure.source, TaskError::HandlerNotFound(TaskKind::PriceUpdate));
    }

    #[tokio::test]
    async fn bad_payload_is_reported_with_its_kind() {
        let store = Arc::new(InMemoryScoreStore::new(10));
        let dispatcher = dispatcher(&store, StrategyKind::Cooperative);
        let task = Task::from_json(
            InstrumentKey::generate(),
            TaskKind::PriceUpdate,
            json!({"negative": "many"}),
        );

        let err = dispatcher.execute(&task).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload { kind: TaskKind::PriceUpdate, .. }));
    }
}
