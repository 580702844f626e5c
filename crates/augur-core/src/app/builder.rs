//! DispatcherBuilder - handler 登録と coordinator / retry policy のワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_kinds()` で必要な TaskKind を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;

use super::Dispatcher;
use crate::domain::{RetryPolicy, TaskKind};
use crate::lock::{KeyCoordinator, LockSettings, build_coordinator};
use crate::typed::{Handler, RegistryError, TaskPayload, TypedRegistry};

/// # 使用例
/// ```ignore
/// let dispatcher = DispatcherBuilder::new()
///     .register::<PriceUpdate, _>(handler)?
///     .expect_kinds(&[TaskKind::PriceUpdate])
///     .lock_settings(settings)
///     .build()?;
/// ```
pub struct DispatcherBuilder {
    registry: TypedRegistry,
    expected_kinds: Option<Vec<TaskKind>>,
    lock_settings: LockSettings,
    coordinator: Option<Arc<dyn KeyCoordinator>>,
    retry_policy: RetryPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task types: {0:?}. These kinds were expected but not registered.")]
    MissingTaskKinds(Vec<TaskKind>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_kinds: None,
            lock_settings: LockSettings::default(),
            coordinator: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn register<T: TaskPayload, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    /// Settings used to build the coordinator, unless one is supplied directly.
    pub fn lock_settings(mut self, settings: LockSettings) -> Self {
        self.lock_settings = settings;
        self
    }

    /// Share an existing coordinator (e.g. between dispatchers).
    pub fn coordinator(mut self, coordinator: Arc<dyn KeyCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        if let Some(expected) = &self.expected_kinds {
            let registered = self.registry.registered_kinds();
            let missing: Vec<TaskKind> = expected
                .iter()
                .filter(|k| !registered.contains(k))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskKinds(missing));
            }
        }

        let coordinator = self
            .coordinator
            .unwrap_or_else(|| build_coordinator(&self.lock_settings));
        Ok(Dispatcher::new(
            Arc::new(self.registry),
            coordinator,
            self.retry_policy,
        ))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ScoreHandler;
    use crate::impls::InMemoryScoreStore;
    use crate::lock::StrategyKind;
    use crate::typed::{PriceUpdate, Recalibrate};

    fn handler() -> ScoreHandler {
        let store = Arc::new(InMemoryScoreStore::new(5));
        ScoreHandler::new(store.clone(), store)
    }

    #[test]
    fn build_success() {
        let dispatcher = DispatcherBuilder::new()
            .register::<PriceUpdate, _>(handler())
            .unwrap()
            .expect_kinds(&[TaskKind::PriceUpdate])
            .lock_settings(LockSettings::default().with_strategy(StrategyKind::Cooperative))
            .build()
            .unwrap();
        assert_eq!(dispatcher.strategy(), StrategyKind::Cooperative);
    }

    #[test]
    fn build_missing_task_kinds() {
        let result = DispatcherBuilder::new()
            .register::<PriceUpdate, _>(handler())
            .unwrap()
            .expect_kinds(&[TaskKind::PriceUpdate, TaskKind::Recalibrate])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskKinds(missing)) if missing == vec![TaskKind::Recalibrate]
        ));
    }

    #[test]
    fn duplicate_registration_fails_early() {
        let result = DispatcherBuilder::new()
            .register::<Recalibrate, _>(handler())
            .unwrap()
            .register::<Recalibrate, _>(handler());
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(TaskKind::Recalibrate))));
    }

    #[test]
    fn supplied_coordinator_wins_over_settings() {
        let shared = build_coordinator(&LockSettings::default().with_strategy(StrategyKind::Cooperative));
        let dispatcher = DispatcherBuilder::new()
            .lock_settings(LockSettings::default().with_strategy(StrategyKind::Blocking))
            .coordinator(Arc::clone(&shared))
            .retry_policy(RetryPolicy::new(3, std::time::Duration::ZERO, 1.0))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(dispatcher.coordinator(), &shared));
        assert_eq!(dispatcher.retry_policy().max_retry, 3);
    }
}
