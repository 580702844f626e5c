//! Key lock coordinator.
//!
//! One contract, two interchangeable strategies:
//!
//! - [`BlockingCoordinator`]: shared/exclusive group lock + per-key mutex, held by
//!   a thread from the blocking pool.
//! - [`CooperativeCoordinator`]: a write gate + a counting reader pool + per-key
//!   async mutex; every wait is a suspension point.
//!
//! Both guarantee:
//! - operations on the same key never overlap;
//! - a wildcard operation overlaps with nothing;
//! - operations on different keys run in parallel;
//! - every lock is released on success, failure, panic or cancellation.

mod blocking;
mod cooperative;
mod registry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::domain::{InstrumentKey, TaskError};

pub use self::blocking::{BlockingCoordinator, BlockingKeyLocks};
pub use self::cooperative::CooperativeCoordinator;

/// The protected operation. Owned so it can move onto a blocking thread.
pub type GuardedOp = BoxFuture<'static, Result<(), TaskError>>;

#[async_trait]
pub trait KeyCoordinator: Send + Sync {
    /// Run `op` while holding the lock(s) for `key`.
    ///
    /// The operation's error comes back unchanged after all locks are released.
    async fn run_under_key(&self, key: InstrumentKey, op: GuardedOp) -> Result<(), TaskError>;

    fn strategy(&self) -> StrategyKind;

    /// Number of per-key entries currently held in the registry.
    fn tracked_keys(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Blocking,
    Cooperative,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Blocking => f.write_str("blocking"),
            StrategyKind::Cooperative => f.write_str("cooperative"),
        }
    }
}

/// How the cooperative writer empties the reader pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    /// Wait for the whole capacity in one acquisition. No reader can still be running.
    #[default]
    Full,
    /// Take only the units available at the moment of the check.
    ///
    /// Readers already holding a unit keep running while the writer proceeds,
    /// so wildcard exclusivity only holds when the pool was idle.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    pub strategy: StrategyKind,
    /// Cooperative only: max readers in flight at once.
    pub reader_capacity: u32,
    pub drain_mode: DrainMode,
    /// Bound on each individual lock acquisition. `None` waits forever.
    ///
    /// Only lock waits are timed. Under the blocking strategy the task first
    /// waits for a thread from tokio's blocking pool, and that wait is not
    /// covered, so a saturated pool can delay a task past this bound before
    /// any lock is requested.
    pub acquire_timeout: Option<Duration>,
    pub evict_idle_keys: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Blocking,
            reader_capacity: 64,
            drain_mode: DrainMode::Full,
            acquire_timeout: None,
            evict_idle_keys: true,
        }
    }
}

impl LockSettings {
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }
}

/// Build the coordinator selected by `settings.strategy`.
pub fn build_coordinator(settings: &LockSettings) -> Arc<dyn KeyCoordinator> {
    match settings.strategy {
        StrategyKind::Blocking => Arc::new(BlockingCoordinator::new(settings)),
        StrategyKind::Cooperative => Arc::new(CooperativeCoordinator::new(settings)),
    }
}
