//! Blocking strategy - 共有/排他グループロック + キーごとの Mutex
//!
//! # フロー
//! - 通常キー: group を shared で取得 → key の Mutex を取得 → 実行 → 逆順で解放
//! - wildcard: group を exclusive で取得（shared 保持者が全員抜けるまで待つ）→ 実行 → 解放
//!
//! スレッドを止めて待つ前提なので、async 側からは `spawn_blocking` に載せて使う。
//! 公平性は parking_lot の RwLock に依存する（exclusive 待ちがいると新しい
//! shared 取得は後ろに並ぶ）。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::runtime::Handle;
use tracing::trace;

use super::registry::KeyRegistry;
use super::{GuardedOp, KeyCoordinator, LockSettings, StrategyKind};
use crate::domain::{InstrumentKey, TaskError};

/// Thread-blocking key locks. Usable directly from plain threads.
pub struct BlockingKeyLocks {
    group: RwLock<()>,
    keys: KeyRegistry<Mutex<()>>,
    acquire_timeout: Option<Duration>,
}

impl BlockingKeyLocks {
    pub fn new(acquire_timeout: Option<Duration>, evict_idle_keys: bool) -> Self {
        Self {
            group: RwLock::new(()),
            keys: KeyRegistry::new(evict_idle_keys),
            acquire_timeout,
        }
    }

    /// Run `op` on the calling thread while holding the lock(s) for `key`.
    ///
    /// Guards are dropped on unwind, so a panicking `op` still releases everything.
    pub fn with_key<R>(&self, key: InstrumentKey, op: impl FnOnce() -> R) -> Result<R, TaskError> {
        if key.is_wildcard() {
            let _exclusive = self.exclusive(key)?;
            trace!(%key, "wildcard section entered");
            return Ok(op());
        }

        let _shared = self.shared(key)?;
        let lease = self.keys.checkout(key);
        let _key_guard = self.key_guard(key, lease.lock_entry())?;
        trace!(%key, "key section entered");
        Ok(op())
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    fn shared(&self, key: InstrumentKey) -> Result<RwLockReadGuard<'_, ()>, TaskError> {
        match self.acquire_timeout {
            None => Ok(self.group.read()),
            Some(waited) => self
                .group
                .try_read_for(waited)
                .ok_or(TaskError::LockTimeout { key, waited }),
        }
    }

    fn exclusive(&self, key: InstrumentKey) -> Result<RwLockWriteGuard<'_, ()>, TaskError> {
        match self.acquire_timeout {
            None => Ok(self.group.write()),
            Some(waited) => self
                .group
                .try_write_for(waited)
                .ok_or(TaskError::LockTimeout { key, waited }),
        }
    }

    fn key_guard<'a>(
        &self,
        key: InstrumentKey,
        entry: &'a Mutex<()>,
    ) -> Result<MutexGuard<'a, ()>, TaskError> {
        match self.acquire_timeout {
            None => Ok(entry.lock()),
            Some(waited) => entry
                .try_lock_for(waited)
                .ok_or(TaskError::LockTimeout { key, waited }),
        }
    }
}

/// [`KeyCoordinator`] over [`BlockingKeyLocks`].
///
/// The operation is driven to completion on a blocking-pool thread via
/// `Handle::block_on`, so the locks are held by that thread and released there
/// even if the awaiting caller goes away.
pub struct BlockingCoordinator {
    locks: Arc<BlockingKeyLocks>,
}

impl BlockingCoordinator {
    pub fn new(settings: &LockSettings) -> Self {
        Self {
            locks: Arc::new(BlockingKeyLocks::new(
                settings.acquire_timeout,
                settings.evict_idle_keys,
            )),
        }
    }

    pub fn locks(&self) -> &Arc<BlockingKeyLocks> {
        &self.locks
    }
}

#[async_trait]
impl KeyCoordinator for BlockingCoordinator {
    async fn run_under_key(&self, key: InstrumentKey, op: GuardedOp) -> Result<(), TaskError> {
        let locks = Arc::clone(&self.locks);
        let handle = Handle::current();

        tokio::task::spawn_blocking(move || locks.with_key(key, || handle.block_on(op))?)
            .await
            .map_err(|e| TaskError::Aborted {
                key,
                reason: format!("blocking worker failed: {e}"),
            })?
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Blocking
    }

    fn tracked_keys(&self) -> usize {
        self.locks.tracked_keys()
    }
}
