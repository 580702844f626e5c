//! Cooperative strategy - write gate + reader pool + per-key async mutex
//!
//! # フロー
//! - read（通常キー）: key mutex → gate 取得 → pool から 1 unit 取得 → gate 即解放 → 実行
//! - write（wildcard）: gate を保持したまま pool を drain → 実行 → unit 返却 → gate 解放
//!
//! gate は unit を取るまでしか持たないので、reader 同士は gate で直列化されない。
//! 同じ key の後続は unit を持たずに key mutex で待つ。
//! 待ちはすべて `.await`（スレッドを占有しない）。guard は drop で返るので、
//! 呼び出し側の future が途中で drop されてもロックは残らない。

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{AcquireError, Mutex, Semaphore};
use tracing::trace;

use super::registry::KeyRegistry;
use super::{DrainMode, GuardedOp, KeyCoordinator, LockSettings, StrategyKind};
use crate::domain::{InstrumentKey, TaskError};

pub struct CooperativeCoordinator {
    gate: Mutex<()>,
    pool: Semaphore,
    capacity: u32,
    drain_mode: DrainMode,
    keys: KeyRegistry<Mutex<()>>,
    acquire_timeout: Option<Duration>,
}

impl CooperativeCoordinator {
    pub fn new(settings: &LockSettings) -> Self {
        let capacity = settings.reader_capacity.max(1);
        Self {
            gate: Mutex::new(()),
            pool: Semaphore::new(capacity as usize),
            capacity,
            drain_mode: settings.drain_mode,
            keys: KeyRegistry::new(settings.evict_idle_keys),
            acquire_timeout: settings.acquire_timeout,
        }
    }

    /// Units currently free in the reader pool.
    pub fn available_readers(&self) -> usize {
        self.pool.available_permits()
    }

    async fn read(&self, key: InstrumentKey, op: GuardedOp) -> Result<(), TaskError> {
        // Same-key waiters queue here, before taking a unit, so they never
        // hold pool capacity that other keys could use.
        let lease = self.keys.checkout(key);
        let _key_guard = self.bounded(key, lease.lock_entry().lock()).await?;

        let _unit = {
            let _gate = self.bounded(key, self.gate.lock()).await?;
            self.bounded(key, self.pool.acquire())
                .await?
                .map_err(|e| closed(key, e))?
        };

        trace!(%key, "key section entered");
        op.await
    }

    async fn write(&self, key: InstrumentKey, op: GuardedOp) -> Result<(), TaskError> {
        let _gate = self.bounded(key, self.gate.lock()).await?;

        let units = match self.drain_mode {
            DrainMode::Full => self.capacity,
            // Racy by nature: readers holding a unit are not waited for.
            DrainMode::Snapshot => self.pool.available_permits() as u32,
        };
        let _drained = self
            .bounded(key, self.pool.acquire_many(units))
            .await?
            .map_err(|e| closed(key, e))?;

        trace!(%key, units, "wildcard section entered");
        op.await
    }

    async fn bounded<F: Future>(&self, key: InstrumentKey, fut: F) -> Result<F::Output, TaskError> {
        match self.acquire_timeout {
            None => Ok(fut.await),
            Some(waited) => tokio::time::timeout(waited, fut)
                .await
                .map_err(|_| TaskError::LockTimeout { key, waited }),
        }
    }
}

fn closed(key: InstrumentKey, err: AcquireError) -> TaskError {
    TaskError::Aborted {
        key,
        reason: format!("reader pool closed: {err}"),
    }
}

#[async_trait]
impl KeyCoordinator for CooperativeCoordinator {
    async fn run_under_key(&self, key: InstrumentKey, op: GuardedOp) -> Result<(), TaskError> {
        if key.is_wildcard() {
            self.write(key, op).await
        } else {
            self.read(key, op).await
        }
    }

    fn strategy(&self) -> StrategyKind {
        StrategyKind::Cooperative
    }

    fn tracked_keys(&self) -> usize {
        self.keys.len()
    }
}
