//! LoadHarness - 2 つのロック戦略を人工レイテンシで比較するための合成 dispatch
//!
//! 配送 transport には繋がらないので retry 分類はしない。
//! 同じ Task を blocking / cooperative のどちらにも流せる。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{BuildError, Dispatcher, DispatcherBuilder};
use crate::domain::{InstrumentKey, SentimentCounts, Task, TaskError, TaskKind};
use crate::lock::{LockSettings, StrategyKind};
use crate::typed::{Handler, PriceUpdate, Recalibrate};

/// Inclusive latency range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn sample(&self) -> Duration {
        let lo = self.min_ms.min(self.max_ms);
        let hi = self.min_ms.max(self.max_ms);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyProfile {
    /// Per-key ("read") operations.
    pub read: LatencyRange,
    /// Wildcard ("write") operations.
    pub write: LatencyRange,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            read: LatencyRange::new(100, 200),
            write: LatencyRange::new(200, 350),
        }
    }
}

/// Handler that only sleeps for the profile's latency.
struct SyntheticHandler {
    profile: LatencyProfile,
    completed: Arc<AtomicU64>,
}

impl SyntheticHandler {
    async fn simulate(&self, key: InstrumentKey) -> Result<(), TaskError> {
        let delay = if key.is_wildcard() {
            self.profile.write.sample()
        } else {
            self.profile.read.sample()
        };
        tokio::time::sleep(delay).await;
        self.completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Handler<PriceUpdate> for SyntheticHandler {
    async fn handle(&self, key: InstrumentKey, _payload: PriceUpdate) -> Result<(), TaskError> {
        self.simulate(key).await
    }
}

#[async_trait]
impl Handler<Recalibrate> for SyntheticHandler {
    async fn handle(&self, key: InstrumentKey, _payload: Recalibrate) -> Result<(), TaskError> {
        self.simulate(key).await
    }
}

/// One strategy's share of a comparison run.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyRun {
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub tasks: usize,
    pub failed: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub profile: LatencyProfile,
    pub runs: Vec<StrategyRun>,
}

pub struct LoadHarness {
    blocking: Dispatcher,
    cooperative: Dispatcher,
    profile: LatencyProfile,
    completed: Arc<AtomicU64>,
}

impl LoadHarness {
    /// `settings.strategy` is ignored; one dispatcher per strategy is built.
    pub fn new(profile: LatencyProfile, settings: &LockSettings) -> Result<Self, BuildError> {
        let completed = Arc::new(AtomicU64::new(0));
        let build = |strategy: StrategyKind| -> Result<Dispatcher, BuildError> {
            let handler = || SyntheticHandler {
                profile,
                completed: Arc::clone(&completed),
            };
            DispatcherBuilder::new()
                .register::<PriceUpdate, _>(handler())?
                .register::<Recalibrate, _>(handler())?
                .lock_settings(settings.clone().with_strategy(strategy))
                .build()
        };

        Ok(Self {
            blocking: build(StrategyKind::Blocking)?,
            cooperative: build(StrategyKind::Cooperative)?,
            profile,
            completed,
        })
    }

    /// Synthetic entry point routed through the blocking strategy.
    pub async fn dispatch_blocking(&self, task: &Task) -> Result<(), TaskError> {
        self.blocking.execute(task).await
    }

    /// Synthetic entry point routed through the cooperative strategy.
    pub async fn dispatch_cooperative(&self, task: &Task) -> Result<(), TaskError> {
        self.cooperative.execute(task).await
    }

    pub async fn dispatch(&self, strategy: StrategyKind, task: &Task) -> Result<(), TaskError> {
        match strategy {
            StrategyKind::Blocking => self.dispatch_blocking(task).await,
            StrategyKind::Cooperative => self.dispatch_cooperative(task).await,
        }
    }

    /// Operations that finished their simulated work, across both strategies.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Push the whole batch concurrently through each strategy in turn.
    pub async fn compare(&self, tasks: &[Task]) -> ComparisonReport {
        let mut runs = Vec::with_capacity(2);
        for strategy in [StrategyKind::Blocking, StrategyKind::Cooperative] {
            let started_at = Utc::now();
            let clock = Instant::now();
            let results = join_all(tasks.iter().map(|t| self.dispatch(strategy, t))).await;
            let run = StrategyRun {
                strategy,
                started_at,
                tasks: tasks.len(),
                failed: results.iter().filter(|r| r.is_err()).count(),
                elapsed_ms: clock.elapsed().as_millis(),
            };
            info!(
                %strategy,
                tasks = run.tasks,
                failed = run.failed,
                elapsed_ms = run.elapsed_ms as u64,
                "synthetic run finished"
            );
            runs.push(run);
        }
        ComparisonReport {
            profile: self.profile,
            runs,
        }
    }
}

/// `task_count` price updates spread over `key_count` keys, with a wildcard
/// recalibration every `wildcard_every` tasks (0 disables them).
pub fn synthetic_batch(key_count: usize, task_count: usize, wildcard_every: usize) -> Vec<Task> {
    let keys: Vec<InstrumentKey> = (0..key_count.max(1)).map(|_| InstrumentKey::generate()).collect();
    let mut rng = rand::thread_rng();
    (0..task_count)
        .map(|i| {
            if wildcard_every > 0 && (i + 1) % wildcard_every == 0 {
                return Task::new(InstrumentKey::WILDCARD, TaskKind::Recalibrate, serde_json::Map::new());
            }
            let counts = SentimentCounts::new(
                rng.gen_range(0..10),
                rng.gen_range(0..10),
                rng.gen_range(0..10),
            );
            let payload = match serde_json::to_value(counts) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            Task::new(keys[i % keys.len()], TaskKind::PriceUpdate, payload)
        })
        .collect()
}
