//! InMemoryTransport - 開発用の at-least-once 配送 transport
//!
//! 分類済みの結果（`Decision`）を実際の配送動作に写像する側。
//!
//! # 状態遷移
//! - Ready -> InFlight -> Acknowledged
//! - Ready -> InFlight -> Held (dead-letter holding) -> Ready（delay 経過後、attempt + 1）
//! - Ready -> InFlight -> Discarded
//!
//! # 学習ポイント
//! - Mutex + Notify による async な blocking lease
//! - BinaryHeap を min-heap として使う（Ord を逆順に実装）

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::{AttemptCount, Decision, DeliveryId, Task};

/// Upper bound for a hold whose delay overflows `Instant`.
const MAX_HOLD: Duration = Duration::from_secs(86_400 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    Ready,
    InFlight,
    /// Parked in the dead-letter holding area until its redelivery time.
    Held,
    Acknowledged,
    Discarded,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Acknowledged | DeliveryState::Discarded)
    }
}

/// One leased delivery. Must be handed back through [`InMemoryTransport::settle`].
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: DeliveryId,
    pub task: Task,
    pub attempt: AttemptCount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryStatus {
    pub state: DeliveryState,
    pub attempt: AttemptCount,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransportCounts {
    pub ready: usize,
    pub in_flight: usize,
    pub held: usize,
    pub acknowledged: usize,
    pub discarded: usize,
}

impl TransportCounts {
    /// Nothing left to deliver or waiting to be redelivered.
    pub fn is_settled(&self) -> bool {
        self.ready == 0 && self.in_flight == 0 && self.held == 0
    }
}

#[derive(Debug)]
struct DeliveryRecord {
    task: Task,
    state: DeliveryState,
    /// Attempt number of the current (or next) delivery.
    attempt: AttemptCount,
    last_error: Option<String>,
}

/// Held entry; reverse ordering makes `BinaryHeap` pop the earliest first.
#[derive(Debug, PartialEq, Eq)]
struct HeldDelivery {
    release_at: Instant,
    id: DeliveryId,
}

impl PartialOrd for HeldDelivery {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeldDelivery {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .release_at
            .cmp(&self.release_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Default)]
struct TransportState {
    records: HashMap<DeliveryId, DeliveryRecord>,
    ready: VecDeque<DeliveryId>,
    held: BinaryHeap<HeldDelivery>,
    closed: bool,
}

impl TransportState {
    /// Move every held delivery whose time has come back to the ready queue.
    fn release_due(&mut self, now: Instant) {
        while self.held.peek().is_some_and(|h| h.release_at <= now) {
            let Some(held) = self.held.pop() else { break };
            if let Some(record) = self.records.get_mut(&held.id) {
                record.state = DeliveryState::Ready;
                self.ready.push_back(held.id);
            }
        }
    }

    fn counts(&self) -> TransportCounts {
        let mut counts = TransportCounts::default();
        for record in self.records.values() {
            match record.state {
                DeliveryState::Ready => counts.ready += 1,
                DeliveryState::InFlight => counts.in_flight += 1,
                DeliveryState::Held => counts.held += 1,
                DeliveryState::Acknowledged => counts.acknowledged += 1,
                DeliveryState::Discarded => counts.discarded += 1,
            }
        }
        counts
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
    notify: Arc<Notify>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, task: Task) -> DeliveryId {
        let id = DeliveryId::generate();
        {
            let mut state = self.state.lock().await;
            state.records.insert(
                id,
                DeliveryRecord {
                    task,
                    state: DeliveryState::Ready,
                    attempt: AttemptCount::FIRST,
                    last_error: None,
                },
            );
            state.ready.push_back(id);
        }
        self.notify.notify_one();
        id
    }

    /// Wait for the next deliverable task.
    ///
    /// Returns `None` once the transport is closed and nothing is ready or held.
    pub async fn lease(&self) -> Option<Lease> {
        loop {
            // registered before the state check so close() cannot slip between
            let notified = self.notify.notified();
            tokio::pin!(notified);

            let next_release = {
                let mut state = self.state.lock().await;
                state.release_due(Instant::now());

                while let Some(id) = state.ready.pop_front() {
                    let Some(record) = state.records.get_mut(&id) else {
                        continue;
                    };
                    record.state = DeliveryState::InFlight;
                    return Some(Lease {
                        id,
                        task: record.task.clone(),
                        attempt: record.attempt,
                    });
                }

                let next_release = state.held.peek().map(|h| h.release_at);
                if state.closed && next_release.is_none() {
                    return None;
                }
                next_release
            };

            match next_release {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Apply the classifier's decision to a leased delivery.
    pub async fn settle(&self, lease: Lease, decision: &Decision) {
        let wake = {
            let mut state = self.state.lock().await;
            let Some(record) = state.records.get_mut(&lease.id) else {
                return;
            };

            match decision {
                Decision::Acknowledge => {
                    record.state = DeliveryState::Acknowledged;
                    debug!(id = %lease.id, attempt = %lease.attempt, "delivery acknowledged");
                    false
                }
                Decision::Discard { reason } => {
                    record.state = DeliveryState::Discarded;
                    record.last_error = Some(reason.clone());
                    info!(id = %lease.id, attempt = %lease.attempt, %reason, "delivery discarded");
                    false
                }
                Decision::Redeliver { delay, reason } => {
                    record.state = DeliveryState::Held;
                    record.attempt = lease.attempt.next();
                    record.last_error = Some(reason.clone());
                    debug!(id = %lease.id, next_attempt = %record.attempt, ?delay, "delivery held for redelivery");
                    let now = Instant::now();
                    let release_at = now.checked_add(*delay).unwrap_or(now + MAX_HOLD);
                    state.held.push(HeldDelivery {
                        release_at,
                        id: lease.id,
                    });
                    true
                }
            }
        };

        // Notify outside the lock
        if wake {
            self.notify.notify_one();
        }
    }

    /// Stop handing out work once everything ready or held has drained.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn counts(&self) -> TransportCounts {
        self.state.lock().await.counts()
    }

    pub async fn status(&self, id: DeliveryId) -> Option<DeliveryStatus> {
        let state = self.state.lock().await;
        state.records.get(&id).map(|r| DeliveryStatus {
            state: r.state,
            attempt: r.attempt,
            last_error: r.last_error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InstrumentKey, TaskKind};

    fn task() -> Task {
        Task::new(InstrumentKey::generate(), TaskKind::Recalibrate, serde_json::Map::new())
    }

    #[tokio::test]
    async fn enqueue_and_lease_first_attempt() {
        let transport = InMemoryTransport::new();
        let id = transport.enqueue(task()).await;

        let lease = transport.lease().await.unwrap();
        assert_eq!(lease.id, id);
        assert_eq!(lease.attempt, AttemptCount::FIRST);
        assert_eq!(transport.counts().await.in_flight, 1);
    }

    #[tokio::test]
    async fn acknowledge_is_terminal() {
        let transport = InMemoryTransport::new();
        let id = transport.enqueue(task()).await;
        let lease = transport.lease().await.unwrap();
        transport.settle(lease, &Decision::Acknowledge).await;

        let status = transport.status(id).await.unwrap();
        assert!(status.state.is_terminal());
        assert!(transport.counts().await.is_settled());
    }

    #[tokio::test]
    async fn redelivery_increments_attempt_after_delay() {
        let transport = InMemoryTransport::new();
        let id = transport.enqueue(task()).await;
        let lease = transport.lease().await.unwrap();
        transport
            .settle(
                lease,
                &Decision::Redeliver {
                    delay: Duration::from_millis(30),
                    reason: "db down".to_string(),
                },
            )
            .await;
        assert_eq!(transport.counts().await.held, 1);

        let started = Instant::now();
        let again = tokio::time::timeout(Duration::from_secs(1), transport.lease())
            .await
            .unwrap()
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(25));
        assert_eq!(again.id, id);
        assert_eq!(again.attempt.get(), 2);
        assert_eq!(
            transport.status(id).await.unwrap().last_error.as_deref(),
            Some("db down")
        );
    }

    #[tokio::test]
    async fn discard_never_comes_back() {
        let transport = InMemoryTransport::new();
        transport.enqueue(task()).await;
        let lease = transport.lease().await.unwrap();
        transport
            .settle(lease, &Decision::Discard { reason: "max attempts".to_string() })
            .await;
        transport.close().await;

        assert!(transport.lease().await.is_none());
        assert_eq!(transport.counts().await.discarded, 1);
    }

    #[tokio::test]
    async fn enqueue_wakes_a_waiting_lease() {
        let transport = InMemoryTransport::new();
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.lease().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = transport.enqueue(task()).await;

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(lease.id, id);
    }

    #[tokio::test]
    async fn close_releases_idle_waiters() {
        let transport = InMemoryTransport::new();
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.lease().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.close().await;
        assert!(waiter.await.unwrap().is_none());
    }
}
