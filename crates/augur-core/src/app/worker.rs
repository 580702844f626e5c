use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::Dispatcher;
use crate::domain::Decider;
use crate::impls::InMemoryTransport;

/// Worker group handle.
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - transport を close しても、残りを処理し終えたワーカーから抜けていく
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers leasing from `transport`.
    pub fn spawn(
        n: usize,
        transport: InMemoryTransport,
        dispatcher: Arc<Dispatcher>,
        decider: Arc<dyn Decider>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..n)
            .map(|worker_id| {
                let transport = transport.clone();
                let dispatcher = Arc::clone(&dispatcher);
                let decider = Arc::clone(&decider);
                let mut rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, transport, dispatcher, decider, &mut rx).await;
                })
            })
            .collect();

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new leases. In-flight tasks finish and get settled.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    transport: InMemoryTransport,
    dispatcher: Arc<Dispatcher>,
    decider: Arc<dyn Decider>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, strategy = %dispatcher.strategy(), "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let lease = tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped: treat as shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            lease = transport.lease() => lease,
        };

        // closed and drained
        let Some(lease) = lease else { break };

        let result = dispatcher.handle(&lease.task, lease.attempt).await;
        let decision = decider.decide(&result);
        transport.settle(lease, &decision).await;
    }
    info!(worker_id, "worker stopped");
}
