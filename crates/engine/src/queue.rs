//! Work queues and the dispatcher loop.
//!
//! The primary queue feeds the worker pool. Workers never publish follow-up
//! chunks into it directly: they push onto the transmission queue, and a
//! single dispatcher task republishes into the primary queue under the
//! coordinator's request lock. That keeps queue feeding and failure-time
//! teardown serialized, so pushing shutdown sentinels can never interleave
//! with a mid-enqueue dispatcher.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::unit::TransferUnit;

/// An item on a work queue: a unit of transfer or a termination sentinel.
#[derive(Debug)]
pub enum QueueItem {
    Unit(Box<TransferUnit>),
    Shutdown,
}

/// Unbounded multi-consumer queue.
///
/// tokio's mpsc receiver is single-consumer; the pool shares it behind an
/// async mutex, which also gives blocking `take` semantics to idle workers.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    /// Enqueues an item. Errors (receiver dropped) are ignored: that only
    /// happens during teardown, when the item is moot anyway.
    pub fn push(&self, item: QueueItem) {
        let _ = self.tx.send(item);
    }

    pub fn push_unit(&self, unit: TransferUnit) {
        self.push(QueueItem::Unit(Box::new(unit)));
    }

    /// Takes the next item, waiting while the queue is empty. A closed
    /// channel behaves like a sentinel.
    pub async fn take(&self) -> QueueItem {
        let mut rx = self.rx.lock().await;
        rx.recv().await.unwrap_or(QueueItem::Shutdown)
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the dispatcher: drains the transmission queue and republishes
/// units into the primary queue until a sentinel arrives.
pub fn spawn_dispatcher(
    transmission: WorkQueue,
    primary: WorkQueue,
    coordinator: Arc<Coordinator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transmission.take().await {
                QueueItem::Unit(unit) => {
                    let _guard = coordinator.request_lock().await;
                    primary.push(QueueItem::Unit(unit));
                }
                QueueItem::Shutdown => break,
            }
        }
        debug!("dispatcher exited");
    })
}
