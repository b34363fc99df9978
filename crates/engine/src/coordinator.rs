//! Session-wide success/failure coordination.
//!
//! Aggregates completion across all in-flight files, tears the worker pool
//! down exactly once on the first fatal failure, persists the resume
//! checkpoint table for downloads, and delivers the terminal event exactly
//! once no matter how many workers race into the failure path.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointTable;
use crate::events::{BatchOutcome, TransferEvent};
use crate::queue::{QueueItem, WorkQueue};

pub struct Coordinator {
    events: mpsc::UnboundedSender<TransferEvent>,
    outcome: watch::Sender<Option<BatchOutcome>>,
    cancel: CancellationToken,
    /// Serializes queue feeding with failure-time teardown.
    request_lock: tokio::sync::Mutex<()>,
    primary: WorkQueue,
    transmission: WorkQueue,
    workers: usize,
    /// Download target directory; checkpoints persist here on failure.
    checkpoint_dir: Option<PathBuf>,
    state: Mutex<CoordState>,
}

struct CoordState {
    outstanding: usize,
    failed: bool,
    finished: bool,
    checkpoints: CheckpointTable,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: mpsc::UnboundedSender<TransferEvent>,
        outcome: watch::Sender<Option<BatchOutcome>>,
        cancel: CancellationToken,
        primary: WorkQueue,
        transmission: WorkQueue,
        workers: usize,
        total_files: usize,
        checkpoint_dir: Option<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(Self {
            events,
            outcome,
            cancel,
            request_lock: tokio::sync::Mutex::new(()),
            primary,
            transmission,
            workers,
            checkpoint_dir,
            state: Mutex::new(CoordState {
                outstanding: total_files,
                failed: false,
                finished: false,
                checkpoints: CheckpointTable::new(),
            }),
        })
    }

    /// Guard shared by queue-feeding and teardown code.
    pub async fn request_lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.request_lock.lock().await
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once a failure has cancelled the batch.
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Records a newly advanced compact checkpoint for a file.
    pub fn record_checkpoint(&self, name: &str, offset: u64) {
        let mut s = self.state.lock().unwrap();
        s.checkpoints.record(name, offset);
    }

    /// Emits a chunk-completion event.
    pub fn chunk_done(&self, name: &str, bytes: u64, file_complete: bool) {
        let _ = self.events.send(TransferEvent::ChunkDone {
            file: name.to_string(),
            bytes,
            file_complete,
        });
    }

    /// Marks one file complete; triggers overall success when it was the
    /// last outstanding file and no failure occurred.
    pub async fn file_done(&self, name: &str, bytes: u64) {
        let all_done = {
            let mut s = self.state.lock().unwrap();
            if s.finished {
                return;
            }
            s.outstanding = s.outstanding.saturating_sub(1);
            // Sent under the lock so every FileDone precedes BatchSuccess
            // on the channel when the last files finish concurrently.
            let _ = self.events.send(TransferEvent::FileDone {
                file: name.to_string(),
                bytes,
            });
            s.outstanding == 0
        };
        info!(file = %name, bytes, "file transfer complete");
        if all_done {
            self.notify_success().await;
        }
    }

    /// Delivers the overall-success event exactly once.
    ///
    /// Safe to call concurrently; only the call that observes the last file
    /// completing wins, and a prior failure makes it a no-op.
    pub async fn notify_success(&self) {
        {
            let mut s = self.state.lock().unwrap();
            if s.failed || s.finished {
                return;
            }
            s.finished = true;
        }
        self.shutdown_workers().await;
        // A fully successful batch invalidates any earlier checkpoint file.
        if let Some(dir) = &self.checkpoint_dir {
            if let Err(e) = CheckpointTable::remove(dir).await {
                warn!(error = %e, "failed to remove checkpoint file");
            }
        }
        debug!("batch complete");
        let _ = self.events.send(TransferEvent::BatchSuccess);
        let _ = self.outcome.send(Some(BatchOutcome::Success));
    }

    /// Delivers the overall-failure event; idempotent, first caller wins.
    ///
    /// Cancels all workers, drains both queues via sentinels, and persists
    /// the checkpoint table (downloads only) before the event fires.
    pub async fn notify_failure(&self, message: String) {
        let checkpoints = {
            let mut s = self.state.lock().unwrap();
            if s.failed || s.finished {
                return;
            }
            s.failed = true;
            s.finished = true;
            s.checkpoints.clone()
        };
        self.cancel.cancel();
        self.shutdown_workers().await;

        if let Some(dir) = &self.checkpoint_dir {
            if !checkpoints.is_empty() {
                if let Err(e) = checkpoints.save(dir).await {
                    warn!(error = %e, "failed to persist checkpoint table");
                }
            }
        }

        error!(message = %message, "batch failed");
        let _ = self.events.send(TransferEvent::BatchFailure {
            message: message.clone(),
        });
        let _ = self.outcome.send(Some(BatchOutcome::Failure(message)));
    }

    /// Reports a non-HTTP unexpected error; may co-occur with failure.
    pub fn notify_error(&self, message: &str, cause: &str) {
        let _ = self.events.send(TransferEvent::BatchError {
            message: message.to_string(),
            cause: cause.to_string(),
        });
    }

    /// Pushes one sentinel per worker plus one for the dispatcher, under
    /// the request lock so no enqueue can interleave with teardown.
    async fn shutdown_workers(&self) {
        let _guard = self.request_lock.lock().await;
        for _ in 0..self.workers {
            self.primary.push(QueueItem::Shutdown);
        }
        self.transmission.push(QueueItem::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make(total_files: usize, workers: usize) -> (Arc<Coordinator>, mpsc::UnboundedReceiver<TransferEvent>, WorkQueue, WorkQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (otx, _orx) = watch::channel(None);
        let primary = WorkQueue::new();
        let transmission = WorkQueue::new();
        let c = Coordinator::new(
            tx,
            otx,
            CancellationToken::new(),
            primary.clone(),
            transmission.clone(),
            workers,
            total_files,
            None,
        );
        (c, rx, primary, transmission)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn success_after_last_file() {
        let (c, mut rx, _p, _t) = make(2, 2);
        c.file_done("a", 10).await;
        c.file_done("b", 20).await;

        let events = drain(&mut rx);
        let files = events
            .iter()
            .filter(|e| matches!(e, TransferEvent::FileDone { .. }))
            .count();
        assert_eq!(files, 2);
        assert_eq!(
            events.last(),
            Some(&TransferEvent::BatchSuccess),
            "success must come after all file events"
        );
    }

    #[tokio::test]
    async fn concurrent_completions_order_success_last() {
        let (c, mut rx, _p, _t) = make(8, 4);
        let mut tasks = Vec::new();
        for i in 0..8 {
            let c = Arc::clone(&c);
            tasks.push(tokio::spawn(async move {
                c.file_done(&format!("f{i}"), 1).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 9);
        assert!(events[..8]
            .iter()
            .all(|e| matches!(e, TransferEvent::FileDone { .. })));
        assert_eq!(events.last(), Some(&TransferEvent::BatchSuccess));
    }

    #[tokio::test]
    async fn failure_is_single_fire() {
        let (c, mut rx, _p, _t) = make(3, 2);
        c.notify_failure("first".into()).await;
        c.notify_failure("second".into()).await;
        c.notify_success().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            TransferEvent::BatchFailure {
                message: "first".into()
            }
        );
        assert!(c.cancelled());
    }

    #[tokio::test]
    async fn failure_pushes_sentinels() {
        let (c, _rx, primary, transmission) = make(1, 3);
        c.notify_failure("boom".into()).await;

        for _ in 0..3 {
            assert!(matches!(primary.take().await, QueueItem::Shutdown));
        }
        assert!(matches!(transmission.take().await, QueueItem::Shutdown));
    }

    #[tokio::test]
    async fn file_done_after_failure_is_ignored() {
        let (c, mut rx, _p, _t) = make(1, 1);
        c.notify_failure("boom".into()).await;
        c.file_done("a", 10).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::BatchFailure { .. }));
    }

    #[tokio::test]
    async fn error_event_passes_through() {
        let (c, mut rx, _p, _t) = make(1, 1);
        c.notify_error("cannot open file", "permission denied");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TransferEvent::BatchError { .. }));
    }

    #[tokio::test]
    async fn failure_persists_checkpoints_for_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (otx, _orx) = watch::channel(None);
        let c = Coordinator::new(
            tx,
            otx,
            CancellationToken::new(),
            WorkQueue::new(),
            WorkQueue::new(),
            1,
            1,
            Some(dir.path().to_path_buf()),
        );
        c.record_checkpoint("a.bin", 4096);
        c.notify_failure("boom".into()).await;

        let table = CheckpointTable::load(dir.path()).await.unwrap().unwrap();
        assert_eq!(table.offset("a.bin"), 4096);
    }

    #[tokio::test]
    async fn success_removes_checkpoint_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut stale = CheckpointTable::new();
        stale.record("a.bin", 100);
        stale.save(dir.path()).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let (otx, _orx) = watch::channel(None);
        let c = Coordinator::new(
            tx,
            otx,
            CancellationToken::new(),
            WorkQueue::new(),
            WorkQueue::new(),
            1,
            1,
            Some(dir.path().to_path_buf()),
        );
        c.file_done("a.bin", 100).await;
        assert!(!CheckpointTable::exists(dir.path()));
    }
}
