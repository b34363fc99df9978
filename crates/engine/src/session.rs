//! Top-level upload/download session objects.
//!
//! A session owns the queues, coordinator, dispatcher and worker pool for
//! one batch. `start` seeds the first unit of every file, spawns the pool
//! and returns a [`TransferHandle`] immediately; completion and failure are
//! delivered through the handle's event stream, and [`TransferHandle::wait`]
//! blocks the caller until the terminal outcome.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::checksum::ChecksumAccumulator;
use crate::coordinator::Coordinator;
use crate::events::{BatchOutcome, TransferEvent};
use crate::progress::FileProgress;
use crate::queue::{spawn_dispatcher, WorkQueue};
use crate::transport::{object_url, SessionAuth, Transport};
use crate::unit::{first_unit, Direction};
use crate::validation::validate_object_name;
use crate::worker::{spawn_worker, FileState, WorkerCtx};
use crate::{EngineConfig, EngineError};

/// One file of a batch, possibly partially transferred.
///
/// `resume_offset` 0 means a fresh start; a resumed file also carries the
/// store-assigned `version` from its first write. A download with unknown
/// `total_len` triggers a metadata probe before seeding.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Object name; also the path relative to the base/target directory.
    pub name: String,
    pub total_len: Option<u64>,
    pub resume_offset: u64,
    pub version: Option<String>,
    /// Expected whole-file digest, verified after a download completes.
    pub expected_digest: Option<String>,
}

impl FileSpec {
    /// Fresh, unresumed file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_len: None,
            resume_offset: 0,
            version: None,
            expected_digest: None,
        }
    }

    /// Sets the resume checkpoint `(offset, version)`.
    pub fn resume_at(mut self, offset: u64, version: Option<String>) -> Self {
        self.resume_offset = offset;
        self.version = version;
        self
    }

    pub fn with_total_len(mut self, total_len: u64) -> Self {
        self.total_len = Some(total_len);
        self
    }

    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }
}

/// Handle to a running batch.
pub struct TransferHandle {
    events: mpsc::UnboundedReceiver<TransferEvent>,
    outcome: watch::Receiver<Option<BatchOutcome>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl TransferHandle {
    /// Next engine event; `None` once the engine has shut down and all
    /// buffered events were consumed.
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Waits for the terminal outcome, then joins the worker pool so no
    /// I/O is still in flight when this returns.
    pub async fn wait(&mut self) -> BatchOutcome {
        let outcome = loop {
            if let Some(outcome) = self.outcome.borrow().clone() {
                break outcome;
            }
            if self.outcome.changed().await.is_err() {
                break BatchOutcome::Failure("engine terminated without outcome".into());
            }
        };
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        outcome
    }

    /// Token cancelling the batch; workers discard in-flight results.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Uploads a batch of local files into the store.
pub struct UploadSession {
    core: SessionCore,
}

impl UploadSession {
    pub fn new(cfg: EngineConfig, transport: Arc<dyn Transport>, auth: Arc<dyn SessionAuth>) -> Self {
        Self {
            core: SessionCore { cfg, transport, auth },
        }
    }

    /// Starts uploading `files`, resolved against `base_dir`.
    ///
    /// Returns as soon as the batch is seeded; progress and the terminal
    /// event arrive through the handle.
    pub async fn start(
        &self,
        files: Vec<FileSpec>,
        base_dir: &Path,
    ) -> Result<TransferHandle, EngineError> {
        self.core
            .start_batch(files, base_dir, Direction::Upload, None)
            .await
    }
}

/// Downloads a batch of store objects into a target directory.
pub struct DownloadSession {
    core: SessionCore,
}

impl DownloadSession {
    pub fn new(cfg: EngineConfig, transport: Arc<dyn Transport>, auth: Arc<dyn SessionAuth>) -> Self {
        Self {
            core: SessionCore { cfg, transport, auth },
        }
    }

    /// Starts downloading `files` into `output_dir`.
    ///
    /// Files without a known length are probed first. On failure the
    /// per-file compact checkpoints persist into `output_dir` for resume.
    pub async fn start(
        &self,
        files: Vec<FileSpec>,
        output_dir: &Path,
    ) -> Result<TransferHandle, EngineError> {
        self.core
            .start_batch(
                files,
                output_dir,
                Direction::Download,
                Some(output_dir.to_path_buf()),
            )
            .await
    }
}

struct SessionCore {
    cfg: EngineConfig,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn SessionAuth>,
}

impl SessionCore {
    async fn start_batch(
        &self,
        files: Vec<FileSpec>,
        dir: &Path,
        direction: Direction,
        checkpoint_dir: Option<std::path::PathBuf>,
    ) -> Result<TransferHandle, EngineError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let primary = WorkQueue::new();
        let transmission = WorkQueue::new();

        let coordinator = Coordinator::new(
            events_tx,
            outcome_tx,
            cancel.clone(),
            primary.clone(),
            transmission.clone(),
            self.cfg.max_connections,
            files.len(),
            checkpoint_dir,
        );

        let window = self.cfg.effective_reorder_window();
        let mut states: HashMap<String, Arc<FileState>> = HashMap::new();

        for spec in &files {
            validate_object_name(&spec.name)?;
            let local_path = dir.join(&spec.name);

            let total_len = match (direction, spec.total_len) {
                (Direction::Upload, _) => tokio::fs::metadata(&local_path).await?.len(),
                (Direction::Download, Some(len)) => len,
                (Direction::Download, None) => self.probe_length(&spec.name).await?,
            };

            let accum = if spec.resume_offset > 0 {
                ChecksumAccumulator::resume(
                    &local_path,
                    total_len,
                    spec.resume_offset,
                    self.cfg.chunk_size,
                    window,
                )
                .await?
            } else {
                ChecksumAccumulator::new(total_len, window)
            };
            let progress = FileProgress::resume(
                &spec.name,
                total_len,
                spec.resume_offset,
                self.cfg.chunk_size,
            );

            states.insert(
                spec.name.clone(),
                Arc::new(FileState::new(progress, accum, spec.version.clone())),
            );

            primary.push_unit(first_unit(
                &self.cfg,
                &spec.name,
                local_path,
                total_len,
                spec.resume_offset,
                direction,
                spec.expected_digest.clone(),
                spec.version.clone(),
            ));
        }

        info!(
            files = files.len(),
            connections = self.cfg.max_connections,
            ?direction,
            "batch started"
        );

        let ctx = Arc::new(WorkerCtx {
            cfg: self.cfg.clone(),
            transport: Arc::clone(&self.transport),
            auth: Arc::clone(&self.auth),
            coordinator: Arc::clone(&coordinator),
            transmission: transmission.clone(),
            files: states,
        });

        let mut tasks = Vec::with_capacity(self.cfg.max_connections + 1);
        tasks.push(spawn_dispatcher(
            transmission,
            primary.clone(),
            Arc::clone(&coordinator),
        ));
        for id in 0..self.cfg.max_connections {
            tasks.push(spawn_worker(id, Arc::clone(&ctx), primary.clone()));
        }

        if files.is_empty() {
            coordinator.notify_success().await;
        }

        Ok(TransferHandle {
            events: events_rx,
            outcome: outcome_rx,
            cancel,
            tasks,
        })
    }

    /// HEAD-equivalent metadata probe for a download with unknown length.
    async fn probe_length(&self, name: &str) -> Result<u64, EngineError> {
        let url = object_url(&self.cfg.base_url, name);
        let token = self.auth.current_token();
        let result = self.transport.get_length(&url, &token).await;
        self.auth.token_may_have_changed();
        let (status, len) = result?;
        if !(200..300).contains(&status) {
            return Err(EngineError::http(status));
        }
        Ok(len)
    }
}
