//! Worker pool: one HTTP operation per chunk.
//!
//! Each worker loops on the primary queue: exit on sentinel, discard units
//! once the batch is cancelled, otherwise perform exactly one transport call
//! for the unit, update the file's progress and checksum accumulator, fan
//! out follow-up chunks after a successful first chunk, and finalize the
//! file on its last chunk. Any transport fault, non-2xx status, or digest
//! mismatch takes the single-fire failure path.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::coordinator::Coordinator;
use crate::checksum::ChecksumAccumulator;
use crate::progress::FileProgress;
use crate::queue::{QueueItem, WorkQueue};
use crate::transport::{object_url, versioned_url, SessionAuth, Transport};
use crate::unit::{remainder_units, Direction, TransferUnit};
use crate::{EngineConfig, EngineError};

/// Per-file transfer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilePhase {
    Pending,
    /// First chunk of a chunked file in flight; gates fan-out.
    InFirstChunk,
    Streaming,
    Finalizing,
    Complete,
    Failed,
}

/// Shared per-file state looked up by workers through the unit's name.
pub(crate) struct FileState {
    pub progress: FileProgress,
    pub accum: ChecksumAccumulator,
    pub version: Mutex<Option<String>>,
    phase: Mutex<FilePhase>,
}

impl FileState {
    pub fn new(progress: FileProgress, accum: ChecksumAccumulator, version: Option<String>) -> Self {
        Self {
            progress,
            accum,
            version: Mutex::new(version),
            phase: Mutex::new(FilePhase::Pending),
        }
    }

    fn set_phase(&self, phase: FilePhase) {
        *self.phase.lock().unwrap() = phase;
    }

    #[cfg(test)]
    pub(crate) fn phase_is_terminal(&self) -> bool {
        matches!(
            *self.phase.lock().unwrap(),
            FilePhase::Complete | FilePhase::Failed
        )
    }
}

/// Everything a worker needs, shared across the pool.
pub(crate) struct WorkerCtx {
    pub cfg: EngineConfig,
    pub transport: Arc<dyn Transport>,
    pub auth: Arc<dyn SessionAuth>,
    pub coordinator: Arc<Coordinator>,
    pub transmission: WorkQueue,
    pub files: HashMap<String, Arc<FileState>>,
}

/// Spawns one worker task draining the primary queue.
pub(crate) fn spawn_worker(id: usize, ctx: Arc<WorkerCtx>, primary: WorkQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match primary.take().await {
                QueueItem::Shutdown => break,
                QueueItem::Unit(unit) => {
                    if ctx.coordinator.cancelled() {
                        // Drain without executing; sentinels end the loop.
                        trace!(worker = id, file = %unit.name, "discarding unit after cancellation");
                        continue;
                    }
                    process_unit(&ctx, *unit).await;
                }
            }
        }
        debug!(worker = id, "worker exited");
    })
}

async fn process_unit(ctx: &WorkerCtx, unit: TransferUnit) {
    let Some(file) = ctx.files.get(&unit.name).map(Arc::clone) else {
        ctx.coordinator
            .notify_failure(format!("no state for file {}", unit.name))
            .await;
        return;
    };

    if unit.is_first {
        file.set_phase(if unit.is_last {
            FilePhase::Streaming
        } else {
            FilePhase::InFirstChunk
        });
    }

    let result = match unit.direction {
        Direction::Upload => upload_unit(ctx, &file, &unit).await,
        Direction::Download => download_unit(ctx, &file, &unit).await,
    };

    match result {
        Ok(Some(bytes)) => chunk_succeeded(ctx, &file, &unit, bytes).await,
        // Cancellation observed mid-unit: result discarded.
        Ok(None) => {}
        Err(e) => {
            file.set_phase(FilePhase::Failed);
            if let EngineError::Io(ref io) = e {
                ctx.coordinator
                    .notify_error(&format!("local I/O failure on {}", unit.name), &io.to_string());
            }
            ctx.coordinator
                .notify_failure(format!("transfer of {} failed: {e}", unit.name))
                .await;
        }
    }
}

/// Reads the unit's byte range locally and PUTs it to the store.
///
/// Returns the chunk bytes on success, `None` when the result was discarded
/// because the batch got cancelled while the call was in flight.
async fn upload_unit(
    ctx: &WorkerCtx,
    file: &FileState,
    unit: &TransferUnit,
) -> Result<Option<Vec<u8>>, EngineError> {
    let mut f = tokio::fs::File::open(&unit.local_path).await?;
    f.seek(SeekFrom::Start(unit.offset)).await?;
    let mut body = vec![0u8; unit.length as usize];
    f.read_exact(&mut body).await?;

    if ctx.coordinator.cancelled() {
        return Ok(None);
    }
    let url = unit_url(ctx, unit);
    let token = ctx.auth.current_token();
    let resp = ctx
        .transport
        .put(&url, body.clone(), unit.offset, unit.length, unit.total_len, &token)
        .await;
    ctx.auth.token_may_have_changed();
    let resp = resp?;

    if ctx.coordinator.cancelled() {
        return Ok(None);
    }
    if !is_success(resp.status) {
        return Err(EngineError::http(resp.status));
    }
    if unit.is_first {
        // The store assigns the file version on the first successful write.
        if let Some(location) = resp.location {
            *file.version.lock().unwrap() = Some(location);
        }
    }
    Ok(Some(body))
}

/// Ranged-GETs the unit's byte range and writes it into the target file.
async fn download_unit(
    ctx: &WorkerCtx,
    _file: &FileState,
    unit: &TransferUnit,
) -> Result<Option<Vec<u8>>, EngineError> {
    // A zero-length file needs no HTTP; just materialize the empty target.
    let body = if unit.length == 0 {
        Vec::new()
    } else {
        if ctx.coordinator.cancelled() {
            return Ok(None);
        }
        let url = unit_url(ctx, unit);
        let token = ctx.auth.current_token();
        let resp = ctx
            .transport
            .get(&url, unit.offset, unit.length, &token)
            .await;
        ctx.auth.token_may_have_changed();
        let resp = resp?;

        if ctx.coordinator.cancelled() {
            return Ok(None);
        }
        if !is_success(resp.status) {
            return Err(EngineError::http(resp.status));
        }
        if resp.body.len() as u64 != unit.length {
            return Err(EngineError::Transport(format!(
                "short body: expected {} bytes, got {}",
                unit.length,
                resp.body.len()
            )));
        }
        resp.body
    };

    if let Some(parent) = unit.local_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut f = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&unit.local_path)
        .await?;
    if unit.is_first && unit.offset == 0 {
        // A fresh download owns the whole target; drop any stale tail left
        // by an earlier, longer file under the same name. Runs before
        // fan-out, so no other chunk is writing yet.
        f.set_len(unit.total_len).await?;
    }
    f.seek(SeekFrom::Start(unit.offset)).await?;
    f.write_all(&body).await?;
    f.flush().await?;

    Ok(Some(body))
}

/// Post-success bookkeeping shared by both directions.
async fn chunk_succeeded(ctx: &WorkerCtx, file: &Arc<FileState>, unit: &TransferUnit, bytes: Vec<u8>) {
    let cancel = ctx.coordinator.cancel_token();

    // Fold into the digest in index order; backpressure may make us wait,
    // in which case a batch failure releases us with the result discarded.
    tokio::select! {
        _ = file.accum.put(unit.index, bytes) => {}
        _ = cancel.cancelled() => return,
    }

    // Advance the compact checkpoint; skip when another advancement for
    // this file is outstanding.
    if let Some(offset) = file.progress.confirm_chunk(unit.index, unit.upper()) {
        ctx.coordinator.record_checkpoint(&unit.name, offset);
        file.progress.checkpoint_done();
    }

    // Fan out the rest of the file once the first chunk lands.
    if unit.is_first && !unit.is_last {
        let version = file.version.lock().unwrap().clone();
        for follow_up in remainder_units(&ctx.cfg, unit, version) {
            ctx.transmission.push_unit(follow_up);
        }
        file.set_phase(FilePhase::Streaming);
    }

    let completed = file.progress.add_transferred(unit.length);
    ctx.coordinator.chunk_done(&unit.name, unit.length, completed);

    if completed {
        file.set_phase(FilePhase::Finalizing);
        let digest = tokio::select! {
            d = file.accum.finalize() => d,
            _ = cancel.cancelled() => return,
        };
        if let Err(e) = finish_file(ctx, file, unit, digest).await {
            file.set_phase(FilePhase::Failed);
            ctx.coordinator
                .notify_failure(format!("completion of {} failed: {e}", unit.name))
                .await;
            return;
        }
        file.set_phase(FilePhase::Complete);
        ctx.coordinator.file_done(&unit.name, unit.total_len).await;
    }
}

/// Verifies the digest (download) or attaches it to the upload completion.
async fn finish_file(
    ctx: &WorkerCtx,
    file: &FileState,
    unit: &TransferUnit,
    digest: String,
) -> Result<(), EngineError> {
    match unit.direction {
        Direction::Download => {
            if let Some(expected) = &unit.expected_digest {
                if !expected.eq_ignore_ascii_case(&digest) {
                    return Err(EngineError::ChecksumMismatch {
                        file: unit.name.clone(),
                        expected: expected.clone(),
                        actual: digest,
                    });
                }
            } else {
                warn!(file = %unit.name, "no expected checksum; skipping verification");
            }
            Ok(())
        }
        Direction::Upload => {
            let mut form = vec![
                ("checksum".to_string(), digest),
                ("length".to_string(), unit.total_len.to_string()),
            ];
            if let Some(version) = file.version.lock().unwrap().clone() {
                form.push(("version".to_string(), version));
            }
            let url = object_url(&ctx.cfg.base_url, &unit.name);
            let token = ctx.auth.current_token();
            let resp = ctx.transport.post(&url, form, &token).await;
            ctx.auth.token_may_have_changed();
            let resp = resp?;
            if !is_success(resp.status) {
                return Err(EngineError::http(resp.status));
            }
            Ok(())
        }
    }
}

/// Object URL for a unit, carrying the store-assigned version when known.
fn unit_url(ctx: &WorkerCtx, unit: &TransferUnit) -> String {
    let url = object_url(&ctx.cfg.base_url, &unit.name);
    match &unit.version {
        Some(version) => versioned_url(&url, version),
        None => url,
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}
