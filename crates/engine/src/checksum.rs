//! Incremental whole-file SHA-256 over chunks arriving in any order.
//!
//! Workers call [`ChecksumAccumulator::put`] as chunks complete; bytes are
//! folded into the digest in strict chunk-index order. A chunk ahead of the
//! cursor is buffered, bounded by the reorder window; when the window is
//! full the putter waits until the cursor advances (stop-and-wait
//! backpressure). [`ChecksumAccumulator::finalize`] waits until every byte
//! of the file has been absorbed.

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, Notify};

use crate::EngineError;

/// Read buffer for resume re-hashing.
const REHASH_BUF: usize = 64 * 1024;

/// Order-independent arrival, order-dependent folding.
pub struct ChecksumAccumulator {
    state: Mutex<AccumState>,
    /// Signalled whenever the cursor advances or the digest completes.
    advanced: Notify,
}

struct AccumState {
    hasher: Option<Sha256>,
    total_len: u64,
    absorbed: u64,
    next_index: u64,
    /// Chunks that arrived before their predecessor, keyed by index.
    pending: BTreeMap<u64, Vec<u8>>,
    window: usize,
    digest: Option<String>,
}

impl AccumState {
    /// Folds `bytes` and any now-in-order pending run into the hash.
    fn absorb(&mut self, bytes: &[u8]) {
        let Some(hasher) = self.hasher.as_mut() else {
            return;
        };
        hasher.update(bytes);
        self.absorbed += bytes.len() as u64;
        self.next_index += 1;

        while let Some(buf) = self.pending.remove(&self.next_index) {
            hasher.update(&buf);
            self.absorbed += buf.len() as u64;
            self.next_index += 1;
        }
    }

    fn take_digest(&mut self) -> String {
        if let Some(hasher) = self.hasher.take() {
            self.digest = Some(hex::encode(hasher.finalize()));
        }
        self.digest.clone().unwrap_or_default()
    }
}

impl ChecksumAccumulator {
    /// Fresh accumulator for a file of `total_len` bytes.
    ///
    /// `window` bounds how many out-of-order chunks may be buffered.
    pub fn new(total_len: u64, window: usize) -> Self {
        Self {
            state: Mutex::new(AccumState {
                hasher: Some(Sha256::new()),
                total_len,
                absorbed: 0,
                next_index: 0,
                pending: BTreeMap::new(),
                window: window.max(1),
                digest: None,
            }),
            advanced: Notify::new(),
        }
    }

    /// Accumulator resuming at `offset`, pre-seeded by re-reading and
    /// re-hashing `[0, offset)` from the local copy at `path`.
    ///
    /// The expected chunk index becomes `offset / chunk_size`: a
    /// non-aligned checkpoint leaves a fractional first chunk whose index is
    /// that of the chunk it completes.
    pub async fn resume(
        path: &Path,
        total_len: u64,
        offset: u64,
        chunk_size: u64,
        window: usize,
    ) -> Result<Self, EngineError> {
        let mut hasher = Sha256::new();
        if offset > 0 {
            let mut file = tokio::fs::File::open(path).await?;
            let mut remaining = offset;
            let mut buf = vec![0u8; REHASH_BUF];
            while remaining > 0 {
                let want = (remaining as usize).min(buf.len());
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(EngineError::InvalidState(format!(
                        "local copy of {} shorter than checkpoint offset {}",
                        path.display(),
                        offset
                    )));
                }
                hasher.update(&buf[..n]);
                remaining -= n as u64;
            }
        }
        let next_index = if chunk_size > 0 { offset / chunk_size } else { 0 };
        Ok(Self {
            state: Mutex::new(AccumState {
                hasher: Some(hasher),
                total_len,
                absorbed: offset,
                next_index,
                pending: BTreeMap::new(),
                window: window.max(1),
                digest: None,
            }),
            advanced: Notify::new(),
        })
    }

    /// Submits the bytes of chunk `index`.
    ///
    /// May be called concurrently in any arrival order; waits when more than
    /// `window` chunks have arrived ahead of the expected one.
    pub async fn put(&self, index: u64, bytes: Vec<u8>) {
        loop {
            let mut s = self.state.lock().await;
            if index < s.next_index {
                // Already folded (resume seeding covered it).
                return;
            }
            if index == s.next_index {
                s.absorb(&bytes);
                drop(s);
                self.advanced.notify_waiters();
                return;
            }
            if s.pending.len() < s.window {
                s.pending.insert(index, bytes);
                return;
            }
            // Window full: wait for the cursor, then re-check.
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(s);
            notified.await;
        }
    }

    /// Waits until all `total_len` bytes have been absorbed, then returns
    /// the hex-encoded digest.
    pub async fn finalize(&self) -> String {
        loop {
            let mut s = self.state.lock().await;
            if s.absorbed == s.total_len {
                let digest = s.take_digest();
                drop(s);
                self.advanced.notify_waiters();
                return digest;
            }
            let notified = self.advanced.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(s);
            notified.await;
        }
    }

    /// Bytes folded into the digest so far.
    pub async fn absorbed(&self) -> u64 {
        self.state.lock().await.absorbed
    }
}
