//! Per-file progress and compact-checkpoint tracking.
//!
//! Workers confirm chunks in any order; the checkpoint only ever advances
//! over a contiguous run of confirmed chunk indices, so the persisted resume
//! offset never covers a gap. At most one checkpoint advancement per file is
//! in flight at a time: [`FileProgress::confirm_chunk`] returns `None`
//! instead of waiting when another worker holds the busy flag, and the next
//! confirmation retries the walk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Progress and checkpoint state for one in-flight file.
pub struct FileProgress {
    name: String,
    total_len: u64,
    busy: AtomicBool,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    transferred: u64,
    /// Confirmed chunk upper bounds not yet folded into the checkpoint.
    confirmed: HashMap<u64, u64>,
    /// Next chunk index the checkpoint walk expects.
    checkpoint_index: u64,
    /// Highest offset O such that [0, O) is confirmed gap-free.
    last_compact: u64,
    complete: bool,
}

impl FileProgress {
    /// Fresh progress for a file of `total_len` bytes.
    pub fn new(name: &str, total_len: u64) -> Self {
        Self::resume(name, total_len, 0, 1)
    }

    /// Progress resuming at checkpoint `offset`: bytes `[0, offset)` are
    /// already confirmed and the walk starts at the chunk containing it.
    pub fn resume(name: &str, total_len: u64, offset: u64, chunk_size: u64) -> Self {
        let checkpoint_index = if chunk_size > 0 { offset / chunk_size } else { 0 };
        Self {
            name: name.to_string(),
            total_len,
            busy: AtomicBool::new(false),
            state: Mutex::new(ProgressState {
                transferred: offset,
                confirmed: HashMap::new(),
                checkpoint_index,
                last_compact: offset,
                complete: false,
            }),
        }
    }

    /// Records a durably-written chunk and tries to advance the compact
    /// checkpoint over the contiguous confirmed run.
    ///
    /// Returns the newly advanced checkpoint offset, or `None` when nothing
    /// advanced or another advancement is in flight. When `Some` is
    /// returned the busy flag stays held until [`FileProgress::checkpoint_done`].
    pub fn confirm_chunk(&self, index: u64, upper: u64) -> Option<u64> {
        {
            let mut s = self.state.lock().unwrap();
            s.confirmed.insert(index, upper);
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            // Another checkpoint write is outstanding; the next
            // confirmation will pick this chunk up.
            return None;
        }
        let advanced = {
            let mut s = self.state.lock().unwrap();
            let mut moved = false;
            loop {
                let idx = s.checkpoint_index;
                let Some(bound) = s.confirmed.remove(&idx) else { break };
                s.last_compact = s.last_compact.max(bound);
                s.checkpoint_index += 1;
                moved = true;
            }
            moved.then_some(s.last_compact)
        };
        if advanced.is_none() {
            self.busy.store(false, Ordering::Release);
        }
        advanced
    }

    /// Releases the busy flag after the advanced checkpoint was recorded.
    pub fn checkpoint_done(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Accumulates transferred bytes; returns `true` exactly once, when the
    /// running total reaches the file's length.
    pub fn add_transferred(&self, bytes: u64) -> bool {
        let mut s = self.state.lock().unwrap();
        s.transferred += bytes;
        if s.transferred >= self.total_len && !s.complete {
            s.complete = true;
            true
        } else {
            false
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn transferred(&self) -> u64 {
        self.state.lock().unwrap().transferred
    }

    /// Current compact checkpoint offset.
    pub fn last_compact_checkpoint(&self) -> u64 {
        self.state.lock().unwrap().last_compact
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn confirm_and_release(p: &FileProgress, index: u64, upper: u64) -> Option<u64> {
        let advanced = p.confirm_chunk(index, upper);
        if advanced.is_some() {
            p.checkpoint_done();
        }
        advanced
    }

    #[test]
    fn in_order_confirmations_advance_each_time() {
        let p = FileProgress::new("f", 300);
        assert_eq!(confirm_and_release(&p, 0, 100), Some(100));
        assert_eq!(confirm_and_release(&p, 1, 200), Some(200));
        assert_eq!(confirm_and_release(&p, 2, 300), Some(300));
        assert_eq!(p.last_compact_checkpoint(), 300);
    }

    #[test]
    fn gap_blocks_checkpoint_until_filled() {
        let p = FileProgress::new("f", 300);
        // Chunk 1 confirmed first: no contiguous run yet.
        assert_eq!(confirm_and_release(&p, 1, 200), None);
        assert_eq!(p.last_compact_checkpoint(), 0);
        // Chunk 0 closes the gap and the walk covers both.
        assert_eq!(confirm_and_release(&p, 0, 100), Some(200));
        assert_eq!(confirm_and_release(&p, 2, 300), Some(300));
    }

    #[test]
    fn checkpoint_is_monotone_under_permutations() {
        use rand::seq::SliceRandom;

        for _ in 0..20 {
            let p = FileProgress::new("f", 1000);
            let mut order: Vec<u64> = (0..10).collect();
            order.shuffle(&mut rand::thread_rng());

            let mut last = 0;
            for i in order {
                if let Some(off) = confirm_and_release(&p, i, (i + 1) * 100) {
                    assert!(off >= last, "checkpoint regressed: {last} -> {off}");
                    last = off;
                }
            }
            assert_eq!(p.last_compact_checkpoint(), 1000);
        }
    }

    #[test]
    fn busy_flag_skips_concurrent_advancement() {
        let p = Arc::new(FileProgress::new("f", 300));
        // First advancement holds the busy flag.
        assert_eq!(p.confirm_chunk(0, 100), Some(100));
        // A concurrent confirmation is recorded but does not advance.
        assert_eq!(p.confirm_chunk(1, 200), None);
        p.checkpoint_done();
        // The next confirmation picks up the skipped chunk.
        assert_eq!(confirm_and_release(&p, 2, 300), Some(300));
    }

    #[test]
    fn completion_fires_exactly_once() {
        let p = FileProgress::new("f", 250);
        assert!(!p.add_transferred(100));
        assert!(!p.add_transferred(100));
        assert!(p.add_transferred(50));
        assert!(!p.add_transferred(0));
    }

    #[test]
    fn zero_length_file_completes_on_empty_chunk() {
        let p = FileProgress::new("empty", 0);
        assert!(p.add_transferred(0));
        assert!(!p.add_transferred(0));
    }

    #[test]
    fn resume_seeds_checkpoint_and_transferred() {
        let p = FileProgress::resume("f", 300, 130, 100);
        assert_eq!(p.last_compact_checkpoint(), 130);
        assert_eq!(p.transferred(), 130);
        // Fractional unit [130, 200) carries index 1.
        assert_eq!(confirm_and_release(&p, 1, 200), Some(200));
        assert_eq!(confirm_and_release(&p, 2, 300), Some(300));
        assert!(!p.add_transferred(70));
        assert!(p.add_transferred(100));
    }
}
