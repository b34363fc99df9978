//! Events emitted by the engine.
//!
//! All listener notifications travel as one tagged event type over a single
//! channel; the terminal events are mutually exclusive and single-fire.

/// Progress and terminal notifications for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// A chunk finished; fires many times per file.
    ChunkDone {
        file: String,
        bytes: u64,
        file_complete: bool,
    },
    /// A file finished; fires exactly once per completed file.
    FileDone { file: String, bytes: u64 },
    /// The whole batch succeeded; exactly once, only without failure.
    BatchSuccess,
    /// The batch failed; at most once, mutually exclusive with success.
    BatchFailure { message: String },
    /// Non-HTTP unexpected error (local I/O); may co-occur with failure.
    BatchError { message: String, cause: String },
}

/// Terminal outcome of a batch, for callers blocking on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Success,
    Failure(String),
}
