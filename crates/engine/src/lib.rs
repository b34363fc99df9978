//! Chunked, resumable, checksum-verified file transfer engine.
//!
//! Moves files between a local filesystem and a remote tag-indexed object
//! store over HTTP. Large files are split into fixed-size chunks dispatched
//! across a bounded worker pool; a running SHA-256 digest is folded in strict
//! offset order regardless of chunk arrival order, and a gap-free checkpoint
//! is maintained per file so an interrupted batch can resume.
//!
//! The HTTP transport and session-token handling are collaborators consumed
//! through the [`transport::Transport`] and [`transport::SessionAuth`] traits.

pub mod checkpoint;
pub mod checksum;
pub mod coordinator;
pub mod events;
pub mod progress;
pub mod queue;
pub mod session;
pub mod transport;
pub mod unit;
pub mod validation;
mod worker;

pub use checkpoint::CheckpointTable;
pub use checksum::ChecksumAccumulator;
pub use coordinator::Coordinator;
pub use events::{BatchOutcome, TransferEvent};
pub use progress::FileProgress;
pub use session::{DownloadSession, FileSpec, TransferHandle, UploadSession};
pub use transport::{SessionAuth, Transport};
pub use unit::{Direction, TransferUnit};
pub use validation::validate_object_name;

/// Default chunk size: 4 MiB.
///
/// Larger chunks reduce per-chunk overhead (SHA-256, HTTP round trips,
/// syscalls). Files at or below [`EngineConfig::chunk_threshold`] are sent
/// as a single whole-file unit.
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of concurrent connections (worker tasks).
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the object store, e.g. `https://store.example.org/file`.
    pub base_url: String,
    /// Chunk size in bytes for files above `chunk_threshold`.
    pub chunk_size: u64,
    /// Files at or below this size are transferred as one unit.
    pub chunk_threshold: u64,
    /// Maximum concurrent HTTP operations (worker pool size).
    pub max_connections: usize,
    /// How many out-of-order chunks the checksum accumulator may buffer
    /// before blocking putters. `None` means `max_connections - 1`.
    pub reorder_window: Option<usize>,
}

impl EngineConfig {
    /// Creates a configuration for the given store base URL with defaults.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_threshold: DEFAULT_CHUNK_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            reorder_window: None,
        }
    }

    /// Effective out-of-order buffer bound for the checksum accumulator.
    pub fn effective_reorder_window(&self) -> usize {
        self.reorder_window
            .unwrap_or_else(|| self.max_connections.saturating_sub(1))
            .max(1)
    }
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error {status} {reason}")]
    Http { status: u16, reason: &'static str },

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    /// Builds an HTTP application failure from a status code.
    pub fn http(status: u16) -> Self {
        EngineError::Http {
            status,
            reason: transport::reason_phrase(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = EngineConfig::new("https://store.example.org/file");
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(cfg.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(cfg.effective_reorder_window(), DEFAULT_MAX_CONNECTIONS - 1);
    }

    #[test]
    fn reorder_window_never_zero() {
        let mut cfg = EngineConfig::new("x");
        cfg.max_connections = 1;
        assert_eq!(cfg.effective_reorder_window(), 1);

        cfg.reorder_window = Some(0);
        assert_eq!(cfg.effective_reorder_window(), 1);
    }

    #[test]
    fn http_error_carries_reason() {
        let err = EngineError::http(404);
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("Not Found"));
    }
}
