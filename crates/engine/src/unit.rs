//! Transfer unit: an immutable descriptor of one byte range in flight.
//!
//! Units are produced by the splitting policy and consumed exactly once by a
//! worker. A file at or below the chunk threshold travels as one whole-file
//! unit; larger files split into fixed-size chunks plus a final partial one.
//! On resume only the first not-yet-confirmed unit is produced up front; the
//! remainder fans out after the first unit succeeds.

use std::path::PathBuf;

use crate::EngineConfig;

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// One chunk of one file, scheduled for a single HTTP operation.
#[derive(Debug, Clone)]
pub struct TransferUnit {
    /// Remote object name (relative path within the batch).
    pub name: String,
    /// Local file path (source for upload, target for download).
    pub local_path: PathBuf,
    /// Byte offset within the file.
    pub offset: u64,
    /// Chunk length in bytes.
    pub length: u64,
    /// Total file length in bytes.
    pub total_len: u64,
    /// Chunk index: `offset / chunk_size`.
    pub index: u64,
    pub direction: Direction,
    /// True for the first unit of a file; gates fan-out of the remainder.
    pub is_first: bool,
    /// True for the unit whose upper bound reaches `total_len`.
    pub is_last: bool,
    /// Expected whole-file digest (download verification).
    pub expected_digest: Option<String>,
    /// Server-assigned file version, known only after the first write.
    pub version: Option<String>,
}

impl TransferUnit {
    /// Upper byte bound of this unit: `offset + length`.
    pub fn upper(&self) -> u64 {
        self.offset + self.length
    }
}

/// Builds the first unit of a file, starting at `offset` (0 = fresh).
///
/// For a file above the chunk threshold the unit covers the remainder of the
/// chunk containing `offset`, so an unaligned resume offset produces a
/// fractional first chunk that realigns the rest of the file.
#[allow(clippy::too_many_arguments)]
pub fn first_unit(
    cfg: &EngineConfig,
    name: &str,
    local_path: PathBuf,
    total_len: u64,
    offset: u64,
    direction: Direction,
    expected_digest: Option<String>,
    version: Option<String>,
) -> TransferUnit {
    let chunked = total_len > cfg.chunk_threshold;
    let index = if cfg.chunk_size > 0 {
        offset / cfg.chunk_size
    } else {
        0
    };
    let upper = if chunked {
        ((index + 1) * cfg.chunk_size).min(total_len)
    } else {
        total_len
    };
    TransferUnit {
        name: name.to_string(),
        local_path,
        offset,
        length: upper - offset,
        total_len,
        index,
        direction,
        is_first: true,
        is_last: upper == total_len,
        expected_digest,
        version,
    }
}

/// Computes the units following a successful first unit.
///
/// Returns an empty vector when the first unit already reached the end of
/// the file. The server-assigned `version` is threaded into every unit.
pub fn remainder_units(
    cfg: &EngineConfig,
    first: &TransferUnit,
    version: Option<String>,
) -> Vec<TransferUnit> {
    let mut units = Vec::new();
    if first.is_last {
        return units;
    }
    let mut offset = first.upper();
    let mut index = first.index + 1;
    while offset < first.total_len {
        let upper = (offset + cfg.chunk_size).min(first.total_len);
        units.push(TransferUnit {
            name: first.name.clone(),
            local_path: first.local_path.clone(),
            offset,
            length: upper - offset,
            total_len: first.total_len,
            index,
            direction: first.direction,
            is_first: false,
            is_last: upper == first.total_len,
            expected_digest: first.expected_digest.clone(),
            version: version.clone(),
        });
        offset = upper;
        index += 1;
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(chunk: u64) -> EngineConfig {
        let mut c = EngineConfig::new("http://store");
        c.chunk_size = chunk;
        c.chunk_threshold = chunk;
        c
    }

    fn fresh(cfg: &EngineConfig, total: u64) -> TransferUnit {
        first_unit(
            cfg,
            "f.bin",
            PathBuf::from("/tmp/f.bin"),
            total,
            0,
            Direction::Upload,
            None,
            None,
        )
    }

    #[test]
    fn small_file_is_one_unit() {
        let c = cfg(100);
        let u = fresh(&c, 50);
        assert!(u.is_first && u.is_last);
        assert_eq!((u.offset, u.length, u.index), (0, 50, 0));
        assert!(remainder_units(&c, &u, None).is_empty());
    }

    #[test]
    fn threshold_boundary_is_one_unit() {
        let c = cfg(100);
        let u = fresh(&c, 100);
        assert!(u.is_last);
        assert_eq!(u.length, 100);
    }

    #[test]
    fn large_file_splits_with_final_partial() {
        let c = cfg(100);
        let u = fresh(&c, 250);
        assert!(u.is_first && !u.is_last);
        assert_eq!(u.length, 100);

        let rest = remainder_units(&c, &u, Some("v7".into()));
        assert_eq!(rest.len(), 2);
        assert_eq!((rest[0].offset, rest[0].length, rest[0].index), (100, 100, 1));
        assert_eq!((rest[1].offset, rest[1].length, rest[1].index), (200, 50, 2));
        assert!(rest[1].is_last);
        assert!(rest.iter().all(|r| r.version.as_deref() == Some("v7")));
        assert!(rest.iter().all(|r| !r.is_first));
    }

    #[test]
    fn exact_multiple_has_no_partial() {
        let c = cfg(100);
        let u = fresh(&c, 300);
        let rest = remainder_units(&c, &u, None);
        assert_eq!(rest.len(), 2);
        assert!(rest.iter().all(|r| r.length == 100));
    }

    #[test]
    fn resume_unaligned_offset_realigns() {
        let c = cfg(100);
        let u = first_unit(
            &c,
            "f.bin",
            PathBuf::from("/tmp/f.bin"),
            250,
            130,
            Direction::Download,
            None,
            Some("v1".into()),
        );
        // Fractional first chunk completes chunk index 1.
        assert_eq!((u.offset, u.length, u.index), (130, 70, 1));
        assert!(!u.is_last);

        let rest = remainder_units(&c, &u, Some("v1".into()));
        assert_eq!(rest.len(), 1);
        assert_eq!((rest[0].offset, rest[0].length, rest[0].index), (200, 50, 2));
    }

    #[test]
    fn zero_byte_file_is_single_empty_unit() {
        let c = cfg(100);
        let u = fresh(&c, 0);
        assert!(u.is_first && u.is_last);
        assert_eq!(u.length, 0);
    }
}
