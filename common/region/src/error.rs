use std::io;

use crate::{Access, BackendKind, RegionPos};

/// Failure to open a region file.
#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    #[error("[R101] Failed to open region file: {0}")]
    Io(#[from] io::Error),

    /// The file is shorter than the two header sectors and was opened in a
    /// mode that may not grow it.
    #[error("[R102] Region header is truncated ({len} bytes) and the file cannot be grown.")]
    TruncatedHeader { len: u64 },

    #[error("[R103] Backend '{backend:?}' cannot be opened with access '{access:?}': {reason}")]
    UnsupportedOpenMode {
        backend: BackendKind,
        access: Access,
        reason: &'static str,
    },

    #[error("[R104] Invalid region open options: {0}")]
    Config(#[from] toml::de::Error),
}

/// What was wrong with a stored record.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Corruption {
    /// The length prefix claims more bytes than the header allocated.
    #[error("length {length} exceeds the allocated maximum of {max}")]
    LengthExceedsAllocation { length: u32, max: usize },

    /// The offset entry points into the header or reserves no sectors.
    #[error("offset entry (sector {sector}, count {count}) is invalid")]
    InvalidEntry { sector: u32, count: u8 },

    /// The allocation extends past the end of the storage medium.
    #[error("record ends at byte {end}, past the end of the file ({file_len} bytes)")]
    OutOfBounds { end: u64, file_len: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum RegionError {
    #[error("[R201] Coordinate ({x}, {z}) is outside the 32x32 region grid.")]
    InvalidCoordinate { x: i32, z: i32 },

    /// Fatal for this coordinate only. Other records in the file stay readable.
    #[error("[R202] Record at {pos} is corrupted: {kind}")]
    Corrupted { pos: RegionPos, kind: Corruption },

    #[error("[R203] Record of {len} bytes needs {sectors} sectors, the limit is {limit}.")]
    RecordTooLarge {
        len: usize,
        sectors: usize,
        limit: usize,
    },

    #[error("[R204] Region file was opened read-only.")]
    ReadOnlyRegion,

    #[error("[R205] Backend '{backend:?}' does not support '{op}'.")]
    UnsupportedOperation {
        backend: BackendKind,
        op: &'static str,
    },

    #[error("[R206] Region file is closed.")]
    ClosedRegion,

    #[error("[R207] Region I/O failed: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = RegionError> = std::result::Result<T, E>;
