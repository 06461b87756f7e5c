//! Error types returned by the log, its segments, and the record codec.

use thiserror::Error;

/// Errors surfaced by record decoding, segment I/O, and log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("CRC mismatch decoding record")]
    BadCrc,

    #[error("unexpected end of file while reading a frame")]
    UnexpectedEof,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("segment already exists for start offset {0}")]
    SegmentExists(u64),

    #[error("no segment covers offset {0}")]
    OffsetBelowLog(u64),

    #[error("consumer closed")]
    Closed,
}
