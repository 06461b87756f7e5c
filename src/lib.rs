//! Append-only, segmented, offset-addressed message log — a local durable
//! queue in the style of a single-partition Kafka topic.
//!
//! A single writer appends length-framed, CRC-checksummed records; any
//! number of concurrent readers consume by monotonically increasing
//! offset, blocking at the tail until new records arrive. The log survives
//! process crashes: on reopen it recovers by scanning the tail segment,
//! discovering the last valid offset, and truncating any torn write.
//!
//! Replication, compaction, secondary indices, authentication, and network
//! transport are out of scope; this crate is the local storage engine only.

pub mod config;
pub mod error;
pub mod log;
pub mod record;
pub mod segment;
pub mod store;

pub use config::Config;
pub use error::LogError;
pub use log::{Consumer, ConsumerHandle, Log};
pub use record::Record;
pub use segment::{SegmentAppender, SegmentBackend, SegmentReader};
pub use store::{FileSegment, FileStore, Segment, Store};

impl Log<FileStore> {
    /// Opens (or creates) a log backed by a directory of `.log` segment
    /// files.
    pub fn open_dir(dir: impl Into<std::path::PathBuf>, config: Config) -> Result<Self, LogError> {
        Log::open(config, FileStore::new(dir))
    }
}
