//! Per-segment byte-stream backends: sequential/random-access reading and
//! buffered, syncable appending over a single segment file.

mod appender;
mod reader;

pub use appender::SegmentAppender;
pub use reader::{SeekToEndOutcome, SegmentReader};

use std::fs::File;
use std::io::{Read, Seek, Write};

/// The byte-stream contract a segment's storage backend must satisfy:
/// random-access read/write plus an explicit durability barrier. The only
/// concrete implementation shipped here is a plain file; the trait exists so
/// the reader/appender logic does not hard-code `std::fs::File`.
pub trait SegmentBackend: Read + Write + Seek + Send {
    fn fsync(&mut self) -> std::io::Result<()>;
}

impl SegmentBackend for File {
    fn fsync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }
}

impl SegmentBackend for Box<dyn SegmentBackend> {
    fn fsync(&mut self) -> std::io::Result<()> {
        (**self).fsync()
    }
}
