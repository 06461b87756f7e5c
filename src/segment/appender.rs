//! Buffered, syncable appending of framed records to a segment.

use std::io::{Seek, SeekFrom, Write};

use bytes::BytesMut;

use crate::error::LogError;
use crate::record::Record;

use super::SegmentBackend;

/// Appends frames to a segment backend, tracking the byte position past the
/// segment's start. Does not enforce a size limit itself; the log decides
/// when to roll over based on the position this returns.
pub struct SegmentAppender {
    backend: Box<dyn SegmentBackend>,
    position: u64,
}

impl SegmentAppender {
    pub fn new(backend: Box<dyn SegmentBackend>, position: u64) -> Self {
        Self { backend, position }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Writes one frame for `record` at the given log offset, returning the
    /// byte position after the write. On any write error the backend is
    /// rewound to the pre-call position so a retry cannot produce a
    /// half-written frame on top of a partially-flushed one.
    pub fn append(&mut self, offset: u64, record: &Record) -> Result<u64, LogError> {
        let body = record.encode();
        let mut frame = BytesMut::with_capacity(8 + 4 + body.len());
        frame.extend_from_slice(&offset.to_be_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);

        if let Err(err) = self.backend.write_all(&frame) {
            let _ = self.backend.seek(SeekFrom::Start(self.position));
            return Err(err.into());
        }

        self.position += frame.len() as u64;
        Ok(self.position)
    }

    /// Flushes and fsyncs the backend. Idempotent.
    pub fn sync(&mut self) -> Result<(), LogError> {
        self.backend.flush()?;
        self.backend.fsync()?;
        Ok(())
    }
}
