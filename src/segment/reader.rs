//! Sequential and positioned reads over a single segment's frames.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::LogError;
use crate::record::{MIN_RECORD_LEN, Record};

use super::SegmentBackend;

const FRAME_HEADER_LEN: usize = 8 + 4;

enum ReadOutcome {
    Full,
    Partial,
    Eof,
}

fn read_tracked<R: Read + ?Sized>(backend: &mut R, buf: &mut [u8]) -> std::io::Result<ReadOutcome> {
    let mut read = 0;
    while read < buf.len() {
        match backend.read(&mut buf[read..])? {
            0 => break,
            n => read += n,
        }
    }
    Ok(if read == 0 {
        ReadOutcome::Eof
    } else if read < buf.len() {
        ReadOutcome::Partial
    } else {
        ReadOutcome::Full
    })
}

/// Outcome of scanning a segment to its end: the highest offset
/// successfully read (0 if the segment holds no valid records), and
/// whether a torn or corrupt frame was found past the last good one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekToEndOutcome {
    pub last_offset: u64,
    pub corrupted: bool,
}

/// Reads framed records from a segment backend, tracking the logical byte
/// position of the next frame to read. On any read or CRC failure the
/// backend is rewound to the position this call started from; a reader
/// never leaves itself mid-frame.
pub struct SegmentReader {
    backend: Box<dyn SegmentBackend>,
    position: u64,
}

impl SegmentReader {
    pub fn new(backend: Box<dyn SegmentBackend>) -> Self {
        Self {
            backend,
            position: 0,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    fn rewind_to(&mut self, pos: u64) -> Result<(), LogError> {
        self.backend.seek(SeekFrom::Start(pos))?;
        self.position = pos;
        Ok(())
    }

    /// Reads the next frame, returning `None` on a clean end-of-segment.
    /// Does not advance position on failure.
    pub fn next(&mut self) -> Result<Option<(u64, Record)>, LogError> {
        let start = self.position;
        let mut header = [0u8; FRAME_HEADER_LEN];
        match read_tracked(&mut self.backend, &mut header)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => {
                self.rewind_to(start)?;
                return Err(LogError::UnexpectedEof);
            }
            ReadOutcome::Full => {}
        }
        let offset = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let size = u32::from_be_bytes(header[8..12].try_into().unwrap());
        if size == 0 || size < MIN_RECORD_LEN {
            self.rewind_to(start)?;
            return Err(LogError::BadCrc);
        }

        let mut body = vec![0u8; size as usize];
        match read_tracked(&mut self.backend, &mut body)? {
            ReadOutcome::Full => {}
            _ => {
                self.rewind_to(start)?;
                return Err(LogError::UnexpectedEof);
            }
        }

        let record = match Record::decode(Bytes::from(body)) {
            Ok(record) => record,
            Err(err) => {
                self.rewind_to(start)?;
                return Err(err);
            }
        };

        self.position = start + FRAME_HEADER_LEN as u64 + size as u64;
        Ok(Some((offset, record)))
    }

    /// Like [`Self::next`] but streams the record body through the CRC
    /// engine instead of materializing it. Used for recovery scans where
    /// only the offset is needed.
    pub fn fast_read(&mut self) -> Result<Option<u64>, LogError> {
        let start = self.position;
        let mut header = [0u8; FRAME_HEADER_LEN];
        match read_tracked(&mut self.backend, &mut header)? {
            ReadOutcome::Eof => return Ok(None),
            ReadOutcome::Partial => {
                self.rewind_to(start)?;
                return Err(LogError::UnexpectedEof);
            }
            ReadOutcome::Full => {}
        }
        let offset = u64::from_be_bytes(header[0..8].try_into().unwrap());
        let size = u32::from_be_bytes(header[8..12].try_into().unwrap());
        if size == 0 || size < MIN_RECORD_LEN {
            self.rewind_to(start)?;
            return Err(LogError::BadCrc);
        }

        let mut crc_buf = [0u8; 4];
        match read_tracked(&mut self.backend, &mut crc_buf)? {
            ReadOutcome::Full => {}
            _ => {
                self.rewind_to(start)?;
                return Err(LogError::UnexpectedEof);
            }
        }
        let stored_crc = u32::from_be_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = (size - 4) as usize;
        let mut chunk = [0u8; 8192];
        while remaining > 0 {
            let want = remaining.min(chunk.len());
            match read_tracked(&mut self.backend, &mut chunk[..want])? {
                ReadOutcome::Full => {
                    hasher.update(&chunk[..want]);
                    remaining -= want;
                }
                _ => {
                    self.rewind_to(start)?;
                    return Err(LogError::UnexpectedEof);
                }
            }
        }

        if hasher.finalize() != stored_crc {
            self.rewind_to(start)?;
            return Err(LogError::BadCrc);
        }

        self.position = start + FRAME_HEADER_LEN as u64 + size as u64;
        Ok(Some(offset))
    }

    /// Scans from the start of the segment to its last clean frame
    /// boundary, leaving position there. The caller uses `corrupted` to
    /// decide whether to truncate the backend at `position()`.
    pub fn seek_to_end(&mut self) -> Result<SeekToEndOutcome, LogError> {
        self.rewind_to(0)?;
        let mut last_offset = 0u64;
        loop {
            match self.fast_read() {
                Ok(Some(offset)) => last_offset = offset,
                Ok(None) => {
                    return Ok(SeekToEndOutcome {
                        last_offset,
                        corrupted: false,
                    });
                }
                Err(LogError::BadCrc) | Err(LogError::UnexpectedEof) => {
                    return Ok(SeekToEndOutcome {
                        last_offset,
                        corrupted: true,
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Positions so the next `next()` call returns the smallest offset
    /// greater than or equal to `target`.
    pub fn seek_to_offset(&mut self, target: u64) -> Result<(), LogError> {
        self.rewind_to(0)?;
        loop {
            let before = self.position;
            match self.fast_read()? {
                None => {
                    self.rewind_to(before)?;
                    return Ok(());
                }
                Some(offset) => {
                    if offset >= target {
                        self.rewind_to(before)?;
                        return Ok(());
                    }
                }
            }
        }
    }
}
