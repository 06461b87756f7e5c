//! The store abstraction (enumerate/create segments) and its sole
//! concrete, file-backed implementation.

use std::fs::{self, OpenOptions};
use std::io::{self, Seek};
use std::path::{Path, PathBuf};

use crate::error::LogError;
use crate::segment::{SegmentAppender, SegmentReader};

/// A single segment: a contiguous, append-only run of frames starting at
/// `start_offset`.
pub trait Segment: Send + Sync {
    fn start_offset(&self) -> u64;

    /// Opens a writer positioned past the last valid frame. Implementations
    /// must perform tail-loss recovery here: truncate at the last clean
    /// frame boundary before handing back the writer.
    fn appender(&self) -> Result<SegmentAppender, LogError>;

    /// Opens a reader positioned at the start of the segment.
    fn reader(&self) -> Result<SegmentReader, LogError>;
}

/// Enumerates and creates the segments backing a log.
pub trait Store: Send + Sync {
    /// All segments, in no particular order (the log sorts defensively).
    fn segments(&self) -> Result<Vec<Box<dyn Segment>>, LogError>;

    /// Creates a new, empty segment whose first record will have this
    /// start offset. Errors if a segment for this offset already exists.
    fn add_segment(&self, start_offset: u64) -> Result<Box<dyn Segment>, LogError>;
}

const FILENAME_DIGITS: usize = 20;

fn segment_filename(start_offset: u64) -> String {
    format!("{:0width$}.log", start_offset, width = FILENAME_DIGITS)
}

fn parse_segment_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".log")?;
    if stem.len() != FILENAME_DIGITS || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// A directory of `NNNN...NNNN.log` segment files.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Store for FileStore {
    fn segments(&self) -> Result<Vec<Box<dyn Segment>>, LogError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut segments = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(start_offset) = parse_segment_filename(name) else {
                continue;
            };
            segments.push(Box::new(FileSegment {
                path: entry.path(),
                start_offset,
            }) as Box<dyn Segment>);
        }
        Ok(segments)
    }

    fn add_segment(&self, start_offset: u64) -> Result<Box<dyn Segment>, LogError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(segment_filename(start_offset));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LogError::SegmentExists(start_offset));
            }
            Err(err) => return Err(err.into()),
        }
        Ok(Box::new(FileSegment { path, start_offset }))
    }
}

/// One `.log` file on disk.
#[derive(Debug, Clone)]
pub struct FileSegment {
    path: PathBuf,
    start_offset: u64,
}

impl FileSegment {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Segment for FileSegment {
    fn start_offset(&self) -> u64 {
        self.start_offset
    }

    fn appender(&self) -> Result<SegmentAppender, LogError> {
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut reader = SegmentReader::new(Box::new(file.try_clone()?));
        let outcome = reader.seek_to_end()?;
        let position = reader.position();

        if outcome.corrupted {
            file.set_len(position)?;
            tracing::warn!(
                segment = %self.path.display(),
                recovered_offset = outcome.last_offset,
                truncated_to = position,
                "tail-loss recovery truncated segment",
            );
        }
        file.seek(io::SeekFrom::Start(position))?;
        Ok(SegmentAppender::new(Box::new(file), position))
    }

    fn reader(&self) -> Result<SegmentReader, LogError> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        Ok(SegmentReader::new(Box::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1, "00000000000000000001.log")]
    #[test_case(0, "00000000000000000000.log")]
    #[test_case(12345, "00000000000000012345.log")]
    fn filename_round_trips(offset: u64, expected: &str) {
        assert_eq!(segment_filename(offset), expected);
        assert_eq!(parse_segment_filename(expected), Some(offset));
    }

    #[test_case("readme.md")]
    #[test_case("123.log")]
    #[test_case("0000000000000000000x.log")]
    fn non_matching_names_are_ignored(name: &str) {
        assert_eq!(parse_segment_filename(name), None);
    }

    #[test]
    fn add_segment_twice_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.add_segment(1).unwrap();
        let err = store.add_segment(1).unwrap_err();
        assert!(matches!(err, LogError::SegmentExists(1)));
    }

    #[test]
    fn segments_lists_created_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.add_segment(1).unwrap();
        store.add_segment(50).unwrap();
        let mut offsets: Vec<u64> = store
            .segments()
            .unwrap()
            .iter()
            .map(|s| s.start_offset())
            .collect();
        offsets.sort_unstable();
        assert_eq!(offsets, vec![1, 50]);
    }
}
