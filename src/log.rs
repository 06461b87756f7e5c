//! The log: binds a [`Store`] and its active segment, synchronizes
//! producer/consumer access, and drives rollover and tail-follow wakeups.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::error::LogError;
use crate::record::Record;
use crate::segment::{SegmentAppender, SegmentReader};
use crate::store::{Segment, Store};

struct WriteState {
    appender: SegmentAppender,
    config: Config,
}

/// The lock/condvar pair guarding `next_offset`. Shared (via `Arc`) between
/// the log and every consumer/handle derived from it, so a handle can wake a
/// blocked waiter without going through the log itself.
struct OffsetWait {
    lock: Mutex<()>,
    cv: Condvar,
}

/// An append-only, segmented, offset-addressed log.
///
/// One write mutex serializes `append`/`set_config` (appender I/O included);
/// a separate rollover mutex guards the segment list so a consumer never
/// observes it mid-rotation. `next_offset` and `sync_offset` each have their
/// own lock/condvar pair so waiters can be woken independently of whichever
/// is blocking on the write mutex.
pub struct Log<St: Store> {
    store: St,
    segments: Mutex<Vec<Box<dyn Segment>>>,
    write: Mutex<WriteState>,
    next_offset: AtomicU64,
    offset_wait: Arc<OffsetWait>,
    sync_offset: AtomicU64,
    sync_lock: Mutex<()>,
    sync_cv: Condvar,
}

impl<St: Store> Log<St> {
    /// Opens the log, creating the first segment (start offset 1) if the
    /// store is empty. Recovers `next_offset` by scanning the tail segment.
    pub fn open(config: Config, store: St) -> Result<Self, LogError> {
        let mut segments = store.segments()?;
        segments.sort_by_key(|s| s.start_offset());
        if segments.is_empty() {
            segments.push(store.add_segment(1)?);
        }

        let tail = segments.len() - 1;
        let tail_start = segments[tail].start_offset();
        let mut scan = segments[tail].reader()?;
        let outcome = scan.seek_to_end()?;
        let next_offset = if outcome.last_offset == 0 {
            tail_start
        } else {
            outcome.last_offset + 1
        };
        tracing::debug!(next_offset, tail_start, "resolved starting offset on open");

        let appender = segments[tail].appender()?;

        Ok(Self {
            store,
            segments: Mutex::new(segments),
            write: Mutex::new(WriteState { appender, config }),
            next_offset: AtomicU64::new(next_offset),
            offset_wait: Arc::new(OffsetWait {
                lock: Mutex::new(()),
                cv: Condvar::new(),
            }),
            sync_offset: AtomicU64::new(next_offset - 1),
            sync_lock: Mutex::new(()),
            sync_cv: Condvar::new(),
        })
    }

    /// The next offset that will be assigned on append.
    pub fn next_offset(&self) -> u64 {
        self.next_offset.load(Ordering::Acquire)
    }

    /// The last offset known to be durable on disk.
    pub fn sync_offset(&self) -> u64 {
        self.sync_offset.load(Ordering::Acquire)
    }

    /// Appends a record, returning its assigned offset. Serialized with
    /// every other append (and with `set_config`) by the write mutex.
    ///
    /// `next_offset` is advanced before rollover is attempted: once the
    /// frame is on disk, the offset is committed regardless of whether the
    /// following rollover succeeds, so a caller retrying after a rollover
    /// error cannot cause the same offset to be written twice.
    pub fn append(&self, record: &Record) -> Result<u64, LogError> {
        let mut write = self.write.lock();
        let offset = self.next_offset.load(Ordering::Acquire);

        let position_after = write.appender.append(offset, record)?;

        {
            let _guard = self.offset_wait.lock.lock();
            self.next_offset.store(offset + 1, Ordering::Release);
            self.offset_wait.cv.notify_all();
        }

        if position_after > write.config.max_segment_size {
            self.rollover(&mut write, offset + 1)?;
        }

        if write.config.max_sync_lag >= 0 {
            let lag = offset - self.sync_offset.load(Ordering::Acquire);
            if lag as i64 > write.config.max_sync_lag {
                self.sync_locked(&mut write, offset)?;
            }
        }

        Ok(offset)
    }

    fn rollover(&self, write: &mut WriteState, new_start_offset: u64) -> Result<(), LogError> {
        write.appender.sync()?;
        let mut segments = self.segments.lock();
        let new_segment = self.store.add_segment(new_start_offset)?;
        tracing::info!(
            old_start = ?segments.last().map(|s| s.start_offset()),
            new_start = new_start_offset,
            "rolling over to a new segment",
        );
        write.appender = new_segment.appender()?;
        segments.push(new_segment);
        Ok(())
    }

    /// Flushes and fsyncs the active segment.
    pub fn sync(&self) -> Result<(), LogError> {
        let mut write = self.write.lock();
        let offset = self.next_offset.load(Ordering::Acquire).saturating_sub(1);
        self.sync_locked(&mut write, offset)
    }

    fn sync_locked(&self, write: &mut WriteState, offset: u64) -> Result<(), LogError> {
        write.appender.sync()?;
        let _guard = self.sync_lock.lock();
        self.sync_offset.store(offset, Ordering::Release);
        self.sync_cv.notify_all();
        Ok(())
    }

    /// Replaces the active configuration. Serialized with append.
    pub fn set_config(&self, config: Config) {
        let mut write = self.write.lock();
        write.config = config;
    }

    /// Blocks until `next_offset() > min_offset`.
    pub fn wait_offset(&self, min_offset: u64) {
        if self.next_offset.load(Ordering::Acquire) > min_offset {
            return;
        }
        let mut guard = self.offset_wait.lock.lock();
        while self.next_offset.load(Ordering::Acquire) <= min_offset {
            self.offset_wait.cv.wait(&mut guard);
        }
    }

    fn wait_offset_cancellable(
        &self,
        min_offset: u64,
        closed: &AtomicBool,
    ) -> Result<(), LogError> {
        if closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        if self.next_offset.load(Ordering::Acquire) > min_offset {
            return Ok(());
        }
        let mut guard = self.offset_wait.lock.lock();
        loop {
            if closed.load(Ordering::Acquire) {
                return Err(LogError::Closed);
            }
            if self.next_offset.load(Ordering::Acquire) > min_offset {
                return Ok(());
            }
            self.offset_wait.cv.wait(&mut guard);
        }
    }

    /// Blocks until `sync_offset() >= min_offset`.
    pub fn wait_sync_offset(&self, min_offset: u64) {
        if self.sync_offset.load(Ordering::Acquire) >= min_offset {
            return;
        }
        let mut guard = self.sync_lock.lock();
        while self.sync_offset.load(Ordering::Acquire) < min_offset {
            self.sync_cv.wait(&mut guard);
        }
    }

    /// Opens a consumer. `start_offset == 0` means tail-follow from now.
    pub fn consumer(&self, start_offset: u64) -> Result<Consumer<'_, St>, LogError> {
        let segments = self.segments.lock();
        let start_offset = if start_offset == 0 {
            self.next_offset.load(Ordering::Acquire)
        } else {
            start_offset
        };
        let index = segment_index_for_offset(&segments, start_offset)?;
        let mut reader = segments[index].reader()?;
        reader.seek_to_offset(start_offset)?;

        Ok(Consumer {
            log: self,
            reader,
            offset: start_offset,
            closed: Arc::new(AtomicBool::new(false)),
            offset_wait: Arc::clone(&self.offset_wait),
        })
    }

    /// Syncs and releases the active appender. Safe to call more than once.
    pub fn close(&self) -> Result<(), LogError> {
        let mut write = self.write.lock();
        write.appender.sync()
    }
}

fn segment_index_for_offset(
    segments: &[Box<dyn Segment>],
    offset: u64,
) -> Result<usize, LogError> {
    segments
        .iter()
        .rposition(|s| s.start_offset() <= offset)
        .ok_or(LogError::OffsetBelowLog(offset))
}

/// A shared flag letting another thread cancel a consumer's blocked `next`.
#[derive(Clone)]
pub struct ConsumerHandle {
    closed: Arc<AtomicBool>,
    offset_wait: Arc<OffsetWait>,
}

impl ConsumerHandle {
    /// Unblocks any in-flight `next` on the consumer this handle was taken
    /// from. Holds the same lock the waiter checks `closed` under, so the
    /// wakeup cannot be missed by a waiter that is about to park.
    pub fn close(&self) {
        let _guard = self.offset_wait.lock.lock();
        self.closed.store(true, Ordering::Release);
        self.offset_wait.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Reads a log from a chosen starting offset, blocking for new records at
/// the tail and transparently following segment rollovers.
pub struct Consumer<'log, St: Store> {
    log: &'log Log<St>,
    reader: SegmentReader,
    /// The next offset this consumer wants to return.
    offset: u64,
    closed: Arc<AtomicBool>,
    offset_wait: Arc<OffsetWait>,
}

impl<'log, St: Store> Consumer<'log, St> {
    /// A cloneable handle that can cancel a blocked `next` from another
    /// thread.
    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            closed: Arc::clone(&self.closed),
            offset_wait: Arc::clone(&self.offset_wait),
        }
    }

    /// Returns the next record in offset order, blocking until it is
    /// available. Returns `Err(LogError::Closed)` if cancelled via a
    /// [`ConsumerHandle`] while blocked.
    pub fn next(&mut self) -> Result<(u64, Record), LogError> {
        loop {
            self.log.wait_offset_cancellable(self.offset, &self.closed)?;

            match self.reader.next()? {
                Some((offset, record)) => {
                    if offset < self.offset {
                        continue;
                    }
                    self.offset = offset + 1;
                    return Ok((offset, record));
                }
                None => self.advance_segment()?,
            }
        }
    }

    fn advance_segment(&mut self) -> Result<(), LogError> {
        let segments = self.log.segments.lock();
        let index = segment_index_for_offset(&segments, self.offset)?;
        self.reader = segments[index].reader()?;
        Ok(())
    }

    /// Unblocks any in-flight `next` on this consumer, wherever it is
    /// running.
    pub fn close(&self) {
        let _guard = self.offset_wait.lock.lock();
        self.closed.store(true, Ordering::Release);
        self.offset_wait.cv.notify_all();
    }
}
