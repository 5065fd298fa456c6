//! Ring buffer implementation

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Marker for "no keyframe recorded yet"
const NO_KEYFRAME: u64 = u64::MAX;

/// Where a new reader starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only frames written after the reader was created
    Live,
    /// The most recent keyframe if it is still in the ring, else live
    LatestKeyframe,
}

/// Reader-side conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Nothing new to read (non-blocking read only)
    #[error("ring empty")]
    Empty,
    /// The producer overwrote this many unread frames; the cursor now points
    /// at the oldest valid slot
    #[error("reader lagged by {0} frames")]
    Lagged(u64),
    /// The producer is gone and everything written has been read
    #[error("ring closed")]
    Closed,
}

/// A published slot value tagged with its sequence number
type Published<T> = Option<(u64, Arc<T>)>;

struct Shared<T> {
    slots: Box<[RwLock<Published<T>>]>,
    /// Number of values written so far (the next sequence number)
    written: AtomicU64,
    /// Sequence of the latest keyframe usable as an attach point
    keyframe: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> Shared<T> {
    fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    fn slot(&self, seq: u64) -> &RwLock<Published<T>> {
        &self.slots[(seq % self.capacity()) as usize]
    }

    fn reader(self: &Arc<Self>, start: StartPosition) -> RingReader<T> {
        let written = self.written.load(Ordering::Acquire);
        let next = match start {
            StartPosition::Live => written,
            StartPosition::LatestKeyframe => {
                let keyframe = self.keyframe.load(Ordering::Acquire);
                if keyframe != NO_KEYFRAME
                    && keyframe < written
                    && written - keyframe <= self.capacity()
                {
                    keyframe
                } else {
                    written
                }
            }
        };

        RingReader {
            shared: Arc::clone(self),
            next,
        }
    }
}

/// Producer side of the ring
///
/// There is exactly one writer per ring; it is not `Clone`. Dropping the
/// writer closes the ring.
pub struct RingWriter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> RingWriter<T> {
    /// Create a ring with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| RwLock::new(None)).collect();

        Self {
            shared: Arc::new(Shared {
                slots,
                written: AtomicU64::new(0),
                keyframe: AtomicU64::new(NO_KEYFRAME),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Publish a value and wake all waiting readers
    ///
    /// Never blocks on readers. Returns the sequence number of the value.
    pub fn write(&self, value: T) -> u64 {
        let seq = self.shared.written.load(Ordering::Relaxed);
        *self.shared.slot(seq).write() = Some((seq, Arc::new(value)));
        self.shared.written.store(seq + 1, Ordering::Release);
        self.shared.notify.notify_waiters();
        seq
    }

    /// Record `seq` as the attach point for keyframe readers
    pub fn mark_keyframe(&self, seq: u64) {
        self.shared.keyframe.store(seq, Ordering::Release);
    }

    /// Number of values written so far
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Ring capacity in slots
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// Create a reader
    pub fn reader(&self, start: StartPosition) -> RingReader<T> {
        self.shared.reader(start)
    }

    /// Get a cloneable handle for creating readers
    pub fn handle(&self) -> RingHandle<T> {
        RingHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Close the ring; readers drain what is left and then see `Closed`
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Check if the ring has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl<T> Drop for RingWriter<T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cloneable read-only handle on a ring
pub struct RingHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for RingHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> RingHandle<T> {
    /// Create a reader
    pub fn reader(&self, start: StartPosition) -> RingReader<T> {
        self.shared.reader(start)
    }

    /// The most recently written value, if still present
    pub fn latest(&self) -> Option<Arc<T>> {
        let written = self.shared.written.load(Ordering::Acquire);
        let seq = written.checked_sub(1)?;
        let slot = self.shared.slot(seq).read();
        let latest = match slot.as_ref() {
            Some((s, value)) if *s == seq => Some(Arc::clone(value)),
            _ => None,
        };
        latest
    }

    /// Number of values written so far
    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    /// Check if the ring has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Independent read cursor
pub struct RingReader<T> {
    shared: Arc<Shared<T>>,
    next: u64,
}

impl<T> RingReader<T> {
    /// Sequence number of the next value this reader will return
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Number of values written but not yet read by this cursor
    pub fn pending(&self) -> u64 {
        self.shared
            .written
            .load(Ordering::Acquire)
            .saturating_sub(self.next)
    }

    /// Read the next value without waiting
    pub fn try_next(&mut self) -> Result<Arc<T>, ReadError> {
        let written = self.shared.written.load(Ordering::Acquire);
        if self.next >= written {
            return if self.shared.closed.load(Ordering::Acquire) {
                Err(ReadError::Closed)
            } else {
                Err(ReadError::Empty)
            };
        }

        let capacity = self.shared.capacity();
        let oldest = written.saturating_sub(capacity);
        if self.next < oldest {
            return Err(self.skip_to(oldest));
        }

        let found = {
            let slot = self.shared.slot(self.next).read();
            let found = match slot.as_ref() {
                Some((seq, value)) if *seq == self.next => Ok(Arc::clone(value)),
                Some((seq, _)) => Err(*seq),
                None => return Err(ReadError::Empty),
            };
            found
        };

        match found {
            Ok(value) => {
                self.next += 1;
                Ok(value)
            }
            // Lapped between loading `written` and reading the slot
            Err(seq) => Err(self.skip_to((seq + 1).saturating_sub(capacity))),
        }
    }

    /// Wait for and read the next value
    ///
    /// Suspends cooperatively until the producer publishes past this cursor.
    pub async fn next(&mut self) -> Result<Arc<T>, ReadError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a write in between is not missed
            notified.as_mut().enable();

            match self.try_next() {
                Err(ReadError::Empty) => notified.await,
                other => return other,
            }
        }
    }

    fn skip_to(&mut self, oldest: u64) -> ReadError {
        let skipped = oldest - self.next;
        self.next = oldest;
        ReadError::Lagged(skipped)
    }
}
