//! Lock-free overwrite ring for 16-bit PCM samples.
//!
//! One [`RingWriter`] (the sampling task) appends; any number of
//! [`RingReader`] cursors, created from a cloned [`SampleRing`] handle, copy
//! out. Nothing here takes a lock or blocks.
//!
//! ## Indexing
//!
//! Positions are absolute `u64` sample sequence numbers. The slot for
//! position `p` is `p & mask`, so capacity is always a power of two.
//!
//! - `head`: samples fully published. Readers never read at or past it.
//! - `claimed`: upper bound of what the writer may be overwriting right now.
//!   It is stored *before* slots are touched and `head` is stored after.
//!
//! A reader copies first, then checks `claimed`: every copied position below
//! `claimed - capacity` may have been clobbered mid-copy and is zero-filled and
//! reported as lost (see [`ReadOutcome`]).

mod reader;

pub use reader::{ReadOutcome, RingReader};

use std::sync::atomic::{fence, AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Native sample format of the ring.
pub type Sample = i16;

/// Sample rate the whole detection chain runs at (Hz).
pub const SAMPLE_RATE: u32 = 16_000;

/// Default minimum capacity: one second at [`SAMPLE_RATE`].
/// Rounded up to 16 384 slots.
pub const DEFAULT_RING_CAPACITY: usize = SAMPLE_RATE as usize;

pub(crate) struct RingShared {
    slots: Box<[AtomicI16]>,
    mask: u64,
    head: AtomicU64,
    claimed: AtomicU64,
}

impl RingShared {
    fn capacity(&self) -> u64 {
        self.mask + 1
    }

    fn load_slot(&self, position: u64) -> Sample {
        self.slots[(position & self.mask) as usize].load(Ordering::Relaxed)
    }
}

/// Cloneable handle used to create reader cursors.
#[derive(Clone)]
pub struct SampleRing {
    shared: Arc<RingShared>,
}

impl SampleRing {
    /// Slot count (a power of two).
    pub fn capacity(&self) -> usize {
        self.shared.capacity() as usize
    }

    /// Total samples ever published.
    pub fn written(&self) -> u64 {
        self.shared.head.load(Ordering::Acquire)
    }

    /// New cursor positioned at the current write head (no backlog).
    pub fn reader(&self) -> RingReader {
        RingReader::new(Arc::clone(&self.shared))
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("capacity", &self.capacity())
            .field("written", &self.written())
            .finish()
    }
}

/// The single producer half. Not `Clone`: there is exactly one writer.
pub struct RingWriter {
    shared: Arc<RingShared>,
}

impl RingWriter {
    /// Append samples, overwriting the oldest data when full. Never blocks.
    ///
    /// When `samples` is longer than the ring only its newest `capacity`
    /// samples are stored; the write head still advances by the full length.
    pub fn write(&mut self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }

        let shared = &*self.shared;
        let capacity = shared.capacity() as usize;
        // Only this writer stores `head`, so a relaxed load sees its own value.
        let head = shared.head.load(Ordering::Relaxed);
        let end = head + samples.len() as u64;

        let tail = if samples.len() > capacity {
            &samples[samples.len() - capacity..]
        } else {
            samples
        };
        let start = end - tail.len() as u64;

        shared.claimed.store(end, Ordering::Relaxed);
        fence(Ordering::Release);

        for (offset, &sample) in tail.iter().enumerate() {
            let slot = ((start + offset as u64) & shared.mask) as usize;
            shared.slots[slot].store(sample, Ordering::Relaxed);
        }

        shared.head.store(end, Ordering::Release);
    }

    /// Total samples ever written.
    pub fn written(&self) -> u64 {
        self.shared.head.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity() as usize
    }
}

/// Create the writer and a reader handle over a zeroed ring of at least
/// `min_capacity` samples (rounded up to a power of two, minimum 2).
pub fn create_sample_ring(min_capacity: usize) -> (RingWriter, SampleRing) {
    let capacity = min_capacity.max(2).next_power_of_two();
    debug!(capacity, requested = min_capacity, "allocating sample ring");

    let slots: Box<[AtomicI16]> = (0..capacity).map(|_| AtomicI16::new(0)).collect();
    let shared = Arc::new(RingShared {
        slots,
        mask: capacity as u64 - 1,
        head: AtomicU64::new(0),
        claimed: AtomicU64::new(0),
    });

    (
        RingWriter {
            shared: Arc::clone(&shared),
        },
        SampleRing { shared },
    )
}
