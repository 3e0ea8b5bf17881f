//! Independent read cursor over a [`SampleRing`](super::SampleRing).

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::{RingShared, Sample};

/// Result of one [`RingReader::read_into`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOutcome {
    /// Samples written to the front of the destination.
    pub copied: usize,
    /// Leading samples of `copied` that the writer lapped; zero-filled.
    pub lost: usize,
}

/// A cursor owned by one consumer. Holds no shared mutable state: any
/// number of readers can coexist with the writer.
pub struct RingReader {
    shared: Arc<RingShared>,
    position: u64,
    consumed: u64,
    lost: u64,
}

impl RingReader {
    pub(super) fn new(shared: Arc<RingShared>) -> Self {
        let position = shared.head.load(Ordering::Acquire);
        Self {
            shared,
            position,
            consumed: 0,
            lost: 0,
        }
    }

    /// Move to `samples` behind the current write head, clamped to the ring
    /// capacity and to the number of samples ever written.
    pub fn rewind(&mut self, samples: usize) {
        let head = self.shared.head.load(Ordering::Acquire);
        let back = (samples as u64).min(head).min(self.shared.capacity());
        self.position = head - back;
    }

    /// Samples between the cursor and the write head.
    pub fn available(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        head.saturating_sub(self.position) as usize
    }

    /// `true` if the writer has already overwritten the sample at the cursor.
    pub fn is_lapped(&self) -> bool {
        let claimed = self.shared.claimed.load(Ordering::Acquire);
        claimed.saturating_sub(self.shared.capacity()) > self.position
    }

    /// Absolute sequence number of the next sample to read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Samples handed out by this cursor so far (lost ones included).
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Samples this cursor had to zero-fill because the writer lapped it.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Copy up to `dest.len()` samples and advance. Returns immediately with
    /// whatever is available; never waits for the writer.
    pub fn read_into(&mut self, dest: &mut [Sample]) -> ReadOutcome {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Acquire);
        let start = self.position;
        let count = (head.saturating_sub(start) as usize).min(dest.len());

        for (offset, out) in dest[..count].iter_mut().enumerate() {
            *out = shared.load_slot(start + offset as u64);
        }

        // Pairs with the writer's release fence: if any slot above came from a
        // newer write, that write's `claimed` is visible here.
        fence(Ordering::Acquire);
        let claimed = shared.claimed.load(Ordering::Relaxed);
        let oldest_intact = claimed.saturating_sub(shared.capacity());
        let lost = (oldest_intact.saturating_sub(start) as usize).min(count);

        if lost > 0 {
            dest[..lost].fill(0);
            self.lost += lost as u64;
            debug!(lost, position = start, "reader lapped by writer; zero-filled");
        }

        self.position = start + count as u64;
        self.consumed += count as u64;

        ReadOutcome {
            copied: count,
            lost,
        }
    }

    /// Allocating convenience over [`read_into`](Self::read_into).
    pub fn read(&mut self, count: usize) -> Vec<Sample> {
        let mut out = vec![0; count];
        let outcome = self.read_into(&mut out);
        out.truncate(outcome.copied);
        out
    }
}

impl std::fmt::Debug for RingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingReader")
            .field("position", &self.position)
            .field("consumed", &self.consumed)
            .field("lost", &self.lost)
            .finish()
    }
}
