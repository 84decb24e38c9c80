//! Lock-free single-producer/single-consumer sample ring.
//!
//! The producer half lives with the audio source, the consumer half with the
//! analysis thread. Samples are stored as `f32` bit patterns in atomic slots
//! so neither side ever needs a lock or `unsafe`.
//!
//! Cursors are absolute 64-bit sample positions that only ever grow:
//!
//! ```text
//!   read            write          claim
//!    │   unread data  │  in flight   │
//! ───┴────────────────┴──────────────┴───►
//!    └──────── at most `capacity` ───────┘
//! ```
//!
//! With [`OverflowPolicy::DropOldest`] the producer pushes the read cursor
//! forward itself, so the backlog (and therefore latency) never exceeds
//! `capacity`. A consumer racing an overwrite detects it through the claim
//! cursor and discards the overwritten prefix.

use std::sync::{
    atomic::{fence, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use crate::config::OverflowPolicy;

/// Counters shared by both halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Writes that hit a full ring (dropped data or were rejected).
    pub overflows: u64,
    /// Samples overwritten before the consumer could read them.
    pub dropped_samples: u64,
}

/// Outcome of a consumer read.
#[derive(Debug, Clone, PartialEq)]
pub struct RingRead {
    /// Real samples at the front of the output; the remainder is zero padding.
    pub filled: usize,
}

impl RingRead {
    /// True when the output had to be padded with silence.
    pub fn is_underrun(&self, requested: usize) -> bool {
        self.filled < requested
    }
}

struct Shared {
    slots: Box<[AtomicU32]>,
    capacity: u64,
    policy: OverflowPolicy,
    write: AtomicU64,
    claim: AtomicU64,
    read: AtomicU64,
    overflows: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn slot(&self, position: u64) -> &AtomicU32 {
        &self.slots[(position % self.capacity) as usize]
    }

    fn stats(&self) -> RingStats {
        RingStats {
            overflows: self.overflows.load(Ordering::Relaxed),
            dropped_samples: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Creates a ring holding `capacity` samples and returns its two halves.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn sample_ring(capacity: usize, policy: OverflowPolicy) -> (RingProducer, RingConsumer) {
    assert!(capacity > 0, "ring capacity must be positive");

    let slots = (0..capacity)
        .map(|_| AtomicU32::new(0.0_f32.to_bits()))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let shared = Arc::new(Shared {
        slots,
        capacity: capacity as u64,
        policy,
        write: AtomicU64::new(0),
        claim: AtomicU64::new(0),
        read: AtomicU64::new(0),
        overflows: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });

    (
        RingProducer {
            shared: shared.clone(),
        },
        RingConsumer { shared },
    )
}

/// Write half. Owned by exactly one producer thread.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Appends `chunk` to the ring.
    ///
    /// Returns `false` only under [`OverflowPolicy::Stall`] when the chunk
    /// does not fit; nothing is written in that case. Under
    /// [`OverflowPolicy::DropOldest`] the write always succeeds.
    pub fn write(&mut self, chunk: &[f32]) -> bool {
        if chunk.is_empty() {
            return true;
        }

        let shared = &*self.shared;
        let capacity = shared.capacity;
        let len = chunk.len() as u64;
        let write = shared.write.load(Ordering::Relaxed);

        if shared.policy == OverflowPolicy::Stall {
            let read = shared.read.load(Ordering::Acquire);
            if write + len - read > capacity {
                shared.overflows.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        // Only the newest `capacity` samples of an oversized chunk survive.
        let skip = len.saturating_sub(capacity);
        let end = write + len;

        shared.claim.store(end, Ordering::Relaxed);
        fence(Ordering::Release);
        for (offset, sample) in chunk[skip as usize..].iter().enumerate() {
            shared
                .slot(write + skip + offset as u64)
                .store(sample.to_bits(), Ordering::Relaxed);
        }
        shared.write.store(end, Ordering::Release);

        if shared.policy == OverflowPolicy::DropOldest {
            let floor = end.saturating_sub(capacity);
            let previous = shared.read.fetch_max(floor, Ordering::AcqRel);
            if previous < floor {
                shared.overflows.fetch_add(1, Ordering::Relaxed);
                shared
                    .dropped
                    .fetch_add(floor - previous, Ordering::Relaxed);
            }
        }

        true
    }

    /// Free space in samples as seen by the producer.
    pub fn free_len(&self) -> usize {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        (shared.capacity - (write - read).min(shared.capacity)) as usize
    }

    /// Absolute number of samples written so far.
    pub fn position(&self) -> u64 {
        self.shared.write.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Read half. Owned by exactly one consumer thread.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Reads up to `out.len()` of the oldest unread samples into `out`,
    /// zero-padding whatever could not be filled. Never blocks.
    pub fn read_into(&mut self, out: &mut [f32]) -> RingRead {
        let shared = &*self.shared;
        let capacity = shared.capacity;

        // Read before write: a drop-oldest producer may push `read` forward
        // at any time, and it must never end up past the `write` we use.
        let read = shared.read.load(Ordering::Acquire);
        let write = shared.write.load(Ordering::Acquire);
        let start = read.max(write.saturating_sub(capacity)).min(write);
        let taken = (write.saturating_sub(start) as usize).min(out.len());

        for (offset, slot) in out[..taken].iter_mut().enumerate() {
            *slot = f32::from_bits(shared.slot(start + offset as u64).load(Ordering::Relaxed));
        }

        // Anything the producer claimed after we started may have replaced
        // the oldest samples we just copied.
        fence(Ordering::Acquire);
        let claim = shared.claim.load(Ordering::Relaxed);
        let valid_from = start.max(claim.saturating_sub(capacity));
        let torn = ((valid_from - start) as usize).min(taken);

        if torn > 0 {
            out.copy_within(torn..taken, 0);
        }
        let filled = taken - torn;
        out[filled..].fill(0.0);

        shared
            .read
            .fetch_max(start + taken as u64, Ordering::AcqRel);

        RingRead { filled }
    }

    /// Allocating convenience wrapper around [`RingConsumer::read_into`].
    pub fn read(&mut self, max_samples: usize) -> (Vec<f32>, RingRead) {
        let mut out = vec![0.0; max_samples];
        let report = self.read_into(&mut out);
        (out, report)
    }

    /// Unread samples currently buffered.
    pub fn available(&self) -> usize {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Acquire);
        let read = shared.read.load(Ordering::Acquire);
        (write.saturating_sub(read)).min(shared.capacity) as usize
    }

    /// Discards everything currently buffered.
    pub fn clear(&mut self) {
        let write = self.shared.write.load(Ordering::Acquire);
        self.shared.read.fetch_max(write, Ordering::AcqRel);
    }

    /// Absolute position of the most recent published write.
    pub fn write_position(&self) -> u64 {
        self.shared.write.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

impl std::fmt::Debug for RingProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingProducer")
            .field("capacity", &self.shared.capacity)
            .field("position", &self.position())
            .finish()
    }
}

impl std::fmt::Debug for RingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingConsumer")
            .field("capacity", &self.shared.capacity)
            .field("available", &self.available())
            .finish()
    }
}
