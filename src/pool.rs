//! Sample buffer pool.
//!
//! The pool owns a fixed set of `N` slots. Each slot is in exactly one state
//! at any time:
//!
//! ```text
//!            acquire_free                mark_ready
//!   Free ───────────────────▶ Submitted ─────────────▶ Ready (queued)
//!    ▲  ◀─────────────────────    │                        │ take_ready
//!    │   mark_free (discard)      │                        ▼
//!    └────────────────────────────┴─────────────────── Ready (lent)
//!                      mark_free (release)
//! ```
//!
//! `free + submitted + ready == N` holds after every transition. The pool does
//! no locking of its own; the streaming engine keeps it behind a mutex.

use std::collections::{BTreeMap, VecDeque};

use crate::buffer::SampleBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Free,
    Submitted { sequence: u64 },
    Ready { sequence: u64, lent: bool },
}

/// A transition was requested for a buffer whose slot is not in the
/// expected state (or whose sequence number does not match the slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleBuffer {
    pub slot: usize,
    pub sequence: u64,
}

/// Per-state slot counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub free: usize,
    pub submitted: usize,
    /// Ready buffers, queued or lent to the consumer
    pub ready: usize,
    /// Subset of `ready` currently held by the consumer
    pub lent: usize,
    pub total: usize,
}

impl PoolCounts {
    pub fn is_consistent(&self) -> bool {
        self.free + self.submitted + self.ready == self.total && self.lent <= self.ready
    }
}

pub struct BufferPool {
    buffer_size: usize,
    slots: Vec<Slot>,
    free: VecDeque<SampleBuffer>,
    ready: BTreeMap<u64, SampleBuffer>,
    next_sequence: u64,
}

impl BufferPool {
    /// Allocate `count` buffers of `buffer_size` bytes, all free.
    pub fn new(buffer_size: usize, count: usize) -> Self {
        Self {
            buffer_size,
            slots: vec![Slot::Free; count],
            free: (0..count)
                .map(|slot| SampleBuffer::new(slot, buffer_size))
                .collect(),
            ready: BTreeMap::new(),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Take a free buffer for submission, stamping it with the next sequence
    /// number. The slot moves to submitted.
    pub fn acquire_free(&mut self) -> Option<SampleBuffer> {
        let mut buffer = self.free.pop_front()?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        buffer.assign(sequence);
        self.slots[buffer.slot()] = Slot::Submitted { sequence };
        Some(buffer)
    }

    /// Undo [`BufferPool::acquire_free`] after the transport refused the
    /// buffer. The sequence number is not reused.
    pub fn unsubmit(&mut self, buffer: SampleBuffer) -> Result<(), StaleBuffer> {
        self.expect(&buffer, |s| matches!(s, Slot::Submitted { .. }))?;
        self.put_free(buffer);
        Ok(())
    }

    /// A submitted buffer was filled; queue it for delivery.
    pub fn mark_ready(&mut self, buffer: SampleBuffer) -> Result<(), (SampleBuffer, StaleBuffer)> {
        if let Err(stale) = self.expect(&buffer, |s| matches!(s, Slot::Submitted { .. })) {
            return Err((buffer, stale));
        }
        let sequence = buffer.sequence();
        self.slots[buffer.slot()] = Slot::Ready {
            sequence,
            lent: false,
        };
        self.ready.insert(sequence, buffer);
        Ok(())
    }

    /// Return a buffer to the free list. Valid for submitted buffers that
    /// are being discarded and for lent buffers the consumer released.
    pub fn mark_free(&mut self, buffer: SampleBuffer) -> Result<(), (SampleBuffer, StaleBuffer)> {
        let check = self.expect(&buffer, |s| {
            matches!(s, Slot::Submitted { .. } | Slot::Ready { lent: true, .. })
        });
        if let Err(stale) = check {
            return Err((buffer, stale));
        }
        self.put_free(buffer);
        Ok(())
    }

    /// Hand the next ready buffer to the consumer, strictly in sequence
    /// order. Returns `None` while an older submission is still in flight.
    pub fn take_ready(&mut self) -> Option<SampleBuffer> {
        let (&sequence, _) = self.ready.first_key_value()?;
        if self.oldest_in_flight().is_some_and(|oldest| oldest < sequence) {
            return None;
        }
        let buffer = self.ready.remove(&sequence)?;
        self.slots[buffer.slot()] = Slot::Ready {
            sequence,
            lent: true,
        };
        Some(buffer)
    }

    /// Free every queued (not yet delivered) ready buffer, returning how
    /// many were dropped.
    pub fn discard_ready(&mut self) -> usize {
        let queued = std::mem::take(&mut self.ready);
        let count = queued.len();
        for (_, buffer) in queued {
            self.put_free(buffer);
        }
        count
    }

    /// Give up on every submitted buffer: each slot is reset to free with a
    /// freshly allocated buffer. Late completions for the abandoned buffers
    /// are then rejected as stale. Returns the number of slots reclaimed.
    pub fn abandon_in_flight(&mut self) -> usize {
        let abandoned: Vec<(usize, u64)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, state)| match state {
                Slot::Submitted { sequence } => Some((slot, *sequence)),
                _ => None,
            })
            .collect();

        for &(slot, _) in &abandoned {
            self.put_free(SampleBuffer::new(slot, self.buffer_size));
        }
        abandoned.len()
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts {
            total: self.slots.len(),
            ..PoolCounts::default()
        };
        for slot in &self.slots {
            match slot {
                Slot::Free => counts.free += 1,
                Slot::Submitted { .. } => counts.submitted += 1,
                Slot::Ready { lent, .. } => {
                    counts.ready += 1;
                    if *lent {
                        counts.lent += 1;
                    }
                }
            }
        }
        counts
    }

    pub fn submitted(&self) -> usize {
        self.counts().submitted
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    /// Check the slot table against the owned collections.
    pub fn check_invariant(&self) -> bool {
        let counts = self.counts();
        counts.is_consistent()
            && counts.free == self.free.len()
            && counts.ready - counts.lent == self.ready.len()
    }

    fn expect(
        &self,
        buffer: &SampleBuffer,
        allowed: impl Fn(&Slot) -> bool,
    ) -> Result<(), StaleBuffer> {
        let stale = StaleBuffer {
            slot: buffer.slot(),
            sequence: buffer.sequence(),
        };
        let Some(state) = self.slots.get(buffer.slot()) else {
            return Err(stale);
        };
        let sequence = match state {
            Slot::Free => return Err(stale),
            Slot::Submitted { sequence } | Slot::Ready { sequence, .. } => *sequence,
        };
        if sequence != buffer.sequence() || !allowed(state) {
            return Err(stale);
        }
        Ok(())
    }

    fn put_free(&mut self, mut buffer: SampleBuffer) {
        buffer.clear();
        self.slots[buffer.slot()] = Slot::Free;
        self.free.push_back(buffer);
    }

    fn oldest_in_flight(&self) -> Option<u64> {
        self.slots
            .iter()
            .filter_map(|s| match s {
                Slot::Submitted { sequence } => Some(*sequence),
                _ => None,
            })
            .min()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.buffer_size)
            .field("counts", &self.counts())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}
