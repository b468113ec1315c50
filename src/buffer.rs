//! Reusable sample buffers.
//!
//! A [`SampleBuffer`] is a fixed-capacity block of interleaved cu8 I/Q pairs.
//! It is deliberately not `Clone`: a buffer is moved from the pool to the
//! transport, back to the pool, to the consumer and back again, so exactly
//! one stage owns it at any time.

use num_complex::Complex;

use crate::IqFormat;

pub struct SampleBuffer {
    slot: usize,
    sequence: u64,
    len: usize,
    data: Box<[u8]>,
}

impl SampleBuffer {
    pub(crate) fn new(slot: usize, capacity: usize) -> Self {
        Self {
            slot,
            sequence: 0,
            len: 0,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Pool slot this buffer occupies
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Sequence number assigned when the buffer was last submitted
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of complete I/Q pairs
    pub fn num_samples(&self) -> usize {
        self.len / 2
    }

    /// The filled part of the buffer
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Iterate over the filled I/Q pairs
    pub fn iq_pairs(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.as_bytes().chunks_exact(2).map(|c| (c[0], c[1]))
    }

    /// Convert the filled part to normalized complex samples
    pub fn to_complex(&self) -> Vec<Complex<f32>> {
        crate::convert_bytes_to_complex(IqFormat::Cu8, self.as_bytes())
    }

    /// Whole backing storage, for transports filling the buffer in place.
    /// Call [`SampleBuffer::set_len`] afterwards.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Record how many bytes the transport wrote (clamped to capacity)
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Copy `bytes` into the buffer, returning how many fit
    pub fn fill_from(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.data.len());
        self.data[..n].copy_from_slice(&bytes[..n]);
        self.len = n;
        n
    }

    pub(crate) fn assign(&mut self, sequence: u64) {
        self.sequence = sequence;
        self.len = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("slot", &self.slot)
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}
