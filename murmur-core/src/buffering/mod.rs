//! Shared sample ring buffer between the capture and processing loops.
//!
//! `SampleRing` is the raw fixed-capacity circular store; `AudioRing` wraps
//! it in a cloneable, mutex-guarded handle so the two loops never observe
//! intermediate cursor state. The composite operations (`pop_exact`,
//! `push_evicting`) exist so that an occupancy check and the read/write it
//! gates happen under one lock acquisition.
//!
//! Capacity is fixed at construction; the hot path never reallocates.

pub mod chunk;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MurmurError, Result};

/// Fixed-capacity circular buffer of f32 audio samples.
///
/// `head` is the next write index, `tail` the next read index; a separate
/// occupancy count disambiguates empty from full when `head == tail`.
#[derive(Debug)]
pub struct SampleRing {
    data: Box<[f32]>,
    head: usize,
    tail: usize,
    len: usize,
}

impl SampleRing {
    /// Allocate a ring holding up to `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            data: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append `samples` in order, all-or-nothing.
    ///
    /// # Errors
    /// `MurmurError::RingOverflow` when fewer than `samples.len()` slots are
    /// free; the buffer is left untouched in that case.
    pub fn push(&mut self, samples: &[f32]) -> Result<()> {
        let free = self.capacity() - self.len;
        if samples.len() > free {
            return Err(MurmurError::RingOverflow {
                requested: samples.len(),
                free,
            });
        }

        let cap = self.data.len();
        let first = (cap - self.head).min(samples.len());
        self.data[self.head..self.head + first].copy_from_slice(&samples[..first]);
        let rest = samples.len() - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&samples[first..]);
        }
        self.head = (self.head + samples.len()) % cap;
        self.len += samples.len();
        Ok(())
    }

    /// Copy up to `out.len()` samples into `out`, consuming them.
    ///
    /// Returns the number actually copied — `min(out.len(), len())`. A
    /// partial read is legal; never blocks.
    pub fn pop(&mut self, out: &mut [f32]) -> usize {
        let n = self.copy_from_tail(out);
        self.tail = (self.tail + n) % self.data.len();
        self.len -= n;
        n
    }

    /// Same as [`pop`](Self::pop) but leaves the read cursor untouched.
    pub fn peek(&self, out: &mut [f32]) -> usize {
        self.copy_from_tail(out)
    }

    /// Drop up to `n` of the oldest samples, returning how many were dropped.
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.tail = (self.tail + n) % self.data.len();
        self.len -= n;
        n
    }

    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fixed total capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn copy_from_tail(&self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.data.len();
        let first = (cap - self.tail).min(n);
        out[..first].copy_from_slice(&self.data[self.tail..self.tail + first]);
        if n > first {
            out[first..n].copy_from_slice(&self.data[..n - first]);
        }
        n
    }
}

/// Cloneable thread-safe handle to a [`SampleRing`].
///
/// Held by both loops; every operation takes the lock once, so an occupancy
/// check never races the read or write it gates.
#[derive(Debug, Clone)]
pub struct AudioRing {
    inner: Arc<Mutex<SampleRing>>,
}

impl AudioRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SampleRing::with_capacity(capacity))),
        }
    }

    /// All-or-nothing append; see [`SampleRing::push`].
    pub fn push(&self, samples: &[f32]) -> Result<()> {
        self.inner.lock().push(samples)
    }

    /// Append `samples`, evicting the oldest unread audio first when the
    /// ring is short of space. Returns the number of samples evicted
    /// (0 on the normal path).
    ///
    /// This is the producer-side overflow policy: capture never blocks and
    /// never loses the newest audio; the stalest unread samples pay instead.
    pub fn push_evicting(&self, samples: &[f32]) -> usize {
        let mut ring = self.inner.lock();
        debug_assert!(
            samples.len() <= ring.capacity(),
            "push_evicting caller must push at most one ring's worth"
        );
        let free = ring.capacity() - ring.len();
        let evicted = if samples.len() > free {
            ring.discard(samples.len() - free)
        } else {
            0
        };
        // Cannot fail: eviction above made exactly enough room.
        let _ = ring.push(samples);
        evicted
    }

    /// Pop exactly `out.len()` samples, or none at all.
    ///
    /// Returns `false` (and copies nothing) when fewer samples are buffered,
    /// so callers can gate on whole chunks without a separate `len()` read.
    pub fn pop_exact(&self, out: &mut [f32]) -> bool {
        let mut ring = self.inner.lock();
        if ring.len() < out.len() {
            return false;
        }
        let n = ring.pop(out);
        debug_assert_eq!(n, out.len());
        true
    }

    /// Pop up to `out.len()` samples; partial reads legal.
    pub fn pop(&self, out: &mut [f32]) -> usize {
        self.inner.lock().pop(out)
    }

    /// Non-destructive read of up to `out.len()` samples.
    pub fn peek(&self, out: &mut [f32]) -> usize {
        self.inner.lock().peek(out)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}
