//! Bounded-memory approximate shuffling.
//!
//! A [`ShuffleBuffer`] holds at most `capacity` items. Each incoming item
//! evicts a uniformly chosen resident once the buffer is full; when the input
//! runs out the residents drain in random order. Output is a permutation of
//! the input, and memory never exceeds `capacity` items.
//!
//! [`Shuffled`] adapts a plain iterator. [`TryShuffled`] adapts an iterator of
//! `Result`s: an `Err` is passed through as soon as it is pulled and the
//! adapter is exhausted afterwards.
//!
//! ```
//! use tfrecord_loader::shuffle::ShuffleExt;
//! # fn main() -> tfrecord_loader::Result<()> {
//! let mut out: Vec<u32> = (0..100).shuffled(16, Some(42))?.collect();
//! out.sort_unstable();
//! assert_eq!(out, (0..100).collect::<Vec<_>>());
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Fixed-capacity reservoir that hands items back in random order.
#[derive(Debug)]
pub struct ShuffleBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    rng: StdRng,
}

impl<T> ShuffleBuffer<T> {
    /// # Errors
    /// [`Error::Configuration`] when `capacity` is zero.
    pub fn new(capacity: usize, seed: Option<u64>) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("shuffle buffer capacity must be at least 1"));
        }
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            items: Vec::with_capacity(capacity),
            capacity,
            rng,
        })
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Add `item`. Once the buffer is full, a random resident is swapped out
    /// and returned in its place.
    pub fn offer(&mut self, item: T) -> Option<T> {
        if self.items.len() < self.capacity {
            self.items.push(item);
            return None;
        }
        let slot = self.rng.gen_range(0..self.items.len());
        Some(std::mem::replace(&mut self.items[slot], item))
    }

    /// Remove and return a random resident.
    pub fn pop_random(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let slot = self.rng.gen_range(0..self.items.len());
        Some(self.items.swap_remove(slot))
    }
}

fn warn_if_underfilled<T>(buffer: &ShuffleBuffer<T>) {
    if !buffer.is_full() {
        warn!(
            items = buffer.len(),
            capacity = buffer.capacity(),
            "input ended before the shuffle buffer filled; shuffle covers the whole input"
        );
    }
}

/// Iterator adapter returned by [`ShuffleExt::shuffled`].
pub struct Shuffled<I: Iterator> {
    inner: I,
    buffer: ShuffleBuffer<I::Item>,
    exhausted: bool,
}

impl<I: Iterator> Shuffled<I> {
    /// # Errors
    /// [`Error::Configuration`] when `capacity` is zero.
    pub fn new(inner: I, capacity: usize, seed: Option<u64>) -> Result<Self> {
        Ok(Self {
            inner,
            buffer: ShuffleBuffer::new(capacity, seed)?,
            exhausted: false,
        })
    }
}

impl<I: Iterator> Iterator for Shuffled<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        while !self.exhausted {
            match self.inner.next() {
                Some(item) => {
                    if let Some(out) = self.buffer.offer(item) {
                        return Some(out);
                    }
                }
                None => {
                    self.exhausted = true;
                    warn_if_underfilled(&self.buffer);
                }
            }
        }
        self.buffer.pop_random()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let held = self.buffer.len();
        if self.exhausted {
            return (held, Some(held));
        }
        let (lo, hi) = self.inner.size_hint();
        (
            lo.saturating_add(held),
            hi.and_then(|h| h.checked_add(held)),
        )
    }
}

/// Like [`Shuffled`] for fallible streams.
///
/// Buffered items are dropped when an error is surfaced.
pub struct TryShuffled<I, T> {
    inner: I,
    buffer: ShuffleBuffer<T>,
    exhausted: bool,
    failed: bool,
}

impl<I, T, E> TryShuffled<I, T>
where
    I: Iterator<Item = std::result::Result<T, E>>,
{
    /// # Errors
    /// [`Error::Configuration`] when `capacity` is zero.
    pub fn new(inner: I, capacity: usize, seed: Option<u64>) -> Result<Self> {
        Ok(Self {
            inner,
            buffer: ShuffleBuffer::new(capacity, seed)?,
            exhausted: false,
            failed: false,
        })
    }
}

impl<I, T, E> Iterator for TryShuffled<I, T>
where
    I: Iterator<Item = std::result::Result<T, E>>,
{
    type Item = std::result::Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while !self.exhausted {
            match self.inner.next() {
                Some(Ok(item)) => {
                    if let Some(out) = self.buffer.offer(item) {
                        return Some(Ok(out));
                    }
                }
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => {
                    self.exhausted = true;
                    warn_if_underfilled(&self.buffer);
                }
            }
        }
        self.buffer.pop_random().map(Ok)
    }
}

/// Adds buffered shuffling to any iterator.
pub trait ShuffleExt: Iterator + Sized {
    /// Shuffle through a buffer of `capacity` items.
    ///
    /// # Errors
    /// [`Error::Configuration`] when `capacity` is zero.
    fn shuffled(self, capacity: usize, seed: Option<u64>) -> Result<Shuffled<Self>> {
        Shuffled::new(self, capacity, seed)
    }

    /// Shuffle the `Ok` items of a fallible stream, surfacing the first `Err`.
    ///
    /// # Errors
    /// [`Error::Configuration`] when `capacity` is zero.
    fn try_shuffled<T, E>(self, capacity: usize, seed: Option<u64>) -> Result<TryShuffled<Self, T>>
    where
        Self: Iterator<Item = std::result::Result<T, E>>,
    {
        TryShuffled::new(self, capacity, seed)
    }
}

impl<I: Iterator> ShuffleExt for I {}
