//! Thread-safe outbound sequence counter.
//!
//! JT/T808 sequence numbers are 16 bits wide and wrap silently.  Replies echo
//! the terminal's own number; only platform-initiated messages (firmware
//! segments, control requests) draw from this counter.

use std::sync::atomic::{AtomicU16, Ordering};

/// A lock-free, wrapping `u16` counter.
///
/// # Examples
///
/// ```rust
/// use jt808_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU16,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first [`next`](Self::next) returns `first`.
    pub fn starting_at(first: u16) -> Self {
        Self {
            inner: AtomicU16::new(first),
        }
    }

    /// Returns the next sequence number; wraps from `u16::MAX` to 0.
    pub fn next(&self) -> u16 {
        // fetch_add wraps on overflow for atomics.
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will yield.
    pub fn current(&self) -> u16 {
        self.inner.load(Ordering::Relaxed)
    }
}
