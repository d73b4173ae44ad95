//! Log Sequence Number generation.

use std::sync::atomic::{AtomicI64, Ordering};

use basalt_common::types::Lsn;

/// Generates strictly monotonic LSNs.
///
/// The counter starts at 0 and the first [`next`](Self::next) returns 1.
/// Concurrent callers always receive distinct values; a lock-free atomic
/// increment is all the serialization this needs.
///
/// # Example
///
/// ```rust
/// use basalt_wal::lsn::LsnGenerator;
///
/// let gen = LsnGenerator::new();
/// assert_eq!(gen.next().as_i64(), 1);
/// assert_eq!(gen.next().as_i64(), 2);
/// assert_eq!(gen.current().as_i64(), 2);
/// ```
#[derive(Debug)]
pub struct LsnGenerator {
    current: AtomicI64,
}

impl LsnGenerator {
    /// Creates a generator starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: AtomicI64::new(0),
        }
    }

    /// Creates a generator resuming from a specific LSN, used after
    /// recovery so new records continue past the replayed log.
    ///
    /// # Panics
    ///
    /// Panics if `start` is negative.
    #[must_use]
    pub fn starting_at(start: Lsn) -> Self {
        assert!(start.as_i64() >= 0, "starting LSN cannot be negative");
        Self {
            current: AtomicI64::new(start.as_i64()),
        }
    }

    /// Allocates the next LSN.
    #[inline]
    pub fn next(&self) -> Lsn {
        Lsn::new(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Peeks at the most recently allocated LSN without consuming one.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Lsn {
        Lsn::new(self.current.load(Ordering::SeqCst))
    }
}

impl Default for LsnGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_zero() {
        let gen = LsnGenerator::new();
        assert_eq!(gen.current(), Lsn::ZERO);
        assert_eq!(gen.next(), Lsn::new(1));
    }

    #[test]
    fn test_monotonic() {
        let gen = LsnGenerator::new();
        let a = gen.next();
        let b = gen.next();
        let c = gen.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_starting_at() {
        let gen = LsnGenerator::starting_at(Lsn::new(100));
        assert_eq!(gen.current(), Lsn::new(100));
        assert_eq!(gen.next(), Lsn::new(101));
    }

    #[test]
    #[should_panic(expected = "cannot be negative")]
    fn test_negative_start_rejected() {
        let _ = LsnGenerator::starting_at(Lsn::INVALID);
    }

    #[test]
    fn test_concurrent_distinct() {
        let gen = Arc::new(LsnGenerator::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let gen = Arc::clone(&gen);
            handles.push(std::thread::spawn(move || {
                (0..1000).map(|_| gen.next().as_i64()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4000);
        assert_eq!(gen.current().as_i64(), 4000);
    }
}
