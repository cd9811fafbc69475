//! A debounce map bounding the frequency of metric snapshot persistence.
//!
//! Counter snapshots are flushed to durable storage opportunistically on the
//! hot path; this map remembers the last flush instant per key and refuses
//! flushes closer together than the window. Values are immutable instants,
//! so concurrent readers are safe.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Tracks the last persistence instant per metric key.
#[derive(Debug)]
pub struct DebounceMap {
    window: Duration,
    last_persisted: DashMap<String, Instant>,
}

impl DebounceMap {
    /// A map with the given minimum spacing between flushes of one key.
    pub fn new(window: Duration) -> Self {
        DebounceMap {
            window,
            last_persisted: DashMap::new(),
        }
    }

    /// Returns true (and records the attempt) when the key has not been
    /// flushed within the window; the caller then performs the flush.
    pub fn should_persist(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut allowed = false;
        self.last_persisted
            .entry(key.to_string())
            .and_modify(|last| {
                if now.duration_since(*last) >= self.window {
                    *last = now;
                    allowed = true;
                }
            })
            .or_insert_with(|| {
                allowed = true;
                now
            });
        allowed
    }

    /// Number of keys tracked.
    pub fn len(&self) -> usize {
        self.last_persisted.len()
    }

    /// True when no key has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.last_persisted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_flush_always_allowed() {
        let map = DebounceMap::new(Duration::from_secs(60));
        assert!(map.should_persist("facts_stored"));
    }

    #[test]
    fn rapid_repeats_are_suppressed() {
        let map = DebounceMap::new(Duration::from_secs(60));
        assert!(map.should_persist("k"));
        assert!(!map.should_persist("k"));
        assert!(!map.should_persist("k"));
    }

    #[test]
    fn keys_are_independent() {
        let map = DebounceMap::new(Duration::from_secs(60));
        assert!(map.should_persist("a"));
        assert!(map.should_persist("b"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn zero_window_always_allows() {
        let map = DebounceMap::new(Duration::ZERO);
        assert!(map.should_persist("k"));
        assert!(map.should_persist("k"));
    }
}
