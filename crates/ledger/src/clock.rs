//! Injectable monotonic clocks.
//!
//! The adaptive checkpoint algorithm only needs "time since process start";
//! modelling it as a trait lets tests drive it with a fake clock.

use std::time::{Duration, Instant};

/// A monotonic time source.
pub trait MonotonicClock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

/// The real clock, anchored at construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// A clock anchored at the current instant.
    pub fn new() -> Self {
        SystemClock {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// A hand-cranked clock for deterministic rate tests.
    #[derive(Debug, Default)]
    pub struct FakeClock {
        micros: AtomicU64,
    }

    impl FakeClock {
        pub fn advance(&self, d: Duration) {
            self.micros
                .fetch_add(d.as_micros() as u64, Ordering::SeqCst);
        }
    }

    impl MonotonicClock for FakeClock {
        fn now(&self) -> Duration {
            Duration::from_micros(self.micros.load(Ordering::SeqCst))
        }
    }
}
