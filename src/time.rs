//! Millisecond clocks and countdown deadlines.
//!
//! Every blocking operation in this crate is built the same way: start a
//! [`Countdown`], then repeat a bounded sub-operation with [`Countdown::left`]
//! as its timeout until it succeeds, fails, or the countdown expires.
//!
//! ```rust
//! use tmlink::time::{Clock, Countdown};
//! use core::cell::Cell;
//!
//! #[derive(Clone, Copy)]
//! struct Fixed<'a>(&'a Cell<u64>);
//! impl Clock for Fixed<'_> {
//!     fn now_ms(&self) -> u64 { self.0.get() }
//! }
//!
//! let now = Cell::new(1_000);
//! let timer = Countdown::start(Fixed(&now), 250);
//! assert_eq!(timer.left(), 250);
//!
//! now.set(1_300);
//! assert!(timer.is_expired());
//! assert_eq!(timer.left(), 0);
//! ```

/// A monotonic millisecond time source.
///
/// Platforms implement this over their tick counter. It is cloned into every
/// countdown, so implementations should be cheap handles.
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin. Must never go backwards.
    fn now_ms(&self) -> u64;
}

impl<K: Clock + ?Sized> Clock for &K {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// An absolute deadline measured against a [`Clock`].
#[derive(Debug, Clone)]
pub struct Countdown<K> {
    clock: K,
    expires_at: u64,
}

impl<K: Clock> Countdown<K> {
    /// Start a countdown that expires `ms` milliseconds from now.
    ///
    /// `start(clock, 0)` is already expired.
    pub fn start(clock: K, ms: u32) -> Self {
        let expires_at = clock.now_ms().saturating_add(u64::from(ms));
        Self { clock, expires_at }
    }

    /// Milliseconds remaining, clamped at zero once expired.
    pub fn left(&self) -> u32 {
        let left = self.expires_at.saturating_sub(self.clock.now_ms());
        u32::try_from(left).unwrap_or(u32::MAX)
    }

    /// `true` once the clock has reached the expiry instant.
    pub fn is_expired(&self) -> bool {
        self.clock.now_ms() >= self.expires_at
    }

    /// Re-arm the countdown to expire `ms` milliseconds from now.
    pub fn reset(&mut self, ms: u32) {
        self.expires_at = self.clock.now_ms().saturating_add(u64::from(ms));
    }

    /// Release the countdown.
    pub fn stop(self) {}
}

/// Wall-clock time source backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        use std::sync::OnceLock;
        use std::time::Instant;

        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[derive(Clone, Copy)]
    struct TestClock<'a>(&'a Cell<u64>);

    impl Clock for TestClock<'_> {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    #[test]
    fn zero_budget_is_expired_immediately() {
        let now = Cell::new(42);
        let timer = Countdown::start(TestClock(&now), 0);
        assert!(timer.is_expired());
        assert_eq!(timer.left(), 0);
    }

    #[test]
    fn left_reaches_zero_exactly_when_expired() {
        let now = Cell::new(0);
        let timer = Countdown::start(TestClock(&now), 100);
        let mut previous = timer.left();
        for t in 0..=150u64 {
            now.set(t);
            let left = timer.left();
            assert!(left <= previous);
            assert_eq!(left == 0, timer.is_expired(), "at t={t}");
            previous = left;
        }
    }

    #[test]
    fn reset_counts_from_the_current_instant() {
        let now = Cell::new(0);
        let mut timer = Countdown::start(TestClock(&now), 10);
        now.set(50);
        assert!(timer.is_expired());
        timer.reset(30);
        assert_eq!(timer.left(), 30);
        now.set(79);
        assert!(!timer.is_expired());
        now.set(80);
        assert!(timer.is_expired());
    }
}
