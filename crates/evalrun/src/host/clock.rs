//! # Clock sources for `clock_time_get`
//!
//! The only state an import stub table carries. Every source must be
//! monotonically non-decreasing from the guest's point of view.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// A source of nanosecond timestamps for the guest.
pub trait ClockSource: Send + Sync + 'static {
    fn now_nanos(&self) -> u64;
}

/// Wall-clock anchored time that never runs backwards.
///
/// The epoch offset is sampled once; later readings advance it by a monotonic
/// `Instant`, and the last value handed out acts as a floor.
pub struct MonotonicClock {
    anchor_nanos: u64,
    anchor: Instant,
    last: AtomicU64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let anchor_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            anchor_nanos,
            anchor: Instant::now(),
            last: AtomicU64::new(0),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        let elapsed = self.anchor.elapsed().as_nanos() as u64;
        let candidate = self.anchor_nanos.saturating_add(elapsed);
        let previous = self.last.fetch_max(candidate, Ordering::Relaxed);
        previous.max(candidate)
    }
}

/// A clock frozen at one instant. Useful for deterministic hosts (a contract
/// host reporting the block timestamp) and for tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub u64);

impl ClockSource for FixedClock {
    fn now_nanos(&self) -> u64 {
        self.0
    }
}
