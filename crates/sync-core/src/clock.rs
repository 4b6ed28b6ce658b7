//! Clock abstraction so retry backoff, token expiry, and drift-scan intervals
//! can be tested without sleeping in wall-clock time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of "now", in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis()
            as u64
    }
}

/// Deterministic clock for tests: starts at a fixed instant and only moves
/// when advanced explicitly.
#[derive(Debug)]
pub struct VirtualClock {
    now_ms: AtomicU64,
}

impl VirtualClock {
    /// Create a virtual clock seeded at `start_ms`.
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self { now_ms: AtomicU64::new(start_ms) })
    }

    /// Advance the clock forward by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute millisecond value. Must not move backwards.
    pub fn set_ms(&self, value_ms: u64) {
        self.now_ms.fetch_max(value_ms, Ordering::SeqCst);
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_advances_deterministically() {
        let clk = VirtualClock::new(1_000);
        assert_eq!(clk.now_ms(), 1_000);
        clk.advance_ms(5);
        assert_eq!(clk.now_ms(), 1_005);
    }

    #[test]
    fn virtual_clock_set_never_moves_backwards() {
        let clk = VirtualClock::new(1_000);
        clk.set_ms(500);
        assert_eq!(clk.now_ms(), 1_000);
        clk.set_ms(2_000);
        assert_eq!(clk.now_ms(), 2_000);
    }

    #[test]
    fn system_clock_is_plausible() {
        let clk = SystemClock;
        assert!(clk.now_ms() > 1_700_000_000_000);
    }
}
