//! Adaptive batch sizing (§4.B): a one-second tick that grows or shrinks the
//! RPC batch size based on whether any request errored during the last tick.
//!
//! Generalizes the teacher's streak-counted [`AdaptiveConcurrency`]-style
//! scale-up/scale-down loop (`adaptive_concurrency.rs`) into the exact
//! floating-point rule this system requires: a flat 35% cut on any error, a
//! flat 0.5% grow on an error-free tick with at least one success, and no
//! change on a silent tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

const SHRINK_FACTOR: f64 = 1.0 - 0.35;
const GROW_FACTOR: f64 = 1.0 + 0.005;
const CEILING: f64 = 500.0;

/// Self-tuning batch size for a single chain's RPC traffic.
pub struct BatchSizer {
    current_bits: AtomicU64,
    floor: f64,
    had_error: AtomicBool,
    had_success: AtomicBool,
}

impl BatchSizer {
    pub fn new(base_batch_size: u32) -> Arc<Self> {
        let floor = base_batch_size.max(1) as f64;
        Arc::new(Self {
            current_bits: AtomicU64::new(floor.to_bits()),
            floor,
            had_error: AtomicBool::new(false),
            had_success: AtomicBool::new(false),
        })
    }

    fn current_f64(&self) -> f64 {
        f64::from_bits(self.current_bits.load(Ordering::Relaxed))
    }

    fn set_f64(&self, v: f64) {
        self.current_bits.store(v.to_bits(), Ordering::Relaxed);
    }

    /// The integer batch size to use right now.
    pub fn current(&self) -> u32 {
        self.current_f64().floor() as u32
    }

    /// Fraction of requests that succeeded during the last tick, for
    /// diagnostics only — no control flow depends on this value.
    pub fn utilization_ratio(&self) -> f64 {
        match (self.had_success.load(Ordering::Relaxed), self.had_error.load(Ordering::Relaxed)) {
            (true, true) => 0.5,
            (true, false) => 1.0,
            (false, true) => 0.0,
            (false, false) => 1.0,
        }
    }

    pub fn record_success(&self) {
        self.had_success.store(true, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.had_error.store(true, Ordering::Relaxed);
    }

    /// Apply one tick of the adaptation rule. Exposed directly for tests;
    /// production code drives this via [`BatchSizer::spawn_tick_loop`].
    pub fn tick(&self) {
        let had_error = self.had_error.swap(false, Ordering::Relaxed);
        let had_success = self.had_success.swap(false, Ordering::Relaxed);

        let current = self.current_f64();
        let next = if had_error {
            (current * SHRINK_FACTOR).max(self.floor)
        } else if had_success {
            (current * GROW_FACTOR).min(CEILING)
        } else {
            current
        };

        if (next - current).abs() > f64::EPSILON {
            trace!(from = current, to = next, "batch size adjusted");
        }
        self.set_f64(next);
    }

    /// Spawn the per-second tick task. The returned handle should be aborted
    /// on fetcher shutdown.
    pub fn spawn_tick_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let sizer = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                sizer.tick();
                debug!(batch_size = sizer.current(), "batch sizer tick");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_shrinks_by_35_percent_floored_at_base() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(100.0);
        sizer.record_error();
        sizer.tick();
        assert_eq!(sizer.current(), 65);
    }

    #[test]
    fn shrink_never_drops_below_floor() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(12.0);
        sizer.record_error();
        sizer.tick();
        assert_eq!(sizer.current(), 10);
    }

    #[test]
    fn success_only_grows_by_half_percent_ceiled_at_500() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(100.0);
        sizer.record_success();
        sizer.tick();
        assert_eq!(sizer.current(), 100);
        assert!((sizer.current_f64() - 100.5).abs() < 1e-9);
    }

    #[test]
    fn grow_never_exceeds_ceiling() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(499.9);
        sizer.record_success();
        sizer.tick();
        assert!(sizer.current_f64() <= 500.0);
    }

    #[test]
    fn silent_tick_leaves_size_unchanged() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(42.0);
        sizer.tick();
        assert_eq!(sizer.current(), 42);
    }

    #[test]
    fn error_and_success_same_tick_counts_as_error() {
        let sizer = BatchSizer::new(10);
        sizer.set_f64(100.0);
        sizer.record_success();
        sizer.record_error();
        sizer.tick();
        assert_eq!(sizer.current(), 65);
    }
}
