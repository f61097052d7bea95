//! Process-wide lookahead depth monitor (§4.H): samples CPU and memory on its
//! own tick and exposes a single `AtomicI8` depth gauge shared by every
//! indexer runtime on the host, so a host under pressure backs every plugin
//! off together rather than each runtime reacting to a different signal.

use std::sync::atomic::{AtomicI8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tracing::debug;

const TICK_INTERVAL: Duration = Duration::from_millis(750);
const MIN_DEPTH: i8 = 0;
const MAX_DEPTH: i8 = 10;
const CPU_HIGH_WATERMARK: f32 = 90.0;
const MEM_HIGH_WATERMARK: f64 = 90.0;

/// Shared, cheaply-cloneable handle to the current lookahead depth.
#[derive(Clone)]
pub struct ResourceMonitor {
    depth: Arc<AtomicI8>,
}

impl ResourceMonitor {
    /// Starts the background sampling task and returns a handle to read the
    /// depth it maintains. Depth starts at `MAX_DEPTH` so a freshly started
    /// process doesn't throttle itself before it has ever sampled load.
    pub fn spawn() -> Self {
        let depth = Arc::new(AtomicI8::new(MAX_DEPTH));
        let monitor = Self { depth: Arc::clone(&depth) };

        tokio::spawn(async move {
            let mut system = System::new();
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                system.refresh_cpu_usage();
                system.refresh_memory();

                let cpu_pct = system.global_cpu_usage();
                let mem_pct = if system.total_memory() > 0 {
                    system.used_memory() as f64 / system.total_memory() as f64 * 100.0
                } else {
                    0.0
                };

                let under_pressure = cpu_pct >= CPU_HIGH_WATERMARK || mem_pct >= MEM_HIGH_WATERMARK;
                let previous = depth.load(Ordering::SeqCst);
                let next = if under_pressure {
                    (previous - 1).max(MIN_DEPTH)
                } else {
                    (previous + 1).min(MAX_DEPTH)
                };
                depth.store(next, Ordering::SeqCst);
                debug!(cpu_pct, mem_pct, depth = next, "resource monitor tick");
            }
        });

        monitor
    }

    pub fn depth(&self) -> i8 {
        self.depth.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_max_depth() {
        let depth = Arc::new(AtomicI8::new(MAX_DEPTH));
        assert_eq!(depth.load(Ordering::SeqCst), 10);
    }
}
