//! Block store metric helpers.

use super::definitions::{STORE_WRITES_TOTAL, STORE_WRITE_DURATION};
use super::timer::TimerGuard;

/// Record a completed block store write transaction.
pub fn record_write(success: bool) {
    let status = if success { "success" } else { "error" };
    STORE_WRITES_TOTAL.with_label_values(&[status]).inc();
}

/// Create a timer for a store write transaction. Records duration on drop.
pub fn time_write<'a>(chain: &str) -> TimerGuard<'a> {
    TimerGuard::new(&STORE_WRITE_DURATION, &[chain])
}
