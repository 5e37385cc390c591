//! Harness constants.

use std::time::Duration;

/// Default dispatch backlog (must be power of 2)
pub const DEFAULT_BACKLOG: usize = 2048;

/// Maximum dispatch backlog
pub const MAX_BACKLOG: usize = 4 * 1024 * 1024; // 4M slots

/// Initial capacity of a hot-stream subscriber lane
pub const DEFAULT_HOT_LANE_CAPACITY: usize = 256;

/// Hard cap on a hot-stream backpressure buffer; past this the submit
/// fails and the subscriber's error path fires.
pub const MAX_HOT_LANE_BUFFER: usize = 1024 * 1024; // 1M events

/// How long a non-blocking wait strategy tolerates zero progress before
/// reporting a stalled backlog.
pub const DEFAULT_STALL_BOUND: Duration = Duration::from_secs(5);

/// Timed-wake interval for blocking waits, so shutdown is always observed.
pub const BLOCKING_WAKE_INTERVAL: Duration = Duration::from_micros(100);

/// Bound on the teardown completion wait.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_sizes_are_powers_of_two() {
        assert!(DEFAULT_BACKLOG.is_power_of_two());
        assert!(MAX_BACKLOG.is_power_of_two());
        assert!(DEFAULT_HOT_LANE_CAPACITY.is_power_of_two());
    }

    #[test]
    fn test_stall_bound_exceeds_wake_interval() {
        assert!(DEFAULT_STALL_BOUND > BLOCKING_WAKE_INTERVAL);
    }
}
