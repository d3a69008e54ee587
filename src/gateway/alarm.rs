//! Coalescing flush alarm
//!
//! Each gateway session owns at most one pending alarm. Scheduling a
//! nearer deadline replaces a farther one; scheduling a farther one is
//! a no-op. The alarm task lives beside the session and fires the
//! session's flush path, rescheduling itself for drains and retries.

use crate::constants::{BASE_RETRY_BACKOFF_MS, MAX_RETRY_BACKOFF_MS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Handle to a session's single pending alarm.
#[derive(Debug)]
pub struct FlushAlarm {
    tx: watch::Sender<Option<Instant>>,
}

impl FlushAlarm {
    /// Create the alarm and the receiver its task will watch.
    pub fn new() -> (Self, watch::Receiver<Option<Instant>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }

    /// Request a fire at `at`, coalescing with any pending alarm.
    pub fn schedule(&self, at: Instant) {
        self.tx.send_modify(|pending| match pending {
            Some(current) if *current <= at => {}
            _ => *pending = Some(at),
        });
    }

    /// Drop the pending alarm, if any.
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Deadline of the pending alarm, if any.
    pub fn pending(&self) -> Option<Instant> {
        *self.tx.borrow()
    }
}

/// Delay before retry `retry_count` (1-based) of a failed flush:
/// `BASE · 2^(n-1)` capped at the maximum.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let shift = retry_count.saturating_sub(1).min(15);
    let ms = BASE_RETRY_BACKOFF_MS
        .saturating_mul(1u64 << shift)
        .min(MAX_RETRY_BACKOFF_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(3), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(4), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(5), Duration::from_millis(16_000));
        // Capped from the sixth retry on.
        assert_eq!(backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(backoff_delay(60), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_nearer_alarm_replaces_farther() {
        let (alarm, _rx) = FlushAlarm::new();
        let far = Instant::now() + Duration::from_secs(30);
        let near = Instant::now() + Duration::from_secs(1);
        alarm.schedule(far);
        alarm.schedule(near);
        assert_eq!(alarm.pending(), Some(near));
        // Farther request does not displace the nearer one.
        alarm.schedule(far);
        assert_eq!(alarm.pending(), Some(near));
    }

    #[tokio::test]
    async fn test_clear_removes_pending() {
        let (alarm, _rx) = FlushAlarm::new();
        alarm.schedule(Instant::now());
        alarm.clear();
        assert_eq!(alarm.pending(), None);
    }
}
