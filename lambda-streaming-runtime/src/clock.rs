//! Wall-clock helpers for invocation deadlines.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The longest the service lets a single invocation run.
pub const MAX_EXECUTION_TIME: Duration = Duration::from_secs(15 * 60);

/// A wall-clock instant in integer milliseconds since the Unix epoch, UTC.
///
/// Deadlines arrive from the control plane in this representation, so the
/// runtime keeps it end to end instead of converting through monotonic time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp(elapsed.as_millis() as i64)
    }

    /// Construct from milliseconds since the epoch.
    pub const fn from_millis(millis: i64) -> Timestamp {
        Timestamp(millis)
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// This instant shifted forward by `duration`.
    pub fn advanced_by(self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration.as_millis() as i64))
    }

    /// Signed milliseconds from `self` to `other`; negative when `other` is
    /// in the past.
    pub const fn duration_to(self, other: Timestamp) -> i64 {
        other.0 - self.0
    }
}

/// Sleep until `deadline` passes. Returns immediately when it already has.
pub async fn sleep_until(deadline: Timestamp) {
    let remaining = Timestamp::now().duration_to(deadline);
    if remaining > 0 {
        tokio::time::sleep(Duration::from_millis(remaining as u64)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_moves_forward() {
        let start = Timestamp::from_millis(1_000);
        let later = start.advanced_by(Duration::from_secs(2));
        assert_eq!(later.as_millis(), 3_000);
        assert_eq!(start.duration_to(later), 2_000);
    }

    #[test]
    fn duration_to_is_signed() {
        let start = Timestamp::from_millis(5_000);
        let earlier = Timestamp::from_millis(2_000);
        assert_eq!(start.duration_to(earlier), -3_000);
    }

    #[test]
    fn now_is_recent() {
        let now = Timestamp::now();
        // 2020-01-01 in epoch millis; a realtime clock should be past it
        assert!(now.as_millis() > 1_577_836_800_000);
    }

    #[tokio::test]
    async fn sleep_until_past_deadline_returns_immediately() {
        let deadline = Timestamp::now().advanced_by(Duration::ZERO);
        let start = std::time::Instant::now();
        sleep_until(deadline).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sleep_until_waits_for_future_deadline() {
        let deadline = Timestamp::now().advanced_by(Duration::from_millis(50));
        let start = std::time::Instant::now();
        sleep_until(deadline).await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
