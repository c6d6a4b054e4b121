//! Bounded interval polling with cooperative cancellation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A fixed number of attempts spaced by a fixed interval.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSchedule {
    /// Maximum number of attempts.
    pub attempts: u32,

    /// Pause between attempts.
    pub interval: Duration,
}

impl PollSchedule {
    /// Fits as many attempts into `timeout` as the interval allows, and
    /// always at least one.
    #[must_use]
    pub fn within(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            u32::try_from(timeout.as_nanos() / interval.as_nanos()).unwrap_or(u32::MAX)
        };

        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Sleeps for one interval. Returns `false` if cancellation was
    /// requested first.
    pub async fn pause(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            () = token.cancelled() => false,
            () = tokio::time::sleep(self.interval) => true,
        }
    }
}
