use crate::domain::ConnectionOptions;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_INITIAL_RECONNECT_DELAY_MS: u64 = 100;
const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// Returns true when shutdown fired before the delay elapsed.
pub async fn sleep_with_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

/// Reconnect schedule for a connection that was open at least once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    enabled: bool,
    limit: Option<u32>,
    initial: Duration,
    max: Duration,
}

impl ReconnectPolicy {
    pub fn from_options(options: &ConnectionOptions) -> Self {
        let initial = Duration::from_millis(
            options
                .initial_reconnect_delay
                .unwrap_or(DEFAULT_INITIAL_RECONNECT_DELAY_MS),
        );
        let max = Duration::from_millis(
            options
                .max_reconnect_delay
                .unwrap_or(DEFAULT_MAX_RECONNECT_DELAY_MS),
        );
        Self {
            enabled: options.reconnect_enabled(),
            limit: options.reconnect_limit,
            initial,
            max: max.max(initial),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once reconnecting
    /// is disabled or the limit is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        if self.limit.is_some_and(|limit| attempt >= limit) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}
