//! Reconnect backoff caps (§4.2).

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Bounds on the exponential-backoff-with-jitter reconnect schedule:
/// `delay = min(max_delay, initial_delay * 2^attempt * U[0.85, 1.15])`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectCaps {
    #[serde(default = "default_initial_delay", with = "duration")]
    pub initial_delay: Duration,
    #[serde(default = "default_max_delay", with = "duration")]
    pub max_delay: Duration,
    /// Reconnect is bounded only by total elapsed time, not attempt count
    /// (§7); `None` means unbounded.
    #[serde(default)]
    pub max_elapsed: Option<Duration>,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

impl Default for ReconnectCaps {
    fn default() -> Self {
        Self {
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            max_elapsed: None,
        }
    }
}
