use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Default length of a rate limit window.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(60_000);

/// Default number of calls admitted within a window.
pub const DEFAULT_MAX_REQUESTS: u64 = 5;

/// A fixed window rate limiting policy.
///
/// Deserializes from `{ "interval_ms": u64, "max_requests": u64 }`, with either field optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// The rate limiting interval.
    #[serde(rename = "interval_ms", deserialize_with = "deserialize_millis")]
    pub interval: Duration,
    /// The total calls to be admitted within the interval.
    pub max_requests: u64,
}

impl Policy {
    pub fn new(interval: Duration, max_requests: u64) -> Self {
        Self {
            interval,
            max_requests,
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_MAX_REQUESTS)
    }
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
