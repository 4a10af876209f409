mod input_builder;

#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

pub use input_builder::{Caller, InputBuilder};
use std::future::Future;

use crate::policy::Policy;
use crate::service::HeaderCompatibleOutput;
use actix_web::rt::time::Instant;
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn is_denied(self) -> bool {
        matches!(self, Self::Denied)
    }
}

/// Describes a store holding one fixed window counter per rate limit key.
///
/// A Backend is required to implement [Clone], usually this means wrapping your data store within
/// an [Arc](std::sync::Arc), although many connection managers already do so internally; there is
/// no need to wrap it twice.
pub trait Backend<I: 'static = RateLimitInput>: Clone {
    type Output;
    type RollbackToken;
    type Error;

    /// Count a call against the window for the input's key.
    ///
    /// Returns whether the call is admitted, a snapshot of the window after the call, and a token
    /// that allows the admitted call to be uncounted again.
    ///
    /// A denied call must leave the stored window untouched.
    fn request(
        &self,
        input: I,
    ) -> impl Future<Output = Result<(Decision, Self::Output, Self::RollbackToken), Self::Error>>;

    /// Uncount a previously admitted call.
    ///
    /// E.g. a lookup that failed after the call had been admitted should not consume the caller's
    /// quota. The count never drops below zero, and a window that has since disappeared is left
    /// alone.
    ///
    /// # Arguments
    ///
    /// * `token`: The token returned from the initial call to [Backend::request()].
    fn rollback(&self, token: Self::RollbackToken)
        -> impl Future<Output = Result<(), Self::Error>>;
}

/// Input to a [WindowBackend].
#[derive(Debug, Clone)]
pub struct RateLimitInput {
    /// The rate limiting interval.
    pub interval: Duration,
    /// The total calls to be admitted within the interval.
    pub max_requests: u64,
    /// The rate limit key to be used for this call.
    pub key: String,
}

impl RateLimitInput {
    pub fn new(key: impl Into<String>, policy: Policy) -> Self {
        Self {
            interval: policy.interval,
            max_requests: policy.max_requests,
            key: key.into(),
        }
    }
}

/// Snapshot of a key's window, taken by a [WindowBackend] while processing a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// The rate limit key that owns this window.
    pub key: String,
    /// Calls admitted in the current window.
    pub count: u64,
    /// Time at which the current window started.
    pub window_start: Instant,
    /// Total number of calls that are permitted within the window.
    pub limit: u64,
    /// Time after which the next call starts a fresh window.
    pub reset: Instant,
}

impl RateLimitWindow {
    /// Number of calls that will be admitted until the window resets.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

/// Additional functions for a [Backend] that uses [RateLimitInput] and [RateLimitWindow].
pub trait WindowBackend: Backend<RateLimitInput, Output = RateLimitWindow> {
    /// Removes the window for a given rate limit key.
    ///
    /// Intended to be used to reset a key before changing the interval.
    fn remove_key(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>>;
}

impl HeaderCompatibleOutput for RateLimitWindow {
    fn limit(&self) -> u64 {
        self.limit
    }

    fn remaining(&self) -> u64 {
        RateLimitWindow::remaining(self)
    }

    /// Seconds until the window resets (rounded upwards, so that it is guaranteed to be reset
    /// after waiting for the duration).
    fn seconds_until_reset(&self) -> u64 {
        let millis = self
            .reset
            .saturating_duration_since(Instant::now())
            .as_millis() as f64;
        (millis / 1000f64).ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_seconds_until_reset() {
        tokio::time::pause();
        let now = Instant::now();
        let window = RateLimitWindow {
            key: "KEY1".to_string(),
            count: 5,
            window_start: now,
            limit: 5,
            reset: now + Duration::from_secs(60),
        };
        tokio::time::advance(Duration::from_secs_f64(29.9)).await;
        // Verify rounded upwards from 30.1
        assert_eq!(window.seconds_until_reset(), 31);
        assert_eq!(window.remaining(), 0);
    }

    #[test]
    fn test_input_from_policy() {
        let input = RateLimitInput::new("anon:alice", Policy::default());
        assert_eq!(input.key, "anon:alice");
        assert_eq!(input.interval, Duration::from_secs(60));
        assert_eq!(input.max_requests, 5);
    }
}
