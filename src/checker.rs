use crate::backend::{Caller, InputBuilder, RateLimitWindow, WindowBackend};
use crate::identity::{IdentityStore, StoreError};
use crate::policy::Policy;
use crate::username;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller has used up its calls for the current window.
    #[error("Rate limit exceeded. Try again soon.")]
    RateLimited(RateLimitWindow),
    #[error("Rate limit backend failed: {0}")]
    Backend(#[source] BoxError),
    #[error("Username lookup failed: {0}")]
    Lookup(
        #[source]
        #[from]
        StoreError,
    ),
}

/// Outcome of a successful availability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    /// The caller's rate limit window after this check.
    ///
    /// [None] when the check never reached the rate limiter (too short), or the backend failed
    /// and the checker fails open.
    pub window: Option<RateLimitWindow>,
}

/// Answers whether a username is free to claim, limiting how often each caller may ask.
pub struct AvailabilityChecker<B, S> {
    backend: B,
    identities: S,
    inputs: InputBuilder,
    fail_open: bool,
    rollback_lookup_errors: bool,
}

impl<B, S> AvailabilityChecker<B, S>
where
    B: WindowBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
    S: IdentityStore,
{
    /// # Arguments
    ///
    /// * `backend`: Store for the per-caller rate limit windows.
    /// * `identities`: Store the usernames are checked against.
    pub fn builder(backend: B, identities: S) -> AvailabilityCheckerBuilder<B, S> {
        AvailabilityCheckerBuilder {
            backend,
            identities,
            inputs: InputBuilder::new(Policy::default()),
            fail_open: false,
            rollback_lookup_errors: false,
        }
    }

    /// Whether `username` is available.
    ///
    /// Usernames shorter than three characters after normalization are never available, and are
    /// answered without counting against the caller's rate limit.
    pub async fn check(&self, username: &str, caller: &Caller) -> Result<bool, Error> {
        self.check_detailed(username, caller)
            .await
            .map(|a| a.available)
    }

    /// Like [AvailabilityChecker::check], also returning the caller's rate limit window.
    pub async fn check_detailed(
        &self,
        username: &str,
        caller: &Caller,
    ) -> Result<Availability, Error> {
        let normalized = username::normalize(username);
        if username::is_too_short(&normalized) {
            return Ok(Availability {
                available: false,
                window: None,
            });
        }

        let input = self.inputs.input(caller, &normalized);
        let (window, rollback) = match self.backend.request(input).await {
            Ok((decision, window, rollback)) => {
                if decision.is_denied() {
                    log::debug!("Rate limit exceeded for key {}", window.key);
                    return Err(Error::RateLimited(window));
                }
                (Some(window), Some(rollback))
            }
            Err(e) => {
                if self.fail_open {
                    log::warn!("Rate limiter failed: {}, checking availability anyway", e);
                    (None, None)
                } else {
                    return Err(Error::Backend(Box::new(e)));
                }
            }
        };

        let existing = match self.identities.find_by_name(&normalized).await {
            Ok(existing) => existing,
            Err(e) => {
                if let Some(token) = rollback.filter(|_| self.rollback_lookup_errors) {
                    if let Err(re) = self.backend.rollback(token).await {
                        log::error!("Unable to rollback rate-limit count after lookup: {re}");
                    }
                }
                return Err(e.into());
            }
        };

        Ok(Availability {
            available: existing.is_none(),
            window,
        })
    }

    pub fn policy(&self) -> Policy {
        self.inputs.policy()
    }
}

pub struct AvailabilityCheckerBuilder<B, S> {
    backend: B,
    identities: S,
    inputs: InputBuilder,
    fail_open: bool,
    rollback_lookup_errors: bool,
}

impl<B, S> AvailabilityCheckerBuilder<B, S>
where
    B: WindowBackend,
    B::Error: std::error::Error + Send + Sync + 'static,
    S: IdentityStore,
{
    /// Replace the default policy of 5 calls per 60 seconds.
    ///
    /// Key options set with [AvailabilityCheckerBuilder::input_builder] are kept.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.inputs = self.inputs.with_policy(policy);
        self
    }

    /// Control how rate limit keys are derived from the caller.
    pub fn input_builder(mut self, inputs: InputBuilder) -> Self {
        self.inputs = inputs;
        self
    }

    /// Choose whether to go ahead with the lookup if the backend returns a failure.
    ///
    /// Default is false.
    pub fn fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Uncount an admitted call when the identity lookup that follows it fails.
    ///
    /// By default every admitted call counts.
    pub fn rollback_lookup_errors(mut self) -> Self {
        self.rollback_lookup_errors = true;
        self
    }

    pub fn build(self) -> AvailabilityChecker<B, S> {
        AvailabilityChecker {
            backend: self.backend,
            identities: self.identities,
            inputs: self.inputs,
            fail_open: self.fail_open,
            rollback_lookup_errors: self.rollback_lookup_errors,
        }
    }
}
