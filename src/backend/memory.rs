use crate::backend::{Backend, Decision, RateLimitInput, RateLimitWindow, WindowBackend};
use actix_web::rt::task::JoinHandle;
use actix_web::rt::time::Instant;
use dashmap::DashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_GC_INTERVAL_SECONDS: u64 = 60 * 10;

/// A fixed window rate limiter [Backend] that uses [Dashmap](dashmap::DashMap) to store windows
/// in memory.
///
/// Each call is processed under the map's per-key entry lock, so concurrent calls for one key
/// cannot admit more than the policy allows.
#[derive(Clone)]
pub struct InMemoryBackend {
    map: Arc<DashMap<String, Value>>,
    gc_handle: Option<Arc<JoinHandle<()>>>,
}

struct Value {
    window_start: Instant,
    interval: Duration,
    count: u64,
}

impl Value {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) > self.interval
    }
}

impl InMemoryBackend {
    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder {
            gc_interval: Some(Duration::from_secs(DEFAULT_GC_INTERVAL_SECONDS)),
        }
    }

    fn garbage_collector(map: Arc<DashMap<String, Value>>, interval: Duration) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "GC interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = Instant::now();
                map.retain(|_k, v| !v.is_expired(now));
                actix_web::rt::time::sleep_until(now + interval).await;
            }
        })
    }
}

impl Backend<RateLimitInput> for InMemoryBackend {
    type Output = RateLimitWindow;
    /// The key and the start of the window the call was counted in.
    type RollbackToken = (String, Instant);
    type Error = Infallible;

    async fn request(
        &self,
        input: RateLimitInput,
    ) -> Result<(Decision, Self::Output, Self::RollbackToken), Self::Error> {
        let now = Instant::now();
        let mut decision = Decision::Allowed;
        let mut count = 1;
        let mut window_start = now;
        self.map
            .entry(input.key.clone())
            .and_modify(|v| {
                // The interval is taken from the input, so a policy change applies to windows
                // that are already running.
                if now.saturating_duration_since(v.window_start) > input.interval {
                    // Start a fresh window with this call as its first
                    v.window_start = now;
                    v.interval = input.interval;
                    v.count = 1;
                } else if v.count < input.max_requests {
                    v.interval = input.interval;
                    v.count += 1;
                } else {
                    decision = Decision::Denied;
                }
                count = v.count;
                window_start = v.window_start;
            })
            .or_insert_with(|| Value {
                // The first call for a key always opens a window.
                window_start: now,
                interval: input.interval,
                count,
            });
        let output = RateLimitWindow {
            key: input.key.clone(),
            count,
            window_start,
            limit: input.max_requests,
            reset: window_start + input.interval,
        };
        Ok((decision, output, (input.key, window_start)))
    }

    async fn rollback(&self, token: Self::RollbackToken) -> Result<(), Self::Error> {
        let (key, window_start) = token;
        self.map.entry(key).and_modify(|v| {
            // A call counted in an earlier window is not taken off a newer one
            if v.window_start == window_start {
                v.count = v.count.saturating_sub(1);
            }
        });
        Ok(())
    }
}

impl WindowBackend for InMemoryBackend {
    async fn remove_key(&self, key: &str) -> Result<(), Self::Error> {
        self.map.remove(key);
        Ok(())
    }
}

impl Drop for InMemoryBackend {
    fn drop(&mut self) {
        // Clones share the collector, only the last one alive stops it.
        if let Some(handle) = &self.gc_handle {
            if Arc::strong_count(handle) == 1 {
                handle.abort();
            }
        }
    }
}

pub struct InMemoryBackendBuilder {
    gc_interval: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Override the default garbage collector interval.
    ///
    /// Set to None to disable garbage collection.
    ///
    /// The garbage collector periodically scans the internal map, removing expired windows. An
    /// expired window would be reset by the next call for its key anyway, so collecting it
    /// doesn't change any decision.
    pub fn with_gc_interval(mut self, interval: Option<Duration>) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Builds the backend.
    ///
    /// Must be called within an actix (tokio) runtime when garbage collection is enabled.
    pub fn build(self) -> InMemoryBackend {
        let map = Arc::new(DashMap::<String, Value>::new());
        let gc_handle = self.gc_interval.map(|gc_interval| {
            Arc::new(InMemoryBackend::garbage_collector(map.clone(), gc_interval))
        });
        InMemoryBackend { map, gc_handle }
    }
}
