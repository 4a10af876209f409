use crate::backend::{Backend, Decision, RateLimitInput, RateLimitWindow, WindowBackend};
use actix_web::rt::time::Instant;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

// Windows are stored as a hash of `count` and `window_start` (milliseconds since the Unix epoch,
// taken from the Redis server clock so that every application instance agrees on time).
// The whole read-modify-write runs inside one script, which makes it atomic per key.
static REQUEST_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local time = redis.call('TIME')
local now = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
local interval = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
local window_start = tonumber(redis.call('HGET', KEYS[1], 'window_start'))
local allowed = 1
if count == nil or window_start == nil or now - window_start > interval then
    count = 1
    window_start = now
    redis.call('HSET', KEYS[1], 'count', count, 'window_start', window_start)
elseif count < max_requests then
    count = redis.call('HINCRBY', KEYS[1], 'count', 1)
else
    allowed = 0
end
if allowed == 1 then
    redis.call('PEXPIREAT', KEYS[1], window_start + interval + 1)
end
return {allowed, count, window_start, now}
",
    )
});

static ROLLBACK_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
local window_start = tonumber(redis.call('HGET', KEYS[1], 'window_start'))
if window_start == tonumber(ARGV[1]) and count ~= nil and count > 0 then
    redis.call('HINCRBY', KEYS[1], 'count', -1)
end
return 0
",
    )
});

#[derive(Debug, Error)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
    #[error("Rate limit window starts after the Redis server time")]
    WindowInFuture,
}

/// A Fixed Window rate limiter [Backend] that stores windows in Redis.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl RedisBackend {
    /// Create a RedisBackendBuilder.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use username_availability::backend::redis::RedisBackend;
    /// # use redis::aio::ConnectionManager;
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1/").unwrap();
    /// let manager = ConnectionManager::new(client).await.unwrap();
    /// let backend = RedisBackend::builder(manager).build();
    /// # };
    /// ```
    pub fn builder(connection: ConnectionManager) -> Builder {
        Builder {
            connection,
            key_prefix: None,
        }
    }

    fn make_key<'t>(&self, key: &'t str) -> Cow<'t, str> {
        match &self.key_prefix {
            None => Cow::Borrowed(key),
            Some(prefix) => Cow::Owned(format!("{prefix}{key}")),
        }
    }
}

pub struct Builder {
    connection: ConnectionManager,
    key_prefix: Option<String>,
}

impl Builder {
    /// Apply an optional prefix to all rate limit keys given to this backend.
    ///
    /// This may be useful when the Redis instance is being used for other purposes; the prefix is
    /// used as a 'namespace' to avoid collision with other caches or keys inside Redis.
    pub fn key_prefix(mut self, key_prefix: Option<&str>) -> Self {
        self.key_prefix = key_prefix.map(ToOwned::to_owned);
        self
    }

    pub fn build(self) -> RedisBackend {
        RedisBackend {
            connection: self.connection,
            key_prefix: self.key_prefix,
        }
    }
}

impl Backend<RateLimitInput> for RedisBackend {
    type Output = RateLimitWindow;
    /// The key and the window start (server milliseconds) the call was counted in.
    type RollbackToken = (String, u64);
    type Error = Error;

    async fn request(
        &self,
        input: RateLimitInput,
    ) -> Result<(Decision, Self::Output, Self::RollbackToken), Self::Error> {
        let key = self.make_key(&input.key);
        let mut con = self.connection.clone();
        let (allowed, count, window_start_ms, now_ms): (u8, u64, u64, u64) = REQUEST_SCRIPT
            .key(key.as_ref())
            .arg(input.interval.as_millis() as u64)
            .arg(input.max_requests)
            .invoke_async(&mut con)
            .await?;

        // Translate the server timestamps onto the local monotonic clock
        let elapsed = now_ms
            .checked_sub(window_start_ms)
            .ok_or(Error::WindowInFuture)?;
        let now = Instant::now();
        let window_start = now
            .checked_sub(Duration::from_millis(elapsed))
            .unwrap_or(now);

        let output = RateLimitWindow {
            key: input.key.clone(),
            count,
            window_start,
            limit: input.max_requests,
            reset: window_start + input.interval,
        };
        let token = (input.key, window_start_ms);
        Ok((Decision::from_allowed(allowed == 1), output, token))
    }

    async fn rollback(&self, token: Self::RollbackToken) -> Result<(), Self::Error> {
        let (key, window_start_ms) = token;
        let key = self.make_key(&key);
        let mut con = self.connection.clone();
        let _: i64 = ROLLBACK_SCRIPT
            .key(key.as_ref())
            .arg(window_start_ms)
            .invoke_async(&mut con)
            .await?;
        Ok(())
    }
}

impl WindowBackend for RedisBackend {
    /// Note that the key prefix (if set) is automatically included, you do not need to prepend
    /// it yourself.
    async fn remove_key(&self, key: &str) -> Result<(), Self::Error> {
        let key = self.make_key(key);
        let mut con = self.connection.clone();
        let () = con.del(key.as_ref()).await?;
        Ok(())
    }
}
