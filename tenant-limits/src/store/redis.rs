//! Redis-backed store.
//!
//! Plain commands go through a shared `ConnectionManager`. Counter
//! operations run as a single Lua script so every read-modify-write is
//! atomic on the server. Watches take a dedicated connection because
//! `WATCH` state belongs to the connection; connections released cleanly
//! (after `EXEC` or `UNWATCH`) are kept in a small idle pool for reuse.

use super::{CounterOp, KeyValueStore, WatchedKey};
use crate::config::LimitsConfig;
use crate::error::{LimitsError, LimitsResult};
use crate::metrics::LimitsMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{Client, Script};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Atomic counter operations. ARGV: op, value, ceiling ("" for none),
/// ttl in milliseconds (0 keeps the current expiry).
const COUNTER_SCRIPT: &str = r"
local op = ARGV[1]
local value = tonumber(ARGV[2])
local ceiling = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4]) or 0
-- largest integer a Lua number holds exactly
local max_exact = 9007199254740991

local function store(v)
  if ttl > 0 then
    redis.call('SET', KEYS[1], v, 'PX', ttl)
  else
    redis.call('SET', KEYS[1], v, 'KEEPTTL')
  end
  return v
end

if value == nil then
  return redis.error_reply('UNKNOWN_OP non-numeric value ' .. tostring(ARGV[2]))
end

if op == 'incr' or op == 'decr' then
  if value < 0 then
    return redis.error_reply('NEGATIVE_DELTA ' .. ARGV[2])
  end
  local current = tonumber(redis.call('GET', KEYS[1]))
  if current == nil then
    return redis.error_reply('NOT_FOUND ' .. KEYS[1])
  end
  if op == 'incr' then
    local next = current + value
    if next > max_exact then
      return redis.error_reply('OVERFLOW ' .. KEYS[1])
    end
    if ceiling ~= nil and next > ceiling then
      next = ceiling
    end
    return store(next)
  end
  if current - value < 0 then
    return redis.error_reply('UNDERFLOW ' .. KEYS[1])
  end
  return store(current - value)
end

if op == 'setgt' then
  local current = tonumber(redis.call('GET', KEYS[1]))
  if current ~= nil and current >= value then
    return current
  end
  return store(value)
end

return redis.error_reply('UNKNOWN_OP ' .. tostring(op))
";

/// Idle watch connections kept per store.
const WATCH_POOL_CAPACITY: usize = 8;

/// Connections waiting to be reused by a later watch.
struct IdlePool<C> {
    idle: Mutex<Vec<C>>,
    capacity: usize,
}

impl<C> IdlePool<C> {
    fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn checkout(&self) -> Option<C> {
        self.idle.lock().pop()
    }

    /// Keep `conn` for reuse. Dropped when the pool is full.
    fn checkin(&self, conn: C) {
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(conn);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.idle.lock().len()
    }
}

/// Redis store.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
    watch_pool: Arc<IdlePool<MultiplexedConnection>>,
    counter_script: Arc<Script>,
    timeout: Duration,
    metrics: Arc<LimitsMetrics>,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the initial connection fails.
    pub async fn connect(config: &LimitsConfig) -> LimitsResult<Self> {
        let client = Client::open(config.redis_url.as_str())?;
        let conn = tokio::time::timeout(
            config.operation_timeout,
            ConnectionManager::new(client.clone()),
        )
        .await
        .map_err(|_| LimitsError::Timeout("connect".to_string()))??;

        Ok(Self {
            client,
            conn,
            watch_pool: Arc::new(IdlePool::new(WATCH_POOL_CAPACITY)),
            counter_script: Arc::new(Script::new(COUNTER_SCRIPT)),
            timeout: config.operation_timeout,
            metrics: Arc::new(LimitsMetrics::unregistered()),
        })
    }

    /// Report store operations to the given metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimitsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Run a store call under the operation timeout and record its outcome.
    async fn timed<T, F>(&self, operation: &str, fut: F) -> LimitsResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(LimitsError::from),
            Err(_) => Err(LimitsError::Timeout(operation.to_string())),
        };
        self.metrics.record_store_operation(operation, result.is_ok());
        result
    }

    async fn counter(
        &self,
        op: CounterOp,
        key: &str,
        value: i64,
        ceiling: Option<i64>,
        ttl: Option<Duration>,
    ) -> LimitsResult<i64> {
        let mut conn = self.conn.clone();
        let mut invocation = self.counter_script.key(key);
        invocation
            .arg(op.as_str())
            .arg(value)
            .arg(ceiling.map(|c| c.to_string()).unwrap_or_default())
            .arg(ttl_millis(ttl));
        self.timed(op.as_str(), async move { invocation.invoke_async(&mut conn).await })
            .await
    }
}

/// Expiry in whole milliseconds; 0 means none.
fn ttl_millis(ttl: Option<Duration>) -> u64 {
    ttl.map_or(0, |ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1))
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> LimitsResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.timed("get", async move { redis::cmd("GET").arg(key).query_async(&mut conn).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl.is_some() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        self.timed("set", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> LimitsResult<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if ttl.is_some() {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = self
            .timed("set_nx", async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> LimitsResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .timed("del", async move { redis::cmd("DEL").arg(key).query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    async fn incr_existing(
        &self,
        key: &str,
        delta: i64,
        ceiling: Option<i64>,
        ttl: Option<Duration>,
    ) -> LimitsResult<i64> {
        self.counter(CounterOp::Incr, key, delta, ceiling, ttl).await
    }

    async fn decr_existing(&self, key: &str, delta: i64) -> LimitsResult<i64> {
        self.counter(CounterOp::Decr, key, delta, None, None).await
    }

    async fn set_gt(&self, key: &str, candidate: i64, ttl: Option<Duration>) -> LimitsResult<i64> {
        self.counter(CounterOp::SetGreater, key, candidate, None, ttl)
            .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn watch(&self, key: &str) -> LimitsResult<Box<dyn WatchedKey>> {
        let conn = match self.watch_pool.checkout() {
            Some(conn) => conn,
            None => {
                let client = self.client.clone();
                self.timed("connect", async move {
                    client.get_multiplexed_async_connection().await
                })
                .await?
            }
        };
        let mut watch_conn = conn.clone();
        let _: () = self
            .timed("watch", async move {
                redis::cmd("WATCH").arg(key).query_async(&mut watch_conn).await
            })
            .await?;
        debug!("watching hash key");

        Ok(Box::new(RedisWatch {
            store: self.clone(),
            conn,
            key: key.to_string(),
        }))
    }
}

struct RedisWatch {
    store: RedisStore,
    conn: MultiplexedConnection,
    key: String,
}

#[async_trait]
impl WatchedKey for RedisWatch {
    async fn hget(&mut self, field: &str) -> LimitsResult<Option<String>> {
        let mut conn = self.conn.clone();
        let key = self.key.clone();
        self.store
            .timed("hget", async move {
                redis::cmd("HGET").arg(key).arg(field).query_async(&mut conn).await
            })
            .await
    }

    async fn commit_hset(
        self: Box<Self>,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> LimitsResult<bool> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hset(&self.key, field, value).ignore();
        if let Some(ttl) = ttl {
            let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            pipe.pexpire(&self.key, millis).ignore();
        }
        // EXEC replies nil when the watched key changed.
        let committed: Option<()> = self
            .store
            .timed("commit", async move { pipe.query_async(&mut conn).await })
            .await?;
        // EXEC clears the watch either way.
        self.store.watch_pool.checkin(self.conn);
        Ok(committed.is_some())
    }

    async fn unwatch(self: Box<Self>) -> LimitsResult<()> {
        let mut conn = self.conn.clone();
        self.store
            .timed("unwatch", async move { redis::cmd("UNWATCH").query_async::<()>(&mut conn).await })
            .await?;
        self.store.watch_pool.checkin(self.conn);
        Ok(())
    }
}
