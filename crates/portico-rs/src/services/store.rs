//! Shared-store access layer.
//!
//! Every other component talks to the data store through [`StoreClient`],
//! which exposes exactly the capability set the gateway needs: durable FIFO
//! queues, KV with TTL, hashes, sets, atomic increment, set-if-absent (the
//! locking primitive), and pub/sub. The client multiplexes one managed
//! connection for commands and opens dedicated connections for
//! subscriptions. Transient connection errors are retried a bounded number
//! of times before being reported.

use futures_util::StreamExt;
use log::warn;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Attempts per operation, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for the retry backoff; doubles per attempt.
const RETRY_BASE_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Store operation '{op}' failed: {source}")]
    Operation {
        op: &'static str,
        #[source]
        source: redis::RedisError,
    },
}

fn is_transient(err: &redis::RedisError) -> bool {
    err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.is_io_error()
}

/// A dedicated pub/sub connection bound to one channel.
pub struct Subscription {
    pubsub: redis::aio::PubSub,
}

impl Subscription {
    /// Waits up to `timeout` for the next message on the channel.
    ///
    /// Returns `None` on timeout or if the payload is not valid text; the
    /// caller is expected to fall back to polling either way.
    pub async fn next_message(&mut self, timeout: Duration) -> Option<String> {
        let mut stream = self.pubsub.on_message();
        match tokio::time::timeout(timeout, stream.next()).await {
            Ok(Some(message)) => message.get_payload::<String>().ok(),
            _ => None,
        }
    }
}

/// Uniform access to queues, KV, sets, hashes, and pub/sub on the shared
/// store.
///
/// Cloning is cheap; all clones share the same managed connection. Safe to
/// call from concurrent tasks.
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    manager: ConnectionManager,
}

impl StoreClient {
    /// Dials the store and establishes the managed command connection.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client, manager })
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call(self.manager.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 < MAX_ATTEMPTS && is_transient(&err) => {
                    attempt += 1;
                    let backoff = RETRY_BASE_MS * 2u64.pow(attempt - 1);
                    warn!(
                        "Store operation '{}' failed transiently (attempt {}): {}; retrying in {}ms",
                        op, attempt, err, backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => return Err(StoreError::Operation { op, source: err }),
            }
        }
    }

    /// Round-trip liveness check.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.with_retry("ping", |mut con| async move {
            let pong: String = redis::cmd("PING").query_async(&mut con).await?;
            Ok(pong)
        })
        .await?;
        Ok(())
    }

    /// Appends an item to the tail of a FIFO queue.
    pub async fn queue_push(&self, queue: &str, item: &str) -> Result<(), StoreError> {
        self.with_retry("queue_push", |mut con| async move {
            con.rpush(queue, item).await
        })
        .await
    }

    /// Pops from the head of a FIFO queue, blocking up to `timeout`.
    ///
    /// Returns `None` when the queue stayed empty for the whole window.
    pub async fn queue_pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let popped: Option<(String, String)> = self
            .with_retry("queue_pop_blocking", |mut con| async move {
                con.blpop(queue, timeout.as_secs_f64()).await
            })
            .await?;
        Ok(popped.map(|(_, item)| item))
    }

    /// Current depth of a queue.
    pub async fn queue_len(&self, queue: &str) -> Result<i64, StoreError> {
        self.with_retry("queue_len", |mut con| async move { con.llen(queue).await })
            .await
    }

    /// Stores a value under a key. `ttl_seconds` of zero means no expiry.
    pub async fn kv_set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.with_retry("kv_set", |mut con| async move {
            if ttl_seconds > 0 {
                con.set_ex(key, value, ttl_seconds).await
            } else {
                con.set(key, value).await
            }
        })
        .await
    }

    /// Stores a value only if the key does not already exist.
    ///
    /// Returns `true` when the write happened. This is the store-level lock
    /// primitive: a short TTL bounds how long a crashed holder can wedge
    /// other writers.
    pub async fn kv_set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<bool, StoreError> {
        let outcome = self
            .with_retry("kv_set_nx", |mut con| async move {
                let reply: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_seconds)
                    .query_async(&mut con)
                    .await?;
                Ok(reply)
            })
            .await?;
        Ok(outcome.is_some())
    }

    pub async fn kv_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_retry("kv_get", |mut con| async move { con.get(key).await })
            .await
    }

    pub async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_retry("kv_delete", |mut con| async move { con.del(key).await })
            .await
    }

    pub async fn hash_set_field(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.with_retry("hash_set_field", |mut con| async move {
            con.hset(key, field, value).await
        })
        .await
    }

    pub async fn hash_delete_field(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.with_retry("hash_delete_field", |mut con| async move {
            con.hdel(key, field).await
        })
        .await
    }

    pub async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_retry("hash_get_all", |mut con| async move {
            con.hgetall(key).await
        })
        .await
    }

    /// Atomically adds `delta` to an integer key, returning the new value.
    pub async fn atomic_increment(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_retry("atomic_increment", |mut con| async move {
            con.incr(key, delta).await
        })
        .await
    }

    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_retry("set_add", |mut con| async move {
            con.sadd(key, member).await
        })
        .await
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_retry("set_remove", |mut con| async move {
            con.srem(key, member).await
        })
        .await
    }

    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_retry("set_members", |mut con| async move {
            con.smembers(key).await
        })
        .await
    }

    /// Publishes a message; delivery is fire-and-forget.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StoreError> {
        self.with_retry("publish", |mut con| async move {
            con.publish(channel, message).await
        })
        .await
    }

    /// Opens a dedicated connection subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|source| StoreError::Operation {
                op: "subscribe",
                source,
            })?;
        Ok(Subscription { pubsub })
    }
}
