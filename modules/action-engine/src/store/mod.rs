//! Thin adapter over the key/value store (§4.1, C1): hashes, sets, sorted
//! sets, lists, pub/sub, scripted atomic multi-op, keyspace-notification
//! subscription, and connection duplication.

#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod redis_store;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreResult;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Connection roles that warrant a dedicated duplicated connection because
/// the primary connection cannot be held in a blocking pop or a pub/sub
/// subscribe state while also serving other commands (§4.1, §5).
pub const ACTION_SUBSCRIBER_ROLE: &str = "ActionSubscriber";

pub fn queue_handler_role(queue: &str) -> String {
    format!("{queue}Handler")
}

pub fn queue_subscriber_role(queue: &str) -> String {
    format!("{queue}Subscriber")
}

/// A message received on a subscribed channel, paired with the channel name
/// so a single receiver loop (as used for keyspace notifications) can
/// disambiguate.
#[derive(Debug, Clone)]
pub struct StoreMessage {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// `HMSET key {fields}`.
    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()>;

    /// `HGETALL key`. Returns an empty map if the key does not exist.
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// `PEXPIRE key ttl_ms`.
    async fn pexpire(&self, key: &str, ttl_ms: i64) -> StoreResult<()>;

    /// `SADD key member`.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    /// `SISMEMBER key member`.
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// `LPUSH key value`.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()>;

    /// `BRPOP key 0` on a dedicated connection — blocks until an element is
    /// available. Must be called on a connection obtained via [`Store::duplicate`]
    /// with a `*Handler` role so the primary connection is never blocked.
    async fn brpop(&self, key: &str) -> StoreResult<String>;

    /// `ZADD key score member`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// `ZREMRANGEBYSCORE key min max`.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<()>;

    /// `PUBLISH channel message`.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()>;

    /// Atomically: write the action hash, push its key onto the queue list,
    /// and set the hash's expiry, via a single server-side script (§4.6).
    async fn enqueue_action(
        &self,
        action_key: &str,
        queue: &str,
        fields: &HashMap<String, String>,
        ttl_ms: i64,
    ) -> StoreResult<()>;

    /// Subscribe to a plain pub/sub channel on a dedicated connection,
    /// returning a receiver of message payloads.
    async fn subscribe_channel(&self, channel: &str) -> StoreResult<mpsc::Receiver<StoreMessage>>;

    /// Subscribe to `__keyspace@<db>__:<key>` on a dedicated connection.
    async fn subscribe_keyspace(&self, key: &str) -> StoreResult<mpsc::Receiver<StoreMessage>>;

    async fn unsubscribe(&self, channel: &str) -> StoreResult<()>;

    /// `CONFIG GET parameter`, returning the single value if set.
    async fn config_get(&self, parameter: &str) -> StoreResult<Option<String>>;

    /// Scripted set-if-absent against a sentinel key with a TTL (§4.7,
    /// §5). Returns `true` exactly once per TTL window — the caller that
    /// receives `true` is responsible for performing the verification.
    async fn claim_verification_sentinel(&self, key: &str, ttl_seconds: i64) -> StoreResult<bool>;

    /// Produce an independent connection bound to `role`, cached and reused
    /// for the engine's lifetime (§4.1).
    async fn duplicate(&self, role: &str) -> StoreResult<Arc<dyn Store>>;

    /// Close every connection this store (and its duplicates) holds.
    async fn destroy(&self) -> StoreResult<()>;
}
