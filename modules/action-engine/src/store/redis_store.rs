//! Production [`Store`] backed by a Redis-compatible server, using
//! `connection-manager` for the multiplexed non-blocking path and a pool of
//! dedicated raw connections for blocking pops and pub/sub subscribe state
//! (§4.1, §5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};

use crate::error::{StoreError, StoreResult};

use super::{Store, StoreMessage};

const ENQUEUE_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], unpack(ARGV, 1, #ARGV - 2))
redis.call('LPUSH', KEYS[2], KEYS[1])
redis.call('PEXPIRE', KEYS[1], ARGV[#ARGV])
return 1
"#;

const CLAIM_SENTINEL_SCRIPT: &str = r#"
if redis.call('SET', KEYS[1], '1', 'NX', 'EX', ARGV[1]) then
  return 1
else
  return 0
end
"#;

/// How long `close_pubsub_session` waits for a forwarder task to hand back
/// its reclaimed connection before giving up on reuse and letting it drop.
const PUBSUB_RECLAIM_TIMEOUT: Duration = Duration::from_secs(2);

fn command_err(e: redis::RedisError) -> StoreError {
    StoreError::Command(e.to_string())
}

fn connection_err(e: redis::RedisError) -> StoreError {
    StoreError::Connection(e.to_string())
}

/// Sent to a running forwarder task to ask it to leave subscribe mode and
/// hand its connection back for reuse.
struct StopRequest {
    reply: oneshot::Sender<redis::aio::Connection>,
}

/// An active per-role subscription. `stop_tx` is consumed exactly once, by
/// whichever caller tears the session down first (`close_pubsub_session`).
struct PubSubSession {
    channel: String,
    stop_tx: Option<oneshot::Sender<StopRequest>>,
}

struct Dedicated {
    connections: RwLock<HashMap<String, Arc<Mutex<redis::aio::Connection>>>>,
    pubsub: RwLock<HashMap<String, PubSubSession>>,
}

/// A handle onto a Redis-compatible store. The top-level handle returned by
/// [`RedisStore::connect`] has no role; calling [`Store::duplicate`] yields
/// role-bound handles backed by their own dedicated connection, cached for
/// reuse across the engine's lifetime.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    manager: ConnectionManager,
    dedicated: Arc<Dedicated>,
    roles: Arc<RwLock<HashMap<String, Arc<dyn Store>>>>,
    role: Option<String>,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).map_err(connection_err)?;
        let manager = ConnectionManager::new(client.clone()).await.map_err(connection_err)?;
        Ok(Self {
            client,
            manager,
            dedicated: Arc::new(Dedicated {
                connections: RwLock::new(HashMap::new()),
                pubsub: RwLock::new(HashMap::new()),
            }),
            roles: Arc::new(RwLock::new(HashMap::new())),
            role: None,
        })
    }

    fn role_key(&self) -> String {
        self.role.clone().unwrap_or_else(|| "primary".to_string())
    }

    async fn dedicated_connection(&self) -> StoreResult<Arc<Mutex<redis::aio::Connection>>> {
        let role = self.role_key();
        {
            let existing = self.dedicated.connections.read().await;
            if let Some(conn) = existing.get(&role) {
                return Ok(conn.clone());
            }
        }
        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(connection_err)?;
        let handle = Arc::new(Mutex::new(conn));
        self.dedicated.connections.write().await.insert(role, handle.clone());
        Ok(handle)
    }

    /// Take this role's cached raw connection if one was reclaimed from a
    /// prior pub/sub session, otherwise open a fresh one. Reclaiming is
    /// only possible when nothing else holds a reference to the cached
    /// connection — true for pub/sub-only roles (`ActionSubscriber`,
    /// `<queue>Subscriber`), which never also perform `BRPOP`.
    async fn take_or_open_connection_for_pubsub(&self) -> StoreResult<redis::aio::Connection> {
        let role = self.role_key();
        let existing = self.dedicated.connections.write().await.remove(&role);
        if let Some(shared) = existing {
            match Arc::try_unwrap(shared) {
                Ok(mutex) => return Ok(mutex.into_inner()),
                Err(shared) => {
                    self.dedicated.connections.write().await.insert(role, shared);
                }
            }
        }
        self.client.get_async_connection().await.map_err(connection_err)
    }

    /// Tear down this role's active pub/sub session, if any. When
    /// `channel_filter` is `Some`, only a session subscribed to that exact
    /// channel is closed (used by [`Store::unsubscribe`]); `None` closes
    /// whatever the role was doing regardless of channel (used when
    /// starting a new subscription on a reused role). The forwarder task is
    /// asked to leave subscribe mode and hand its connection back for
    /// [`RedisStore::take_or_open_connection_for_pubsub`] to reuse.
    async fn close_pubsub_session(&self, channel_filter: Option<&str>) {
        let role = self.role_key();
        let session = {
            let mut sessions = self.dedicated.pubsub.write().await;
            let matches = sessions
                .get(&role)
                .map(|s| channel_filter.map(|c| c == s.channel).unwrap_or(true))
                .unwrap_or(false);
            if matches {
                sessions.remove(&role)
            } else {
                None
            }
        };
        let Some(mut session) = session else { return };
        let Some(stop_tx) = session.stop_tx.take() else { return };
        let (reply_tx, reply_rx) = oneshot::channel();
        if stop_tx.send(StopRequest { reply: reply_tx }).is_err() {
            // Forwarder already exited on its own (stream closed, send failed).
            return;
        }
        if let Ok(Ok(conn)) = tokio::time::timeout(PUBSUB_RECLAIM_TIMEOUT, reply_rx).await {
            self.dedicated.connections.write().await.insert(role, Arc::new(Mutex::new(conn)));
        }
    }

    /// Drive a single role's subscription: forward messages until asked to
    /// stop, then leave subscribe mode and hand the connection back on the
    /// reply channel so the next subscribe on this role can reuse it. If
    /// the stop sender is simply dropped (engine shutdown), the connection
    /// is left to close on drop instead.
    fn spawn_pubsub_forwarder(
        mut pubsub: PubSub,
        channel: String,
        tx: mpsc::Sender<StoreMessage>,
        mut stop_rx: oneshot::Receiver<StopRequest>,
    ) {
        tokio::spawn(async move {
            use futures::StreamExt;
            if pubsub.subscribe(&channel).await.is_err() {
                return;
            }
            loop {
                let mut stream = pubsub.on_message();
                tokio::select! {
                    biased;
                    stopped = &mut stop_rx => {
                        drop(stream);
                        if let Ok(request) = stopped {
                            let _ = pubsub.unsubscribe(&channel).await;
                            let conn = pubsub.into_connection().await;
                            let _ = request.reply.send(conn);
                        }
                        return;
                    }
                    maybe_msg = stream.next() => {
                        match maybe_msg {
                            Some(msg) => {
                                let payload: String = match msg.get_payload() {
                                    Ok(p) => p,
                                    Err(_) => continue,
                                };
                                drop(stream);
                                if tx.send(StoreMessage { channel: channel.clone(), payload }).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let pairs: Vec<(String, String)> = fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        conn.hset_multiple(key, &pairs).await.map_err(command_err)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(command_err)
    }

    async fn pexpire(&self, key: &str, ttl_ms: i64) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.pexpire(key, ttl_ms).await.map_err(command_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.sadd(key, member).await.map_err(command_err)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        conn.sismember(key, member).await.map_err(command_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.lpush(key, value).await.map_err(command_err)
    }

    async fn brpop(&self, key: &str) -> StoreResult<String> {
        let handle = self.dedicated_connection().await?;
        let mut conn = handle.lock().await;
        let (_key, value): (String, String) = conn.brpop(key, 0.0).await.map_err(command_err)?;
        Ok(value)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await.map_err(command_err)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.zrembyscore(key, min, max).await.map_err(command_err)
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        conn.publish(channel, message).await.map_err(command_err)
    }

    async fn enqueue_action(
        &self,
        action_key: &str,
        queue: &str,
        fields: &HashMap<String, String>,
        ttl_ms: i64,
    ) -> StoreResult<()> {
        let mut conn = self.manager.clone();
        let mut invocation = redis::Script::new(ENQUEUE_SCRIPT).prepare_invoke();
        invocation.key(action_key).key(queue);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        invocation.arg(ttl_ms);
        invocation
            .invoke_async::<_, ()>(&mut conn)
            .await
            .map_err(command_err)
    }

    /// Reuses this role's dedicated connection when one was reclaimed from
    /// a prior subscription, and replaces (rather than leaks) whatever
    /// subscription this role was previously driving.
    async fn subscribe_channel(&self, channel: &str) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        self.close_pubsub_session(None).await;

        let conn = self.take_or_open_connection_for_pubsub().await?;
        let pubsub = conn.into_pubsub();
        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = oneshot::channel();
        Self::spawn_pubsub_forwarder(pubsub, channel.to_string(), tx, stop_rx);

        let role = self.role_key();
        self.dedicated.pubsub.write().await.insert(
            role,
            PubSubSession {
                channel: channel.to_string(),
                stop_tx: Some(stop_tx),
            },
        );
        Ok(rx)
    }

    async fn subscribe_keyspace(&self, key: &str) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        self.subscribe_channel(&keyspace_channel(key)).await
    }

    async fn unsubscribe(&self, channel: &str) -> StoreResult<()> {
        self.close_pubsub_session(Some(channel)).await;
        Ok(())
    }

    async fn config_get(&self, parameter: &str) -> StoreResult<Option<String>> {
        let mut conn = self.manager.clone();
        let pairs: Vec<(String, String)> = redis::cmd("CONFIG")
            .arg("GET")
            .arg(parameter)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(pairs.into_iter().next().map(|(_, v)| v))
    }

    async fn claim_verification_sentinel(&self, key: &str, ttl_seconds: i64) -> StoreResult<bool> {
        let mut conn = self.manager.clone();
        let claimed: i64 = redis::Script::new(CLAIM_SENTINEL_SCRIPT)
            .key(key)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(claimed == 1)
    }

    async fn duplicate(&self, role: &str) -> StoreResult<Arc<dyn Store>> {
        {
            let existing = self.roles.read().await;
            if let Some(handle) = existing.get(role) {
                return Ok(handle.clone());
            }
        }
        let duplicated = Self {
            client: self.client.clone(),
            manager: self.manager.clone(),
            dedicated: self.dedicated.clone(),
            roles: self.roles.clone(),
            role: Some(role.to_string()),
        };
        duplicated.dedicated_connection().await?;
        let handle: Arc<dyn Store> = Arc::new(duplicated);
        self.roles.write().await.insert(role.to_string(), handle.clone());
        Ok(handle)
    }

    async fn destroy(&self) -> StoreResult<()> {
        // Dropping each session's `stop_tx` (rather than awaiting a graceful
        // handoff) signals every forwarder to stop; its connection closes
        // on drop since nothing reclaims it during a full engine teardown.
        self.dedicated.pubsub.write().await.clear();
        self.dedicated.connections.write().await.clear();
        self.roles.write().await.clear();
        Ok(())
    }
}

/// `__keyspace@<db>__:<key>` — the engine assumes database index 0, the
/// Redis default, consistently with a single-db deployment (§6).
pub fn keyspace_channel(key: &str) -> String {
    format!("__keyspace@0__:{key}")
}
