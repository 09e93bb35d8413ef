//! In-memory [`Store`] test double, mirroring the host's `MemoryEventSink`
//! pattern: an `Arc`-shared inner state behind `tokio::sync::RwLock`, no
//! network, used by unit and dispatcher tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify, RwLock};

use crate::error::StoreResult;

use super::{Store, StoreMessage};

const KEYSPACE_PREFIX: &str = "__keyspace@0__:";

#[derive(Default)]
struct Inner {
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    lists: RwLock<HashMap<String, VecDeque<String>>>,
    zsets: RwLock<HashMap<String, Vec<(String, f64)>>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<StoreMessage>>>>,
    sentinels: RwLock<HashSet<String>>,
    list_notify: RwLock<HashMap<String, Arc<Notify>>>,
    roles: RwLock<HashMap<String, Arc<dyn Store>>>,
}

/// A process-local, in-memory implementation of [`Store`]. Cheap to clone —
/// all state lives behind the shared `Inner`.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
        }
    }

    async fn notify_for(&self, key: &str) -> Arc<Notify> {
        let mut map = self.inner.list_notify.write().await;
        map.entry(key.to_string()).or_insert_with(|| Arc::new(Notify::new())).clone()
    }

    async fn notify_keyspace(&self, key: &str, command: &str) {
        let channel = format!("{KEYSPACE_PREFIX}{key}");
        let subs = self.inner.subscribers.read().await;
        if let Some(senders) = subs.get(&channel) {
            for sender in senders {
                let _ = sender
                    .send(StoreMessage {
                        channel: channel.clone(),
                        payload: command.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn publish_on(&self, channel: &str, payload: &str) {
        let subs = self.inner.subscribers.read().await;
        if let Some(senders) = subs.get(channel) {
            for sender in senders {
                let _ = sender
                    .send(StoreMessage {
                        channel: channel.to_string(),
                        payload: payload.to_string(),
                    })
                    .await;
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn hset_all(&self, key: &str, fields: &HashMap<String, String>) -> StoreResult<()> {
        {
            let mut hashes = self.inner.hashes.write().await;
            hashes.entry(key.to_string()).or_default().extend(fields.clone());
        }
        self.notify_keyspace(key, "hmset").await;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let hashes = self.inner.hashes.read().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn pexpire(&self, _key: &str, _ttl_ms: i64) -> StoreResult<()> {
        // TTL eviction is not simulated; unit tests never run long enough to
        // observe it and dispatcher logic only relies on presence.
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut sets = self.inner.sets.write().await;
        sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let sets = self.inner.sets.read().await;
        Ok(sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<()> {
        {
            let mut lists = self.inner.lists.write().await;
            lists.entry(key.to_string()).or_default().push_front(value.to_string());
        }
        self.notify_for(key).await.notify_waiters();
        self.notify_keyspace(key, "lpush").await;
        Ok(())
    }

    async fn brpop(&self, key: &str) -> StoreResult<String> {
        loop {
            {
                let mut lists = self.inner.lists.write().await;
                if let Some(list) = lists.get_mut(key) {
                    if let Some(value) = list.pop_back() {
                        return Ok(value);
                    }
                }
            }
            self.notify_for(key).await.notified().await;
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut zsets = self.inner.zsets.write().await;
        let entries = zsets.entry(key.to_string()).or_default();
        entries.retain(|(m, _)| m != member);
        entries.push((member.to_string(), score));
        Ok(())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<()> {
        let mut zsets = self.inner.zsets.write().await;
        if let Some(entries) = zsets.get_mut(key) {
            entries.retain(|(_, score)| *score < min || *score > max);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()> {
        self.publish_on(channel, message).await;
        Ok(())
    }

    async fn enqueue_action(
        &self,
        action_key: &str,
        queue: &str,
        fields: &HashMap<String, String>,
        ttl_ms: i64,
    ) -> StoreResult<()> {
        self.hset_all(action_key, fields).await?;
        self.lpush(queue, action_key).await?;
        self.pexpire(action_key, ttl_ms).await?;
        Ok(())
    }

    async fn subscribe_channel(&self, channel: &str) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        let (tx, rx) = mpsc::channel(64);
        let mut subs = self.inner.subscribers.write().await;
        subs.entry(channel.to_string()).or_default().push(tx);
        Ok(rx)
    }

    async fn subscribe_keyspace(&self, key: &str) -> StoreResult<mpsc::Receiver<StoreMessage>> {
        self.subscribe_channel(&format!("{KEYSPACE_PREFIX}{key}")).await
    }

    async fn unsubscribe(&self, channel: &str) -> StoreResult<()> {
        let mut subs = self.inner.subscribers.write().await;
        subs.remove(channel);
        Ok(())
    }

    async fn config_get(&self, parameter: &str) -> StoreResult<Option<String>> {
        match parameter {
            "notify-keyspace-events" => Ok(Some("AKE".to_string())),
            "save" => Ok(Some("3600 1".to_string())),
            _ => Ok(None),
        }
    }

    async fn claim_verification_sentinel(&self, key: &str, _ttl_seconds: i64) -> StoreResult<bool> {
        let mut sentinels = self.inner.sentinels.write().await;
        Ok(sentinels.insert(key.to_string()))
    }

    async fn duplicate(&self, role: &str) -> StoreResult<Arc<dyn Store>> {
        let mut roles = self.inner.roles.write().await;
        if let Some(existing) = roles.get(role) {
            return Ok(existing.clone());
        }
        let handle: Arc<dyn Store> = Arc::new(self.clone());
        roles.insert(role.to_string(), handle.clone());
        Ok(handle)
    }

    async fn destroy(&self) -> StoreResult<()> {
        self.inner.roles.write().await.clear();
        self.inner.subscribers.write().await.clear();
        Ok(())
    }
}
