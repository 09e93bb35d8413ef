use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineResult, StoreError};
use crate::store::Store;

/// Event TTL in seconds (§3): five minutes.
pub const EVENT_TTL_SECONDS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub created_at: DateTime<Utc>,
    pub origin_engine_id: String,
}

/// Free-form, handler-published message on a pub/sub channel (§3, C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub name: String,
    pub message: HashMap<String, Value>,
    pub meta: EventMeta,
}

impl Event {
    pub fn new(name: &str, message: HashMap<String, Value>, origin_engine_id: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            message,
            meta: EventMeta {
                created_at: Utc::now(),
                origin_engine_id: origin_engine_id.to_string(),
            },
        }
    }

    /// Key derivation: `Event:<name>:<id>`.
    pub fn key(&self) -> String {
        format!("Event:{}:{}", self.name, self.id)
    }

    /// Expiry timestamp used as the sorted-set score in the channel's
    /// retention index: publish-time + 5 minutes.
    pub fn expiry_score(&self) -> f64 {
        (self.meta.created_at.timestamp_millis() + EVENT_TTL_SECONDS * 1000) as f64
    }

    pub fn to_fields(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), self.id.clone());
        fields.insert("name".to_string(), self.name.clone());
        fields.insert(
            "message".to_string(),
            serde_json::to_string(&self.message).map_err(|e| StoreError::Malformed {
                key: "message".to_string(),
                reason: e.to_string(),
            })?,
        );
        fields.insert(
            "meta".to_string(),
            serde_json::to_string(&self.meta).map_err(|e| StoreError::Malformed {
                key: "meta".to_string(),
                reason: e.to_string(),
            })?,
        );
        Ok(fields)
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "event_id": self.id,
            "event_name": self.name,
            "event_message": self.message,
        })
    }
}

/// The full §3 Event pipeline: hash write, TTL, sorted-set retention entry
/// on `channel`, trim of that set's expired entries, and the publish
/// itself. Shared by every caller that needs to persist and publish an
/// Event rather than put a bare payload on the wire.
pub async fn publish(store: &Arc<dyn Store>, channel: &str, event: &Event) -> EngineResult<()> {
    let fields = event.to_fields()?;
    store.hset_all(&event.key(), &fields).await?;
    store.pexpire(&event.key(), EVENT_TTL_SECONDS * 1000).await?;
    store.zadd(channel, &event.key(), event.expiry_score()).await?;
    let now_ms = Utc::now().timestamp_millis() as f64;
    store.zremrangebyscore(channel, f64::MIN, now_ms).await?;
    store.publish(channel, &event.to_json().to_string()).await?;
    Ok(())
}
