use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, StoreError};

/// Hash TTL in milliseconds (§3): one hour from last write.
pub const ACTION_TTL_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "Pending",
            ActionStatus::Processing => "Processing",
            ActionStatus::Completed => "Completed",
            ActionStatus::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = StoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(ActionStatus::Pending),
            "Processing" => Ok(ActionStatus::Processing),
            "Completed" => Ok(ActionStatus::Completed),
            "Failed" => Ok(ActionStatus::Failed),
            other => Err(StoreError::Malformed {
                key: "status".to_string(),
                reason: format!("unrecognized action status {other:?}"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub origin_engine_id: String,
    pub origin_engine_name: String,
    pub origin_process_id: u32,
    pub origin_user_id: String,
}

impl ActionMeta {
    pub fn fresh(origin_engine_id: &str, origin_engine_name: &str, origin_user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            origin_engine_id: origin_engine_id.to_string(),
            origin_engine_name: origin_engine_name.to_string(),
            origin_process_id: std::process::id(),
            origin_user_id: origin_user_id.to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A named unit of work with a payload and a correlated response (§3, C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub name: String,
    pub original_message: HashMap<String, Value>,
    pub final_message: HashMap<String, Value>,
    pub status: ActionStatus,
    pub meta: ActionMeta,
}

impl Action {
    /// Create a fresh, unpublished Action with a new time-ordered identifier.
    pub fn new(name: &str, original_message: HashMap<String, Value>, meta: ActionMeta) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            original_message,
            final_message: HashMap::new(),
            status: ActionStatus::Pending,
            meta,
        }
    }

    /// Key derivation: `Action:<name>:<id>`.
    pub fn key(&self) -> String {
        format!("Action:{}:{}", self.name, self.id)
    }

    pub fn key_for(name: &str, id: &str) -> String {
        format!("Action:{name}:{id}")
    }

    /// Per-action status event channel: `Action:<id>`.
    pub fn channel(&self) -> String {
        format!("Action:{}", self.id)
    }

    /// Rehydrate from a flat hash read from the store.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, StoreError> {
        let get = |k: &str| -> Result<&String, StoreError> {
            fields.get(k).ok_or_else(|| StoreError::Malformed {
                key: k.to_string(),
                reason: "missing field".to_string(),
            })
        };
        let id = get("id")?.clone();
        let name = get("name")?.clone();
        let status: ActionStatus = get("status")?.parse()?;
        let meta: ActionMeta =
            serde_json::from_str(get("meta")?).map_err(|e| StoreError::Malformed {
                key: "meta".to_string(),
                reason: e.to_string(),
            })?;
        let original_message: HashMap<String, Value> = serde_json::from_str(get("original_message")?)
            .map_err(|e| StoreError::Malformed {
                key: "original_message".to_string(),
                reason: e.to_string(),
            })?;
        let final_message: HashMap<String, Value> = match fields.get("final_message") {
            Some(raw) => serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
                key: "final_message".to_string(),
                reason: e.to_string(),
            })?,
            None => HashMap::new(),
        };
        Ok(Self {
            id,
            name,
            original_message,
            final_message,
            status,
            meta,
        })
    }

    /// Serialize to the flat hash field layout used for `HMSET`.
    pub fn to_fields(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut fields = HashMap::new();
        fields.insert("id".to_string(), self.id.clone());
        fields.insert("name".to_string(), self.name.clone());
        fields.insert("status".to_string(), self.status.as_str().to_string());
        fields.insert(
            "meta".to_string(),
            serde_json::to_string(&self.meta).map_err(|e| StoreError::Malformed {
                key: "meta".to_string(),
                reason: e.to_string(),
            })?,
        );
        fields.insert(
            "original_message".to_string(),
            serde_json::to_string(&self.original_message).map_err(|e| StoreError::Malformed {
                key: "original_message".to_string(),
                reason: e.to_string(),
            })?,
        );
        fields.insert("origin_user_id".to_string(), self.meta.origin_user_id.clone());
        if !self.final_message.is_empty() {
            fields.insert(
                "final_message".to_string(),
                serde_json::to_string(&self.final_message).map_err(|e| StoreError::Malformed {
                    key: "final_message".to_string(),
                    reason: e.to_string(),
                })?,
            );
        }
        Ok(fields)
    }

    /// Transition status. Terminal states are immutable (§3 invariant).
    pub fn update_status(&mut self, next: ActionStatus) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::UndefinedValue(format!(
                "action {} already terminal at status {:?}",
                self.id, self.status
            )));
        }
        self.status = next;
        self.meta.touch();
        Ok(())
    }

    pub fn update_message(&mut self, final_message: HashMap<String, Value>) {
        self.final_message = final_message;
        self.meta.touch();
    }

    /// The effective message used for signature resolution: the original
    /// payload, available for overlay by extendable-action default merging.
    pub fn effective_message(&self) -> HashMap<String, Value> {
        self.original_message.clone()
    }
}
