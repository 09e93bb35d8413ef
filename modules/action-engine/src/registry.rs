//! Durable cross-engine registry (§4.3, C4): five store-backed tables that
//! together enumerate known actions, their queues, and their types.

use std::sync::Arc;

use crate::error::{EngineError, EngineResult, StoreError};
use crate::store::Store;
use crate::types::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};

pub const ACTION_CONFIGURATION_TABLE: &str = "ActionConfigurationByActionName";
pub const EXTENDABLE_ACTION_CONFIGURATION_TABLE: &str = "ExtendableActionConfigurationByActionName";
pub const ACTION_QUEUE_NAME_TABLE: &str = "ActionQueueNameByActionName";
pub const ACTION_QUEUE_NAME_SET: &str = "ActionQueueNameSet";
pub const RESOURCE_STRUCTURE_TABLE: &str = "ResourceStructureByResourceType";

pub struct Registry {
    store: Arc<dyn Store>,
    default_queue: String,
}

impl Registry {
    pub fn new(store: Arc<dyn Store>, default_queue: String) -> Self {
        Self { store, default_queue }
    }

    /// Store a single action configuration and associate it with the
    /// engine's default queue (§4.3's "one behavior").
    pub async fn store_action_configuration(&self, config: &ActionConfiguration) -> EngineResult<()> {
        self.register_queue(&self.default_queue).await?;
        let mut fields = std::collections::HashMap::new();
        fields.insert(config.action_name.clone(), to_json(config)?);
        self.store.hset_all(ACTION_CONFIGURATION_TABLE, &fields).await?;

        let mut queue_fields = std::collections::HashMap::new();
        queue_fields.insert(config.action_name.clone(), self.default_queue.clone());
        self.store.hset_all(ACTION_QUEUE_NAME_TABLE, &queue_fields).await?;
        Ok(())
    }

    pub async fn store_action_configurations(&self, configs: &[ActionConfiguration]) -> EngineResult<()> {
        for config in configs {
            self.store_action_configuration(config).await?;
        }
        Ok(())
    }

    pub async fn load_action_configuration(&self, name: &str) -> EngineResult<ActionConfiguration> {
        let table = self.store.hgetall(ACTION_CONFIGURATION_TABLE).await?;
        let raw = table.get(name).ok_or_else(|| EngineError::UndefinedContext {
            candidates: vec![vec![name.to_string()]],
            available_keys: table.keys().cloned().collect(),
        })?;
        from_json(raw)
    }

    pub async fn store_extendable_action_configuration(
        &self,
        config: &ExtendableActionConfiguration,
    ) -> EngineResult<()> {
        self.register_queue(&self.default_queue).await?;
        let mut fields = std::collections::HashMap::new();
        fields.insert(config.base.action_name.clone(), to_json(config)?);
        self.store
            .hset_all(EXTENDABLE_ACTION_CONFIGURATION_TABLE, &fields)
            .await?;
        let mut queue_fields = std::collections::HashMap::new();
        queue_fields.insert(config.base.action_name.clone(), self.default_queue.clone());
        self.store.hset_all(ACTION_QUEUE_NAME_TABLE, &queue_fields).await?;
        Ok(())
    }

    pub async fn store_extendable_action_configurations(
        &self,
        configs: &[ExtendableActionConfiguration],
    ) -> EngineResult<()> {
        for config in configs {
            self.store_extendable_action_configuration(config).await?;
        }
        Ok(())
    }

    pub async fn load_extendable_action_configuration(
        &self,
        name: &str,
    ) -> EngineResult<ExtendableActionConfiguration> {
        let table = self.store.hgetall(EXTENDABLE_ACTION_CONFIGURATION_TABLE).await?;
        let raw = table.get(name).ok_or_else(|| EngineError::UndefinedContext {
            candidates: vec![vec![name.to_string()]],
            available_keys: table.keys().cloned().collect(),
        })?;
        from_json(raw)
    }

    pub async fn store_resource_structure(&self, structure: &ResourceStructure) -> EngineResult<()> {
        let mut fields = std::collections::HashMap::new();
        fields.insert(structure.resource_type.clone(), to_json(structure)?);
        self.store.hset_all(RESOURCE_STRUCTURE_TABLE, &fields).await?;
        Ok(())
    }

    pub async fn store_resource_structures(&self, structures: &[ResourceStructure]) -> EngineResult<()> {
        for structure in structures {
            self.store_resource_structure(structure).await?;
        }
        Ok(())
    }

    pub async fn load_resource_structures(&self) -> EngineResult<std::collections::HashMap<String, ResourceStructure>> {
        let table = self.store.hgetall(RESOURCE_STRUCTURE_TABLE).await?;
        table
            .into_iter()
            .map(|(k, v)| from_json(&v).map(|structure| (k, structure)))
            .collect()
    }

    /// `ActionQueueNameByActionName[name]` (§3 invariant i).
    pub async fn queue_for_action(&self, name: &str) -> EngineResult<String> {
        let table = self.store.hgetall(ACTION_QUEUE_NAME_TABLE).await?;
        table.get(name).cloned().ok_or_else(|| EngineError::UndefinedContext {
            candidates: vec![vec![name.to_string()]],
            available_keys: table.keys().cloned().collect(),
        })
    }

    pub async fn register_queue(&self, queue: &str) -> EngineResult<()> {
        self.store.sadd(ACTION_QUEUE_NAME_SET, queue).await?;
        Ok(())
    }

    pub async fn is_registered_queue(&self, queue: &str) -> EngineResult<bool> {
        Ok(self.store.sismember(ACTION_QUEUE_NAME_SET, queue).await?)
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(|e| {
        EngineError::Store(StoreError::Malformed {
            key: "registry".to_string(),
            reason: e.to_string(),
        })
    })
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str) -> EngineResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        EngineError::Store(StoreError::Malformed {
            key: "registry".to_string(),
            reason: e.to_string(),
        })
    })
}
