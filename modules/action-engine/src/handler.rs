//! In-process handler registry (§4.8, C10) — the systems-language
//! substitute for doclet-driven `{file_path, method_name, context_name}`
//! resolution (§9). Complements, and is independent of, the Registry's
//! cross-engine durable tables.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::EngineError;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, args: Vec<Value>) -> Result<Value, EngineError>;
}

/// Registration happens once at startup and reads dominate thereafter, so
/// a plain `RwLock<HashMap<..>>` is preferred over a lock-free map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str, handler: Arc<dyn Handler>) {
        self.handlers.write().await.insert(name.to_string(), handler);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().await.get(name).cloned()
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }
}
