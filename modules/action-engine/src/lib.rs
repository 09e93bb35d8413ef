pub mod action;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod registry;
pub mod signature;
pub mod store;
pub mod template;
pub mod types;

pub use action::{Action, ActionMeta, ActionStatus};
pub use config::Config;
pub use engine::{DiscoveredConfigurations, Engine};
pub use error::{EngineError, EngineResult, StoreError, StoreResult};
pub use event::Event;
pub use handler::{Handler, HandlerRegistry};
pub use registry::Registry;
#[cfg(any(test, feature = "test-utils"))]
pub use store::MemoryStore;
pub use store::{RedisStore, Store, StoreMessage};
pub use types::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};
