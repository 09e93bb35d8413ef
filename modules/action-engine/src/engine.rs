//! Lifecycle, connection management, and public operations (§4.7, C8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, OnceCell};
use tracing::{error, warn};

use crate::action::{Action, ActionMeta, ACTION_TTL_MS};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::handler::{Handler, HandlerRegistry};
use crate::registry::Registry;
use crate::store::{RedisStore, Store, StoreMessage};
use crate::types::{ActionConfiguration, ExtendableActionConfiguration, ResourceStructure};

/// Store-side sentinel key guarding `verify_store_configuration` so only
/// one engine per TTL window performs the check (§4.7, §5).
const VERIFICATION_SENTINEL_KEY: &str = "RedisConnectionVerified";

/// §9 Open Question (ii): kept as observed in the source, seven hours.
const VERIFICATION_SENTINEL_TTL_SECONDS: i64 = 7 * 3600;

/// Exit code when `notify-keyspace-events` is misconfigured (§6).
const MISCONFIGURED_KEYSPACE_EVENTS_EXIT_CODE: i32 = 699;

/// Three lists produced by the external Metadata Ingestor (§4.1 C9, §6
/// `autodiscover`). Out of scope: in this crate `autodiscover` returns
/// empty lists and logs that no ingestor is wired in.
#[derive(Debug, Default)]
pub struct DiscoveredConfigurations {
    pub actions: Vec<ActionConfiguration>,
    pub extendable_actions: Vec<ExtendableActionConfiguration>,
    pub resources: Vec<ResourceStructure>,
}

pub struct Engine {
    config: Config,
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Arc<Dispatcher>,
    ready: OnceCell<()>,
}

impl Engine {
    /// Construct a handle over an already-built [`Store`]. Available
    /// immediately; no I/O happens until [`Engine::await_ready`] runs.
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let registry = Arc::new(Registry::new(store.clone(), config.action_queue_name.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            handlers.clone(),
            config.engine_id.clone(),
            config.engine_name.clone(),
        ));
        Self {
            config,
            store,
            registry,
            handlers,
            dispatcher,
            ready: OnceCell::new(),
        }
    }

    /// Connect to the Redis-compatible store named by `config.redis_url`
    /// and construct an Engine over it.
    pub async fn connect(config: Config) -> EngineResult<Self> {
        let store = RedisStore::connect(&config.redis_url).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Every public store-touching operation internally awaits this first
    /// (§9 "proxy merging engine + readiness future").
    pub async fn await_ready(&self) -> EngineResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.verify_store_configuration().await?;
                self.registry.register_queue(&self.config.action_queue_name).await?;
                Ok::<(), EngineError>(())
            })
            .await?;
        Ok(())
    }

    /// Once per engine generation: confirm keyspace notifications and
    /// persistence are configured as the engine requires (§4.7).
    async fn verify_store_configuration(&self) -> EngineResult<()> {
        let claimed = self
            .store
            .claim_verification_sentinel(VERIFICATION_SENTINEL_KEY, VERIFICATION_SENTINEL_TTL_SECONDS)
            .await?;
        if !claimed {
            return Ok(());
        }

        let notify_keyspace_events = self.store.config_get("notify-keyspace-events").await?;
        if notify_keyspace_events.as_deref() != Some("AKE") {
            error!(
                observed = ?notify_keyspace_events,
                "store is not configured with notify-keyspace-events=AKE; the engine cannot receive queue or action wake-ups"
            );
            std::process::exit(MISCONFIGURED_KEYSPACE_EVENTS_EXIT_CODE);
        }

        let save_policy = self.store.config_get("save").await?;
        if save_policy.as_deref().unwrap_or("").is_empty() {
            warn!("store has no save policy configured; action state is memory-only");
        }

        Ok(())
    }

    pub async fn publish_action_to_queue_by_name(&self, queue: &str, action: &Action) -> EngineResult<()> {
        self.await_ready().await?;
        self.dispatcher.publish_action_to_queue_by_name(queue, action).await
    }

    pub async fn publish_action_by_name_and_handle_response(
        &self,
        name: &str,
        message: HashMap<String, Value>,
        origin_user_id: &str,
    ) -> EngineResult<Value> {
        self.publish_action_by_name_and_handle_response_with_timeout(
            name,
            message,
            origin_user_id,
            Duration::from_millis(ACTION_TTL_MS as u64),
        )
        .await
    }

    pub async fn publish_action_by_name_and_handle_response_with_timeout(
        &self,
        name: &str,
        message: HashMap<String, Value>,
        origin_user_id: &str,
        timeout: Duration,
    ) -> EngineResult<Value> {
        self.await_ready().await?;
        self.dispatcher
            .publish_action_by_name_and_handle_response(name, message, origin_user_id, timeout)
            .await
    }

    pub async fn publish_event_to_channel_by_name(&self, channel: &str, event: Event) -> EngineResult<()> {
        self.await_ready().await?;
        crate::event::publish(&self.store, channel, &event).await
    }

    pub async fn subscribe_to_event_channel_by_name(&self, channel: &str) -> EngineResult<mpsc::Receiver<StoreMessage>> {
        self.await_ready().await?;
        Ok(self.store.subscribe_channel(channel).await?)
    }

    pub async fn unsubscribe_from_event_channel_by_name(&self, channel: &str) -> EngineResult<()> {
        self.store.unsubscribe(channel).await?;
        Ok(())
    }

    /// Idempotent installation of the auto-retrieve loop for `queue`.
    pub async fn subscribe_to_action_queue_update(&self, queue: &str) -> EngineResult<()> {
        self.await_ready().await?;
        self.dispatcher.subscribe_to_action_queue_update(queue).await
    }

    pub async fn retrieve_pending_action(&self, queue: &str) -> EngineResult<()> {
        self.await_ready().await?;
        self.dispatcher.retrieve_pending_action(queue).await
    }

    pub async fn execute_action(&self, action: Action) -> EngineResult<Action> {
        self.await_ready().await?;
        self.dispatcher.execute_action(action).await
    }

    pub async fn store_action_configuration(&self, config: &ActionConfiguration) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_action_configuration(config).await
    }

    pub async fn store_action_configurations(&self, configs: &[ActionConfiguration]) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_action_configurations(configs).await
    }

    pub async fn store_extendable_action_configuration(
        &self,
        config: &ExtendableActionConfiguration,
    ) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_extendable_action_configuration(config).await
    }

    pub async fn store_extendable_action_configurations(
        &self,
        configs: &[ExtendableActionConfiguration],
    ) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_extendable_action_configurations(configs).await
    }

    pub async fn store_resource_structure(&self, structure: &ResourceStructure) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_resource_structure(structure).await
    }

    pub async fn store_resource_structures(&self, structures: &[ResourceStructure]) -> EngineResult<()> {
        self.await_ready().await?;
        self.registry.store_resource_structures(structures).await
    }

    /// Out-of-scope external collaborator (§1, C9): this crate does not
    /// ship a doclet/metadata harvester, so autodiscovery is a documented
    /// no-op rather than a fabricated parser.
    pub async fn autodiscover(&self, directory: &str) -> EngineResult<DiscoveredConfigurations> {
        warn!(directory, "autodiscover has no metadata ingestor wired in; returning empty configuration lists");
        Ok(DiscoveredConfigurations::default())
    }

    /// Ambient C10 addition: install an in-process callable for `name` and
    /// ensure it is resolvable through the cross-engine Registry even if no
    /// configuration was stored for it explicitly.
    pub async fn register_handler(&self, name: &str, handler: Arc<dyn Handler>) -> EngineResult<()> {
        self.await_ready().await?;
        self.handlers.register(name, handler).await;
        if self.registry.load_action_configuration(name).await.is_err() {
            let config = ActionConfiguration {
                action_name: name.to_string(),
                action_signature: vec![],
                action_alternative_signature: None,
                argument_configuration_by_argument_name: HashMap::new(),
                context_name: "Self".to_string(),
                file_path: None,
                method_name: None,
                event_name: None,
                action_name_to_extend: None,
            };
            self.registry.store_action_configuration(&config).await?;
        }
        Ok(())
    }

    pub fn fresh_meta(&self, origin_user_id: &str) -> ActionMeta {
        ActionMeta::fresh(&self.config.engine_id, &self.config.engine_name, origin_user_id)
    }

    /// Close every primary and derived connection.
    pub async fn destroy(&self) -> EngineResult<()> {
        self.store.destroy().await?;
        Ok(())
    }
}
