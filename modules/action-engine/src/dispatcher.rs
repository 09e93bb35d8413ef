//! The action state machine (§4.6, C7): publish, enqueue, dequeue on queue
//! notification, execute, update status, publish status events, and
//! request/response correlation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::action::{Action, ActionMeta, ActionStatus, ACTION_TTL_MS};
use crate::error::{EngineError, EngineResult};
use crate::event::{self, Event};
use crate::registry::Registry;
use crate::handler::HandlerRegistry;
use crate::signature::{resolve_arguments, resolve_signature};
use crate::store::{queue_handler_role, queue_subscriber_role, Store, ACTION_SUBSCRIBER_ROLE};
use crate::template::{evaluate, TemplateContext};
use crate::types::ArgumentConfigurationByArgumentName;

pub struct Dispatcher {
    primary: Arc<dyn Store>,
    registry: Arc<Registry>,
    handlers: Arc<HandlerRegistry>,
    engine_id: String,
    engine_name: String,
    /// Queues with an installed auto-retrieve loop, guarding
    /// `subscribe_to_action_queue_update` so a queue never ends up with two
    /// concurrent BRPOP loops racing each other (§8).
    subscribed_queues: Mutex<HashSet<String>>,
}

struct EffectiveConfiguration {
    candidates: Vec<Vec<String>>,
    schema: ArgumentConfigurationByArgumentName,
    effective_message: HashMap<String, Value>,
    context_name: String,
}

impl Dispatcher {
    pub fn new(
        primary: Arc<dyn Store>,
        registry: Arc<Registry>,
        handlers: Arc<HandlerRegistry>,
        engine_id: String,
        engine_name: String,
    ) -> Self {
        Self {
            primary,
            registry,
            handlers,
            engine_id,
            engine_name,
            subscribed_queues: Mutex::new(HashSet::new()),
        }
    }

    fn fresh_meta(&self, origin_user_id: &str) -> ActionMeta {
        ActionMeta::fresh(&self.engine_id, &self.engine_name, origin_user_id)
    }

    async fn persist(&self, action: &Action) -> EngineResult<()> {
        let fields = action.to_fields()?;
        self.primary.hset_all(&action.key(), &fields).await?;
        self.primary.pexpire(&action.key(), ACTION_TTL_MS).await?;
        Ok(())
    }

    /// Enqueue protocol (publish). Preconditions: `queue` is a registered
    /// member of `ActionQueueNameSet`; the Action is well-formed.
    #[instrument(skip(self, action), fields(action_id = %action.id, action_name = %action.name))]
    pub async fn publish_action_to_queue_by_name(&self, queue: &str, action: &Action) -> EngineResult<()> {
        if !self.registry.is_registered_queue(queue).await? {
            return Err(EngineError::UndefinedContext {
                candidates: vec![vec![queue.to_string()]],
                available_keys: vec![],
            });
        }
        let fields = action.to_fields()?;
        self.primary
            .enqueue_action(&action.key(), queue, &fields, ACTION_TTL_MS)
            .await?;
        Ok(())
    }

    /// Request/response correlation (§4.6). Subscribes to the action's
    /// keyspace notification channel *before* enqueueing so a terminal
    /// status write can never race ahead of the subscriber.
    #[instrument(skip(self, message), fields(action_name = %name))]
    pub async fn publish_action_by_name_and_handle_response(
        &self,
        name: &str,
        message: HashMap<String, Value>,
        origin_user_id: &str,
        timeout: Duration,
    ) -> EngineResult<Value> {
        let queue = self.registry.queue_for_action(name).await?;
        let action = Action::new(name, message, self.fresh_meta(origin_user_id));

        let subscriber = self.primary.duplicate(ACTION_SUBSCRIBER_ROLE).await?;
        let mut notifications = subscriber.subscribe_keyspace(&action.key()).await?;

        if let Err(e) = self.publish_action_to_queue_by_name(&queue, &action).await {
            let _ = subscriber.unsubscribe(&action.key()).await;
            return Err(e);
        }

        let key = action.key();
        let result = tokio::time::timeout(timeout, async {
            loop {
                match notifications.recv().await {
                    Some(_) => {
                        let fields = self.primary.hgetall(&key).await?;
                        if fields.is_empty() {
                            continue;
                        }
                        let rehydrated = Action::from_fields(&fields)?;
                        if rehydrated.status.is_terminal() {
                            return Ok(rehydrated);
                        }
                    }
                    None => {
                        return Err(EngineError::Generic(anyhow::anyhow!(
                            "action subscription closed before a terminal status for {key}"
                        )));
                    }
                }
            }
        })
        .await;

        let _ = subscriber.unsubscribe(&action.key()).await;

        let rehydrated = match result {
            Ok(inner) => inner?,
            Err(_) => {
                return Err(EngineError::Generic(anyhow::anyhow!(
                    "timed out awaiting terminal status for action {}",
                    action.id
                )))
            }
        };

        match rehydrated.status {
            ActionStatus::Completed => Ok(Value::Object(
                rehydrated.final_message.into_iter().collect(),
            )),
            ActionStatus::Failed => Err(EngineError::Generic(anyhow::anyhow!(
                "action {} failed: {}",
                rehydrated.id,
                Value::Object(rehydrated.final_message.into_iter().collect())
            ))),
            other => Err(EngineError::Generic(anyhow::anyhow!(
                "action {} resolved in non-terminal status {:?}",
                rehydrated.id,
                other
            ))),
        }
    }

    /// Dequeue protocol: a single blocking pop against the queue's
    /// dedicated handler connection, then asynchronous dispatch so the
    /// handler connection returns to the pool immediately.
    #[instrument(skip(self))]
    pub async fn retrieve_pending_action(self: &Arc<Self>, queue: &str) -> EngineResult<()> {
        let handler_conn = self.primary.duplicate(&queue_handler_role(queue)).await?;
        let action_key = match handler_conn.brpop(queue).await {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, queue, "BRPOP failed, will re-fire on next enqueue notification");
                return Ok(());
            }
        };
        let fields = self.primary.hgetall(&action_key).await?;
        if fields.is_empty() {
            warn!(action_key, "dequeued action key had no hash, likely expired");
            return Ok(());
        }
        let action = Action::from_fields(&fields)?;

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.execute_action(action).await {
                error!(error = %e, "action execution failed");
            }
        });
        Ok(())
    }

    /// Idempotent installation of the auto-retrieve loop for `queue`: a
    /// second call on an already-subscribed queue is a no-op rather than a
    /// second concurrent BRPOP loop (§8).
    pub async fn subscribe_to_action_queue_update(self: &Arc<Self>, queue: &str) -> EngineResult<()> {
        {
            let mut subscribed = self.subscribed_queues.lock().await;
            if !subscribed.insert(queue.to_string()) {
                return Ok(());
            }
        }
        let subscriber = self.primary.duplicate(&queue_subscriber_role(queue)).await?;
        let mut notifications = subscriber.subscribe_keyspace(queue).await?;
        let dispatcher = Arc::clone(self);
        let queue = queue.to_string();
        tokio::spawn(async move {
            while notifications.recv().await.is_some() {
                if let Err(e) = dispatcher.retrieve_pending_action(&queue).await {
                    error!(error = %e, queue = %queue, "retrieve_pending_action failed");
                }
            }
        });
        Ok(())
    }

    /// Run the dispatcher state machine on a rehydrated Action (§4.6
    /// Execute).
    #[instrument(skip(self, action), fields(action_id = %action.id, action_name = %action.name))]
    pub async fn execute_action(&self, mut action: Action) -> EngineResult<Action> {
        let config = match self.registry.load_action_configuration(&action.name).await {
            Ok(c) => c,
            Err(e) => return self.fail(action, &e).await,
        };

        action.update_status(ActionStatus::Processing)?;
        self.persist(&action).await?;

        let effective = match self.resolve_effective_configuration(&action, &config).await {
            Ok(e) => e,
            Err(e) => return self.fail(action, &e).await,
        };

        let selected = match resolve_signature(&effective.candidates, &effective.effective_message, &effective.schema)
        {
            Ok(s) => s.to_vec(),
            Err(e) => return self.fail(action, &e).await,
        };

        let Some(handler) = self.handlers.get(&action.name).await else {
            let e = EngineError::UndefinedContext {
                candidates: vec![vec![action.name.clone()]],
                available_keys: vec![effective.context_name.clone()],
            };
            return self.fail(action, &e).await;
        };

        let args = resolve_arguments(&selected, &effective.effective_message, &action.meta.origin_user_id);

        match handler.call(args).await {
            Ok(result) => {
                let final_message: HashMap<String, Value> = match result {
                    Value::Object(map) => map.into_iter().collect(),
                    other => HashMap::from([("value".to_string(), other)]),
                };
                action.update_status(ActionStatus::Completed)?;
                action.update_message(final_message);
                self.persist(&action).await?;
                self.publish_status_event(&action).await?;
                info!(action_id = %action.id, "action completed");
                Ok(action)
            }
            Err(e) => self.fail(action, &e).await,
        }
    }

    async fn fail(&self, mut action: Action, cause: &EngineError) -> EngineResult<Action> {
        let message = match cause.to_final_message() {
            Value::Object(map) => map.into_iter().collect(),
            other => HashMap::from([("error".to_string(), other)]),
        };
        if !action.status.is_terminal() {
            let _ = action.update_status(ActionStatus::Failed);
            action.update_message(message);
            if let Err(persist_err) = self.persist(&action).await {
                error!(error = %persist_err, "failed to persist failure status");
            }
            let _ = self.publish_status_event(&action).await;
        }
        Err(EngineError::Generic(anyhow::anyhow!("{cause}")))
    }

    async fn publish_status_event(&self, action: &Action) -> EngineResult<()> {
        let message = HashMap::from([
            ("action_id".to_string(), Value::String(action.id.clone())),
            ("action_name".to_string(), Value::String(action.name.clone())),
            (
                "action_status".to_string(),
                Value::String(action.status.as_str().to_string()),
            ),
            (
                "action_final_message".to_string(),
                Value::Object(action.final_message.clone().into_iter().collect()),
            ),
        ]);
        let status_event = Event::new("ActionStatusUpdated", message, &self.engine_id);
        event::publish(&self.primary, &action.channel(), &status_event).await
    }

    async fn resolve_effective_configuration(
        &self,
        action: &Action,
        config: &crate::types::ActionConfiguration,
    ) -> EngineResult<EffectiveConfiguration> {
        let message = action.effective_message();

        let Some(parent_name) = &config.action_name_to_extend else {
            let mut candidates = vec![config.action_signature.clone()];
            if let Some(alt) = &config.action_alternative_signature {
                candidates.push(alt.clone());
            }
            return Ok(EffectiveConfiguration {
                candidates,
                schema: config.argument_configuration_by_argument_name.clone(),
                effective_message: message,
                context_name: config.context_name.clone(),
            });
        };

        let parent = self.registry.load_extendable_action_configuration(parent_name).await?;

        let resource_structures = self.registry.load_resource_structures().await?;
        let resource_structure_by_resource_type = resource_structures
            .into_iter()
            .map(|(resource_type, structure)| {
                serde_json::to_value(structure)
                    .map(|value| (resource_type, value))
                    .map_err(|e| {
                        EngineError::Store(crate::error::StoreError::Malformed {
                            key: "ResourceStructureByResourceType".to_string(),
                            reason: e.to_string(),
                        })
                    })
            })
            .collect::<EngineResult<HashMap<String, Value>>>()?;

        let template_ctx = TemplateContext {
            values: &message,
            resource_structure_by_resource_type: Some(&resource_structure_by_resource_type),
        };

        let mut evaluated_defaults = HashMap::new();
        for (arg_name, template) in &parent.extendable_action_argument_default {
            let value = evaluate(template, &template_ctx)?;
            evaluated_defaults.insert(arg_name.clone(), value);
        }

        let mut effective_message = HashMap::new();
        effective_message.insert(
            "origin_user_id".to_string(),
            Value::String(action.meta.origin_user_id.clone()),
        );
        effective_message.extend(evaluated_defaults);
        effective_message.extend(message.clone());

        let mut candidates = vec![config.action_signature.clone()];
        if let Some(alt) = &config.action_alternative_signature {
            candidates.push(alt.clone());
        }
        if let Some(templates) = &parent.extendable_alternative_action_signature {
            let mut resolved = Vec::with_capacity(templates.len());
            for template in templates {
                let value = evaluate(template, &template_ctx)?;
                resolved.push(value_as_arg_name(&value));
            }
            candidates.push(resolved);
        }

        let mut schema = parent.base.argument_configuration_by_argument_name.clone();
        schema.extend(config.argument_configuration_by_argument_name.clone());

        Ok(EffectiveConfiguration {
            candidates,
            schema,
            effective_message,
            context_name: config.context_name.clone(),
        })
    }
}

fn value_as_arg_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
