use std::collections::HashMap;
use std::sync::Arc;

use action_engine::{
    Action, ActionConfiguration, ActionStatus, Config, Engine, Event, ExtendableActionConfiguration, Handler,
    MemoryStore, Store,
};
use async_trait::async_trait;
use serde_json::{json, Value};

fn test_config() -> Config {
    Config {
        redis_url: "redis://unused".to_string(),
        engine_name: "test-engine".to_string(),
        engine_id: "test-engine-1".to_string(),
        action_queue_name: "default".to_string(),
        environment: action_engine::config::Environment::Testing,
    }
}

fn engine() -> Engine {
    let store = Arc::new(MemoryStore::new());
    Engine::new(store, test_config())
}

struct ReturnsFixedValue(Value);

#[async_trait]
impl Handler for ReturnsFixedValue {
    async fn call(&self, _args: Vec<Value>) -> Result<Value, action_engine::EngineError> {
        Ok(self.0.clone())
    }
}

struct EchoArguments;

#[async_trait]
impl Handler for EchoArguments {
    async fn call(&self, args: Vec<Value>) -> Result<Value, action_engine::EngineError> {
        Ok(json!({ "AID1": args[0], "AID2": args[1] }))
    }
}

struct EchoAlternative;

#[async_trait]
impl Handler for EchoAlternative {
    async fn call(&self, args: Vec<Value>) -> Result<Value, action_engine::EngineError> {
        Ok(json!({ "AID1": args[0], "AID3": args[1] }))
    }
}

fn simple_config(name: &str, signature: Vec<&str>, schema: HashMap<String, String>) -> ActionConfiguration {
    ActionConfiguration {
        action_name: name.to_string(),
        action_signature: signature.into_iter().map(str::to_string).collect(),
        action_alternative_signature: None,
        argument_configuration_by_argument_name: schema,
        context_name: "Self".to_string(),
        file_path: None,
        method_name: None,
        event_name: None,
        action_name_to_extend: None,
    }
}

#[tokio::test]
async fn simple_call_resolves_and_completes() {
    let engine = engine();
    engine
        .store_action_configuration(&simple_config("ExecuteSimpleDummy", vec![], HashMap::new()))
        .await
        .unwrap();
    engine
        .register_handler(
            "ExecuteSimpleDummy",
            Arc::new(ReturnsFixedValue(json!({ "AID": "x" }))),
        )
        .await
        .unwrap();

    let result = engine
        .publish_action_by_name_and_handle_response("ExecuteSimpleDummy", HashMap::new(), "u1")
        .await
        .unwrap();

    assert_eq!(result, json!({ "AID": "x" }));
}

#[tokio::test]
async fn two_argument_call_resolves_with_both_fields() {
    let engine = engine();
    let mut schema = HashMap::new();
    schema.insert("AID1".to_string(), "string".to_string());
    schema.insert("AID2".to_string(), "string".to_string());
    engine
        .store_action_configuration(&simple_config(
            "ExecuteSimpleDummyWithArguments",
            vec!["AID1", "AID2"],
            schema,
        ))
        .await
        .unwrap();
    engine
        .register_handler("ExecuteSimpleDummyWithArguments", Arc::new(EchoArguments))
        .await
        .unwrap();

    let mut message = HashMap::new();
    message.insert("AID1".to_string(), Value::String("a".to_string()));
    message.insert("AID2".to_string(), Value::String("b".to_string()));

    let result = engine
        .publish_action_by_name_and_handle_response("ExecuteSimpleDummyWithArguments", message, "u1")
        .await
        .unwrap();

    assert_eq!(result, json!({ "AID1": "a", "AID2": "b" }));
}

#[tokio::test]
async fn missing_required_argument_fails_and_marks_action_failed() {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), test_config());
    let mut schema = HashMap::new();
    schema.insert("AID1".to_string(), "string".to_string());
    schema.insert("AID2".to_string(), "string".to_string());
    engine
        .store_action_configuration(&simple_config(
            "ExecuteSimpleDummyWithArguments",
            vec!["AID1", "AID2"],
            schema,
        ))
        .await
        .unwrap();
    engine
        .register_handler("ExecuteSimpleDummyWithArguments", Arc::new(EchoArguments))
        .await
        .unwrap();

    let mut message = HashMap::new();
    message.insert("AID1".to_string(), Value::String("a".to_string()));

    let action = Action::new(
        "ExecuteSimpleDummyWithArguments",
        message,
        engine.fresh_meta("u1"),
    );
    let action_key = action.key();

    let result = engine.execute_action(action).await;
    assert!(result.is_err());

    let fields = store.hgetall(&action_key).await.unwrap();
    let rehydrated = Action::from_fields(&fields).unwrap();
    assert_eq!(rehydrated.status, ActionStatus::Failed);
}

#[tokio::test]
async fn alternative_signature_is_selected_when_primary_keys_absent() {
    let engine = engine();
    let config = ActionConfiguration {
        action_name: "ExecuteSimpleDummyWithComplexSignature".to_string(),
        action_signature: vec!["AID1".to_string(), "AID2".to_string()],
        action_alternative_signature: Some(vec!["AID1".to_string(), "AID3".to_string()]),
        argument_configuration_by_argument_name: HashMap::new(),
        context_name: "Self".to_string(),
        file_path: None,
        method_name: None,
        event_name: None,
        action_name_to_extend: None,
    };
    engine.store_action_configuration(&config).await.unwrap();
    engine
        .register_handler("ExecuteSimpleDummyWithComplexSignature", Arc::new(EchoAlternative))
        .await
        .unwrap();

    let mut message = HashMap::new();
    message.insert("AID1".to_string(), Value::String("a".to_string()));
    message.insert("AID3".to_string(), Value::Array(vec![Value::Bool(true)]));

    let result = engine
        .publish_action_by_name_and_handle_response(
            "ExecuteSimpleDummyWithComplexSignature",
            message,
            "u1",
        )
        .await
        .unwrap();

    assert_eq!(result, json!({ "AID1": "a", "AID3": [true] }));
}

#[tokio::test]
async fn event_emission_is_observed_by_a_concurrent_subscriber() {
    let engine = engine();
    let mut receiver = engine.subscribe_to_event_channel_by_name("room").await.unwrap();

    let mut message = HashMap::new();
    message.insert("text".to_string(), Value::String("hello".to_string()));
    let event = Event::new("RoomMessage", message, "test-engine-1");

    engine.publish_event_to_channel_by_name("room", event).await.unwrap();

    let received = receiver.recv().await.expect("subscriber should observe the event");
    assert_eq!(received.channel, "room");
    let payload: Value = serde_json::from_str(&received.payload).unwrap();
    assert_eq!(payload["event_name"], json!("RoomMessage"));
}

struct EchoGreeting;

#[async_trait]
impl Handler for EchoGreeting {
    async fn call(&self, args: Vec<Value>) -> Result<Value, action_engine::EngineError> {
        Ok(json!({ "greeting": format!("Hello, {}!", args[0].as_str().unwrap_or_default()) }))
    }
}

/// Exercises the extends-branch of `resolve_effective_configuration`: a
/// literal template default is merged in under the child's own, stricter
/// schema override. The parent's `default_name` type is deliberately wrong
/// (`number`) so the test only passes if the child's `string` override
/// actually takes precedence during the schema merge, not just the message
/// merge.
#[tokio::test]
async fn extendable_action_merges_parent_default_under_child_schema_override() {
    let engine = engine();

    let parent = ExtendableActionConfiguration {
        base: simple_config("GreetingBase", vec![], {
            let mut schema = HashMap::new();
            schema.insert("default_name".to_string(), "number".to_string());
            schema
        }),
        extendable_action_name: "GreetingBase".to_string(),
        extendable_action_argument_default: {
            let mut defaults = HashMap::new();
            defaults.insert("default_name".to_string(), "Anonymous".to_string());
            defaults
        },
        extendable_alternative_action_signature: None,
    };
    engine.store_extendable_action_configuration(&parent).await.unwrap();

    let mut child_schema = HashMap::new();
    child_schema.insert("default_name".to_string(), "string".to_string());
    let mut child = simple_config("Greet", vec!["default_name"], child_schema);
    child.action_name_to_extend = Some("GreetingBase".to_string());
    engine.store_action_configuration(&child).await.unwrap();
    engine.register_handler("Greet", Arc::new(EchoGreeting)).await.unwrap();

    let result = engine
        .publish_action_by_name_and_handle_response("Greet", HashMap::new(), "u1")
        .await
        .unwrap();

    assert_eq!(result, json!({ "greeting": "Hello, Anonymous!" }));
}

#[tokio::test]
async fn execute_action_transitions_strictly_pending_processing_terminal() {
    let engine = engine();
    engine
        .store_action_configuration(&simple_config("ExecuteSimpleDummy", vec![], HashMap::new()))
        .await
        .unwrap();
    engine
        .register_handler("ExecuteSimpleDummy", Arc::new(ReturnsFixedValue(json!({ "ok": true }))))
        .await
        .unwrap();

    let action = Action::new(
        "ExecuteSimpleDummy",
        HashMap::new(),
        engine.fresh_meta("u1"),
    );
    assert_eq!(action.status, ActionStatus::Pending);

    let completed = engine.execute_action(action).await.unwrap();
    assert_eq!(completed.status, ActionStatus::Completed);
}
