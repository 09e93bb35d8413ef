//! Gated on a live Redis-compatible instance. Skips (does not fail) when
//! `REDIS_TEST_URL` is unset, mirroring the host's Postgres-gated
//! `rootsignal-events` test pattern.

use std::collections::HashMap;
use std::sync::Arc;

use action_engine::{Config, Engine, Handler};
use async_trait::async_trait;
use serde_json::{json, Value};

async fn test_store_url() -> Option<String> {
    std::env::var("REDIS_TEST_URL").ok()
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn call(&self, _args: Vec<Value>) -> Result<Value, action_engine::EngineError> {
        Ok(json!({ "ok": true }))
    }
}

#[tokio::test]
async fn publish_and_resolve_against_a_live_store() {
    let Some(url) = test_store_url().await else {
        return;
    };

    let config = Config {
        redis_url: url,
        engine_name: "integration-test-engine".to_string(),
        engine_id: "integration-test-engine-1".to_string(),
        action_queue_name: "default".to_string(),
        environment: action_engine::config::Environment::Testing,
    };

    let engine = Engine::connect(config).await.expect("connect to live store");
    engine.await_ready().await.expect("store verification should pass");

    let action_config = action_engine::ActionConfiguration {
        action_name: "IntegrationEcho".to_string(),
        action_signature: vec![],
        action_alternative_signature: None,
        argument_configuration_by_argument_name: HashMap::new(),
        context_name: "Self".to_string(),
        file_path: None,
        method_name: None,
        event_name: None,
        action_name_to_extend: None,
    };
    engine.store_action_configuration(&action_config).await.unwrap();
    engine.register_handler("IntegrationEcho", Arc::new(Echo)).await.unwrap();
    engine.subscribe_to_action_queue_update("default").await.unwrap();

    let result = engine
        .publish_action_by_name_and_handle_response("IntegrationEcho", HashMap::new(), "u1")
        .await
        .unwrap();

    assert_eq!(result, json!({ "ok": true }));

    engine.destroy().await.unwrap();
}
