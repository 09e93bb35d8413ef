//! A `testcontainers`-backed smoke test, mirroring the host's Memgraph
//! container harness (`rootsignal-graph`'s `testutil::memgraph_container`):
//! spin up a disposable Redis container, configure keyspace notifications,
//! and confirm `Engine::await_ready` passes verification end to end.

use action_engine::{Config, Engine};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::GenericImage;

async fn redis_container() -> testcontainers::ContainerAsync<GenericImage> {
    GenericImage::new("redis", "7-alpine")
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .with_exposed_port(6379.tcp())
        .with_cmd(["redis-server", "--notify-keyspace-events", "AKE"])
        .start()
        .await
        .expect("redis container should start")
}

#[tokio::test]
#[ignore = "requires a container runtime; run explicitly in CI with Docker available"]
async fn engine_verifies_against_a_freshly_configured_redis_container() {
    let container = redis_container().await;
    let port = container.get_host_port_ipv4(6379).await.unwrap();
    let redis_url = format!("redis://127.0.0.1:{port}");

    let config = Config {
        redis_url,
        engine_name: "smoke-test-engine".to_string(),
        engine_id: "smoke-test-engine-1".to_string(),
        action_queue_name: "default".to_string(),
        environment: action_engine::config::Environment::Testing,
    };

    let engine = Engine::connect(config).await.expect("connect to containerized redis");
    engine.await_ready().await.expect("verification should pass against AKE-configured redis");
}
