use std::env;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub engine_name: String,
    pub engine_id: String,
    pub action_queue_name: String,
    pub environment: Environment,
}

/// `NODE_ENV`-equivalent. Consulted only for diagnostic verbosity (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testing,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Self::Development),
            "testing" => Ok(Self::Testing),
            "production" => Ok(Self::Production),
            other => Err(format!("unknown ENGINE_ENV: {other}")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Panics with a named
    /// message if `REDIS_URL` is missing; everything else defaults.
    pub fn from_env() -> Self {
        Self {
            redis_url: required_env("REDIS_URL"),
            engine_name: env::var("ENGINE_NAME").unwrap_or_else(|_| "action-engine".to_string()),
            engine_id: env::var("ENGINE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
            action_queue_name: env::var("ACTION_QUEUE_NAME").unwrap_or_else(|_| "default".to_string()),
            environment: env::var("ENGINE_ENV")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Environment::Development),
        }
    }

    /// Log the redis URL with credentials stripped, the way the host redacts
    /// sensitive config before logging it.
    pub fn log_redacted(&self) {
        let redacted = match self.redis_url.split_once('@') {
            Some((_, host_part)) => format!("redis://***@{host_part}"),
            None => self.redis_url.clone(),
        };
        tracing::info!(
            redis_url = %redacted,
            engine_name = %self.engine_name,
            engine_id = %self.engine_id,
            action_queue_name = %self.action_queue_name,
            "loaded action-engine configuration"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
