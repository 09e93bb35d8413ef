use std::collections::HashMap;

use action_engine::{Config, Engine};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "engine-cli")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine and block, retrieving pending actions for a queue.
    Serve {
        #[arg(long, default_value = "default")]
        queue: String,
    },
    /// Fire a single action and print the resolved/rejected result.
    Publish {
        action: String,
        payload: String,
        #[arg(long, default_value = "cli")]
        origin_user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let engine = Engine::connect(config).await?;
    engine.await_ready().await?;

    match cli.command {
        Command::Serve { queue } => {
            engine.subscribe_to_action_queue_update(&queue).await?;
            tracing::info!(queue = %queue, "engine-cli serving");
            tokio::signal::ctrl_c().await?;
            engine.destroy().await?;
        }
        Command::Publish {
            action,
            payload,
            origin_user_id,
        } => {
            let message: HashMap<String, serde_json::Value> = serde_json::from_str(&payload)?;
            match engine
                .publish_action_by_name_and_handle_response(&action, message, &origin_user_id)
                .await
            {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Err(e) => {
                    eprintln!("action {action} rejected: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
