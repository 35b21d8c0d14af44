use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imessage_relay::agent::AgentClient;
use imessage_relay::config::Config;
use imessage_relay::platform::imessage::{MessagesApp, Osascript};
use imessage_relay::relay::{Relay, RelaySettings};
use imessage_relay::scheduler::{tasks, Scheduler};
use imessage_relay::store::cursor::CursorStore;
use imessage_relay::store::ChatDb;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,imessage_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Starting iMessage relay...");
    info!("  Trigger phrase: {:?}", config.messages.trigger);
    info!("  Message store: {}", config.messages.database_path.display());
    info!("  Agent API: {}", config.agent.url);
    info!("  Poll interval: {}ms", config.relay.poll_interval_ms);
    info!(
        "  Reply target: {}",
        config
            .delivery
            .target_handle
            .as_deref()
            .unwrap_or("self-conversation")
    );

    // Without read access to the history there is nothing to do
    let store = match ChatDb::open(
        &config.messages.database_path,
        &config.messages.trigger,
        &config.messages.reply_emblem,
    ) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to start iMessage relay: {}", e);
            error!("Grant Full Disk Access to this terminal and restart it");
            std::process::exit(1);
        }
    };

    let agent = AgentClient::new(config.agent.url.clone(), config.agent_timeout())
        .context("Failed to build agent client")?;
    let messages_app = MessagesApp::new(
        Box::new(Osascript::new(config.delivery.osascript_path.clone())),
        config.settle_delay(),
    );

    let relay = Arc::new(Relay::new(
        Arc::new(store),
        Arc::new(agent),
        Arc::new(messages_app),
        CursorStore::new(config.relay.cursor_path.clone()),
        RelaySettings::from_config(&config),
    ));

    let mut scheduler = Scheduler::new().await?;
    // First cycle right away, then on every tick
    tasks::register_builtin_tasks(&mut scheduler, Arc::clone(&relay), config.poll_interval())
        .await?;
    scheduler.start().await?;

    info!(
        "iMessage relay started. Send yourself a message starting with {:?} to test",
        config.messages.trigger
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down iMessage relay...");
    scheduler.shutdown().await?;

    Ok(())
}
