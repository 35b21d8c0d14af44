//! Relay doctor.
//!
//! Checks each external boundary once with the same configuration the relay
//! uses: the Messages database, the Messages.app automation host, and the
//! agent service. With `--send-test` it also delivers a test reply.
//!
//! Usage: `doctor [config.toml] [--send-test]`

use anyhow::{Context, Result};
use std::path::PathBuf;

use imessage_relay::agent::{AgentClient, Processor};
use imessage_relay::config::Config;
use imessage_relay::platform::imessage::{MessagesApp, Osascript};
use imessage_relay::platform::ReplyDispatcher;
use imessage_relay::store::{messages_epoch_now, ChatDb, MessageSource};

// ── Arguments ──────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
struct Args {
    config_path: PathBuf,
    send_test: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Args {
    let mut config_path = None;
    let mut send_test = false;
    for arg in args {
        if arg == "--send-test" {
            send_test = true;
        } else if config_path.is_none() {
            config_path = Some(PathBuf::from(arg));
        }
    }
    Args {
        config_path: config_path.unwrap_or_else(|| PathBuf::from("config.toml")),
        send_test,
    }
}

// ── Checks ─────────────────────────────────────────────────────────────────────

fn report(name: &str, outcome: &Result<String>) -> bool {
    match outcome {
        Ok(detail) => {
            println!("✅ {name}: {detail}");
            true
        }
        Err(e) => {
            println!("❌ {name}: {e:#}");
            false
        }
    }
}

async fn check_store(config: &Config) -> Result<String> {
    let db = ChatDb::open(
        &config.messages.database_path,
        &config.messages.trigger,
        &config.messages.reply_emblem,
    )
    .context("Need Full Disk Access? System Settings > Privacy & Security > Full Disk Access")?;
    let total = db.count_messages().await?;
    // Triggers from the last hour, to show the query predicate works
    let hour_ago = messages_epoch_now() - 3_600 * 1_000_000_000;
    let recent = db.fetch_candidates(hour_ago).await?.len();
    Ok(format!(
        "{} messages, {} trigger(s) in the last hour",
        total, recent
    ))
}

async fn check_automation(app: &MessagesApp) -> Result<String> {
    let name = app.app_name().await.context("AppleScript access failed")?;
    Ok(format!("automation host answered as {name:?}"))
}

async fn check_agent(config: &Config) -> Result<String> {
    let client = AgentClient::new(config.agent.url.clone(), config.agent_timeout())?;
    let reply = client
        .process("test connection")
        .await
        .with_context(|| format!("Agent API at {} is not working", client.url()))?;
    Ok(format!("{} replied ({} chars)", client.url(), reply.chars().count()))
}

async fn send_test(config: &Config, app: &MessagesApp) -> Result<String> {
    let text = format!(
        "{} Relay doctor test ({})",
        config.messages.reply_emblem,
        chrono::Local::now().format("%H:%M:%S")
    );
    let target = config.delivery.target_handle.as_deref();
    app.deliver(&text, target).await?;
    Ok(format!(
        "sent to {}",
        target.unwrap_or("self-conversation")
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1));
    let config = Config::load(&args.config_path)
        .with_context(|| format!("Failed to load config from {}", args.config_path.display()))?;

    println!("🧪 iMessage relay doctor");
    println!("========================");

    let app = MessagesApp::new(
        Box::new(Osascript::new(config.delivery.osascript_path.clone())),
        config.settle_delay(),
    );

    let mut ok = true;
    ok &= report("Message store", &check_store(&config).await);
    ok &= report("Automation", &check_automation(&app).await);
    ok &= report("Agent API", &check_agent(&config).await);
    if args.send_test {
        ok &= report("Test delivery", &send_test(&config, &app).await);
    }

    if !ok {
        std::process::exit(1);
    }
    println!("\nAll checks passed.");
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
