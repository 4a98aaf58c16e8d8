//! FunnelCube — command-line driver for the tracking SDK.
//!
//! Sends events or replays a recorded stub queue against a tracking endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use funnelcube_core::config::AppConfig;
use funnelcube_core::types::{PageContext, Properties};
use funnelcube_web_sdk::{
    detect_transports, DeviceSignals, IdGenerator, ScriptSlot, StaticHost, StubSnippet, Tracker,
};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "funnelcube")]
#[command(about = "Send tracking events to a FunnelCube endpoint")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Tracking API base URL (overrides config)
    #[arg(long, global = true, env = "FUNNELCUBE__TRACKER__API_URL")]
    api_url: Option<String>,

    /// Client id (overrides config)
    #[arg(long, global = true, env = "FUNNELCUBE__TRACKER__CLIENT_ID")]
    client_id: Option<String>,

    /// Client secret (overrides config)
    #[arg(long, global = true, env = "FUNNELCUBE__TRACKER__CLIENT_SECRET")]
    client_secret: Option<String>,

    /// URL reported as the current page
    #[arg(long, global = true)]
    page_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track a single event
    Track {
        /// Event name
        name: String,

        /// Event property as key=value; values are parsed as JSON when possible
        #[arg(long = "prop", value_name = "KEY=VALUE")]
        props: Vec<String>,

        /// Identify this user before tracking
        #[arg(long)]
        user_id: Option<String>,
    },
    /// Replay a stub queue file (`{"q": [[method, ...args], ...]}`)
    Replay {
        /// Path to the JSON file
        file: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnelcube=info,funnelcube_web_sdk=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(api_url) = cli.api_url {
        config.tracker.api_url = api_url;
    }
    if let Some(client_id) = cli.client_id {
        config.tracker.client_id = client_id;
    }
    if let Some(client_secret) = cli.client_secret {
        config.tracker.client_secret = client_secret;
    }
    if let Some(page_url) = cli.page_url {
        config.page_url = page_url;
    }

    info!(
        api_url = %config.tracker.api_url,
        page_url = %config.page_url,
        batch_size = config.dispatch.batch_size,
        "Configuration loaded"
    );

    let page = PageContext::from_url(&config.page_url, "funnelcube", "")
        .with_context(|| format!("invalid page url {}", config.page_url))?;
    let host = Arc::new(StaticHost::new(page, DeviceSignals::from_process()));
    let transports = detect_transports(&config.dispatch)?;
    let build_tracker = || {
        Tracker::with_settings(
            host.clone(),
            transports.clone(),
            config.dispatch.clone(),
            IdGenerator::detect(),
        )
    };

    match cli.command {
        Command::Track {
            name,
            props,
            user_id,
        } => {
            let tracker = build_tracker();
            tracker.init(config.tracker.clone());
            if let Some(user_id) = user_id {
                tracker.identify(&user_id, Properties::new());
            }
            tracker.track(&name, parse_props(&props)?);
            tracker.flush();
        }
        Command::Replay { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read stub queue {file}"))?;
            let stub = StubSnippet::from_json(&raw)?;
            info!(calls = stub.len(), "Replaying stub queue");

            let mut slot = ScriptSlot::with_stub(stub);
            let tracker = slot.load(build_tracker);
            if !tracker.is_initialized() {
                tracker.init(config.tracker.clone());
            }
            tracker.flush();
        }
    }

    // Keepalive sends run on this runtime; give them a moment to land.
    tokio::time::sleep(Duration::from_millis(config.shutdown_grace_ms)).await;
    info!("Done");
    Ok(())
}

fn parse_props(raw: &[String]) -> anyhow::Result<Properties> {
    let mut properties = Properties::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("property `{entry}` is not KEY=VALUE"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        properties.insert(key.to_string(), value);
    }
    Ok(properties)
}
