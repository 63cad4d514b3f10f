mod config;
mod llm;
mod notify;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::notify::WebhookNotifier;
use crate::server::AppState;

/// Filter from `var`, falling back to the crate's default verbosity.
fn log_filter(var: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| "info,mm_helpdesk=debug".into())
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env first, so RUST_LOG from the file reaches the filter
    let dotenv_path = config::load_dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(log_filter("RUST_LOG"))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = &dotenv_path {
        debug!("Loaded environment from {}", path.display());
    }

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  Model: {}", config.llm.model);
    info!("  Completion API: {}", config.llm.base_url);
    info!("  Ack mode: {}", config.ack_mode);
    info!("  Notify timeout: {:?}", config.webhook.timeout);

    let notifier = WebhookNotifier::new(config.webhook.clone())?;
    if !notifier.is_configured() {
        warn!("MM_INCOMING_WEBHOOK_URL is not set; answers will not be posted to chat");
    }

    let relays = TaskTracker::new();
    let state = AppState {
        completer: Arc::new(LlmClient::new(config.llm.clone())),
        notifier: Arc::new(notifier),
        token: Arc::from(config.token.as_str()),
        ack_mode: config.ack_mode,
        relays: relays.clone(),
    };

    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Helpdesk relay listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    relays.close();
    if !relays.is_empty() {
        info!("Waiting for {} background relay(s) to finish", relays.len());
    }
    relays.wait().await;

    Ok(())
}
