//! chatline-server – entry point.
//!
//! Startup order:
//! 1. Load `.env` (if any) and parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the reply and title agents.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod auth;
mod config;
mod entities;
mod error;
mod middleware;
mod routes;
mod schemas;
mod services;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;

use chatline_agent::{OpenAiAgent, OpenAiConfigBuilder};
use tracing::{info, warn};

use crate::config::Config;
use crate::entities::SqliteStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let dotenv = dotenvy::dotenv();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: CHATLINE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "chatline-server starting");
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }
    if cfg.uses_dev_secret() {
        warn!("CHATLINE_JWT_SECRET is not set; using the insecure development secret");
    }

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url).await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Agents ──────────────────────────────────────────────────────────────
    if cfg.agent_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; every agent call will fail until it is");
    }
    let agent = build_agent(&cfg, &cfg.agent_model, Some(cfg.system_prompt.clone()))?;
    let title_model = cfg.title_model.as_deref().unwrap_or(&cfg.agent_model);
    // Title requests carry their own system message.
    let title_agent = build_agent(&cfg, title_model, None)?;
    info!(model = %cfg.agent_model, title_model, base_url = %cfg.agent_base_url, "agents ready");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState::new(
        cfg.clone(),
        store,
        Arc::new(agent),
        Arc::new(title_agent),
    ));
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open SSE responses keep the server alive until their turns end.
            shutdown_state.shutdown();
        })
        .await?;

    info!("chatline-server stopped");
    Ok(())
}

fn build_agent(cfg: &Config, model: &str, system_prompt: Option<String>) -> anyhow::Result<OpenAiAgent> {
    let mut builder = OpenAiConfigBuilder::default();
    builder
        .base_url(cfg.agent_base_url.clone())
        .model(model.to_owned());
    if let Some(prompt) = system_prompt {
        builder.system_prompt(prompt);
    }
    if let Some(key) = &cfg.agent_api_key {
        builder.api_key(key.clone());
    }
    Ok(OpenAiAgent::new(builder.build()?)?)
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
