//! Server-Binary
//!
//! Verdrahtet Registry, Session Store, History und Router und nimmt
//! WebSocket-Verbindungen entgegen.

use anyhow::Context;
use call_signaling::config::Config;
use call_signaling::history::{HistoryDatabase, HistoryRecorder};
use call_signaling::presence::PresenceRegistry;
use call_signaling::session::SessionStore;
use call_signaling::signaling::{SignalingRouter, SignalingServer};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging initialisieren
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("call_signaling=debug".parse().unwrap()),
        )
        .init();

    let config = Config::from_env().context("failed to read configuration")?;
    tracing::info!("Starting call signaling server...");

    // History-Backend öffnen und Recorder-Worker starten
    let database =
        HistoryDatabase::open(&config.history_db_path).context("failed to open history database")?;
    let history = HistoryRecorder::spawn(Arc::new(database), config.history_retry_interval);

    let router = SignalingRouter::new(
        Arc::new(PresenceRegistry::new()),
        Arc::new(SessionStore::new()),
        history,
        config.ring_timeout,
    );

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    SignalingServer::new(router).run(listener).await;

    Ok(())
}
