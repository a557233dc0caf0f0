//! Signaling Server
//!
//! Accept-Loop über einem TCP-Listener: jede eingehende Verbindung
//! bekommt ihren eigenen Task und läuft unabhängig durch
//! `handle_connection`.

use super::connection::handle_connection;
use super::router::SignalingRouter;
use std::sync::Arc;
use tokio::net::TcpListener;

/// WebSocket-Server für das Call-Signaling
pub struct SignalingServer {
    router: Arc<SignalingRouter>,
}

impl SignalingServer {
    /// Erstellt den Server über einem fertig verdrahteten Router
    pub fn new(router: Arc<SignalingRouter>) -> Self {
        Self { router }
    }

    /// Gibt den Router zurück
    pub fn router(&self) -> &Arc<SignalingRouter> {
        &self.router
    }

    /// Nimmt Verbindungen an bis der Listener stirbt
    pub async fn run(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("Accepted connection from {}", addr);
                    tokio::spawn(handle_connection(stream, Arc::clone(&self.router)));
                }
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
