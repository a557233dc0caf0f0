//! Connection Handling
//!
//! Bedient eine einzelne WebSocket-Verbindung: Handshake, Pflicht-
//! Registrierung als erste Nachricht, danach Read-Loop mit Dispatch an
//! den Router und ein eigener Write-Task für die Zustellung. Events
//! eines Absenders werden strikt in Empfangsreihenfolge verarbeitet.

use super::messages::{ClientMessage, ServerMessage};
use super::router::SignalingRouter;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

/// Zeitfenster für die Registrierung nach dem Handshake
const REGISTER_DEADLINE: Duration = Duration::from_secs(10);

/// Kapazität der Outbound-Queue pro Verbindung
const OUTBOUND_QUEUE: usize = 64;

/// Bedient eine Verbindung von Handshake bis Disconnect
pub async fn handle_connection(stream: TcpStream, router: Arc<SignalingRouter>) {
    let peer_addr = stream.peer_addr().ok();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake failed for {:?}: {}", peer_addr, e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    // Erste Nachricht muss die Registrierung sein; die Identität darin
    // ist extern verifiziert
    let Some(user_id) = await_register(&mut read).await else {
        tracing::warn!("Connection from {:?} closed before registering", peer_addr);
        return;
    };

    // Write-Task: serialisiert und verschickt alles aus der Queue
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if write.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Eigene Kopie des Handles; der Disconnect am Ende darf nur greifen
    // wenn dieses Handle noch das aktuelle in der Registry ist
    let own_handle = tx.clone();
    router.handle_register(&user_id, tx);
    tracing::info!("User '{}' connected from {:?}", user_id, peer_addr);

    // Read-Loop: FIFO pro Absender
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => router.handle_message(&user_id, msg),
                Err(e) => {
                    tracing::warn!("Unparseable message from '{}': {}", user_id, e);
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by '{}'", user_id);
                break;
            }
            // Ping/Pong/Binary sind hier uninteressant
            Ok(_) => {}
            Err(e) => {
                tracing::error!("WebSocket error for '{}': {}", user_id, e);
                break;
            }
        }
    }

    router.handle_disconnect(&user_id, &own_handle);
    writer.abort();
    tracing::info!("User '{}' disconnected", user_id);
}

/// Wartet auf die Registrierungs-Nachricht (mit Deadline)
async fn await_register(read: &mut SplitStream<WebSocketStream<TcpStream>>) -> Option<String> {
    let frame = match tokio::time::timeout(REGISTER_DEADLINE, read.next()).await {
        Ok(frame) => frame,
        Err(_) => {
            tracing::warn!("No register message within deadline");
            return None;
        }
    };

    match frame {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Register { user_id }) => Some(user_id),
            Ok(other) => {
                tracing::warn!("Expected register, got {:?}", other);
                None
            }
            Err(e) => {
                tracing::warn!("Unparseable register message: {}", e);
                None
            }
        },
        _ => None,
    }
}
