//! Signaling Module - Protokoll, Router und Verbindungen
//!
//! Dieses Modul vermittelt zwischen den Clients:
//! - Getypte Client/Server-Nachrichten über WebSocket
//! - Router als einziger Einstiegspunkt für Control-Events
//! - Pro Verbindung ein eigener Service-Task
//!

mod connection;
mod messages;
mod router;
mod server;

pub use connection::handle_connection;
pub use messages::{error_code, ClientMessage, EndReason, ServerMessage};
pub use router::SignalingRouter;
pub use server::SignalingServer;
