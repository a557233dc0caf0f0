//! Call Signaling - Signaling-Server für P2P-Anrufe
//!
//! Der Control-Plane-Kern des Calling-Features:
//! - Presence Registry für erreichbare Benutzer
//! - Call Sessions mit Lifecycle State Machine
//! - Router der Handshake-Payloads zwischen den Peers vermittelt
//! - Asynchrone Call History mit SQLite-Backend
//!
//! Der eigentliche Medientransport läuft P2P zwischen den Clients;
//! dieser Server vermittelt nur den Verbindungsaufbau und verwaltet
//! den Lebenszyklus der Anrufe.

pub mod config;
pub mod history;
pub mod presence;
pub mod session;
pub mod signaling;
