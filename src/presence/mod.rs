//! Presence Module - Online-Status und Verbindungs-Handles
//!
//! Dieses Modul verwaltet wer gerade erreichbar ist:
//! - Registrierung und Abmeldung von Verbindungen
//! - Lookup des Verbindungs-Handles für die Zustellung
//! - Broadcast der Online-Liste an alle Clients
//!

mod registry;

pub use registry::{ConnectionHandle, PresenceEntry, PresenceRegistry, PresenceStatus};
