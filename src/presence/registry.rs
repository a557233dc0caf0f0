//! Presence Registry
//!
//! Bildet Online-Benutzer auf ihre aktive Verbindung ab. Die Registry ist
//! die maßgebliche Quelle für "ist Benutzer X gerade erreichbar" und
//! verschickt bei jeder Änderung die aktualisierte Online-Liste an alle
//! Verbindungen.

use crate::signaling::ServerMessage;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Sender-Seite der Verbindung eines Benutzers
///
/// Alle Zustellungen laufen über `try_send` und sind fire-and-forget;
/// eine volle oder geschlossene Queue bedeutet dass die Verbindung als
/// weg zu behandeln ist.
pub type ConnectionHandle = mpsc::Sender<ServerMessage>;

// ============================================================================
// PRESENCE ENTRY
// ============================================================================

/// Presence-Status eines Benutzers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    InCall,
}

/// Eintrag für einen verbundenen Benutzer
#[derive(Clone)]
pub struct PresenceEntry {
    pub user_id: String,
    pub handle: ConnectionHandle,
    pub status: PresenceStatus,
}

// ============================================================================
// PRESENCE REGISTRY
// ============================================================================

/// Thread-safe Registry aller verbundenen Benutzer
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<String, PresenceEntry>>,
}

impl PresenceRegistry {
    /// Erstellt eine leere Registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registriert einen Benutzer oder ersetzt seinen Eintrag
    ///
    /// Ein Overwrite ist kein Fehler: ein Reconnect ohne sauberen
    /// Disconnect ersetzt einfach das alte Handle.
    pub fn register(&self, user_id: &str, handle: ConnectionHandle) {
        let mut entries = self.entries.write();
        entries.insert(
            user_id.to_string(),
            PresenceEntry {
                user_id: user_id.to_string(),
                handle,
                status: PresenceStatus::Online,
            },
        );
        tracing::info!("User '{}' registered ({} online)", user_id, entries.len());
    }

    /// Entfernt einen Benutzer aus der Registry
    pub fn unregister(&self, user_id: &str) {
        let mut entries = self.entries.write();
        if entries.remove(user_id).is_some() {
            tracing::info!("User '{}' unregistered ({} online)", user_id, entries.len());
        }
    }

    /// Entfernt den Eintrag nur wenn er noch zu `handle` gehört
    ///
    /// Ein Reconnect ersetzt das Handle im Eintrag; der Disconnect des
    /// alten Connection-Tasks darf die neue Verbindung nicht treffen.
    /// Gibt `true` zurück wenn der Eintrag entfernt wurde.
    pub fn unregister_handle(&self, user_id: &str, handle: &ConnectionHandle) -> bool {
        let mut entries = self.entries.write();
        let is_current = entries
            .get(user_id)
            .is_some_and(|entry| entry.handle.same_channel(handle));
        if is_current {
            entries.remove(user_id);
            tracing::info!("User '{}' unregistered ({} online)", user_id, entries.len());
        }
        is_current
    }

    /// Gibt das Verbindungs-Handle eines Benutzers zurück (falls online)
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.read().get(user_id).map(|e| e.handle.clone())
    }

    /// Gibt den Presence-Status eines Benutzers zurück (falls online)
    pub fn status(&self, user_id: &str) -> Option<PresenceStatus> {
        self.entries.read().get(user_id).map(|e| e.status)
    }

    /// Setzt den Presence-Status eines Benutzers
    ///
    /// No-op wenn der Benutzer nicht (mehr) registriert ist.
    pub fn set_status(&self, user_id: &str, status: PresenceStatus) {
        if let Some(entry) = self.entries.write().get_mut(user_id) {
            entry.status = status;
        }
    }

    /// Gibt die sortierte Liste aller Online-Benutzer zurück
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.entries.read().keys().cloned().collect();
        users.sort();
        users
    }

    /// Schickt die aktuelle Online-Liste an alle Verbindungen
    pub fn broadcast_presence(&self) {
        let update = ServerMessage::presence_update(self.online_users());
        let entries = self.entries.read();
        for entry in entries.values() {
            // Fire-and-forget: eine tote Verbindung räumt ihr
            // eigener Connection-Task auf
            let _ = entry.handle.try_send(update.clone());
        }
    }

    /// Anzahl verbundener Benutzer
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Prüft ob niemand verbunden ist
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceRegistry")
            .field("online", &self.online_users())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
