//! Call Session Store
//!
//! In-Memory-Tabelle aller aktiven Call Sessions. Der Store ist die
//! alleinige Quelle der Wahrheit für Existenz und Zustand einer Session;
//! Zustandsübergänge laufen atomar unter dem Store-Lock über die
//! State Machine aus `lifecycle`.

use super::lifecycle::{self, CallEvent, CallState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Participant is already in a call")]
    AlreadyInCall,

    #[error("No session for call id {0}")]
    SessionNotFound(String),

    #[error("Event {event:?} is not legal in state {state:?}")]
    InvalidTransition { state: CallState, event: CallEvent },

    #[error("Sender is not a participant of this session")]
    Unauthorized,
}

// ============================================================================
// CALL SESSION
// ============================================================================

/// Art des Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Audio,
    Video,
}

/// Eine aktive Call Session zwischen zwei Benutzern
#[derive(Debug, Clone, PartialEq)]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub kind: CallKind,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    /// Zeitpunkt der ersten Connected-Meldung, `None` solange
    /// die Transport-Verbindung nie stand
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSession {
    /// Prüft ob `user_id` Teilnehmer dieser Session ist
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.caller_id == user_id || self.callee_id == user_id
    }

    /// Gibt die Gegenseite zu `user_id` zurück
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.caller_id == user_id {
            Some(&self.callee_id)
        } else if self.callee_id == user_id {
            Some(&self.caller_id)
        } else {
            None
        }
    }
}

// ============================================================================
// SESSION STORE
// ============================================================================

/// Innerer, vom Mutex geschützter Zustand
#[derive(Default)]
struct StoreInner {
    /// call_id → Session
    sessions: HashMap<String, CallSession>,
    /// user_id → call_id; erzwingt maximal eine aktive oder
    /// ausstehende Session pro Benutzer
    by_user: HashMap<String, String>,
}

/// Thread-safe Store für aktive Call Sessions
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<StoreInner>,
}

impl SessionStore {
    /// Erstellt einen leeren Store
    pub fn new() -> Self {
        Self::default()
    }

    /// Erstellt eine neue Session im Zustand `Requesting`
    ///
    /// Schlägt mit `AlreadyInCall` fehl wenn einer der beiden Teilnehmer
    /// bereits eine aktive oder ausstehende Session hat. Damit ist auch
    /// die Eindeutigkeit pro ungeordnetem Paar garantiert.
    pub fn create(
        &self,
        caller_id: &str,
        callee_id: &str,
        kind: CallKind,
    ) -> Result<CallSession, SessionError> {
        let mut inner = self.inner.lock();

        if inner.by_user.contains_key(caller_id) || inner.by_user.contains_key(callee_id) {
            return Err(SessionError::AlreadyInCall);
        }

        let session = CallSession {
            call_id: Uuid::new_v4().to_string(),
            caller_id: caller_id.to_string(),
            callee_id: callee_id.to_string(),
            kind,
            state: CallState::Requesting,
            created_at: Utc::now(),
            connected_at: None,
        };

        inner
            .by_user
            .insert(caller_id.to_string(), session.call_id.clone());
        inner
            .by_user
            .insert(callee_id.to_string(), session.call_id.clone());
        inner
            .sessions
            .insert(session.call_id.clone(), session.clone());

        Ok(session)
    }

    /// Holt eine Kopie der Session (falls vorhanden)
    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.inner.lock().sessions.get(call_id).cloned()
    }

    /// Holt die Session in der `user_id` Teilnehmer ist (falls vorhanden)
    pub fn get_by_user(&self, user_id: &str) -> Option<CallSession> {
        let inner = self.inner.lock();
        let call_id = inner.by_user.get(user_id)?;
        inner.sessions.get(call_id).cloned()
    }

    /// Wendet ein Ereignis atomar auf die Session an
    ///
    /// Zustand wird unter dem Lock geprüft und gesetzt; ein verspätetes
    /// Ereignis auf eine bereits entfernte Session ergibt `SessionNotFound`,
    /// ein illegales Ereignis `InvalidTransition`. Beim ersten Eintritt in
    /// `Connected` wird `connected_at` gestempelt.
    pub fn transition(
        &self,
        call_id: &str,
        event: CallEvent,
    ) -> Result<CallSession, SessionError> {
        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SessionError::SessionNotFound(call_id.to_string()))?;

        let new_state = lifecycle::transition(session.state, event).ok_or(
            SessionError::InvalidTransition {
                state: session.state,
                event,
            },
        )?;

        if new_state == CallState::Connected && session.connected_at.is_none() {
            session.connected_at = Some(Utc::now());
        }
        session.state = new_state;

        Ok(session.clone())
    }

    /// Entfernt die Session aus dem Store
    ///
    /// Muss genau einmal pro Session aufgerufen werden, sobald sie einen
    /// terminalen Zustand erreicht hat. Gibt `None` zurück wenn die
    /// Session bereits entfernt wurde.
    pub fn remove(&self, call_id: &str) -> Option<CallSession> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(call_id)?;
        inner.by_user.remove(&session.caller_id);
        inner.by_user.remove(&session.callee_id);
        Some(session)
    }

    /// Anzahl aktiver Sessions (für Logging/Tests)
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Prüft ob der Store leer ist
    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
