//! Call Lifecycle State Machine
//!
//! Definiert die erlaubten Zustandsübergänge einer Call Session.
//! Alle Übergänge laufen über `transition()`; Handler dürfen den
//! Zustand niemals direkt mutieren.

use serde::{Deserialize, Serialize};

// ============================================================================
// CALL STATE
// ============================================================================

/// Zustand einer Call Session
///
/// Happy Path: `Requesting → Ringing → Accepted → Connecting → Connected → Ended`.
/// Seitenausgänge: `Rejected`, `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Anruf wurde erstellt, Callee wird benachrichtigt
    Requesting,
    /// Incoming-Call wurde an den Callee zugestellt
    Ringing,
    /// Callee hat angenommen, Handshake steht noch aus
    Accepted,
    /// Handshake-Nachrichten werden ausgetauscht
    Connecting,
    /// Transport-Verbindung steht (von einem Client gemeldet)
    Connected,
    /// Anruf regulär oder durch Disconnect beendet
    Ended,
    /// Callee hat abgelehnt
    Rejected,
    /// Keine Antwort innerhalb des Timeout-Fensters
    TimedOut,
}

impl CallState {
    /// Terminale Zustände: die Session wird danach aus dem Store entfernt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Ended | CallState::Rejected | CallState::TimedOut
        )
    }
}

// ============================================================================
// CALL EVENTS
// ============================================================================

/// Ereignisse die einen Zustandsübergang auslösen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Incoming-Call wurde an die Verbindung des Callee übergeben
    Ring,
    /// Callee nimmt an
    Accept,
    /// Callee lehnt ab
    Reject,
    /// Handshake-Relay (Offer/Answer/Candidate) von einem Teilnehmer
    Relay,
    /// Ein Client meldet die stehende Transport-Verbindung
    Connected,
    /// Ein Teilnehmer legt auf
    Hangup,
    /// Timeout-Fenster ohne Antwort abgelaufen
    Timeout,
    /// Verbindung eines Teilnehmers ist weggebrochen
    PeerDisconnected,
}

// ============================================================================
// TRANSITION FUNCTION
// ============================================================================

/// Wendet ein Ereignis auf einen Zustand an
///
/// Gibt den Folgezustand zurück oder `None` wenn das Ereignis im
/// aktuellen Zustand nicht erlaubt ist. Relay-Verkehr bleibt erlaubt
/// solange die Session nicht terminal ist.
pub fn transition(state: CallState, event: CallEvent) -> Option<CallState> {
    use CallEvent as E;
    use CallState as S;

    match (state, event) {
        (S::Requesting, E::Ring) => Some(S::Ringing),

        (S::Requesting | S::Ringing, E::Accept) => Some(S::Accepted),
        (S::Requesting | S::Ringing, E::Reject) => Some(S::Rejected),
        (S::Requesting | S::Ringing, E::Timeout) => Some(S::TimedOut),

        // Erstes Relay nach Accept startet die Verbindungsphase
        (S::Accepted, E::Relay) => Some(S::Connecting),
        (S::Connecting, E::Relay) => Some(S::Connecting),
        (S::Connected, E::Relay) => Some(S::Connected),

        (S::Accepted | S::Connecting, E::Connected) => Some(S::Connected),
        // Doppelte Connected-Meldung (beide Clients melden) ist ein No-op
        (S::Connected, E::Connected) => Some(S::Connected),

        (s, E::Hangup) if !s.is_terminal() => Some(S::Ended),
        (s, E::PeerDisconnected) if !s.is_terminal() => Some(S::Ended),

        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================
