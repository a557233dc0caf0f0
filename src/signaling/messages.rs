//! Message Types für das Signaling-Protokoll
//!
//! Getypte Nachrichten zwischen Client und Server. Der Handshake-Payload
//! (Offer/Answer/Candidate) ist für den Server eine Black Box und wird
//! als rohes JSON weitergereicht.

use crate::session::CallKind;
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR CODES
// ============================================================================

/// Fehlercodes für `ServerMessage::Error`
pub mod error_code {
    /// Anfrage war in sich ungültig (z.B. Selbstanruf)
    pub const INVALID_REQUEST: i32 = 400;
    /// Ein Teilnehmer ist bereits in einem Anruf
    pub const ALREADY_IN_CALL: i32 = 409;
    /// Unbekannte oder bereits beendete Call-ID
    pub const SESSION_NOT_FOUND: i32 = 404;
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Alle möglichen Client-Nachrichten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Registrierung der Verbindung (Identität ist extern verifiziert)
    Register {
        #[serde(rename = "userId")]
        user_id: String,
    },

    /// Anruf anfordern
    CallRequest {
        #[serde(rename = "calleeId")]
        callee_id: String,
        #[serde(rename = "callKind")]
        call_kind: CallKind,
    },

    /// Eingehenden Anruf annehmen
    CallAccept {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Eingehenden Anruf ablehnen
    CallReject {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Opaker Handshake-Payload (Offer/Answer/Candidate)
    Relay {
        #[serde(rename = "callId")]
        call_id: String,
        payload: serde_json::Value,
    },

    /// Client meldet die stehende Transport-Verbindung
    CallConnected {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Anruf beenden
    Hangup {
        #[serde(rename = "callId")]
        call_id: String,
    },

    /// Heartbeat (hält NAT-Bindings offen)
    Heartbeat,
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Grund für das Ende eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Gegenseite hat aufgelegt
    PeerHangup,
    /// Verbindung der Gegenseite ist weggebrochen
    PeerDisconnected,
    /// Keine Antwort innerhalb des Timeout-Fensters
    Timeout,
}

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registrierung bestätigt
    Registered {
        #[serde(rename = "userId")]
        user_id: String,
        timestamp: i64,
    },

    /// Aktualisierte Liste der Online-Benutzer
    PresenceUpdate {
        #[serde(rename = "onlineUsers")]
        online_users: Vec<String>,
        timestamp: i64,
    },

    /// Bestätigung an den Anrufer mit der vergebenen Call-ID
    CallRequested {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "calleeId")]
        callee_id: String,
        timestamp: i64,
    },

    /// Eingehender Anruf
    IncomingCall {
        #[serde(rename = "callId")]
        call_id: String,
        #[serde(rename = "callerId")]
        caller_id: String,
        #[serde(rename = "callKind")]
        call_kind: CallKind,
        timestamp: i64,
    },

    /// Anruf wurde angenommen
    CallAccepted {
        #[serde(rename = "callId")]
        call_id: String,
        timestamp: i64,
    },

    /// Anruf wurde abgelehnt
    CallRejected {
        #[serde(rename = "callId")]
        call_id: String,
        timestamp: i64,
    },

    /// Weitergereichter Handshake-Payload
    Relay {
        #[serde(rename = "callId")]
        call_id: String,
        payload: serde_json::Value,
        #[serde(rename = "fromUserId")]
        from_user_id: String,
        timestamp: i64,
    },

    /// Anruf wurde beendet
    CallEnded {
        #[serde(rename = "callId")]
        call_id: String,
        reason: EndReason,
        timestamp: i64,
    },

    /// Angerufener ist nicht erreichbar
    UserUnavailable {
        #[serde(rename = "calleeId")]
        callee_id: String,
        timestamp: i64,
    },

    /// Fehler
    Error {
        code: i32,
        message: String,
        timestamp: i64,
    },

    /// Heartbeat-Antwort
    Pong { timestamp: i64 },
}

impl ServerMessage {
    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn registered(user_id: impl Into<String>) -> Self {
        Self::Registered {
            user_id: user_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn presence_update(online_users: Vec<String>) -> Self {
        Self::PresenceUpdate {
            online_users,
            timestamp: Self::now(),
        }
    }

    pub fn call_requested(call_id: impl Into<String>, callee_id: impl Into<String>) -> Self {
        Self::CallRequested {
            call_id: call_id.into(),
            callee_id: callee_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn incoming_call(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        call_kind: CallKind,
    ) -> Self {
        Self::IncomingCall {
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            call_kind,
            timestamp: Self::now(),
        }
    }

    pub fn call_accepted(call_id: impl Into<String>) -> Self {
        Self::CallAccepted {
            call_id: call_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn call_rejected(call_id: impl Into<String>) -> Self {
        Self::CallRejected {
            call_id: call_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn relay(
        call_id: impl Into<String>,
        payload: serde_json::Value,
        from_user_id: impl Into<String>,
    ) -> Self {
        Self::Relay {
            call_id: call_id.into(),
            payload,
            from_user_id: from_user_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn call_ended(call_id: impl Into<String>, reason: EndReason) -> Self {
        Self::CallEnded {
            call_id: call_id.into(),
            reason,
            timestamp: Self::now(),
        }
    }

    pub fn user_unavailable(callee_id: impl Into<String>) -> Self {
        Self::UserUnavailable {
            callee_id: callee_id.into(),
            timestamp: Self::now(),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
            timestamp: Self::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Self::now(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
