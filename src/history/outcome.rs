//! Call Outcome Records
//!
//! Der dauerhafte Abschluss-Datensatz eines Anrufs. Pro beendeter Session
//! entstehen zwei Records: einer aus Sicht des Anrufers (outgoing), einer
//! aus Sicht des Angerufenen (incoming). Die Dauer zählt ab der ersten
//! Connected-Meldung; eine Session die nie `Connected` erreicht hat, hat
//! immer Dauer 0 und wird nie als `completed` geschrieben. Umgekehrt hat
//! ein `completed`-Record immer eine Dauer von mindestens einer Sekunde.

use crate::session::{CallKind, CallSession, CallState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// OUTCOME TYPES
// ============================================================================

/// Richtung aus Sicht des Subjekts des History-Eintrags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Abschluss-Status eines Anrufs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Completed,
    Missed,
    Rejected,
}

/// Abschluss-Datensatz für die Call History
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub caller_id: String,
    pub receiver_id: String,
    pub kind: CallKind,
    pub direction: CallDirection,
    pub status: OutcomeStatus,
    pub duration_secs: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl CallOutcome {
    /// Leitet die beiden Records aus einer terminalen Session ab
    ///
    /// Die Session muss einen terminalen Zustand erreicht haben; für
    /// nicht-terminale Zustände wird konservativ `Missed` geschrieben.
    pub fn pair_from_session(session: &CallSession, ended_at: DateTime<Utc>) -> [CallOutcome; 2] {
        let status = match session.state {
            CallState::Rejected => OutcomeStatus::Rejected,
            CallState::Ended if session.connected_at.is_some() => OutcomeStatus::Completed,
            _ => OutcomeStatus::Missed,
        };

        // Sub-sekündige Gespräche runden auf: Dauer 0 bleibt damit
        // exklusiv für nie verbundene Sessions
        let duration_secs = match (status, session.connected_at) {
            (OutcomeStatus::Completed, Some(connected_at)) => ended_at
                .signed_duration_since(connected_at)
                .num_seconds()
                .max(1),
            _ => 0,
        };

        let base = CallOutcome {
            caller_id: session.caller_id.clone(),
            receiver_id: session.callee_id.clone(),
            kind: session.kind,
            direction: CallDirection::Outgoing,
            status,
            duration_secs,
            started_at: session.created_at,
            ended_at,
        };

        let mut incoming = base.clone();
        incoming.direction = CallDirection::Incoming;

        [base, incoming]
    }
}

// ============================================================================
// TESTS
// ============================================================================
