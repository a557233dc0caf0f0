//! Signaling Router
//!
//! Zentraler Einstiegspunkt für alle eingehenden Control-Events. Der
//! Router löst über die Presence Registry die Gegenseite auf, validiert
//! Events gegen den Session Store und stellt die passenden Nachrichten
//! zu. Fehler bleiben lokal: jedes Problem endet entweder als gezieltes
//! Error-Event an die verursachende Verbindung oder als stiller Drop,
//! niemals als abgebrochener Request.

use crate::history::{CallOutcome, HistoryRecorder};
use crate::presence::{ConnectionHandle, PresenceRegistry, PresenceStatus};
use crate::session::{CallEvent, CallKind, CallSession, SessionError, SessionStore};
use crate::signaling::messages::{error_code, ClientMessage, EndReason, ServerMessage};
use chrono::Utc;
use std::sync::{Arc, Weak};
use std::time::Duration;

// ============================================================================
// SIGNALING ROUTER
// ============================================================================

/// Vermittelt zwischen Verbindungen, Presence Registry und Session Store
pub struct SignalingRouter {
    registry: Arc<PresenceRegistry>,
    sessions: Arc<SessionStore>,
    history: HistoryRecorder,
    ring_timeout: Duration,
    /// Selbstreferenz für gespawnte Timeout-Tasks
    weak_self: Weak<SignalingRouter>,
}

impl SignalingRouter {
    /// Erstellt einen neuen Router
    pub fn new(
        registry: Arc<PresenceRegistry>,
        sessions: Arc<SessionStore>,
        history: HistoryRecorder,
        ring_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            registry,
            sessions,
            history,
            ring_timeout,
            weak_self: weak_self.clone(),
        })
    }

    /// Gibt die Presence Registry zurück
    pub fn registry(&self) -> &Arc<PresenceRegistry> {
        &self.registry
    }

    /// Gibt den Session Store zurück
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    // ========================================================================
    // CONNECTION LIFECYCLE
    // ========================================================================

    /// Registriert eine frisch verbundene, extern authentifizierte Verbindung
    ///
    /// Ein Overwrite bei Reconnect ist erlaubt; der alte Connection-Task
    /// räumt sich beim Socket-Ende selbst auf.
    pub fn handle_register(&self, user_id: &str, handle: ConnectionHandle) {
        let _ = handle.try_send(ServerMessage::registered(user_id));
        self.registry.register(user_id, handle);
        self.registry.broadcast_presence();
    }

    /// Behandelt das Ende einer Verbindung
    ///
    /// Greift nur wenn `handle` noch die aktuelle Verbindung des
    /// Benutzers ist; der verspätete Disconnect eines durch Reconnect
    /// ersetzten Handles ist ein No-op. Eine laufende Session des
    /// Benutzers wird sofort beendet; die verbleibende Gegenseite
    /// bekommt `call_ended` mit `peer_disconnected` und ist danach
    /// wieder `Online`.
    pub fn handle_disconnect(&self, user_id: &str, handle: &ConnectionHandle) {
        if !self.registry.unregister_handle(user_id, handle) {
            tracing::debug!("Stale disconnect for '{}' ignored", user_id);
            return;
        }

        if let Some(session) = self.sessions.get_by_user(user_id) {
            self.end_session_for_peer_loss(&session.call_id, user_id);
        }

        self.registry.broadcast_presence();
    }

    // ========================================================================
    // EVENT DISPATCH
    // ========================================================================

    /// Dispatch-Tabelle für alle Client-Events
    pub fn handle_message(&self, user_id: &str, msg: ClientMessage) {
        match msg {
            ClientMessage::Register { .. } => {
                // Registrierung läuft ausschließlich über den
                // Verbindungsaufbau
                tracing::warn!("User '{}' sent register on live connection, dropped", user_id);
            }
            ClientMessage::CallRequest {
                callee_id,
                call_kind,
            } => self.handle_call_request(user_id, &callee_id, call_kind),
            ClientMessage::CallAccept { call_id } => self.handle_accept(user_id, &call_id),
            ClientMessage::CallReject { call_id } => self.handle_reject(user_id, &call_id),
            ClientMessage::Relay { call_id, payload } => {
                self.handle_relay(user_id, &call_id, payload)
            }
            ClientMessage::CallConnected { call_id } => self.handle_connected(user_id, &call_id),
            ClientMessage::Hangup { call_id } => self.handle_hangup(user_id, &call_id),
            ClientMessage::Heartbeat => self.reply(user_id, ServerMessage::pong()),
        }
    }

    // ========================================================================
    // CALL HANDLERS
    // ========================================================================

    /// Anruf-Anforderung: Callee auflösen, Session anlegen, Callee klingeln
    fn handle_call_request(&self, caller_id: &str, callee_id: &str, kind: CallKind) {
        if caller_id == callee_id {
            self.reply(
                caller_id,
                ServerMessage::error(error_code::INVALID_REQUEST, "Cannot call yourself"),
            );
            return;
        }

        let Some(callee_handle) = self.registry.lookup(callee_id) else {
            tracing::info!("Call from '{}' to unreachable '{}'", caller_id, callee_id);
            self.reply(caller_id, ServerMessage::user_unavailable(callee_id));
            return;
        };

        if self.registry.status(callee_id) == Some(PresenceStatus::InCall) {
            self.reply(
                caller_id,
                ServerMessage::error(error_code::ALREADY_IN_CALL, "Callee is already in a call"),
            );
            return;
        }

        let session = match self.sessions.create(caller_id, callee_id, kind) {
            Ok(session) => session,
            Err(SessionError::AlreadyInCall) => {
                self.reply(
                    caller_id,
                    ServerMessage::error(
                        error_code::ALREADY_IN_CALL,
                        "Participant is already in a call",
                    ),
                );
                return;
            }
            Err(e) => {
                tracing::error!("Session create failed: {}", e);
                return;
            }
        };

        // Callee klingeln; ist die Verbindung schon tot, gibt es keine
        // Session und der Anrufer bekommt "unavailable"
        let ring = ServerMessage::incoming_call(session.call_id.clone(), caller_id, kind);
        if callee_handle.try_send(ring).is_err() {
            self.sessions.remove(&session.call_id);
            self.reply(caller_id, ServerMessage::user_unavailable(callee_id));
            return;
        }

        if let Err(e) = self.sessions.transition(&session.call_id, CallEvent::Ring) {
            tracing::error!("Ring transition failed for call {}: {}", session.call_id, e);
        }

        self.reply(
            caller_id,
            ServerMessage::call_requested(session.call_id.clone(), callee_id),
        );

        self.spawn_ring_timeout(session.call_id.clone());

        tracing::info!(
            "Call {} requested: '{}' -> '{}' ({:?})",
            session.call_id,
            caller_id,
            callee_id,
            kind
        );
    }

    /// Callee nimmt an: beide Teilnehmer werden `InCall`
    fn handle_accept(&self, user_id: &str, call_id: &str) {
        let Some(session) = self.authorized_session(user_id, call_id) else {
            return;
        };

        if session.callee_id != user_id {
            tracing::warn!("User '{}' tried to accept call {} as caller", user_id, call_id);
            return;
        }

        match self.sessions.transition(call_id, CallEvent::Accept) {
            Ok(session) => {
                self.registry
                    .set_status(&session.caller_id, PresenceStatus::InCall);
                self.registry
                    .set_status(&session.callee_id, PresenceStatus::InCall);

                if !self.send_to(&session.caller_id, ServerMessage::call_accepted(call_id)) {
                    self.end_session_for_peer_loss(call_id, &session.caller_id);
                    return;
                }

                tracing::info!("Call {} accepted by '{}'", call_id, user_id);
            }
            Err(e) => self.drop_or_report(user_id, call_id, e),
        }
    }

    /// Callee lehnt ab: Session wird entfernt, Anrufer benachrichtigt
    fn handle_reject(&self, user_id: &str, call_id: &str) {
        let Some(session) = self.authorized_session(user_id, call_id) else {
            return;
        };

        if session.callee_id != user_id {
            tracing::warn!("User '{}' tried to reject call {} as caller", user_id, call_id);
            return;
        }

        match self.sessions.transition(call_id, CallEvent::Reject) {
            Ok(session) => {
                self.send_to(&session.caller_id, ServerMessage::call_rejected(call_id));
                self.finalize(&session);
                tracing::info!("Call {} rejected by '{}'", call_id, user_id);
            }
            Err(e) => self.drop_or_report(user_id, call_id, e),
        }
    }

    /// Opaken Handshake-Payload an die Gegenseite weiterreichen
    fn handle_relay(&self, user_id: &str, call_id: &str, payload: serde_json::Value) {
        let Some(session) = self.authorized_session(user_id, call_id) else {
            return;
        };

        if let Err(e) = self.sessions.transition(call_id, CallEvent::Relay) {
            self.drop_or_report(user_id, call_id, e);
            return;
        }

        // authorized_session hat die Teilnahme bereits geprüft
        let Some(peer_id) = session.peer_of(user_id).map(str::to_string) else {
            return;
        };

        let msg = ServerMessage::relay(call_id, payload, user_id);
        if !self.send_to(&peer_id, msg) {
            self.end_session_for_peer_loss(call_id, &peer_id);
        }
    }

    /// Ein Client meldet die stehende Transport-Verbindung
    fn handle_connected(&self, user_id: &str, call_id: &str) {
        if self.authorized_session(user_id, call_id).is_none() {
            return;
        }

        match self.sessions.transition(call_id, CallEvent::Connected) {
            Ok(_) => tracing::info!("Call {} connected (reported by '{}')", call_id, user_id),
            Err(e) => self.drop_or_report(user_id, call_id, e),
        }
    }

    /// Ein Teilnehmer legt auf
    fn handle_hangup(&self, user_id: &str, call_id: &str) {
        let Some(session) = self.authorized_session(user_id, call_id) else {
            return;
        };

        match self.sessions.transition(call_id, CallEvent::Hangup) {
            Ok(session) => {
                if let Some(peer_id) = session.peer_of(user_id) {
                    self.send_to(
                        peer_id,
                        ServerMessage::call_ended(call_id, EndReason::PeerHangup),
                    );
                }
                self.finalize(&session);
                tracing::info!("Call {} ended by '{}'", call_id, user_id);
            }
            Err(e) => self.drop_or_report(user_id, call_id, e),
        }
    }

    // ========================================================================
    // TIMEOUT & CLEANUP
    // ========================================================================

    /// Startet den Klingel-Timeout für eine frische Session
    fn spawn_ring_timeout(&self, call_id: String) {
        let Some(router) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(router.ring_timeout).await;
            router.handle_ring_timeout(&call_id);
        });
    }

    /// Wendet den Timeout an, falls die Session noch unbeantwortet ist
    ///
    /// Der Übergang läuft atomar über den Store: kommt der Timeout nach
    /// einem Accept oder auf eine bereits entfernte Session, ist er ein
    /// No-op.
    fn handle_ring_timeout(&self, call_id: &str) {
        match self.sessions.transition(call_id, CallEvent::Timeout) {
            Ok(session) => {
                let notice = ServerMessage::call_ended(call_id, EndReason::Timeout);
                self.send_to(&session.caller_id, notice.clone());
                self.send_to(&session.callee_id, notice);
                self.finalize(&session);
                tracing::info!("Call {} timed out unanswered", call_id);
            }
            Err(e) => {
                tracing::debug!("Ring timeout for call {} was stale: {}", call_id, e);
            }
        }
    }

    /// Beendet eine Session weil die Verbindung von `lost_user` weg ist
    fn end_session_for_peer_loss(&self, call_id: &str, lost_user: &str) {
        match self.sessions.transition(call_id, CallEvent::PeerDisconnected) {
            Ok(session) => {
                if let Some(remaining) = session.peer_of(lost_user) {
                    self.send_to(
                        remaining,
                        ServerMessage::call_ended(call_id, EndReason::PeerDisconnected),
                    );
                }
                self.finalize(&session);
                tracing::info!("Call {} ended, '{}' disconnected", call_id, lost_user);
            }
            Err(e) => {
                tracing::debug!("Peer-loss cleanup for call {} was stale: {}", call_id, e);
            }
        }
    }

    /// Gemeinsamer Abschluss nach einem terminalen Übergang
    ///
    /// Nur der Handler dessen Übergang den terminalen Zustand erreicht
    /// hat, kommt hier an; damit wird genau einmal entfernt und genau
    /// ein Record-Paar geschrieben.
    fn finalize(&self, session: &CallSession) {
        if self.sessions.remove(&session.call_id).is_none() {
            tracing::error!("Session {} was already removed", session.call_id);
            return;
        }

        self.registry
            .set_status(&session.caller_id, PresenceStatus::Online);
        self.registry
            .set_status(&session.callee_id, PresenceStatus::Online);

        for outcome in CallOutcome::pair_from_session(session, Utc::now()) {
            self.history.record(outcome);
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Holt die Session und prüft die Teilnahme des Absenders
    ///
    /// Unbekannte Call-ID → Error-Event an den Absender; fremde Session →
    /// stiller Drop, ohne Details über die Session preiszugeben.
    fn authorized_session(&self, user_id: &str, call_id: &str) -> Option<CallSession> {
        let Some(session) = self.sessions.get(call_id) else {
            self.reply(
                user_id,
                ServerMessage::error(error_code::SESSION_NOT_FOUND, "Unknown call id"),
            );
            return None;
        };

        if !session.is_participant(user_id) {
            tracing::warn!(
                "User '{}' sent event for foreign call {}, dropped",
                user_id,
                call_id
            );
            return None;
        }

        Some(session)
    }

    /// Behandelt Transition-Fehler: stale IDs melden, Rest still verwerfen
    fn drop_or_report(&self, user_id: &str, call_id: &str, error: SessionError) {
        match error {
            SessionError::SessionNotFound(_) => {
                self.reply(
                    user_id,
                    ServerMessage::error(error_code::SESSION_NOT_FOUND, "Unknown call id"),
                );
            }
            SessionError::InvalidTransition { state, event } => {
                tracing::debug!(
                    "Dropped {:?} for call {} in state {:?}",
                    event,
                    call_id,
                    state
                );
            }
            other => {
                tracing::warn!("Unexpected session error for call {}: {}", call_id, other);
            }
        }
    }

    /// Fire-and-forget-Zustellung; `false` wenn die Verbindung weg ist
    fn send_to(&self, user_id: &str, msg: ServerMessage) -> bool {
        match self.registry.lookup(user_id) {
            Some(handle) => handle.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Antwort an den Verursacher, Zustellfehler sind egal
    fn reply(&self, user_id: &str, msg: ServerMessage) {
        self.send_to(user_id, msg);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryBackend, HistoryError, OutcomeStatus};
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Backend das alle Records einsammelt
    #[derive(Default)]
    struct RecordingBackend {
        recorded: Mutex<Vec<CallOutcome>>,
    }

    impl HistoryBackend for RecordingBackend {
        fn record(&self, outcome: &CallOutcome) -> Result<(), HistoryError> {
            self.recorded.lock().push(outcome.clone());
            Ok(())
        }
    }

    fn router_with_timeout(ring_timeout: Duration) -> (Arc<SignalingRouter>, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let history = HistoryRecorder::spawn(backend.clone(), Duration::from_millis(20));
        let router = SignalingRouter::new(
            Arc::new(PresenceRegistry::new()),
            Arc::new(SessionStore::new()),
            history,
            ring_timeout,
        );
        (router, backend)
    }

    fn router() -> (Arc<SignalingRouter>, Arc<RecordingBackend>) {
        router_with_timeout(Duration::from_secs(30))
    }

    fn connect(router: &Arc<SignalingRouter>, user: &str) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(32);
        router.handle_register(user, tx);
        rx
    }

    /// Leert alles was bereits zugestellt wurde (Handler sind synchron)
    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    fn expect_call_id(rx: &mut mpsc::Receiver<ServerMessage>) -> String {
        match rx.try_recv().expect("expected call_requested") {
            ServerMessage::CallRequested { call_id, .. } => call_id,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    async fn wait_for_records(backend: &RecordingBackend, expected: usize) {
        for _ in 0..100 {
            if backend.recorded.lock().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {} records, got {}",
            expected,
            backend.recorded.lock().len()
        );
    }

    /// Baut einen angenommenen Anruf alice → bob auf
    fn accepted_call(
        router: &Arc<SignalingRouter>,
    ) -> (
        String,
        mpsc::Receiver<ServerMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        let mut alice = connect(router, "alice");
        let mut bob = connect(router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Video,
            },
        );
        let call_id = expect_call_id(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "bob",
            ClientMessage::CallAccept {
                call_id: call_id.clone(),
            },
        );
        drain(&mut alice);

        (call_id, alice, bob)
    }

    #[tokio::test]
    async fn test_register_broadcasts_presence() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");

        let msgs = drain(&mut alice);
        assert!(matches!(msgs[0], ServerMessage::Registered { .. }));
        match &msgs[1] {
            ServerMessage::PresenceUpdate { online_users, .. } => {
                assert_eq!(online_users, &vec!["alice".to_string()]);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let mut bob = connect(&router, "bob");
        drain(&mut bob);
        match drain(&mut alice).pop().unwrap() {
            ServerMessage::PresenceUpdate { online_users, .. } => {
                assert_eq!(online_users, vec!["alice", "bob"]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_request_rings_callee() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );

        let call_id = expect_call_id(&mut alice);
        match bob.try_recv().unwrap() {
            ServerMessage::IncomingCall {
                call_id: id,
                caller_id,
                call_kind,
                ..
            } => {
                assert_eq!(id, call_id);
                assert_eq!(caller_id, "alice");
                assert_eq!(call_kind, CallKind::Audio);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_callee_yields_unavailable_and_no_session() {
        let (router, backend) = router();
        let mut alice = connect(&router, "alice");
        drain(&mut alice);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );

        match alice.try_recv().unwrap() {
            ServerMessage::UserUnavailable { callee_id, .. } => assert_eq!(callee_id, "bob"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(router.sessions().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.recorded.lock().is_empty());
    }

    #[tokio::test]
    async fn test_self_call_is_invalid() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        drain(&mut alice);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "alice".to_string(),
                call_kind: CallKind::Audio,
            },
        );

        match alice.try_recv().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, error_code::INVALID_REQUEST),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(router.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_busy_participant_rejects_second_call() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        let mut carol = connect(&router, "carol");
        drain(&mut alice);
        drain(&mut bob);
        drain(&mut carol);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "carol",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );

        match carol.try_recv().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, error_code::ALREADY_IN_CALL),
            other => panic!("unexpected message: {:?}", other),
        }
        // Nur die erste Session existiert
        assert_eq!(router.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_accept_unknown_call_is_session_not_found() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        drain(&mut alice);

        router.handle_message(
            "alice",
            ClientMessage::CallAccept {
                call_id: "no-such-call".to_string(),
            },
        );

        match alice.try_recv().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, error_code::SESSION_NOT_FOUND),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(router.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_reject_notifies_caller_and_records_rejected() {
        let (router, backend) = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        let call_id = expect_call_id(&mut alice);
        drain(&mut bob);

        router.handle_message("bob", ClientMessage::CallReject { call_id });

        match alice.try_recv().unwrap() {
            ServerMessage::CallRejected { .. } => {}
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(router.sessions().is_empty());

        wait_for_records(&backend, 2).await;
        let recorded = backend.recorded.lock();
        assert!(recorded
            .iter()
            .all(|o| o.status == OutcomeStatus::Rejected && o.duration_secs == 0));
    }

    #[tokio::test]
    async fn test_ring_timeout_notifies_both_and_records_missed() {
        let (router, backend) = router_with_timeout(Duration::from_millis(50));
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        let call_id = expect_call_id(&mut alice);
        drain(&mut bob);

        tokio::time::sleep(Duration::from_millis(150)).await;

        for rx in [&mut alice, &mut bob] {
            match rx.try_recv().unwrap() {
                ServerMessage::CallEnded { reason, .. } => {
                    assert_eq!(reason, EndReason::Timeout);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert!(router.sessions().is_empty());

        wait_for_records(&backend, 2).await;
        assert!(backend
            .recorded
            .lock()
            .iter()
            .all(|o| o.status == OutcomeStatus::Missed && o.duration_secs == 0));

        // Verspäteter Accept auf die entfernte Session
        router.handle_message("bob", ClientMessage::CallAccept { call_id });
        match bob.try_recv().unwrap() {
            ServerMessage::Error { code, .. } => assert_eq!(code, error_code::SESSION_NOT_FOUND),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_accept_wins_against_timeout() {
        let (router, _) = router_with_timeout(Duration::from_millis(50));
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        let call_id = expect_call_id(&mut alice);
        drain(&mut bob);

        router.handle_message("bob", ClientMessage::CallAccept { call_id });
        drain(&mut alice);

        // Timeout feuert ins Leere; die Session lebt weiter
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(router.sessions().len(), 1);
        assert!(drain(&mut alice).is_empty());
        assert!(drain(&mut bob).is_empty());
    }

    #[tokio::test]
    async fn test_accept_marks_both_in_call() {
        let (router, _) = router();
        let (_call_id, _alice, _bob) = accepted_call(&router);

        assert_eq!(
            router.registry().status("alice"),
            Some(PresenceStatus::InCall)
        );
        assert_eq!(router.registry().status("bob"), Some(PresenceStatus::InCall));
    }

    #[tokio::test]
    async fn test_double_accept_is_dropped() {
        let (router, _) = router();
        let (call_id, mut alice, _bob) = accepted_call(&router);

        router.handle_message("bob", ClientMessage::CallAccept { call_id });

        // Kein zweites call_accepted beim Anrufer
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_relay_forwards_in_order() {
        let (router, _) = router();
        let (call_id, mut alice, mut bob) = accepted_call(&router);

        for payload in [json!({"kind": "offer", "seq": 1}), json!({"kind": "candidate", "seq": 2})] {
            router.handle_message(
                "alice",
                ClientMessage::Relay {
                    call_id: call_id.clone(),
                    payload,
                },
            );
        }

        let msgs = drain(&mut bob);
        assert_eq!(msgs.len(), 2);
        for (i, msg) in msgs.iter().enumerate() {
            match msg {
                ServerMessage::Relay {
                    payload,
                    from_user_id,
                    ..
                } => {
                    assert_eq!(from_user_id, "alice");
                    assert_eq!(payload["seq"], (i as i64) + 1);
                }
                other => panic!("unexpected message: {:?}", other),
            }
        }

        // Antwort-Relay in die Gegenrichtung
        router.handle_message(
            "bob",
            ClientMessage::Relay {
                call_id: call_id.clone(),
                payload: json!({"kind": "answer"}),
            },
        );
        match alice.try_recv().unwrap() {
            ServerMessage::Relay { from_user_id, .. } => assert_eq!(from_user_id, "bob"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_before_accept_is_dropped() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        let call_id = expect_call_id(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::Relay {
                call_id,
                payload: json!({"kind": "offer"}),
            },
        );

        assert!(drain(&mut bob).is_empty());
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_relay_from_non_participant_is_silently_dropped() {
        let (router, _) = router();
        let (call_id, mut alice, mut bob) = accepted_call(&router);
        let mut carol = connect(&router, "carol");
        drain(&mut carol);
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "carol",
            ClientMessage::Relay {
                call_id,
                payload: json!({"kind": "offer"}),
            },
        );

        // Keine Injektion, keine Fehlermeldung mit Session-Details
        assert!(drain(&mut alice).is_empty());
        assert!(drain(&mut bob).is_empty());
        assert!(drain(&mut carol).is_empty());
    }

    #[tokio::test]
    async fn test_hangup_after_connected_records_completed() {
        let (router, backend) = router();
        let (call_id, mut alice, mut bob) = accepted_call(&router);

        router.handle_message(
            "alice",
            ClientMessage::Relay {
                call_id: call_id.clone(),
                payload: json!({"kind": "offer"}),
            },
        );
        drain(&mut bob);
        router.handle_message(
            "bob",
            ClientMessage::CallConnected {
                call_id: call_id.clone(),
            },
        );

        router.handle_message("alice", ClientMessage::Hangup { call_id });

        match bob.try_recv().unwrap() {
            ServerMessage::CallEnded { reason, .. } => assert_eq!(reason, EndReason::PeerHangup),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(drain(&mut alice).is_empty());
        assert!(router.sessions().is_empty());

        wait_for_records(&backend, 2).await;
        let recorded = backend.recorded.lock();
        assert!(recorded.iter().all(|o| o.status == OutcomeStatus::Completed));
        assert!(recorded.iter().all(|o| o.kind == CallKind::Video));
        assert!(recorded.iter().all(|o| o.duration_secs >= 1));

        // Beide wieder Online
        assert_eq!(
            router.registry().status("alice"),
            Some(PresenceStatus::Online)
        );
        assert_eq!(router.registry().status("bob"), Some(PresenceStatus::Online));
    }

    #[tokio::test]
    async fn test_hangup_before_connected_records_missed() {
        let (router, backend) = router();
        let (call_id, _alice, mut bob) = accepted_call(&router);

        router.handle_message("alice", ClientMessage::Hangup { call_id });

        match bob.try_recv().unwrap() {
            ServerMessage::CallEnded { reason, .. } => assert_eq!(reason, EndReason::PeerHangup),
            other => panic!("unexpected message: {:?}", other),
        }

        wait_for_records(&backend, 2).await;
        assert!(backend
            .recorded
            .lock()
            .iter()
            .all(|o| o.status == OutcomeStatus::Missed && o.duration_secs == 0));
    }

    #[tokio::test]
    async fn test_disconnect_ends_call_and_frees_peer() {
        let (router, backend) = router();
        let (_call_id, _alice, mut bob) = accepted_call(&router);

        let handle = router.registry().lookup("alice").unwrap();
        router.handle_disconnect("alice", &handle);

        let msgs = drain(&mut bob);
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::CallEnded {
                reason: EndReason::PeerDisconnected,
                ..
            }
        )));
        // Presence-Update ohne alice
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMessage::PresenceUpdate { online_users, .. } if online_users == &vec!["bob".to_string()]
        )));

        assert!(router.sessions().is_empty());
        assert_eq!(router.registry().status("alice"), None);
        assert_eq!(router.registry().status("bob"), Some(PresenceStatus::Online));

        wait_for_records(&backend, 2).await;
        assert!(backend
            .recorded
            .lock()
            .iter()
            .all(|o| o.status == OutcomeStatus::Missed && o.duration_secs == 0));
    }

    #[tokio::test]
    async fn test_disconnect_while_ringing_cancels_call() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        router.handle_message(
            "alice",
            ClientMessage::CallRequest {
                callee_id: "bob".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        drain(&mut alice);
        drain(&mut bob);

        let handle = router.registry().lookup("alice").unwrap();
        router.handle_disconnect("alice", &handle);

        assert!(drain(&mut bob).iter().any(|m| matches!(
            m,
            ServerMessage::CallEnded {
                reason: EndReason::PeerDisconnected,
                ..
            }
        )));
        assert!(router.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_stale_disconnect_after_reconnect_is_ignored() {
        let (router, backend) = router();

        // Alice verbindet sich neu ohne sauberen Disconnect
        let (old_tx, _old_rx) = mpsc::channel(32);
        router.handle_register("alice", old_tx.clone());
        let (new_tx, mut alice) = mpsc::channel::<ServerMessage>(32);
        router.handle_register("alice", new_tx);
        let mut bob = connect(&router, "bob");
        drain(&mut alice);
        drain(&mut bob);

        // Bob ruft die neue Verbindung an
        router.handle_message(
            "bob",
            ClientMessage::CallRequest {
                callee_id: "alice".to_string(),
                call_kind: CallKind::Audio,
            },
        );
        let call_id = expect_call_id(&mut bob);
        drain(&mut alice);

        // Der alte Connection-Task meldet jetzt erst seinen Disconnect
        router.handle_disconnect("alice", &old_tx);

        // Die neue Verbindung und die klingelnde Session bleiben unberührt
        assert!(router.registry().lookup("alice").is_some());
        assert!(router.sessions().get(&call_id).is_some());
        assert!(drain(&mut alice).is_empty());
        assert!(drain(&mut bob).is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.recorded.lock().is_empty());

        // Der echte Disconnect der neuen Verbindung greift weiterhin
        let live = router.registry().lookup("alice").unwrap();
        router.handle_disconnect("alice", &live);
        assert!(router.registry().lookup("alice").is_none());
        assert!(router.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_gets_pong() {
        let (router, _) = router();
        let mut alice = connect(&router, "alice");
        drain(&mut alice);

        router.handle_message("alice", ClientMessage::Heartbeat);
        assert!(matches!(
            alice.try_recv().unwrap(),
            ServerMessage::Pong { .. }
        ));
    }
}
