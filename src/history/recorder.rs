//! Call History Recorder
//!
//! Entkoppelt den Signaling-Pfad von der History-Persistenz: Records
//! werden über einen Channel an einen Worker-Task übergeben, der sie an
//! das angeschlossene Backend schreibt. Schlägt das Backend fehl, landet
//! der Record in einer lokalen Fallback-Queue und wird periodisch erneut
//! versucht. Ein fehlgeschlagener History-Write ist niemals ein
//! Anruf-Fehler.

use super::outcome::CallOutcome;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Maximale Größe der Fallback-Queue; darüber hinaus werden die
/// ältesten Records verworfen
const FALLBACK_QUEUE_LIMIT: usize = 256;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to create database directory: {0}")]
    DirectoryCreation(#[from] std::io::Error),

    #[error("History backend unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// BACKEND CONTRACT
// ============================================================================

/// Vertrag zum externen History-Speicher
///
/// Die Plattform liefert die Implementierung; dieses Subsystem ruft
/// `record` höchstens einmal pro Teilnehmer und beendeter Session auf.
pub trait HistoryBackend: Send + Sync {
    fn record(&self, outcome: &CallOutcome) -> Result<(), HistoryError>;
}

// ============================================================================
// HISTORY RECORDER
// ============================================================================

/// Handle zum Recorder-Worker
#[derive(Clone)]
pub struct HistoryRecorder {
    tx: mpsc::UnboundedSender<CallOutcome>,
}

impl HistoryRecorder {
    /// Startet den Worker-Task und gibt das Handle zurück
    pub fn spawn(backend: Arc<dyn HistoryBackend>, retry_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(backend, rx, retry_interval));
        Self { tx }
    }

    /// Übergibt einen Record an den Worker (non-blocking)
    pub fn record(&self, outcome: CallOutcome) {
        if self.tx.send(outcome).is_err() {
            tracing::warn!("History worker is gone, dropping outcome record");
        }
    }
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder").finish()
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Worker-Loop: schreibt Records und pflegt die Fallback-Queue
async fn run_worker(
    backend: Arc<dyn HistoryBackend>,
    mut rx: mpsc::UnboundedReceiver<CallOutcome>,
    retry_interval: Duration,
) {
    let mut pending: VecDeque<CallOutcome> = VecDeque::new();
    let mut interval = tokio::time::interval(retry_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outcome = rx.recv() => {
                match outcome {
                    Some(outcome) => write_or_queue(&*backend, outcome, &mut pending),
                    None => break,
                }
            }
            _ = interval.tick() => {
                retry_pending(&*backend, &mut pending);
            }
        }
    }

    // Letzter Versuch für alles was noch in der Queue liegt
    retry_pending(&*backend, &mut pending);
    if !pending.is_empty() {
        tracing::warn!("History worker stopping with {} unwritten records", pending.len());
    }
}

fn write_or_queue(
    backend: &dyn HistoryBackend,
    outcome: CallOutcome,
    pending: &mut VecDeque<CallOutcome>,
) {
    if let Err(e) = backend.record(&outcome) {
        tracing::warn!("History write failed, queuing for retry: {}", e);
        if pending.len() >= FALLBACK_QUEUE_LIMIT {
            pending.pop_front();
            tracing::warn!("Fallback queue full, dropped oldest record");
        }
        pending.push_back(outcome);
    }
}

fn retry_pending(backend: &dyn HistoryBackend, pending: &mut VecDeque<CallOutcome>) {
    while let Some(outcome) = pending.front() {
        match backend.record(outcome) {
            Ok(()) => {
                pending.pop_front();
            }
            Err(e) => {
                tracing::debug!("History retry failed, keeping {} queued: {}", pending.len(), e);
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
