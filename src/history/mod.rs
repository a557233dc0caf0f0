//! History Module - Call History Recorder
//!
//! Dieses Modul verwaltet die dauerhafte Call History:
//! - Ableitung der Outcome-Records aus beendeten Sessions
//! - Asynchroner Recorder-Worker mit Fallback-Queue
//! - SQLite-Backend als lokaler Speicher
//!

mod database;
mod outcome;
mod recorder;

pub use database::HistoryDatabase;
pub use outcome::{CallDirection, CallOutcome, OutcomeStatus};
pub use recorder::{HistoryBackend, HistoryError, HistoryRecorder};
