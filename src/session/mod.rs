//! Session Module - Call Session Store und Lifecycle
//!
//! Dieses Modul verwaltet die aktiven Call Sessions:
//! - Lifecycle State Machine mit allen erlaubten Übergängen
//! - In-Memory Store mit Eindeutigkeit pro Benutzer
//! - Atomare Zustandsübergänge unter dem Store-Lock
//!

mod lifecycle;
mod store;

pub use lifecycle::{transition, CallEvent, CallState};
pub use store::{CallKind, CallSession, SessionError, SessionStore};
