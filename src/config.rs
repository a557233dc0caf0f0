//! Server-Konfiguration
//!
//! Alle Werte kommen aus Umgebungsvariablen mit sinnvollen Defaults;
//! der Pfad zur History-Datenbank wird wie üblich über das
//! App-Datenverzeichnis aufgelöst.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Could not determine app data directory")]
    NoDataDir,
}

// ============================================================================
// CONFIG
// ============================================================================

/// Laufzeit-Konfiguration des Signaling-Servers
#[derive(Debug, Clone)]
pub struct Config {
    /// Adresse für den TCP-Listener
    pub bind_addr: String,
    /// Fenster in dem ein Anruf angenommen oder abgelehnt werden muss
    pub ring_timeout: Duration,
    /// Pfad zur lokalen History-Datenbank
    pub history_db_path: PathBuf,
    /// Intervall für Retries aus der History-Fallback-Queue
    pub history_retry_interval: Duration,
}

impl Config {
    /// Liest die Konfiguration aus der Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr =
            env::var("CALL_SIGNALING_BIND").unwrap_or_else(|_| "127.0.0.1:9030".to_string());
        let ring_timeout = parse_secs("CALL_SIGNALING_RING_TIMEOUT_SECS", 35)?;
        let history_retry_interval = parse_secs("CALL_SIGNALING_HISTORY_RETRY_SECS", 60)?;

        let history_db_path = match env::var("CALL_SIGNALING_HISTORY_DB") {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::default_db_path()?,
        };

        Ok(Self {
            bind_addr,
            ring_timeout,
            history_db_path,
            history_retry_interval,
        })
    }

    /// Ermittelt den Standard-Pfad zur History-Datenbank
    fn default_db_path() -> Result<PathBuf, ConfigError> {
        let proj_dirs = directories::ProjectDirs::from("com", "kaufm", "call-signaling")
            .ok_or(ConfigError::NoDataDir)?;

        let mut path = proj_dirs.data_dir().to_path_buf();
        path.push("call_history.db");
        Ok(path)
    }
}

/// Parst eine Sekunden-Angabe aus der Umgebung
fn parse_secs(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
