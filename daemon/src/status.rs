use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::state::ConnectionState;

/// Runtime status written by the daemon to `status.toml` next to the config.
/// A front end reads this file (read-only) to display the mount's state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupervisorStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: ConnectionState,
    /// OS process id of the running mount, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Upload counter from the most recent telemetry sample.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_in_progress: Option<u64>,
    /// RFC 3339 timestamp of the last state change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_at: Option<String>,
    /// Human-readable description of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SupervisorStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: ConnectionState::Disconnected,
            pid: None,
            uploads_in_progress: None,
            changed_at: None,
            error: None,
        }
    }

    /// Records a state change, stamping it with the current local time.
    pub fn record(&mut self, state: ConnectionState) {
        self.state = state;
        self.changed_at = Some(chrono::Local::now().to_rfc3339());
        if state != ConnectionState::Error {
            self.error = None;
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// A failed status write is logged and otherwise ignored.
pub fn write_status(path: &Path, status: &SupervisorStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!("Failed to write status file: {e}");
            }
        }
        Err(e) => tracing::warn!("Failed to serialize status: {e}"),
    }
}
