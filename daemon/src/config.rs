use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::SupervisorEvent;
use crate::paths;

pub const DEFAULT_EXECUTABLE: &str = "rclone";

/// Arguments written into a freshly created config.  The remote name is a
/// placeholder the user is expected to replace.
pub const DEFAULT_ARGUMENTS: &[&str] = &[
    "mount",
    "Your_Remote:",
    "X:",
    "--vfs-cache-mode",
    "full",
    "--vfs-cache-max-size",
    "16G",
    "--dir-cache-time",
    "1m",
    "--buffer-size",
    "128M",
    "--attr-timeout",
    "30s",
    "--transfers",
    "4",
    "--rc",
    "-v",
];

/// Launch configuration for the mount process.
/// Stored as JSON in the per-user config directory (see [`crate::paths`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Program to launch, resolved through `PATH` when not absolute.
    pub executable: String,
    /// Arguments passed verbatim, in order.
    pub arguments: Vec<String>,
    /// Register the daemon to start when the user logs in.
    pub auto_start_on_login: bool,
    /// Connect as soon as the daemon starts.
    pub start_on_app_start: bool,
    /// Address of the mount's remote-control listener, when not the default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_address: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            arguments: DEFAULT_ARGUMENTS.iter().map(|s| s.to_string()).collect(),
            auto_start_on_login: false,
            start_on_app_start: false,
            control_address: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not well-formed JSON.
    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// The file is JSON but fields are missing, mistyped or empty.
    #[error("config file {path} is invalid: {reason}")]
    Validation { path: PathBuf, reason: String },
}

/// Creates a default config at `path` if none exists.
///
/// Returns `true` when a config was already present and `false` when the
/// default was just written.  Does not check that an existing file is valid.
pub fn ensure_exists(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(true);
    }
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let content = serde_json::to_string_pretty(&RunConfig::default())
        .map_err(|e| write_err(std::io::Error::other(e)))?;
    std::fs::write(path, content).map_err(write_err)?;
    tracing::info!("Default config created at {}", path.display());
    Ok(false)
}

/// Reads and validates the config at `path`.
pub fn load(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &content)
}

fn parse(path: &Path, content: &str) -> Result<RunConfig, ConfigError> {
    // Two passes so that syntax errors and schema errors stay distinguishable.
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let invalid = |reason: String| ConfigError::Validation {
        path: path.to_path_buf(),
        reason,
    };
    let config = RunConfig::deserialize(value).map_err(|e| invalid(e.to_string()))?;
    if config.executable.trim().is_empty() {
        return Err(invalid("`executable` must not be empty".to_string()));
    }
    Ok(config)
}

/// Watches the parent directory of `path` and sends a
/// [`SupervisorEvent::ConfigChanged`] with the re-read result whenever the
/// config file is created or modified.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<SupervisorEvent>) {
    // Watchers report absolute paths, so a relative `--config` would never match.
    let path = match paths::resolve(&path) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!("Cannot resolve config path {}: {e}", path.display());
            return;
        }
    };
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("Failed to create config watcher: {e}");
            return;
        }
    };

    // Editors often save by writing a new file and renaming it over the old one.
    let Some(watch_dir) = path.parent().map(Path::to_path_buf) else {
        tracing::warn!("Config path {} has no parent directory", path.display());
        return;
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::warn!("Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );
        if !(affects_config && is_write) {
            continue;
        }
        tracing::debug!("Config file changed, reloading");
        if tx.send(SupervisorEvent::ConfigChanged(load(&path))).await.is_err() {
            break;
        }
    }
}
