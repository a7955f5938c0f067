mod config;
mod console;
mod control;
mod event;
mod launcher;
mod notifications;
mod paths;
mod startup;
mod state;
mod status;
mod supervisor;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::launcher::CommandSpawner;
use crate::notifications::{DesktopNotifier, Notifier};
use crate::supervisor::{Supervisor, SupervisorOptions};

/// Keeps a network drive mounted and reports its health.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path of the JSON config file (defaults to the per-user config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interval between status queries, in milliseconds.
    #[arg(long, default_value_t = telemetry::DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,

    /// Remove the login startup registration and exit.
    #[arg(long)]
    unregister_startup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.unregister_startup {
        return startup::unregister_startup();
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = match args.config {
        Some(path) => path,
        None => paths::config_file_path()?,
    };
    let notifier = DesktopNotifier;

    match config::ensure_exists(&config_path) {
        Ok(true) => {}
        Ok(false) => notifier.notice(
            "Configuration created",
            &format!(
                "Edit {} to point at your remote, then connect.",
                config_path.display()
            ),
        ),
        Err(e) => tracing::error!("{e}"),
    }

    let config_path = match paths::resolve(&config_path) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!("Cannot resolve {}: {e}", config_path.display());
            config_path
        }
    };

    let initial_config = match config::load(&config_path) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::error!("{e}");
            notifier.notice("Configuration is invalid", &e.to_string());
            None
        }
    };

    if let Some(config) = &initial_config {
        if let Err(e) = startup::sync(config.auto_start_on_login) {
            tracing::warn!("Failed to update login startup: {e:#}");
        }
    }
    let connect_now = initial_config
        .as_ref()
        .is_some_and(|config| config.start_on_app_start);

    // ── Supervisor ────────────────────────────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(64);
    let options = SupervisorOptions {
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
        status_path: Some(paths::status_file_path(&config_path)),
        manage_login_startup: true,
    };
    let (supervisor, handle) = Supervisor::new(
        initial_config,
        CommandSpawner,
        notifier,
        options,
        event_tx.clone(),
    );

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx));
    tokio::spawn(console::run(handle.clone()));

    // Ctrl+C quits the same way the Quit command does.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = handle.request_quit().await;
            }
        });
    }

    if connect_now {
        handle.request_connect().await?;
    }

    tracing::info!("cloudmount-daemon v{} started", env!("CARGO_PKG_VERSION"));
    supervisor.run(event_rx).await;
    Ok(())
}
