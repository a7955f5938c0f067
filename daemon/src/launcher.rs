/// Spawning and watching the external mount process.
///
/// A spawned process is represented by a [`ProcessHandle`].  Its lifecycle is
/// reported asynchronously: a watcher task awaits the child and sends either
/// [`SupervisorEvent::ProcessExited`] or [`SupervisorEvent::ProcessFault`],
/// tagged with the launch generation so the supervisor can ignore events from
/// a process it has already forgotten.
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::config::RunConfig;
use crate::control::{ControlEndpoint, RcControl};
use crate::event::SupervisorEvent;

/// Keeps the mount from opening a console window on Windows.
#[cfg(windows)]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("mount process already started")]
    AlreadyRunning,
    #[error("no valid configuration is loaded")]
    NoConfig,
    #[error("failed to start {executable}: {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
}

/// The one live mount process.
pub struct ProcessHandle {
    generation: u64,
    pid: Option<u32>,
    control: Arc<dyn ControlEndpoint>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ProcessHandle {
    pub fn new(
        generation: u64,
        pid: Option<u32>,
        control: Arc<dyn ControlEndpoint>,
        kill_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            generation,
            pid,
            control,
            kill_tx,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn control(&self) -> &Arc<dyn ControlEndpoint> {
        &self.control
    }

    /// Sends the termination signal.  The exit is still reported through the
    /// watcher.  Returns `false` if a kill was already requested or the
    /// watcher is gone.
    pub fn kill(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Something that can start the mount process.
pub trait Spawner: Send {
    /// Starts the process described by `config`.  Only synchronous spawn
    /// failures are returned; everything later arrives on `events`.
    fn spawn(
        &self,
        config: &RunConfig,
        generation: u64,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> Result<ProcessHandle, LaunchError>;
}

/// Spawns the configured executable as a real child process.
#[derive(Debug, Default)]
pub struct CommandSpawner;

impl Spawner for CommandSpawner {
    fn spawn(
        &self,
        config: &RunConfig,
        generation: u64,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> Result<ProcessHandle, LaunchError> {
        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            executable: config.executable.clone(),
            source,
        })?;
        let pid = child.id();
        tracing::info!(pid = ?pid, generation, "Started {}", config.executable);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, Stream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, Stream::Stderr));
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, generation, kill_rx, events));

        let control: Arc<dyn ControlEndpoint> = Arc::new(RcControl::new(config));
        Ok(ProcessHandle::new(generation, pid, control, Some(kill_tx)))
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Logs every output line of the mount under the `mount` target.
///
/// Lines are read as raw bytes and decoded lossily: the pipe must keep being
/// drained whatever the mount prints, or its next write fails.
async fn forward_lines<R>(reader: R, stream: Stream)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                match stream {
                    Stream::Stdout => tracing::info!(target: "mount", "{line}"),
                    Stream::Stderr => tracing::warn!(target: "mount", "{line}"),
                }
            }
            Err(e) => {
                tracing::debug!("Stopped reading mount {stream:?}: {e}");
                break;
            }
        }
    }
}

/// Awaits the child's exit, killing it first if asked to.
async fn watch_child(
    mut child: Child,
    generation: u64,
    mut kill_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<SupervisorEvent>,
) {
    // A dropped handle closes `kill_rx` with an error, which disables that
    // branch instead of killing the process.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            tracing::warn!(generation, "Killing mount process");
            if let Err(e) = child.start_kill() {
                tracing::error!("Failed to kill mount process: {e}");
            }
            child.wait().await
        }
    };

    let event = match status {
        Ok(status) => {
            tracing::info!(generation, "Mount process exited with {status}");
            SupervisorEvent::ProcessExited {
                generation,
                code: status.code(),
            }
        }
        Err(e) => SupervisorEvent::ProcessFault {
            generation,
            message: e.to_string(),
        },
    };
    let _ = events.send(event).await;
}
