/// The supervisor actor.
///
/// One task owns the process handle, the poll handle and the state machine,
/// and consumes every [`SupervisorEvent`] from a single channel.  Process
/// watchers, the poller, the config watcher and the command surface only send
/// events, so all state changes happen in one place and in arrival order.
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

use crate::config::{ConfigError, RunConfig};
use crate::event::{Command, SupervisorEvent};
use crate::launcher::{LaunchError, ProcessHandle, Spawner};
use crate::notifications::Notifier;
use crate::state::{ConnectionState, Input, StateMachine, Transition};
use crate::status::{self, SupervisorStatus};
use crate::telemetry::{self, PollHandle, TelemetrySample, DEFAULT_POLL_INTERVAL};
use crate::startup;

/// How long quitting waits for the mount to exit after the quit request.
pub const QUIT_GRACE: Duration = Duration::from_secs(10);
/// How long quitting waits after the kill signal before giving up.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

const SEE_LOGS: &str = "Open the daemon log for details.";

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub poll_interval: Duration,
    /// Where to write `status.toml`; `None` disables the status file.
    pub status_path: Option<PathBuf>,
    /// Keep login startup registration in sync with reloaded configs.
    pub manage_login_startup: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_path: None,
            manage_login_startup: false,
        }
    }
}

#[derive(Debug, Error)]
#[error("supervisor has stopped")]
pub struct SupervisorStopped;

/// Cloneable command surface for front ends.
#[derive(Clone)]
pub struct SupervisorHandle {
    events: mpsc::Sender<SupervisorEvent>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    pub async fn request_connect(&self) -> Result<(), SupervisorStopped> {
        self.send(Command::Connect).await
    }

    pub async fn request_disconnect(&self) -> Result<(), SupervisorStopped> {
        self.send(Command::Disconnect).await
    }

    /// Disconnects, waits for the mount to exit and then stops the supervisor.
    pub async fn request_quit(&self) -> Result<(), SupervisorStopped> {
        self.send(Command::Quit).await
    }

    async fn send(&self, command: Command) -> Result<(), SupervisorStopped> {
        self.events
            .send(SupervisorEvent::Command(command))
            .await
            .map_err(|_| SupervisorStopped)
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

pub struct Supervisor<S, N> {
    machine: StateMachine,
    config: Option<RunConfig>,
    process: Option<ProcessHandle>,
    poll: Option<PollHandle>,
    spawner: S,
    notifier: N,
    events: mpsc::Sender<SupervisorEvent>,
    state_tx: watch::Sender<ConnectionState>,
    status: SupervisorStatus,
    options: SupervisorOptions,
    generation: u64,
    quitting: bool,
    quit_deadline: Option<Instant>,
    kill_sent: bool,
}

impl<S: Spawner, N: Notifier> Supervisor<S, N> {
    /// `events` must be the sending half of the channel later passed to
    /// [`run`](Self::run); it is handed to every task the supervisor starts.
    pub fn new(
        config: Option<RunConfig>,
        spawner: S,
        notifier: N,
        options: SupervisorOptions,
        events: mpsc::Sender<SupervisorEvent>,
    ) -> (Self, SupervisorHandle) {
        let machine = StateMachine::new();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let handle = SupervisorHandle {
            events: events.clone(),
            state: state_rx,
        };
        let supervisor = Self {
            machine,
            config,
            process: None,
            poll: None,
            spawner,
            notifier,
            events,
            state_tx,
            status: SupervisorStatus::new(),
            options,
            generation: 0,
            quitting: false,
            quit_deadline: None,
            kill_sent: false,
        };
        supervisor.write_status();
        (supervisor, handle)
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    #[cfg(test)]
    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    /// Processes events until a quit request has been carried out.
    pub async fn run(mut self, mut events: mpsc::Receiver<SupervisorEvent>) {
        loop {
            if self.quitting && self.process.is_none() {
                break;
            }
            let event = match self.quit_deadline {
                Some(deadline) => tokio::select! {
                    event = events.recv() => event,
                    _ = sleep_until(deadline) => {
                        self.on_quit_deadline();
                        continue;
                    }
                },
                None => events.recv().await,
            };
            let Some(event) = event else { break };
            self.handle(event).await;
        }
        self.stop_polling();
        tracing::info!("Supervisor stopped");
    }

    pub async fn handle(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Command(Command::Connect) => self.connect(),
            SupervisorEvent::Command(Command::Disconnect) => self.terminate().await,
            SupervisorEvent::Command(Command::Quit) => self.quit().await,
            SupervisorEvent::ProcessFault {
                generation,
                message,
            } => self.on_fault(generation, message),
            SupervisorEvent::ProcessExited { generation, code } => self.on_exit(generation, code),
            SupervisorEvent::Telemetry { generation, sample } => self.on_sample(generation, sample),
            SupervisorEvent::ConfigChanged(result) => self.on_config_changed(result),
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn connect(&mut self) {
        match self.launch() {
            Ok(()) => {}
            Err(LaunchError::AlreadyRunning) => {
                tracing::info!("Connect ignored, mount process already started");
                self.notifier
                    .notice("Mount process already started", SEE_LOGS);
            }
            Err(LaunchError::NoConfig) => {
                tracing::warn!("Connect ignored, no valid configuration loaded");
                self.notifier.notice(
                    "Cannot connect",
                    "The configuration file is invalid. Fix it and try again.",
                );
            }
            Err(e @ LaunchError::Spawn { .. }) => {
                tracing::error!("{e}");
                let transition = self.apply(Input::Fault);
                if transition.alert {
                    self.raise("Mount process could not be started", e.to_string());
                }
            }
        }
    }

    fn launch(&mut self) -> Result<(), LaunchError> {
        if self.process.is_some() {
            return Err(LaunchError::AlreadyRunning);
        }
        let config = self.config.as_ref().ok_or(LaunchError::NoConfig)?;

        self.generation += 1;
        let generation = self.generation;
        let process = self.spawner.spawn(config, generation, self.events.clone())?;

        let control = Arc::clone(process.control());
        self.status.pid = process.pid();
        self.status.uploads_in_progress = None;
        self.process = Some(process);
        self.apply(Input::Launched);

        if self.poll.is_none() {
            self.poll = Some(telemetry::start(
                control,
                generation,
                self.options.poll_interval,
                self.events.clone(),
            ));
        }
        Ok(())
    }

    /// Commits `Disconnected`, then asks the process to quit.  On failure the
    /// process handle is kept so no second shutdown can start behind it.
    async fn terminate(&mut self) {
        let Some(process) = self.process.as_ref() else {
            tracing::debug!("Disconnect ignored, no mount process running");
            return;
        };
        if self.machine.shutdown_committed() && self.state() == ConnectionState::Disconnected {
            tracing::debug!("Disconnect ignored, shutdown already in progress");
            return;
        }
        let control = Arc::clone(process.control());

        self.stop_polling();
        let (transition, commit) = self.machine.commit_shutdown();
        self.publish(transition);

        tracing::info!("Requesting graceful shutdown of the mount process");
        if let Err(e) = control.quit(commit).await {
            tracing::error!("Graceful shutdown request failed: {e}");
            let transition = self.apply(Input::ShutdownFailed);
            if transition.alert {
                self.raise("Mount shutdown request failed", e.to_string());
            }
        }
    }

    async fn quit(&mut self) {
        tracing::info!("Quit requested");
        self.quitting = true;
        if self.process.is_some() {
            self.terminate().await;
            self.quit_deadline = Some(Instant::now() + QUIT_GRACE);
        }
    }

    fn on_quit_deadline(&mut self) {
        match self.process.as_mut() {
            Some(process) if !self.kill_sent => {
                tracing::warn!("Mount process did not exit in time, killing it");
                process.kill();
                self.kill_sent = true;
                self.quit_deadline = Some(Instant::now() + KILL_GRACE);
            }
            _ => {
                tracing::warn!("Mount process did not exit after kill, giving up");
                self.process = None;
                self.quit_deadline = None;
            }
        }
    }

    // ── process and telemetry events ──────────────────────────────────────────

    fn is_current(&self, generation: u64) -> bool {
        self.process
            .as_ref()
            .is_some_and(|p| p.generation() == generation)
    }

    fn on_exit(&mut self, generation: u64, code: Option<i32>) {
        if !self.is_current(generation) {
            tracing::debug!(generation, "Ignoring exit of a stale mount process");
            return;
        }
        self.process = None;
        self.status.pid = None;
        // Polling must stop before the state is looked at.
        self.stop_polling();

        let transition = self.apply(Input::Exited);
        if transition.alert {
            let detail = match code {
                Some(code) => format!("The mount process exited with code {code}."),
                None => "The mount process was terminated by a signal.".to_string(),
            };
            tracing::error!("Mount process exited unexpectedly: {detail}");
            self.raise("Mount process exited unexpectedly", detail);
        } else {
            tracing::info!("Mount process stopped");
        }
    }

    fn on_fault(&mut self, generation: u64, message: String) {
        if !self.is_current(generation) {
            tracing::debug!(generation, "Ignoring fault of a stale mount process");
            return;
        }
        tracing::error!("Mount process error: {message}");
        self.stop_polling();
        let transition = self.apply(Input::Fault);
        self.process = None;
        self.status.pid = None;
        if transition.alert {
            self.raise("Mount process threw an error", message);
        }
    }

    fn on_sample(&mut self, generation: u64, sample: TelemetrySample) {
        let current = self
            .poll
            .as_ref()
            .is_some_and(|p| p.generation() == generation);
        if !current {
            tracing::debug!(generation, "Dropping sample from a cancelled poller");
            return;
        }
        self.status.uploads_in_progress = sample.uploads_in_progress;
        self.apply(Input::Sample {
            uploads_in_progress: sample.uploads_in_progress,
        });
    }

    fn on_config_changed(&mut self, result: Result<RunConfig, ConfigError>) {
        match result {
            Ok(config) => {
                if self.config.as_ref() == Some(&config) {
                    return;
                }
                tracing::info!("Configuration reloaded");
                if self.process.is_some() {
                    tracing::info!("New configuration applies from the next connect");
                }
                if self.options.manage_login_startup {
                    if let Err(e) = startup::sync(config.auto_start_on_login) {
                        tracing::warn!("Failed to update login startup: {e:#}");
                    }
                }
                self.config = Some(config);
            }
            Err(e) => {
                tracing::error!("{e}");
                self.config = None;
                self.notifier
                    .notice("Configuration is invalid", &e.to_string());
            }
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    fn stop_polling(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.stop();
        }
    }

    fn apply(&mut self, input: Input) -> Transition {
        let transition = self.machine.apply(input);
        self.publish(transition);
        transition
    }

    fn publish(&mut self, transition: Transition) {
        if !transition.changed() {
            return;
        }
        tracing::info!("Connection state {} -> {}", transition.from, transition.to);
        self.status.record(transition.to);
        self.state_tx.send_replace(transition.to);
        self.write_status();
    }

    /// Shows an alert and keeps its detail in the status file.
    fn raise(&mut self, title: &str, detail: String) {
        self.notifier
            .alert(title, &format!("{detail}\n{SEE_LOGS}"));
        self.status.error = Some(detail);
        self.write_status();
    }

    fn write_status(&self) {
        if let Some(path) = &self.options.status_path {
            status::write_status(path, &self.status);
        }
    }
}
