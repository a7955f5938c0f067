/// Connection state machine.
///
/// The machine only records outcomes reported by the launcher and the poller;
/// it never spawns or kills anything.  Every input goes through
/// [`StateMachine::apply`], which returns the resulting [`Transition`] so the
/// caller can update the observable indicator and decide whether to alert.
use serde::{Deserialize, Serialize};

/// Canonical health of the supervised mount, shown to the user.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No mount process is running, or a controlled shutdown has been committed.
    #[default]
    Disconnected,
    /// The mount process is running and idle.
    Connected,
    /// The mount process reports uploads in flight.
    Syncing,
    /// The process failed or exited on its own.  Cleared only by a new launch.
    Error,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Syncing => "syncing",
            ConnectionState::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything that can move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// A process was spawned successfully.
    Launched,
    /// One parsed telemetry sample.  `None` means the payload had no upload counter.
    Sample { uploads_in_progress: Option<u64> },
    /// Spawn failure or a runtime fault reported by the process watcher.
    Fault,
    /// The process exited.  Whether that was expected is decided here.
    Exited,
    /// The graceful quit request failed after the shutdown was committed.
    ShutdownFailed,
}

/// Result of applying one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    /// The user must be told about this transition.
    pub alert: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Proof that the machine has been moved to `Disconnected` for a controlled
/// shutdown.  Only [`StateMachine::commit_shutdown`] can create one, and the
/// control endpoint's quit command requires it, so a quit request cannot be
/// issued before the state is committed.
#[derive(Debug)]
pub struct ShutdownCommit {
    _private: (),
}

#[cfg(test)]
impl ShutdownCommit {
    pub fn for_tests() -> Self {
        Self { _private: () }
    }
}

#[derive(Debug, Default)]
pub struct StateMachine {
    state: ConnectionState,
    shutdown_committed: bool,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True between [`commit_shutdown`](Self::commit_shutdown) and the next launch.
    pub fn shutdown_committed(&self) -> bool {
        self.shutdown_committed
    }

    /// First step of the terminate protocol: force `Disconnected` so that the
    /// exit caused by the upcoming quit request is treated as expected.
    pub fn commit_shutdown(&mut self) -> (Transition, ShutdownCommit) {
        let from = self.state;
        self.state = ConnectionState::Disconnected;
        self.shutdown_committed = true;
        let transition = Transition {
            from,
            to: self.state,
            alert: false,
        };
        (transition, ShutdownCommit { _private: () })
    }

    pub fn apply(&mut self, input: Input) -> Transition {
        let from = self.state;
        let (to, alert) = match input {
            Input::Launched => {
                self.shutdown_committed = false;
                (ConnectionState::Connected, false)
            }
            Input::Sample { uploads_in_progress } => match (from, uploads_in_progress) {
                // A sample can only be meaningful while a process is considered up.
                (ConnectionState::Error | ConnectionState::Disconnected, _) => (from, false),
                (_, Some(n)) if n > 0 => (ConnectionState::Syncing, false),
                (_, Some(_)) => (ConnectionState::Connected, false),
                (_, None) => (from, false),
            },
            Input::Fault => (ConnectionState::Error, true),
            Input::Exited => match from {
                ConnectionState::Disconnected => (from, false),
                // Already reported; the exit that follows a fault is not news.
                ConnectionState::Error => (from, false),
                ConnectionState::Connected | ConnectionState::Syncing => {
                    (ConnectionState::Error, true)
                }
            },
            Input::ShutdownFailed => (ConnectionState::Error, true),
        };
        self.state = to;
        Transition { from, to, alert }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_in(state: ConnectionState) -> StateMachine {
        StateMachine {
            state,
            shutdown_committed: false,
        }
    }

    fn sample(n: u64) -> Input {
        Input::Sample {
            uploads_in_progress: Some(n),
        }
    }

    const ALL: [ConnectionState; 4] = [
        ConnectionState::Disconnected,
        ConnectionState::Connected,
        ConnectionState::Syncing,
        ConnectionState::Error,
    ];

    // ── launch ────────────────────────────────────────────────────────────────

    #[test]
    fn starts_disconnected() {
        let m = StateMachine::new();
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(!m.shutdown_committed());
    }

    #[test]
    fn launch_connects_from_any_state() {
        for state in ALL {
            let mut m = machine_in(state);
            let t = m.apply(Input::Launched);
            assert_eq!(t.to, ConnectionState::Connected);
            assert!(!t.alert);
        }
    }

    #[test]
    fn launch_clears_shutdown_commit() {
        let mut m = machine_in(ConnectionState::Connected);
        let _ = m.commit_shutdown();
        assert!(m.shutdown_committed());
        m.apply(Input::Launched);
        assert!(!m.shutdown_committed());
    }

    // ── telemetry ─────────────────────────────────────────────────────────────

    #[test]
    fn uploads_in_progress_stays_syncing_until_zero() {
        let mut m = machine_in(ConnectionState::Connected);
        for n in [3, 1, 7, 1] {
            m.apply(sample(n));
            assert_eq!(m.state(), ConnectionState::Syncing);
        }
        m.apply(sample(0));
        assert_eq!(m.state(), ConnectionState::Connected);
    }

    #[test]
    fn sample_without_counter_leaves_state_alone() {
        for state in ALL {
            let mut m = machine_in(state);
            let t = m.apply(Input::Sample {
                uploads_in_progress: None,
            });
            assert!(!t.changed());
            assert!(!t.alert);
        }
    }

    #[test]
    fn samples_never_clear_error() {
        let mut m = machine_in(ConnectionState::Error);
        m.apply(sample(0));
        m.apply(sample(4));
        assert_eq!(m.state(), ConnectionState::Error);
    }

    #[test]
    fn samples_ignored_after_shutdown_commit() {
        let mut m = machine_in(ConnectionState::Syncing);
        let _ = m.commit_shutdown();
        m.apply(sample(2));
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    // ── exit ──────────────────────────────────────────────────────────────────

    #[test]
    fn exit_while_disconnected_is_silent() {
        let mut m = machine_in(ConnectionState::Disconnected);
        let t = m.apply(Input::Exited);
        assert_eq!(t.to, ConnectionState::Disconnected);
        assert!(!t.alert);
    }

    #[test]
    fn exit_while_running_is_an_error_with_one_alert() {
        for state in [ConnectionState::Connected, ConnectionState::Syncing] {
            let mut m = machine_in(state);
            let t = m.apply(Input::Exited);
            assert_eq!(t.to, ConnectionState::Error);
            assert!(t.alert);
        }
    }

    #[test]
    fn exit_after_error_does_not_alert_twice() {
        let mut m = machine_in(ConnectionState::Connected);
        assert!(m.apply(Input::Fault).alert);
        let t = m.apply(Input::Exited);
        assert_eq!(t.to, ConnectionState::Error);
        assert!(!t.alert);
    }

    // ── faults and shutdown ───────────────────────────────────────────────────

    #[test]
    fn fault_reaches_error_from_every_state() {
        for state in ALL {
            let mut m = machine_in(state);
            let t = m.apply(Input::Fault);
            assert_eq!(t.to, ConnectionState::Error);
            assert!(t.alert);
        }
    }

    #[test]
    fn commit_shutdown_forces_disconnected() {
        for state in ALL {
            let mut m = machine_in(state);
            let (t, _commit) = m.commit_shutdown();
            assert_eq!(t.from, state);
            assert_eq!(t.to, ConnectionState::Disconnected);
            assert!(!t.alert);
            assert!(m.shutdown_committed());
        }
    }

    #[test]
    fn failed_shutdown_is_an_error() {
        let mut m = machine_in(ConnectionState::Connected);
        let _ = m.commit_shutdown();
        let t = m.apply(Input::ShutdownFailed);
        assert_eq!(t.from, ConnectionState::Disconnected);
        assert_eq!(t.to, ConnectionState::Error);
        assert!(t.alert);
    }

    #[test]
    fn state_displays_lowercase() {
        assert_eq!(ConnectionState::Syncing.to_string(), "syncing");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
