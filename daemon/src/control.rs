/// Control endpoint of the running mount process.
///
/// The mount exposes a remote-control interface that is driven by invoking
/// the same executable as `<executable> rc <command>`, which prints a JSON
/// reply on stdout.  Only two commands are needed: statistics and quit.
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::config::RunConfig;
use crate::state::ShutdownCommit;

pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

const STATS_COMMAND: &str = "vfs/stats";
const QUIT_COMMAND: &str = "core/quit";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("could not run control command {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("control command {command} failed (exit code {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("control command {command} timed out")]
    Timeout { command: String },
}

#[async_trait]
pub trait ControlEndpoint: Send + Sync {
    /// Raw statistics reply.
    async fn stats(&self) -> Result<String, ControlError>;

    /// Asks the process to shut itself down.  Requires a committed shutdown so
    /// the exit that follows is treated as expected.
    async fn quit(&self, commit: ShutdownCommit) -> Result<(), ControlError>;
}

/// Control endpoint reached through the mount executable's `rc` subcommand.
#[derive(Debug, Clone)]
pub struct RcControl {
    executable: String,
    address: Option<String>,
    timeout: Duration,
}

impl RcControl {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            address: config.control_address.clone(),
            timeout: CONTROL_TIMEOUT,
        }
    }

    fn args<'a>(&'a self, command: &'a str) -> Vec<&'a str> {
        let mut args = vec!["rc"];
        if let Some(address) = &self.address {
            args.extend(["--url", address.as_str()]);
        }
        args.push(command);
        args
    }

    async fn run(&self, command: &str) -> Result<String, ControlError> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(self.args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(crate::launcher::CREATE_NO_WINDOW);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| ControlError::Spawn {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ControlError::Timeout {
                    command: command.to_string(),
                })
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(ControlError::Failed {
                command: command.to_string(),
                code: output.status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            tracing::warn!("rc {command} wrote to stderr: {stderr}");
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ControlEndpoint for RcControl {
    async fn stats(&self) -> Result<String, ControlError> {
        self.run(STATS_COMMAND).await
    }

    async fn quit(&self, _commit: ShutdownCommit) -> Result<(), ControlError> {
        let reply = self.run(QUIT_COMMAND).await?;
        let reply = reply.trim();
        if !reply.is_empty() {
            tracing::info!("rc {QUIT_COMMAND} replied: {reply}");
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn config(executable: &str, address: Option<&str>) -> RunConfig {
        RunConfig {
            executable: executable.to_string(),
            control_address: address.map(str::to_string),
            ..RunConfig::default()
        }
    }

    #[test]
    fn args_without_address() {
        let rc = RcControl::new(&config("rclone", None));
        assert_eq!(rc.args(STATS_COMMAND), vec!["rc", "vfs/stats"]);
    }

    #[test]
    fn args_with_address() {
        let rc = RcControl::new(&config("rclone", Some("localhost:5573")));
        assert_eq!(
            rc.args(QUIT_COMMAND),
            vec!["rc", "--url", "localhost:5573", "core/quit"]
        );
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let rc = RcControl::new(&config("cloudmount-test-no-such-binary", None));
        assert!(matches!(rc.stats().await, Err(ControlError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        // `false rc vfs/stats` ignores its arguments and exits with 1.
        let rc = RcControl::new(&config("false", None));
        match rc.quit(ShutdownCommit::for_tests()).await {
            Err(ControlError::Failed { code, .. }) => assert_eq!(code, Some(1)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stats_returns_stdout() {
        // `echo rc vfs/stats` prints its own arguments.
        let rc = RcControl::new(&config("echo", None));
        assert_eq!(rc.stats().await.unwrap().trim(), "rc vfs/stats");
    }
}
