use crate::config::{ConfigError, RunConfig};
use crate::telemetry::TelemetrySample;

/// Everything the supervisor reacts to, delivered over its single channel.
pub enum SupervisorEvent {
    /// A user intent from the command surface.
    Command(Command),
    /// The process watcher could not observe the process any more.
    ProcessFault { generation: u64, message: String },
    /// The process exited.  `code` is `None` when it was ended by a signal.
    ProcessExited { generation: u64, code: Option<i32> },
    /// One successfully parsed status reply.
    Telemetry {
        generation: u64,
        sample: TelemetrySample,
    },
    /// The config file changed on disk and was re-read.
    ConfigChanged(Result<RunConfig, ConfigError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    /// Disconnect, wait for the process to go away, then end the application.
    Quit,
}

impl std::str::FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(Command::Connect),
            "disconnect" => Ok(Command::Disconnect),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(format!("unknown command `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_case_insensitively() {
        assert_eq!("Connect".parse::<Command>(), Ok(Command::Connect));
        assert_eq!(" disconnect\n".parse::<Command>(), Ok(Command::Disconnect));
        assert_eq!("exit".parse::<Command>(), Ok(Command::Quit));
        assert!("mount".parse::<Command>().is_err());
    }
}
