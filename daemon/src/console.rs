/// Line-based command surface on stdin, for running without a tray front end.
///
/// Accepts `connect`, `disconnect`, `quit` and `status`, one per line, and
/// echoes every state change to stdout.
use std::io::Write;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use crate::event::Command;
use crate::state::ConnectionState;
use crate::supervisor::SupervisorHandle;

pub async fn run(handle: SupervisorHandle) {
    tokio::spawn(echo_states(handle.subscribe(), std::io::stdout()));
    read_commands(BufReader::new(tokio::io::stdin()), handle).await;
}

/// Writes `state: <name>` for each change until the supervisor is gone.
async fn echo_states<W>(mut states: watch::Receiver<ConnectionState>, mut out: W)
where
    W: Write,
{
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        if writeln!(out, "state: {state}").is_err() {
            break;
        }
    }
}

async fn read_commands<R>(reader: R, handle: SupervisorHandle)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("status") {
            println!("{}", handle.current_state());
            continue;
        }
        let sent = match line.parse::<Command>() {
            Ok(Command::Connect) => handle.request_connect().await,
            Ok(Command::Disconnect) => handle.request_disconnect().await,
            Ok(Command::Quit) => handle.request_quit().await,
            Err(e) => {
                tracing::warn!("{e}; expected connect, disconnect, quit or status");
                continue;
            }
        };
        if sent.is_err() {
            break;
        }
    }
    tracing::debug!("Console input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SupervisorEvent;
    use crate::launcher::testing::FakeSpawner;
    use crate::notifications::testing::RecordingNotifier;
    use crate::supervisor::{Supervisor, SupervisorOptions};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn lines_become_commands() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_supervisor, handle) = Supervisor::new(
            None,
            Arc::new(FakeSpawner::new()),
            RecordingNotifier::default(),
            SupervisorOptions::default(),
            tx,
        );

        let input: &[u8] = b"connect\n\nbogus\nstatus\nDisconnect\nquit\n";
        read_commands(input, handle).await;

        let mut received = Vec::new();
        while let Ok(SupervisorEvent::Command(command)) = rx.try_recv() {
            received.push(command);
        }
        assert_eq!(
            received,
            vec![Command::Connect, Command::Disconnect, Command::Quit]
        );
    }

    #[tokio::test]
    async fn state_changes_are_echoed_until_the_sender_is_dropped() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        state_tx.send(ConnectionState::Syncing).unwrap();
        drop(state_tx);

        // The unseen change is still delivered after the sender is gone.
        let mut out = Vec::new();
        echo_states(state_rx, &mut out).await;
        assert_eq!(String::from_utf8(out).unwrap(), "state: syncing\n");
    }
}
