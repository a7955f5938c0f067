/// Periodic status polling of the running mount process.
///
/// The poller owns no state of its own: every tick it queries the control
/// endpoint, parses the reply and forwards the sample to the supervisor.
/// Failures are logged and the sample is dropped; the poller never reports
/// an error state.  A process that stops answering for good is reported
/// through its exit instead.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use crate::control::{ControlEndpoint, ControlError};
use crate::event::SupervisorEvent;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);

/// Field path of the "uploads currently in flight" counter in the stats reply.
const UPLOADS_POINTER: &str = "/diskCache/uploadsInProgress";

/// One parsed status reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub uploads_in_progress: Option<u64>,
    pub raw: Value,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("status query failed: {0}")]
    Query(#[from] ControlError),
    #[error("status reply is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parses a stats reply.  A reply without the counter is still a valid sample.
pub fn parse_sample(payload: &str) -> Result<TelemetrySample, serde_json::Error> {
    let raw: Value = serde_json::from_str(payload)?;
    let uploads_in_progress = raw.pointer(UPLOADS_POINTER).and_then(Value::as_u64);
    Ok(TelemetrySample {
        uploads_in_progress,
        raw,
    })
}

/// Issues one status query and parses the reply.
pub async fn poll_once(control: &dyn ControlEndpoint) -> Result<TelemetrySample, TelemetryError> {
    let payload = control.stats().await?;
    Ok(parse_sample(&payload)?)
}

/// A running poll task, tied to one launch generation.
pub struct PollHandle {
    generation: u64,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancels the task.  Returns immediately; a sample already queued on the
    /// event channel is discarded by the supervisor's generation check.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
        self.task.abort();
    }
}

/// Starts polling `control` every `period`.  The first query fires one period
/// after the start, and each query is awaited before the next tick.
pub fn start(
    control: Arc<dyn ControlEndpoint>,
    generation: u64,
    period: Duration,
    tx: mpsc::Sender<SupervisorEvent>,
) -> PollHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }

            match poll_once(control.as_ref()).await {
                Ok(sample) => {
                    tracing::debug!(
                        uploads_in_progress = ?sample.uploads_in_progress,
                        raw = %sample.raw,
                        "Telemetry sample"
                    );
                    if tx
                        .send(SupervisorEvent::Telemetry { generation, sample })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(TelemetryError::Parse(e)) => {
                    tracing::warn!("Dropping malformed telemetry sample: {e}");
                }
                Err(e) => tracing::warn!("Could not update sync status: {e}"),
            }
        }
        tracing::debug!(generation, "Telemetry poller stopped");
    });

    PollHandle {
        generation,
        stop_tx,
        task,
    }
}
