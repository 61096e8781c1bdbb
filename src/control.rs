// src/control.rs

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ArtifactApi, ClientError, ControlCommand};
use crate::events::{EventSink, MonitorEvent};
use crate::models::{ControlState, Job, JobState, ReportedStatus};
use crate::summary::CompletionSummary;

pub const CANCELLED_MESSAGE: &str = "Download cancelled";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Failed to {command} download: {source}")]
    Rejected {
        command: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("job {0} has already finished")]
    Finished(String),
}

/// Sends pause/resume/cancel for one job and applies them locally only
/// once the server acknowledges.
#[derive(Clone)]
pub struct ControlChannel {
    api: Arc<dyn ArtifactApi>,
    job: Arc<Mutex<Job>>,
    stop: CancellationToken,
    events: EventSink,
}

impl ControlChannel {
    pub fn new(
        api: Arc<dyn ArtifactApi>,
        job: Arc<Mutex<Job>>,
        stop: CancellationToken,
        events: EventSink,
    ) -> Self {
        Self {
            api,
            job,
            stop,
            events,
        }
    }

    pub async fn pause(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Resume).await
    }

    /// Cancels the job and stops its polling loop once acknowledged.
    pub async fn cancel(&self) -> Result<(), ControlError> {
        self.send(ControlCommand::Cancel).await
    }

    async fn send(&self, command: ControlCommand) -> Result<(), ControlError> {
        let job_id = {
            let job = self.job.lock().await;
            if job.is_terminal() {
                return Err(ControlError::Finished(job.id.clone()));
            }
            job.id.clone()
        };

        // The lock is not held across the request so polling carries on.
        if let Err(e) = self.api.control(&job_id, command).await {
            warn!(job_id = %job_id, command = command.as_str(), error = %e, "control command rejected");
            let _ = self
                .events
                .send(MonitorEvent::rejected(&job_id, command, e.to_string()));
            return Err(ControlError::Rejected {
                command: command.as_str(),
                source: e,
            });
        }

        let mut job = self.job.lock().await;
        if job.is_terminal() {
            // The job finished while the command was in flight.
            return Ok(());
        }
        match command {
            ControlCommand::Pause => self.set_control(&mut job, ControlState::Paused, JobState::Paused),
            ControlCommand::Resume => {
                self.set_control(&mut job, ControlState::Running, JobState::Running)
            }
            ControlCommand::Cancel => {
                self.stop.cancel();
                job.transition(JobState::Cancelled);
                info!(job_id = %job.id, "Download cancelled");
                let _ = self.events.send(MonitorEvent::Finished {
                    job_id: job.id.clone(),
                    state: job.state,
                    summary: CompletionSummary::from_message(
                        Some(CANCELLED_MESSAGE),
                        ReportedStatus::Cancelled,
                    ),
                    fatal: None,
                });
            }
        }
        Ok(())
    }

    fn set_control(&self, job: &mut Job, control: ControlState, state: JobState) {
        if job.state == JobState::Pending {
            // The server already owns the job even if no poll has run yet.
            job.transition(JobState::Running);
        }
        if !job.transition(state) {
            debug!(job_id = %job.id, state = ?job.state, "control state already applied");
            return;
        }
        job.control_state = control;
        if state == JobState::Running {
            // Time spent paused does not count towards a stall.
            job.last_progress_at = Some(Instant::now());
            job.stalled = false;
        }
        info!(job_id = %job.id, control_state = ?control, "control state acknowledged");
        let _ = self.events.send(MonitorEvent::ControlChanged {
            job_id: job.id.clone(),
            control_state: control,
        });
    }
}
