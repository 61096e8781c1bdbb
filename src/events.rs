// src/events.rs

use serde::Serialize;
use tokio::sync::mpsc;

use crate::client::ControlCommand;
use crate::models::{ControlState, Job, JobState};
use crate::sampler::format_progress_size;
use crate::summary::CompletionSummary;

/// Where monitors publish updates for the UI layer.
pub type EventSink = mpsc::UnboundedSender<MonitorEvent>;
pub type EventStream = mpsc::UnboundedReceiver<MonitorEvent>;

pub fn channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// Display-ready view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub pipeline_id: u64,
    pub state: JobState,
    pub control_state: ControlState,
    pub percent: Option<f64>,
    pub speed: String,
    pub eta: String,
    pub size: String,
    pub current_file: Option<String>,
    pub warning: Option<String>,
}

impl JobSnapshot {
    pub fn of(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            pipeline_id: job.pipeline_id,
            state: job.state,
            control_state: job.control_state,
            percent: job.progress_percent(),
            speed: job.throughput.speed_text(),
            eta: job.throughput.eta_text(),
            size: format_progress_size(job.bytes_downloaded, job.total_bytes),
            current_file: job.current_file.clone(),
            warning: job.warning.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Progress(JobSnapshot),
    /// Soft failure; polling continues.
    TransientError {
        job_id: String,
        message: String,
        consecutive: u32,
    },
    Retrying {
        job_id: String,
        attempt: u32,
        max: u32,
        message: String,
    },
    Stalled {
        job_id: String,
        message: String,
    },
    /// Poll skipped because the shared health flag is down.
    ServerUnreachable {
        job_id: String,
        message: String,
    },
    WarningCleared {
        job_id: String,
    },
    ControlChanged {
        job_id: String,
        control_state: ControlState,
    },
    CommandRejected {
        job_id: String,
        command: &'static str,
        reason: String,
    },
    Finished {
        job_id: String,
        state: JobState,
        summary: CompletionSummary,
        fatal: Option<String>,
    },
}

impl MonitorEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Progress(snapshot) => &snapshot.job_id,
            Self::TransientError { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Stalled { job_id, .. }
            | Self::ServerUnreachable { job_id, .. }
            | Self::WarningCleared { job_id }
            | Self::ControlChanged { job_id, .. }
            | Self::CommandRejected { job_id, .. }
            | Self::Finished { job_id, .. } => job_id,
        }
    }

    pub(crate) fn rejected(job_id: &str, command: ControlCommand, reason: String) -> Self {
        Self::CommandRejected {
            job_id: job_id.to_string(),
            command: command.as_str(),
            reason,
        }
    }
}
