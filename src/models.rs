// src/models.rs

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::sampler::Throughput;

/// Lifecycle state of a monitored download job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    /// Terminal states stop the polling loop for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Starting...",
            Self::Running => "Downloading",
            Self::Paused => "Paused",
            Self::Completed => "Download Complete",
            Self::Failed => "Download Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// The last pause/resume command the server acknowledged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    #[default]
    Running,
    Paused,
}

/// Status value as reported by the server's status endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
    /// Anything else (`paused`, `started`, ...) counts as still in progress.
    #[serde(other)]
    Other,
}

impl ReportedStatus {
    /// Maps a terminal report to the job state it ends in.
    pub fn terminal_state(self) -> Option<JobState> {
        match self {
            Self::Completed | Self::PartialSuccess => Some(JobState::Completed),
            Self::Failed => Some(JobState::Failed),
            Self::Cancelled => Some(JobState::Cancelled),
            Self::InProgress | Self::Other => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        }
    }
}

/// One decoded response of `GET /artifacts/status/{job_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ReportedStatus,
    #[serde(default)]
    pub bytes_downloaded: Option<u64>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub current_file: Option<String>,
    /// Only meaningful on terminal reports.
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn in_progress(bytes_downloaded: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: ReportedStatus::InProgress,
            bytes_downloaded: Some(bytes_downloaded),
            total_bytes,
            current_file: None,
            message: None,
        }
    }

    pub fn terminal(status: ReportedStatus, message: Option<String>) -> Self {
        Self {
            status,
            bytes_downloaded: None,
            total_bytes: None,
            current_file: None,
            message,
        }
    }
}

/// Body of `POST /artifacts/download`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadRequest {
    pub pipeline_id: u64,
    #[serde(rename = "artifacts")]
    pub artifact_paths: Vec<String>,
    pub download_path: String,
}

impl DownloadRequest {
    /// Builds a request from free-form input, dropping blank artifact lines.
    pub fn new<I, S>(pipeline_id: u64, artifact_paths: I, download_path: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            pipeline_id,
            artifact_paths: artifact_paths
                .into_iter()
                .map(|p| p.as_ref().trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            download_path: download_path.into().trim().to_string(),
        }
    }
}

/// A job accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedJob {
    pub job_id: String,
    /// Set when the server reported `partial_failure` on start.
    pub warning: Option<String>,
}

/// A single time-stamped byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub at: Instant,
    pub bytes: u64,
}

/// Identity and mutable tracking state of one download.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub pipeline_id: u64,
    pub artifact_paths: Vec<String>,
    pub state: JobState,
    pub control_state: ControlState,
    pub bytes_downloaded: u64,
    /// Unknown until the server reports a non-zero total.
    pub total_bytes: Option<u64>,
    pub current_file: Option<String>,

    pub last_sample: Option<ProgressSample>,
    pub throughput: Throughput,
    /// When `bytes_downloaded` last changed; drives stall detection.
    pub last_progress_at: Option<Instant>,
    pub stalled: bool,

    pub consecutive_errors: u32,
    pub retry_count: u32,
    /// Soft warning or error currently shown for the job.
    pub warning: Option<String>,
    /// Set when the job failed for a reason that retrying cannot fix.
    pub fatal_error: Option<String>,
}

impl Job {
    pub fn new(id: impl Into<String>, pipeline_id: u64, artifact_paths: Vec<String>) -> Self {
        Self {
            id: id.into(),
            pipeline_id,
            artifact_paths,
            state: JobState::Pending,
            control_state: ControlState::Running,
            bytes_downloaded: 0,
            total_bytes: None,
            current_file: None,
            last_sample: None,
            throughput: Throughput::UNKNOWN,
            last_progress_at: None,
            stalled: false,
            consecutive_errors: 0,
            retry_count: 0,
            warning: None,
            fatal_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a transition if the state table allows it.
    /// Returns whether the state changed.
    pub fn transition(&mut self, to: JobState) -> bool {
        let allowed = match (self.state, to) {
            (JobState::Pending, JobState::Running | JobState::Cancelled) => true,
            (JobState::Running, JobState::Paused) | (JobState::Paused, JobState::Running) => true,
            (JobState::Running | JobState::Paused, t) => t.is_terminal(),
            _ => false,
        };
        if allowed {
            self.state = to;
        }
        allowed
    }

    /// Folds a reported byte count in, keeping it monotonic and within the total.
    /// Bytes already counted never go back: a smaller total is raised to match.
    pub fn apply_progress(&mut self, reported: Option<u64>, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            self.total_bytes = Some(self.total_bytes.map_or(total, |t| t.max(total)));
        }
        let mut bytes = reported.unwrap_or(self.bytes_downloaded);
        if let Some(total) = self.total_bytes {
            bytes = bytes.min(total);
        }
        self.bytes_downloaded = bytes.max(self.bytes_downloaded);
        if let Some(total) = self.total_bytes.as_mut() {
            *total = (*total).max(self.bytes_downloaded);
        }
    }

    /// Calculates download progress as a percentage, if the total is known.
    pub fn progress_percent(&self) -> Option<f64> {
        if self.state == JobState::Completed {
            return Some(100.0);
        }
        self.total_bytes
            .map(|total| crate::sampler::progress_percent(self.bytes_downloaded, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_cannot_pause_or_finish() {
        let mut job = Job::new("j1", 7, vec![]);
        assert!(!job.transition(JobState::Paused));
        assert!(!job.transition(JobState::Completed));
        assert!(job.transition(JobState::Running));
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn job_can_be_cancelled_before_first_poll() {
        let mut job = Job::new("j1", 7, vec![]);
        assert!(job.transition(JobState::Cancelled));
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = Job::new("j1", 7, vec![]);
        job.transition(JobState::Running);
        assert!(job.transition(JobState::Cancelled));
        assert!(!job.transition(JobState::Running));
        assert!(!job.transition(JobState::Failed));
        assert_eq!(job.state, JobState::Cancelled);
    }

    #[test]
    fn paused_job_can_finish() {
        let mut job = Job::new("j1", 7, vec![]);
        job.transition(JobState::Running);
        assert!(job.transition(JobState::Paused));
        assert!(job.transition(JobState::Completed));
    }

    #[test]
    fn late_small_total_never_lowers_bytes() {
        let mut job = Job::new("j1", 7, vec![]);
        job.apply_progress(Some(500), None);
        job.apply_progress(Some(500), Some(200));
        assert_eq!(job.bytes_downloaded, 500);
        assert_eq!(job.total_bytes, Some(500));
        assert_eq!(job.progress_percent(), Some(100.0));
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let mut job = Job::new("j1", 7, vec![]);
        job.apply_progress(Some(500), None);
        assert_eq!(job.bytes_downloaded, 500);
        job.apply_progress(Some(300), Some(1000));
        assert_eq!(job.bytes_downloaded, 500);
        job.apply_progress(Some(4000), None);
        assert_eq!(job.bytes_downloaded, 1000);
        assert_eq!(job.total_bytes, Some(1000));
    }

    #[test]
    fn zero_total_stays_unknown() {
        let mut job = Job::new("j1", 7, vec![]);
        job.apply_progress(Some(10), Some(0));
        assert_eq!(job.total_bytes, None);
        assert_eq!(job.progress_percent(), None);
    }

    #[test]
    fn reported_status_parses_unknown_values() {
        let report: StatusReport = serde_json::from_str(r#"{"status":"paused"}"#).unwrap();
        assert_eq!(report.status, ReportedStatus::Other);
        assert_eq!(report.status.terminal_state(), None);
        assert_eq!(
            ReportedStatus::PartialSuccess.terminal_state(),
            Some(JobState::Completed)
        );
    }

    #[test]
    fn request_drops_blank_paths() {
        let req = DownloadRequest::new(3, ["a.zip", "  ", " b/c.log "], " /tmp/out ");
        assert_eq!(req.artifact_paths, vec!["a.zip", "b/c.log"]);
        assert_eq!(req.download_path, "/tmp/out");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("artifacts").is_some());
    }
}
