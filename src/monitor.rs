//! Per-job polling loop and state machine.
//!
//! A [`JobMonitor`] owns one job's record. Each tick issues a single status
//! request; the result either advances progress, finishes the job, or is
//! handed to the [`RetryController`]. Control commands reach the same record
//! through a [`ControlChannel`] obtained from the monitor before it is run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{ArtifactApi, ClientError};
use crate::control::ControlChannel;
use crate::events::{EventSink, JobSnapshot, MonitorEvent};
use crate::health::HealthSignal;
use crate::models::{Job, JobState, ProgressSample, StatusReport};
use crate::retry::{RetryController, RetryDecision, RetryPolicy};
use crate::sampler::ProgressSampler;
use crate::summary::CompletionSummary;

pub const STALL_MESSAGE: &str = "Download appears to be stalled. Checking connection...";
pub const UNREACHABLE_MESSAGE: &str =
    "Server connection lost. Waiting for connection to resume...";

/// Timing knobs for a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// How long bytes may stay unchanged before a stall warning.
    pub stall_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stall_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Health flag was down; no request was made.
    Skipped,
    Progress,
    Transient(RetryDecision),
    Finished(JobState),
    /// The job became terminal while the request was in flight.
    Discarded,
}

pub struct JobMonitor {
    job_id: String,
    api: Arc<dyn ArtifactApi>,
    job: Arc<Mutex<Job>>,
    sampler: ProgressSampler,
    retry: RetryController,
    health: HealthSignal,
    events: EventSink,
    config: MonitorConfig,
    stop: CancellationToken,
}

impl JobMonitor {
    pub fn new(
        api: Arc<dyn ArtifactApi>,
        job: Job,
        health: HealthSignal,
        events: EventSink,
        config: MonitorConfig,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            api,
            job: Arc::new(Mutex::new(job)),
            sampler: ProgressSampler::new(),
            retry: RetryController::new(config.retry),
            health,
            events,
            config,
            stop: CancellationToken::new(),
        }
    }

    pub fn job(&self) -> Arc<Mutex<Job>> {
        self.job.clone()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn control(&self) -> ControlChannel {
        ControlChannel::new(
            self.api.clone(),
            self.job.clone(),
            self.stop.clone(),
            self.events.clone(),
        )
    }

    /// Polls until the job reaches a terminal state or the stop token fires.
    pub async fn run(mut self) -> JobState {
        self.job.lock().await.transition(JobState::Running);
        info!(job_id = %self.job_id, "monitoring download");

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // An in-flight request is never aborted; poll_once discards it.
            match self.poll_once().await {
                Tick::Finished(_) | Tick::Discarded => break,
                Tick::Transient(RetryDecision::Retry { cooldown, .. }) => {
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(cooldown) => {}
                    }
                }
                Tick::Transient(RetryDecision::GiveUp { .. }) => break,
                Tick::Skipped | Tick::Progress | Tick::Transient(RetryDecision::Warn { .. }) => {}
            }
        }

        let state = self.job.lock().await.state;
        debug!(job_id = %self.job_id, ?state, "monitor loop finished");
        state
    }

    /// Runs a single tick.
    pub async fn poll_once(&mut self) -> Tick {
        {
            let mut job = self.job.lock().await;
            if job.is_terminal() {
                return Tick::Discarded;
            }
            if job.state == JobState::Pending {
                job.transition(JobState::Running);
            }
            if !self.health.is_healthy() {
                job.warning = Some(UNREACHABLE_MESSAGE.to_string());
                self.emit(MonitorEvent::ServerUnreachable {
                    job_id: self.job_id.clone(),
                    message: UNREACHABLE_MESSAGE.to_string(),
                });
                return Tick::Skipped;
            }
        }

        let result = self.api.status(&self.job_id).await;

        let record = self.job.clone();
        let mut job = record.lock().await;
        if job.is_terminal() || self.stop.is_cancelled() {
            debug!(job_id = %self.job_id, "discarding poll result for finished job");
            return Tick::Discarded;
        }
        match result {
            Ok(report) => self.on_report(&mut job, report),
            Err(e) => self.on_error(&mut job, e),
        }
    }

    fn on_report(&mut self, job: &mut Job, report: StatusReport) -> Tick {
        let had_warning = job.warning.is_some();
        self.retry.on_success(job);

        if let Some(state) = report.status.terminal_state() {
            self.clear_warning(had_warning, job);
            return self.finish(job, state, report);
        }

        let now = Instant::now();
        let before = job.bytes_downloaded;
        job.apply_progress(report.bytes_downloaded, report.total_bytes);
        if report.current_file.is_some() {
            job.current_file = report.current_file;
        }

        let since = *job.last_progress_at.get_or_insert(now);
        if job.bytes_downloaded != before {
            job.last_progress_at = Some(now);
            job.stalled = false;
        } else if job.state == JobState::Running
            && now.saturating_duration_since(since) > self.config.stall_timeout
        {
            if !job.stalled {
                warn!(job_id = %self.job_id, bytes = job.bytes_downloaded, "download appears stalled");
                self.emit(MonitorEvent::Stalled {
                    job_id: self.job_id.clone(),
                    message: STALL_MESSAGE.to_string(),
                });
            }
            job.stalled = true;
            job.warning = Some(STALL_MESSAGE.to_string());
        }

        let sample = ProgressSample {
            at: now,
            bytes: job.bytes_downloaded,
        };
        job.throughput = self.sampler.record(sample, job.total_bytes);
        job.last_sample = Some(sample);

        // A stall that persists re-sets its warning above.
        self.clear_warning(had_warning, job);

        self.emit(MonitorEvent::Progress(JobSnapshot::of(job)));
        Tick::Progress
    }

    fn finish(&mut self, job: &mut Job, state: JobState, report: StatusReport) -> Tick {
        job.apply_progress(report.bytes_downloaded, report.total_bytes);
        job.transition(state);
        self.stop.cancel();

        let summary = CompletionSummary::from_message(report.message.as_deref(), report.status);
        info!(
            job_id = %self.job_id,
            status = report.status.as_str(),
            downloaded = summary.downloaded_files.len(),
            missing = summary.missing_files.len(),
            "download finished"
        );
        self.emit(MonitorEvent::Finished {
            job_id: self.job_id.clone(),
            state: job.state,
            summary,
            fatal: None,
        });
        Tick::Finished(job.state)
    }

    fn on_error(&mut self, job: &mut Job, err: ClientError) -> Tick {
        let decision = self.retry.on_failure(job);
        warn!(
            job_id = %self.job_id,
            error = %err,
            consecutive = job.consecutive_errors,
            retries = job.retry_count,
            "status poll failed"
        );
        let message = format!("Download monitoring error: {err}");
        job.warning = Some(message.clone());
        self.emit(MonitorEvent::TransientError {
            job_id: self.job_id.clone(),
            message,
            consecutive: job.consecutive_errors,
        });

        match &decision {
            RetryDecision::Warn { .. } => {}
            RetryDecision::Retry { attempt, max, .. } => {
                let notice = decision.notice(&err.to_string());
                job.warning = Some(notice.clone());
                self.emit(MonitorEvent::Retrying {
                    job_id: self.job_id.clone(),
                    attempt: *attempt,
                    max: *max,
                    message: notice,
                });
            }
            RetryDecision::GiveUp { .. } => {
                let notice = decision.notice(&err.to_string());
                error!(job_id = %self.job_id, "{notice}");
                job.fatal_error = Some(notice.clone());
                job.transition(JobState::Failed);
                self.stop.cancel();
                self.emit(MonitorEvent::Finished {
                    job_id: self.job_id.clone(),
                    state: job.state,
                    summary: CompletionSummary::failed(notice.clone()),
                    fatal: Some(notice),
                });
            }
        }
        Tick::Transient(decision)
    }

    fn clear_warning(&self, had_warning: bool, job: &Job) {
        if had_warning && job.warning.is_none() {
            self.emit(MonitorEvent::WarningCleared {
                job_id: self.job_id.clone(),
            });
        }
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }
}
