// src/registry.rs

use crate::client::{ArtifactApi, ClientError};
use crate::control::{ControlChannel, ControlError};
use crate::events::{EventSink, JobSnapshot};
use crate::health::HealthSignal;
use crate::models::{DownloadRequest, Job, JobState, StartedJob};
use crate::monitor::{JobMonitor, MonitorConfig};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("job with ID {0} not found")]
    JobNotFound(String),
    #[error("job {0} is already being monitored")]
    AlreadyTracked(String),
    #[error("failed to start download: {0}")]
    Start(#[from] ClientError),
    #[error(transparent)]
    Control(#[from] ControlError),
}

struct MonitorHandle {
    job: Arc<Mutex<Job>>,
    control: ControlChannel,
    stop: CancellationToken,
    task: JoinHandle<JobState>,
}

/// Holds every active job monitor, keyed by the server-assigned job id.
pub struct MonitorRegistry {
    api: Arc<dyn ArtifactApi>,
    health: HealthSignal,
    events: EventSink,
    config: MonitorConfig,
    monitors: Arc<Mutex<HashMap<String, MonitorHandle>>>,
}

impl MonitorRegistry {
    pub fn new(
        api: Arc<dyn ArtifactApi>,
        health: HealthSignal,
        events: EventSink,
        config: MonitorConfig,
    ) -> Self {
        Self {
            api,
            health,
            events,
            config,
            monitors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Asks the server to start a download and begins monitoring it.
    pub async fn start(&self, request: DownloadRequest) -> Result<StartedJob, RegistryError> {
        let started = self.api.start_download(&request).await?;
        match &started.warning {
            Some(warning) => warn!(job_id = %started.job_id, "download started with warning: {warning}"),
            None => info!(job_id = %started.job_id, pipeline_id = request.pipeline_id, "Download started successfully"),
        }
        self.track(&started.job_id, request.pipeline_id, request.artifact_paths)
            .await?;
        Ok(started)
    }

    /// Starts a monitor for a job the server already knows about.
    pub async fn track(
        &self,
        job_id: &str,
        pipeline_id: u64,
        artifact_paths: Vec<String>,
    ) -> Result<(), RegistryError> {
        let mut monitors = self.monitors.lock().await;
        if monitors.contains_key(job_id) {
            return Err(RegistryError::AlreadyTracked(job_id.to_string()));
        }

        let monitor = JobMonitor::new(
            self.api.clone(),
            Job::new(job_id, pipeline_id, artifact_paths),
            self.health.clone(),
            self.events.clone(),
            self.config,
        );
        let handle = MonitorHandle {
            job: monitor.job(),
            control: monitor.control(),
            stop: monitor.stop_token(),
            task: tokio::spawn(monitor.run()),
        };
        monitors.insert(job_id.to_string(), handle);
        info!(job_id, "Registry: tracking job");
        Ok(())
    }

    async fn control_for(&self, job_id: &str) -> Result<ControlChannel, RegistryError> {
        self.monitors
            .lock()
            .await
            .get(job_id)
            .map(|h| h.control.clone())
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))
    }

    pub async fn pause(&self, job_id: &str) -> Result<(), RegistryError> {
        // Map lock is released before the request goes out.
        let control = self.control_for(job_id).await?;
        control.pause().await?;
        Ok(())
    }

    pub async fn resume(&self, job_id: &str) -> Result<(), RegistryError> {
        let control = self.control_for(job_id).await?;
        control.resume().await?;
        Ok(())
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), RegistryError> {
        let control = self.control_for(job_id).await?;
        control.cancel().await?;
        Ok(())
    }

    /// Sends cancel to every job that has not finished yet.
    pub async fn cancel_all(&self) {
        let controls: Vec<_> = {
            let monitors = self.monitors.lock().await;
            monitors
                .iter()
                .map(|(id, h)| (id.clone(), h.control.clone()))
                .collect()
        };
        for (job_id, control) in controls {
            match control.cancel().await {
                Ok(()) | Err(ControlError::Finished(_)) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "cancel failed"),
            }
        }
    }

    pub async fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        let job = self.monitors.lock().await.get(job_id)?.job.clone();
        let job = job.lock().await;
        Some(JobSnapshot::of(&job))
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.monitors.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops a terminal job once its summary has been consumed.
    /// Returns `false` if the job is still running.
    pub async fn acknowledge(&self, job_id: &str) -> Result<bool, RegistryError> {
        let mut monitors = self.monitors.lock().await;
        let handle = monitors
            .get(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))?;
        if !handle.job.lock().await.is_terminal() {
            return Ok(false);
        }
        monitors.remove(job_id);
        info!(job_id, "Registry: removed finished job");
        Ok(true)
    }

    /// Removes every job whose loop has exited in a terminal state.
    pub async fn prune_finished(&self) -> Vec<String> {
        // Step 1: collect finished ids without holding job locks for long.
        let mut finished_ids = Vec::new();
        {
            let monitors = self.monitors.lock().await;
            for (id, handle) in monitors.iter() {
                if handle.task.is_finished() && handle.job.lock().await.is_terminal() {
                    finished_ids.push(id.clone());
                }
            }
        }

        // Step 2: drop them.
        if !finished_ids.is_empty() {
            let mut monitors = self.monitors.lock().await;
            for id in &finished_ids {
                info!(job_id = %id, "Registry: pruning finished monitor");
                monitors.remove(id);
            }
        }
        finished_ids
    }

    /// Stops every polling loop locally and waits for them to exit.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.monitors.lock().await.drain().collect();
        for (job_id, handle) in handles {
            handle.stop.cancel();
            if let Err(e) = handle.task.await {
                warn!(job_id = %job_id, error = %e, "monitor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ControlCommand, MockArtifactApi};
    use crate::events;
    use crate::models::{ReportedStatus, StatusReport};
    use std::time::Duration;

    fn registry(api: MockArtifactApi) -> MonitorRegistry {
        let (tx, _rx) = events::channel();
        MonitorRegistry::new(
            Arc::new(api),
            HealthSignal::always_healthy(),
            tx,
            MonitorConfig::default(),
        )
    }

    fn api_in_progress() -> MockArtifactApi {
        let mut api = MockArtifactApi::new();
        api.expect_start_download().returning(|_| {
            Ok(StartedJob {
                job_id: "job-7".into(),
                warning: None,
            })
        });
        api.expect_status()
            .returning(|_| Ok(StatusReport::in_progress(5, Some(10))));
        api
    }

    #[tokio::test(start_paused = true)]
    async fn start_registers_a_running_monitor() {
        let registry = registry(api_in_progress());
        let started = registry
            .start(DownloadRequest::new(3, ["a.zip"], "/tmp"))
            .await
            .unwrap();
        assert_eq!(started.job_id, "job-7");
        assert_eq!(registry.job_ids().await, vec!["job-7"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let snapshot = registry.snapshot("job-7").await.unwrap();
        assert_eq!(snapshot.state, JobState::Running);
        assert_eq!(snapshot.percent, Some(50.0));
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn failed_start_tracks_nothing() {
        let mut api = MockArtifactApi::new();
        api.expect_start_download()
            .returning(|_| Err(ClientError::MissingJobId));
        let registry = registry(api);
        let err = registry
            .start(DownloadRequest::new(3, ["a.zip"], "/tmp"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Start(ClientError::MissingJobId)));
        assert!(registry.job_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_then_acknowledge_removes_job() {
        let mut api = api_in_progress();
        api.expect_control()
            .withf(|_, cmd| *cmd == ControlCommand::Cancel)
            .returning(|_, _| Ok(()));
        let registry = registry(api);
        registry.track("job-7", 3, vec![]).await.unwrap();

        assert!(!registry.acknowledge("job-7").await.unwrap());
        registry.cancel("job-7").await.unwrap();
        assert_eq!(
            registry.snapshot("job-7").await.unwrap().state,
            JobState::Cancelled
        );
        assert!(registry.acknowledge("job-7").await.unwrap());
        assert!(registry.snapshot("job-7").await.is_none());
        assert!(matches!(
            registry.pause("job-7").await,
            Err(RegistryError::JobNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_completed_monitors() {
        let mut api = MockArtifactApi::new();
        api.expect_status().returning(|_| {
            Ok(StatusReport::terminal(ReportedStatus::Completed, Some("{}".into())))
        });
        let registry = registry(api);
        registry.track("job-1", 1, vec![]).await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(registry.prune_finished().await, vec!["job-1"]);
        assert!(registry.job_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_track_is_rejected() {
        let registry = registry(api_in_progress());
        registry.track("job-7", 3, vec![]).await.unwrap();
        assert!(matches!(
            registry.track("job-7", 3, vec![]).await,
            Err(RegistryError::AlreadyTracked(_))
        ));
        registry.shutdown().await;
    }
}
