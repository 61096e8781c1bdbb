use async_trait::async_trait;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::models::{DownloadRequest, StartedJob, StatusReport};

/// Errors talking to the artifact download server.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("Invalid server response format: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Invalid response from API")]
    MissingJobId,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
}

/// Commands the server accepts for a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Cancel,
}

impl ControlCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
        }
    }
}

/// Everything a monitor needs from the server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactApi: Send + Sync {
    async fn start_download(&self, request: &DownloadRequest) -> Result<StartedJob, ClientError>;

    async fn status(&self, job_id: &str) -> Result<StatusReport, ClientError>;

    async fn control(&self, job_id: &str, command: ControlCommand) -> Result<(), ClientError>;

    /// Cheap request used to decide whether the server is reachable at all.
    async fn health(&self) -> Result<(), ClientError>;
}

/// `ArtifactApi` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpArtifactClient {
    client: Client,
    base_url: String,
}

impl HttpArtifactClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(concat!("artifact-monitor/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/artifacts/{}", self.base_url, path)
    }
}

#[async_trait]
impl ArtifactApi for HttpArtifactClient {
    async fn start_download(&self, request: &DownloadRequest) -> Result<StartedJob, ClientError> {
        if request.artifact_paths.is_empty() {
            return Err(ClientError::InvalidRequest(
                "Please specify at least one artifact path",
            ));
        }
        if request.download_path.is_empty() {
            return Err(ClientError::InvalidRequest("Download path not set"));
        }

        let resp = self.client.post(self.url("download")).json(request).send().await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        decode_started(&body)
    }

    async fn status(&self, job_id: &str) -> Result<StatusReport, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("status/{job_id}")))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        decode_status(&body)
    }

    async fn control(&self, job_id: &str, command: ControlCommand) -> Result<(), ClientError> {
        debug!(job_id, command = command.as_str(), "sending control command");
        let resp = self
            .client
            .post(self.url(&format!("{}/{job_id}", command.as_str())))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        Ok(())
    }

    async fn health(&self) -> Result<(), ClientError> {
        let resp = self
            .client
            .get(format!("{}/settings", self.base_url))
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        Ok(())
    }
}

/// Parses a body that is either a JSON value or a JSON string holding one.
fn unwrap_json(body: &str) -> Result<Value, ClientError> {
    let body = body.trim();
    if body.len() >= 2 && body.starts_with('"') && body.ends_with('"') {
        let inner: String = serde_json::from_str(body)?;
        Ok(serde_json::from_str(&inner)?)
    } else {
        Ok(serde_json::from_str(body)?)
    }
}

/// Decodes a status response, unwrapping one level of string encoding.
pub fn decode_status(body: &str) -> Result<StatusReport, ClientError> {
    Ok(serde_json::from_value(unwrap_json(body)?)?)
}

/// Extracts the job id from a start response. The id may sit at the top
/// level or be nested under `data` or `status`.
pub fn decode_started(body: &str) -> Result<StartedJob, ClientError> {
    let value = unwrap_json(body)?;
    let job_id = [
        value.get("job_id"),
        value.pointer("/data/job_id"),
        value.pointer("/status/job_id"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::trim)
    .filter(|id| !id.is_empty())
    .ok_or(ClientError::MissingJobId)?;

    let warning = match value.get("status").and_then(Value::as_str) {
        Some("partial_failure") => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };

    Ok(StartedJob {
        job_id: job_id.to_string(),
        warning,
    })
}
