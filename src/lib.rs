//! Client-side tracking and control of server-executed artifact downloads.
//!
//! The server runs the transfer; this crate polls its status endpoint, turns
//! the answers into a per-job state machine with retry, stall detection and
//! throughput estimates, and forwards pause/resume/cancel commands.

pub mod client;
pub mod config;
pub mod control;
pub mod events;
pub mod health;
pub mod history;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod retry;
pub mod sampler;
pub mod summary;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::client::{ArtifactApi, ClientError, ControlCommand, HttpArtifactClient};
    pub use crate::config::Settings;
    pub use crate::events::{EventStream, JobSnapshot, MonitorEvent};
    pub use crate::health::{HealthChecker, HealthSignal};
    pub use crate::history::{HistoryEntry, HistoryStore};
    pub use crate::models::{ControlState, DownloadRequest, Job, JobState, ReportedStatus};
    pub use crate::monitor::{JobMonitor, MonitorConfig};
    pub use crate::registry::{MonitorRegistry, RegistryError};
    pub use crate::summary::CompletionSummary;
}
