//! Reduction of a terminal status payload into a completion summary.
//!
//! The server appends a JSON object as the last line of the terminal
//! `message`; everything above it is human-readable text.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::ReportedStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadedFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Which artifacts arrived and which did not. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionSummary {
    pub total_files: u64,
    pub downloaded_files: Vec<DownloadedFile>,
    pub missing_files: Vec<String>,
    pub total_size: u64,
    pub status: ReportedStatus,
}

#[derive(Debug, Deserialize)]
struct DownloadInfo {
    #[serde(default)]
    total_files: u64,
    #[serde(default)]
    downloaded_files: Vec<DownloadedFile>,
    #[serde(default)]
    missing_files: Vec<String>,
    #[serde(default)]
    total_size: u64,
}

impl CompletionSummary {
    /// Builds a summary from a terminal message. Never fails: an unparsable
    /// message degrades into a failed summary that carries the raw text.
    pub fn from_message(message: Option<&str>, status: ReportedStatus) -> Self {
        let parsed = message
            .and_then(|m| m.lines().last())
            .map(|line| serde_json::from_str::<DownloadInfo>(line.trim()));

        match parsed {
            Some(Ok(info)) => Self {
                total_files: info.total_files,
                downloaded_files: info.downloaded_files,
                missing_files: info.missing_files,
                total_size: info.total_size,
                status,
            },
            other => {
                if let Some(Err(e)) = other {
                    warn!(error = %e, "could not parse download info from terminal message");
                }
                Self::failed(message.filter(|m| !m.is_empty()).unwrap_or("Unknown error"))
            }
        }
    }

    /// A summary for a job that ended without structured file information.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            total_files: 0,
            downloaded_files: Vec::new(),
            missing_files: vec![reason.into()],
            total_size: 0,
            status: ReportedStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ReportedStatus::Completed)
    }

    pub fn title(&self) -> &'static str {
        match self.status {
            ReportedStatus::Completed => "Download Complete",
            ReportedStatus::PartialSuccess => "Partial Download Complete",
            ReportedStatus::Failed => "Download Failed",
            ReportedStatus::Cancelled => "Download Cancelled",
            _ => "Download Status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = r#"{"total_files":2,"downloaded_files":[{"name":"a.zip","size":100}],"missing_files":["b.zip"],"total_size":100}"#;

    #[test]
    fn parses_trailing_json_line() {
        let message = format!("Successfully downloaded 1 of 2 files.\nMissing:\n- b.zip\n{INFO}");
        let summary = CompletionSummary::from_message(Some(&message), ReportedStatus::PartialSuccess);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.downloaded_files.len(), 1);
        assert_eq!(summary.downloaded_files[0].name, "a.zip");
        assert_eq!(summary.missing_files, vec!["b.zip"]);
        assert_eq!(summary.total_size, 100);
        assert_eq!(summary.status, ReportedStatus::PartialSuccess);
    }

    #[test]
    fn single_line_message_is_parsed() {
        let summary = CompletionSummary::from_message(Some(INFO), ReportedStatus::Completed);
        assert_eq!(summary.total_size, 100);
        assert!(summary.is_success());
    }

    #[test]
    fn missing_keys_default_to_empty() {
        let summary = CompletionSummary::from_message(Some("done\n{}"), ReportedStatus::Completed);
        assert_eq!(summary.total_files, 0);
        assert!(summary.downloaded_files.is_empty());
        assert_eq!(summary.status, ReportedStatus::Completed);
    }

    #[test]
    fn unparsable_message_degrades_to_failed() {
        let raw = "Download failed: connection reset";
        let summary = CompletionSummary::from_message(Some(raw), ReportedStatus::Completed);
        assert_eq!(summary.total_files, 0);
        assert!(summary.downloaded_files.is_empty());
        assert_eq!(summary.missing_files, vec![raw]);
        assert_eq!(summary.total_size, 0);
        assert_eq!(summary.status, ReportedStatus::Failed);
    }

    #[test]
    fn absent_message_is_unknown_error() {
        let summary = CompletionSummary::from_message(None, ReportedStatus::Failed);
        assert_eq!(summary.missing_files, vec!["Unknown error"]);
        assert_eq!(summary.status, ReportedStatus::Failed);
    }
}
