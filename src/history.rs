// src/history.rs

use crate::models::JobState;
use crate::summary::CompletionSummary;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One finished download as shown in the history list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub pipeline_id: u64,
    pub job_id: String,
    pub status: JobState,
    /// Artifacts that actually arrived.
    pub artifacts: Vec<String>,
    pub size: u64,
    pub downloaded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Builds an entry from the final summary. Structured file lists win;
    /// without them a completed job is assumed to have fetched everything
    /// it asked for and any other outcome records nothing.
    pub fn from_summary(
        pipeline_id: u64,
        job_id: impl Into<String>,
        state: JobState,
        requested: &[String],
        summary: &CompletionSummary,
    ) -> Self {
        let artifacts = if !summary.downloaded_files.is_empty() {
            summary.downloaded_files.iter().map(|f| f.name.clone()).collect()
        } else if state == JobState::Completed && summary.is_success() {
            requested.to_vec()
        } else {
            Vec::new()
        };
        Self {
            pipeline_id,
            job_id: job_id.into(),
            status: state,
            artifacts,
            size: summary.total_size,
            downloaded_at: Utc::now(),
        }
    }
}

/// Persists finished downloads to an SQLite database, newest first.
pub struct HistoryStore {
    conn: Connection,
    limit: usize,
}

impl HistoryStore {
    /// Opens (or creates) the history database, keeping at most `limit` entries.
    pub async fn open(db_path: &Path, limit: usize) -> Result<Self, HistoryError> {
        let conn = Connection::open(db_path).await?;
        let store = Self { conn, limit };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), HistoryError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS download_history (
                        id              INTEGER PRIMARY KEY AUTOINCREMENT,
                        entry_data      TEXT NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Records an entry and trims the table to the configured limit.
    pub async fn record(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let entry_data = serde_json::to_string(entry)?;
        let limit = i64::try_from(self.limit).unwrap_or(i64::MAX);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO download_history (entry_data) VALUES (?1)",
                    params![entry_data],
                )?;
                conn.execute(
                    "DELETE FROM download_history WHERE id NOT IN (
                        SELECT id FROM download_history ORDER BY id DESC LIMIT ?1
                    )",
                    params![limit],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Loads all entries, most recent first.
    pub async fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT entry_data FROM download_history ORDER BY id DESC")?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(HistoryError::from))
            .collect()
    }

    pub async fn clear(&self) -> Result<(), HistoryError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM download_history", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportedStatus;
    use crate::summary::DownloadedFile;
    use tempfile::tempdir;

    fn entry(job: &str) -> HistoryEntry {
        HistoryEntry {
            pipeline_id: 1,
            job_id: job.to_string(),
            status: JobState::Completed,
            artifacts: vec!["a.zip".into()],
            size: 10,
            downloaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_newest_first_and_trims() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::open(&dir.path().join("history.db"), 2).await.unwrap();
        for job in ["j1", "j2", "j3"] {
            store.record(&entry(job)).await.unwrap();
        }
        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|e| e.job_id).collect();
        assert_eq!(ids, vec!["j3", "j2"]);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = HistoryStore::open(&path, 100).await.unwrap();
            store.record(&entry("kept")).await.unwrap();
        }
        let store = HistoryStore::open(&path, 100).await.unwrap();
        assert_eq!(store.list().await.unwrap()[0].job_id, "kept");
    }

    #[test]
    fn entry_prefers_structured_file_list() {
        let summary = CompletionSummary {
            total_files: 2,
            downloaded_files: vec![DownloadedFile { name: "a.zip".into(), size: 5 }],
            missing_files: vec!["b.zip".into()],
            total_size: 5,
            status: ReportedStatus::PartialSuccess,
        };
        let requested = vec!["a.zip".to_string(), "b.zip".to_string()];
        let entry = HistoryEntry::from_summary(9, "j", JobState::Completed, &requested, &summary);
        assert_eq!(entry.artifacts, vec!["a.zip"]);
        assert_eq!(entry.size, 5);
    }

    #[test]
    fn failed_entry_without_file_list_records_nothing() {
        let summary = CompletionSummary::failed("Download failed: boom a.zip");
        let requested = vec!["a.zip".to_string()];
        let entry = HistoryEntry::from_summary(9, "j", JobState::Failed, &requested, &summary);
        assert!(entry.artifacts.is_empty());
    }
}
