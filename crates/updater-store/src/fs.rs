use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use updater_domain::{HistoryEvent, UpgradeJob};

use crate::error::StoreError;
use crate::store::{EventFilter, StateStore};

/// Filesystem-backed [`StateStore`] rooted at a state directory:
///
/// ```text
/// <state_dir>/
///   jobs/latest/status.json   pretty JSON, replaced via temp + rename
///   jobs/latest/logs.txt      append-only, one line per append
///   history.jsonl             append-only JSONL audit log
/// ```
pub struct FsStore {
    state_dir: PathBuf,
}

impl FsStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        FsStore { state_dir: state_dir.into() }
    }

    fn latest_dir(&self) -> PathBuf {
        self.state_dir.join("jobs").join("latest")
    }

    fn status_path(&self) -> PathBuf {
        self.latest_dir().join("status.json")
    }

    fn logs_path(&self) -> PathBuf {
        self.latest_dir().join("logs.txt")
    }

    fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    async fn ensure_latest_dir(&self) -> Result<(), StoreError> {
        let dir = self.latest_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io { path: path.display().to_string(), source }
}

#[async_trait]
impl StateStore for FsStore {
    async fn load_job(&self) -> Result<Option<UpgradeJob>, StoreError> {
        let path = self.status_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn save_job(&self, job: &UpgradeJob) -> Result<(), StoreError> {
        self.ensure_latest_dir().await?;
        let path = self.status_path();
        let tmp = self.latest_dir().join(".status.json.tmp");

        let content = serde_json::to_string_pretty(job)?;
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_err(&tmp, e))?;
        // A rename without the preceding sync can surface an empty file
        // after a crash; readers must only ever see full records.
        file.sync_all().await.map_err(|e| io_err(&tmp, e))?;
        drop(file);
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn append_log(&self, line: &str) -> Result<(), StoreError> {
        self.ensure_latest_dir().await?;
        let path = self.logs_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn read_log(&self) -> Result<String, StoreError> {
        let path = self.logs_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn reset_log(&self) -> Result<(), StoreError> {
        self.ensure_latest_dir().await?;
        let path = self.logs_path();
        tokio::fs::write(&path, b"")
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn append_event(&self, event: &HistoryEvent) -> Result<(), StoreError> {
        let dir = &self.state_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| io_err(dir, e))?;
        let path = self.history_path();
        let line = serde_json::to_string(event)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        file.write_all(format!("{}\n", line).as_bytes())
            .await
            .map_err(|e| io_err(&path, e))
    }

    async fn list_events(
        &self,
        filter: EventFilter,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>, StoreError> {
        let path = self.history_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&path, e)),
        };

        let mut events: Vec<HistoryEvent> = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEvent>(line) {
                Ok(event) => {
                    if filter.matches(&event) {
                        events.push(event);
                    }
                }
                // Malformed lines (e.g. a torn tail write) are skipped, the
                // rest of the history stays readable.
                Err(e) => warn!(error = %e, "skipping malformed history line"),
            }
        }

        events.reverse();
        events.truncate(limit as usize);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use updater_domain::{EventStatus, EventType, JobState, UpgradeMode};

    fn store() -> (FsStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FsStore::new(dir.path()), dir)
    }

    #[tokio::test]
    async fn job_round_trip() {
        let (store, _dir) = store();
        assert!(store.load_job().await.unwrap().is_none());

        let mut job = UpgradeJob::new(UpgradeMode::Dashboard, "v1.7.0", Utc::now());
        job.set_state(JobState::Executing, Utc::now());
        store.save_job(&job).await.unwrap();

        let loaded = store.load_job().await.unwrap().unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn save_replaces_previous_record() {
        let (store, _dir) = store();
        let job_a = UpgradeJob::new(UpgradeMode::Dashboard, "v1.7.0", Utc::now());
        store.save_job(&job_a).await.unwrap();

        let mut job_b = UpgradeJob::new(UpgradeMode::Manual, "v1.8.0", Utc::now());
        job_b.job_id = "job-2".to_string();
        store.save_job(&job_b).await.unwrap();

        let loaded = store.load_job().await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "job-2");
    }

    #[tokio::test]
    async fn status_file_is_pretty_printed() {
        let (store, dir) = store();
        let job = UpgradeJob::new(UpgradeMode::Dashboard, "latest", Utc::now());
        store.save_job(&job).await.unwrap();

        let raw = std::fs::read_to_string(
            dir.path().join("jobs").join("latest").join("status.json"),
        )
        .unwrap();
        assert!(raw.contains("\n  \"jobId\""));
    }

    #[tokio::test]
    async fn log_appends_and_resets() {
        let (store, _dir) = store();
        store.append_log("first").await.unwrap();
        store.append_log("second").await.unwrap();
        assert_eq!(store.read_log().await.unwrap(), "first\nsecond\n");

        store.reset_log().await.unwrap();
        assert_eq!(store.read_log().await.unwrap(), "");
    }

    #[tokio::test]
    async fn history_appends_and_filters() {
        let (store, _dir) = store();
        store
            .append_event(&HistoryEvent::new(
                EventType::Upgrade,
                EventStatus::Started,
                "upgrade to v1.8.0",
                Utc::now(),
            ))
            .await
            .unwrap();
        store
            .append_event(&HistoryEvent::new(
                EventType::Backup,
                EventStatus::Succeeded,
                "backup done",
                Utc::now(),
            ))
            .await
            .unwrap();

        let all = store.list_events(EventFilter::default(), 100).await.unwrap();
        assert_eq!(all.len(), 2);
        // newest first
        assert_eq!(all[0].event_type, EventType::Backup);

        let upgrades = store
            .list_events(
                EventFilter { event_type: Some(EventType::Upgrade), status: None },
                100,
            )
            .await
            .unwrap();
        assert_eq!(upgrades.len(), 1);
    }

    #[tokio::test]
    async fn malformed_history_lines_are_skipped() {
        let (store, dir) = store();
        store
            .append_event(&HistoryEvent::new(
                EventType::Restore,
                EventStatus::Failed,
                "restore failed",
                Utc::now(),
            ))
            .await
            .unwrap();

        // Simulate a torn write at the tail.
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("history.jsonl"))
            .unwrap();
        writeln!(file, "{{\"truncated").unwrap();

        let events = store.list_events(EventFilter::default(), 100).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
