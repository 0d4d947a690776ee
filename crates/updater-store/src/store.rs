use async_trait::async_trait;
use updater_domain::{EventStatus, EventType, HistoryEvent, UpgradeJob};

use crate::error::StoreError;

/// Filter for history reads. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter {
    pub event_type: Option<EventType>,
    pub status: Option<EventStatus>,
}

impl EventFilter {
    pub fn matches(&self, event: &HistoryEvent) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self.status.map_or(true, |s| event.status == s)
    }
}

/// Persistence for the latest job record, its log, and the audit history.
///
/// The job record is written by exactly one orchestration task at a time and
/// read concurrently by API handlers; implementations must guarantee readers
/// see either the previous or the next record, never a torn one. The log and
/// history are append-only.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    async fn load_job(&self) -> Result<Option<UpgradeJob>, StoreError>;

    /// Atomically replace the latest job record.
    async fn save_job(&self, job: &UpgradeJob) -> Result<(), StoreError>;

    /// Append one line to the latest job's log.
    async fn append_log(&self, line: &str) -> Result<(), StoreError>;

    async fn read_log(&self) -> Result<String, StoreError>;

    /// Start a fresh log for a new job.
    async fn reset_log(&self) -> Result<(), StoreError>;

    async fn append_event(&self, event: &HistoryEvent) -> Result<(), StoreError>;

    /// Newest-first history events matching `filter`, at most `limit`.
    async fn list_events(
        &self,
        filter: EventFilter,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>, StoreError>;
}
