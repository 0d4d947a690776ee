use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use updater_domain::{HistoryEvent, UpgradeJob};

use crate::error::StoreError;
use crate::store::{EventFilter, StateStore};

#[derive(Debug, Default)]
struct Inner {
    job: Option<UpgradeJob>,
    log: String,
    events: Vec<HistoryEvent>,
}

/// In-memory implementation of [`StateStore`].
///
/// All data is lost on process exit. Suitable for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load_job(&self) -> Result<Option<UpgradeJob>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.job.clone())
    }

    async fn save_job(&self, job: &UpgradeJob) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.job = Some(job.clone());
        Ok(())
    }

    async fn append_log(&self, line: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.log.push_str(line);
        guard.log.push('\n');
        Ok(())
    }

    async fn read_log(&self) -> Result<String, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.log.clone())
    }

    async fn reset_log(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.log.clear();
        Ok(())
    }

    async fn append_event(&self, event: &HistoryEvent) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.events.push(event.clone());
        Ok(())
    }

    async fn list_events(
        &self,
        filter: EventFilter,
        limit: u32,
    ) -> Result<Vec<HistoryEvent>, StoreError> {
        let guard = self.inner.read().await;
        let mut events: Vec<HistoryEvent> = guard
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        events.reverse();
        events.truncate(limit as usize);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use updater_domain::{EventStatus, EventType, UpgradeMode};

    #[tokio::test]
    async fn job_save_and_load() {
        let store = InMemoryStore::new();
        let job = UpgradeJob::new(UpgradeMode::Manual, "v1.9.0", Utc::now());
        store.save_job(&job).await.unwrap();
        assert_eq!(store.load_job().await.unwrap().unwrap().job_id, job.job_id);
    }

    #[tokio::test]
    async fn events_newest_first_with_limit() {
        let store = InMemoryStore::new();
        for n in 0..5 {
            store
                .append_event(&HistoryEvent::new(
                    EventType::Upgrade,
                    EventStatus::Started,
                    format!("event {}", n),
                    Utc::now(),
                ))
                .await
                .unwrap();
        }
        let events = store.list_events(EventFilter::default(), 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "event 4");
    }
}
