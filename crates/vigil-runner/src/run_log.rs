//! Execution log writer for a single run
//!
//! Every append is fail-open: a store error is reported through `tracing`
//! and counted, and never changes the run's outcome.

use crate::store::LogStore;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;
use vigil_core::fail_open::fail_open;
use vigil_core::{LogEntry, LogStatus};

pub struct RunLog {
    store: Arc<dyn LogStore>,
    run_id: String,
    last_index: AtomicU32,
    dropped: AtomicUsize,
}

impl RunLog {
    pub fn new(store: Arc<dyn LogStore>, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            last_index: AtomicU32::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Entries the store refused
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append one entry. Returns whether the store accepted it.
    pub async fn record(&self, step_index: u32, action: &str, status: LogStatus, message: impl Into<String>) -> bool {
        let previous = self.last_index.fetch_max(step_index, Ordering::Relaxed);
        if step_index < previous {
            warn!(
                "Run {} log index went backwards ({} after {})",
                self.run_id, step_index, previous
            );
        }

        let entry = LogEntry::new(&self.run_id, step_index, action, status, message);
        let accepted = fail_open("run_log::append", || self.store.append_log(&entry))
            .await
            .is_some();
        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }

    pub async fn info(&self, step_index: u32, action: &str, message: impl Into<String>) -> bool {
        self.record(step_index, action, LogStatus::Info, message).await
    }

    pub async fn pass(&self, step_index: u32, action: &str, message: impl Into<String>) -> bool {
        self.record(step_index, action, LogStatus::Pass, message).await
    }

    pub async fn warning(&self, step_index: u32, action: &str, message: impl Into<String>) -> bool {
        self.record(step_index, action, LogStatus::Warning, message).await
    }

    pub async fn fail(&self, step_index: u32, action: &str, message: impl Into<String>) -> bool {
        self.record(step_index, action, LogStatus::Fail, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use vigil_core::{Result, VigilError};

    struct BrokenLogStore;

    #[async_trait]
    impl LogStore for BrokenLogStore {
        async fn append_log(&self, _entry: &LogEntry) -> Result<()> {
            Err(VigilError::Persistence("disk full".to_string()))
        }

        async fn logs_for_run(&self, _run_id: &str) -> Result<Vec<LogEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_records_entries() {
        let store = Arc::new(MemoryStore::new());
        let log = RunLog::new(store.clone(), "r1");

        assert!(log.info(0, "start", "Starting").await);
        assert!(log.pass(1, "click", "Step 1 passed").await);

        let entries = store.logs_for_run("r1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].status, LogStatus::Pass);
        assert_eq!(log.dropped(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let log = RunLog::new(Arc::new(BrokenLogStore), "r1");
        assert!(!log.fail(1, "click", "boom").await);
        assert!(!log.info(1000, "end", "done").await);
        assert_eq!(log.dropped(), 2);
    }
}
