//! Stores of record for scripts, runs, execution logs and visual tests
//!
//! The orchestrator only sees these traits. Two implementations ship:
//! [`MemoryStore`] for embedding and tests, [`FileStore`] for the CLI.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use vigil_core::{LogEntry, Result, Run, RunUpdate, Script, Step, TriggerSource, VisualTest};

/// Most runs returned by a history query
pub const HISTORY_LIMIT: usize = 50;

#[async_trait]
pub trait ScriptStore: Send + Sync {
    async fn get_script(&self, id: &str) -> Result<Option<Script>>;

    /// Create or replace a script
    async fn save_script(&self, script: &Script) -> Result<()>;

    /// Replace a script's steps after self-healing and mark it healed
    async fn save_healed_steps(&self, id: &str, steps: &[Step]) -> Result<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run in `running` state
    async fn create_run(
        &self,
        project_id: &str,
        script_id: &str,
        trigger_source: TriggerSource,
    ) -> Result<Run>;

    /// Apply terminal fields. Rejects backwards or repeated transitions.
    async fn update_run(&self, id: &str, update: &RunUpdate) -> Result<()>;

    async fn get_run(&self, id: &str) -> Result<Option<Run>>;

    /// Newest first, at most `limit` (capped at [`HISTORY_LIMIT`])
    async fn list_runs(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<Run>>;

    /// Remove a run and its log. Returns whether the run existed.
    async fn delete_run(&self, id: &str) -> Result<bool>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append_log(&self, entry: &LogEntry) -> Result<()>;

    /// Entries for `run_id` ordered by step index, insertion order for ties
    async fn logs_for_run(&self, run_id: &str) -> Result<Vec<LogEntry>>;
}

#[async_trait]
pub trait VisualTestStore: Send + Sync {
    async fn create_visual_test(&self, test: &VisualTest) -> Result<()>;

    async fn get_visual_test(&self, id: &str) -> Result<Option<VisualTest>>;

    /// Newest first
    async fn list_visual_tests(&self, project_id: Option<&str>) -> Result<Vec<VisualTest>>;

    async fn delete_visual_test(&self, id: &str) -> Result<bool>;
}

/// Shared newest-first ordering and limit for run history
pub(crate) fn newest_first(mut runs: Vec<Run>, project_id: Option<&str>, limit: usize) -> Vec<Run> {
    runs.retain(|run| project_id.map_or(true, |p| run.project_id == p));
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    runs.truncate(limit.min(HISTORY_LIMIT));
    runs
}

/// Stable sort by step index
pub(crate) fn by_step_index(mut entries: Vec<LogEntry>) -> Vec<LogEntry> {
    entries.sort_by_key(|entry| entry.step_index);
    entries
}
