//! In-memory store

use super::{by_step_index, newest_first, LogStore, RunStore, ScriptStore, VisualTestStore};
use crate::state_machine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use vigil_core::{
    LogEntry, Result, Run, RunUpdate, Script, Step, TriggerSource, VigilError, VisualTest,
};

#[derive(Debug, Default)]
struct Tables {
    scripts: HashMap<String, Script>,
    runs: HashMap<String, Run>,
    logs: HashMap<String, Vec<LogEntry>>,
    visual_tests: HashMap<String, VisualTest>,
}

/// Process-local store implementing every store trait
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with scripts
    pub fn with_scripts(scripts: impl IntoIterator<Item = Script>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables();
            for script in scripts {
                tables.scripts.insert(script.id.clone(), script);
            }
        }
        store
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ScriptStore for MemoryStore {
    async fn get_script(&self, id: &str) -> Result<Option<Script>> {
        Ok(self.tables().scripts.get(id).cloned())
    }

    async fn save_script(&self, script: &Script) -> Result<()> {
        self.tables().scripts.insert(script.id.clone(), script.clone());
        Ok(())
    }

    async fn save_healed_steps(&self, id: &str, steps: &[Step]) -> Result<()> {
        let mut tables = self.tables();
        let script = tables
            .scripts
            .get_mut(id)
            .ok_or_else(|| VigilError::ScriptNotFound(id.to_string()))?;
        script.steps = steps.to_vec();
        script.healed = true;
        Ok(())
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(
        &self,
        project_id: &str,
        script_id: &str,
        trigger_source: TriggerSource,
    ) -> Result<Run> {
        let run = Run::start(project_id, script_id, trigger_source);
        self.tables().runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn update_run(&self, id: &str, update: &RunUpdate) -> Result<()> {
        let mut tables = self.tables();
        let run = tables
            .runs
            .get_mut(id)
            .ok_or_else(|| VigilError::RunNotFound(id.to_string()))?;
        state_machine::validate(run.status, update.status)?;
        update.apply_to(run);
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        Ok(self.tables().runs.get(id).cloned())
    }

    async fn list_runs(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        let runs = self.tables().runs.values().cloned().collect();
        Ok(newest_first(runs, project_id, limit))
    }

    async fn delete_run(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables();
        tables.logs.remove(id);
        Ok(tables.runs.remove(id).is_some())
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        self.tables()
            .logs
            .entry(entry.run_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn logs_for_run(&self, run_id: &str) -> Result<Vec<LogEntry>> {
        let entries = self.tables().logs.get(run_id).cloned().unwrap_or_default();
        Ok(by_step_index(entries))
    }
}

#[async_trait]
impl VisualTestStore for MemoryStore {
    async fn create_visual_test(&self, test: &VisualTest) -> Result<()> {
        self.tables().visual_tests.insert(test.id.clone(), test.clone());
        Ok(())
    }

    async fn get_visual_test(&self, id: &str) -> Result<Option<VisualTest>> {
        Ok(self.tables().visual_tests.get(id).cloned())
    }

    async fn list_visual_tests(&self, project_id: Option<&str>) -> Result<Vec<VisualTest>> {
        let mut tests: Vec<VisualTest> = self
            .tables()
            .visual_tests
            .values()
            .filter(|t| project_id.map_or(true, |p| t.project_id == p))
            .cloned()
            .collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tests)
    }

    async fn delete_visual_test(&self, id: &str) -> Result<bool> {
        Ok(self.tables().visual_tests.remove(id).is_some())
    }
}
