//! JSON file store
//!
//! Layout under the data directory:
//!
//! ```text
//! scripts/<id>.json        one Script document per file
//! runs.jsonl               Run snapshots, last one per id wins; compacted
//!                          on delete and once stale snapshots pile up
//! logs/<run-id>.jsonl      append-only LogEntry rows
//! visual-tests/<id>.json   one VisualTest per file
//! ```

use super::{by_step_index, newest_first, LogStore, RunStore, ScriptStore, VisualTestStore};
use crate::state_machine;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use vigil_core::{
    LogEntry, Result, Run, RunUpdate, Script, Step, TriggerSource, VigilError, VisualTest,
};

/// Superseded run snapshots tolerated before `runs.jsonl` is rewritten
const COMPACT_AFTER_STALE: usize = 64;

pub struct FileStore {
    root: PathBuf,
    // serializes read-validate-append on runs.jsonl
    runs_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_path(&self) -> PathBuf {
        self.root.join("runs.jsonl")
    }

    fn script_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join("scripts").join(format!("{}.json", file_stem(id)?)))
    }

    fn log_path(&self, run_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("logs").join(format!("{}.jsonl", file_stem(run_id)?)))
    }

    fn visual_test_dir(&self) -> PathBuf {
        self.root.join("visual-tests")
    }

    fn visual_test_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.visual_test_dir().join(format!("{}.json", file_stem(id)?)))
    }

    /// Fold run snapshots into current records, in creation order
    async fn load_runs(&self) -> Result<Vec<Run>> {
        Ok(self.load_runs_counted().await?.0)
    }

    /// [`load_runs`](Self::load_runs) plus the number of snapshots read
    async fn load_runs_counted(&self) -> Result<(Vec<Run>, usize)> {
        let snapshots: Vec<Run> = read_json_lines(&self.runs_path()).await?;
        let count = snapshots.len();
        let mut order = Vec::new();
        let mut latest: HashMap<String, Run> = HashMap::new();
        for run in snapshots {
            if !latest.contains_key(&run.id) {
                order.push(run.id.clone());
            }
            latest.insert(run.id.clone(), run);
        }
        let runs = order.into_iter().filter_map(|id| latest.remove(&id)).collect();
        Ok((runs, count))
    }

    /// Rewrite `runs.jsonl` with one snapshot per run
    async fn compact_runs(&self, runs: &[Run]) -> Result<()> {
        let mut content = String::new();
        for run in runs {
            content.push_str(&serde_json::to_string(run)?);
            content.push('\n');
        }
        write_atomic(&self.runs_path(), content.into_bytes()).await
    }
}

/// Reject ids that would escape their directory
fn file_stem(id: &str) -> Result<&str> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(VigilError::Persistence(format!("Invalid record id: {:?}", id)));
    }
    Ok(id)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, serde_json::to_vec_pretty(value)?).await
}

/// Write through a uniquely named sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&dir).await?;

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&path).map_err(|e| VigilError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| VigilError::Persistence(format!("Write task failed: {}", e)))?
}

async fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Read JSON lines, skipping (and logging) malformed ones
async fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping malformed line {} in {:?}: {}", number + 1, path, e),
        }
    }
    Ok(records)
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ScriptStore for FileStore {
    async fn get_script(&self, id: &str) -> Result<Option<Script>> {
        read_json(&self.script_path(id)?).await
    }

    async fn save_script(&self, script: &Script) -> Result<()> {
        write_json(&self.script_path(&script.id)?, script).await?;
        debug!("Saved script {}", script.id);
        Ok(())
    }

    async fn save_healed_steps(&self, id: &str, steps: &[Step]) -> Result<()> {
        let path = self.script_path(id)?;
        let mut script: Script = read_json(&path)
            .await?
            .ok_or_else(|| VigilError::ScriptNotFound(id.to_string()))?;
        script.steps = steps.to_vec();
        script.healed = true;
        write_json(&path, &script).await
    }
}

#[async_trait]
impl RunStore for FileStore {
    async fn create_run(
        &self,
        project_id: &str,
        script_id: &str,
        trigger_source: TriggerSource,
    ) -> Result<Run> {
        let run = Run::start(project_id, script_id, trigger_source);
        let _guard = self.runs_lock.lock().await;
        append_json_line(&self.runs_path(), &run).await?;
        Ok(run)
    }

    async fn update_run(&self, id: &str, update: &RunUpdate) -> Result<()> {
        let _guard = self.runs_lock.lock().await;
        let (mut runs, snapshots) = self.load_runs_counted().await?;
        let stale = snapshots.saturating_sub(runs.len());
        let run = runs
            .iter_mut()
            .find(|run| run.id == id)
            .ok_or_else(|| VigilError::RunNotFound(id.to_string()))?;

        state_machine::validate(run.status, update.status)?;
        update.apply_to(run);

        if stale >= COMPACT_AFTER_STALE {
            debug!("Compacting {} run snapshots", snapshots + 1);
            self.compact_runs(&runs).await
        } else {
            append_json_line(&self.runs_path(), &*run).await
        }
    }

    async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        Ok(self.load_runs().await?.into_iter().find(|run| run.id == id))
    }

    async fn list_runs(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<Run>> {
        Ok(newest_first(self.load_runs().await?, project_id, limit))
    }

    async fn delete_run(&self, id: &str) -> Result<bool> {
        let _guard = self.runs_lock.lock().await;
        let runs = self.load_runs().await?;
        let before = runs.len();
        let kept: Vec<Run> = runs.into_iter().filter(|run| run.id != id).collect();
        if kept.len() == before {
            return Ok(false);
        }

        self.compact_runs(&kept).await?;
        remove_if_exists(&self.log_path(id)?).await?;
        Ok(true)
    }
}

#[async_trait]
impl LogStore for FileStore {
    async fn append_log(&self, entry: &LogEntry) -> Result<()> {
        append_json_line(&self.log_path(&entry.run_id)?, entry).await
    }

    async fn logs_for_run(&self, run_id: &str) -> Result<Vec<LogEntry>> {
        let entries = read_json_lines(&self.log_path(run_id)?).await?;
        Ok(by_step_index(entries))
    }
}

#[async_trait]
impl VisualTestStore for FileStore {
    async fn create_visual_test(&self, test: &VisualTest) -> Result<()> {
        write_json(&self.visual_test_path(&test.id)?, test).await
    }

    async fn get_visual_test(&self, id: &str) -> Result<Option<VisualTest>> {
        read_json(&self.visual_test_path(id)?).await
    }

    async fn list_visual_tests(&self, project_id: Option<&str>) -> Result<Vec<VisualTest>> {
        let dir = self.visual_test_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<VisualTest>(&path).await {
                Ok(Some(test)) if project_id.map_or(true, |p| test.project_id == p) => tests.push(test),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable visual test {:?}: {}", path, e),
            }
        }
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tests)
    }

    async fn delete_visual_test(&self, id: &str) -> Result<bool> {
        remove_if_exists(&self.visual_test_path(id)?).await
    }
}
