//! Core type definitions for vigil test execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log index reserved for the start-of-run entry
pub const START_INDEX: u32 = 0;
/// Log index reserved for the visual-check phase
pub const VISUAL_INDEX: u32 = 998;
/// Log index reserved for the healed-script persistence phase
pub const PERSIST_INDEX: u32 = 999;
/// Log index reserved for the end-of-run entry
pub const END_INDEX: u32 = 1000;
/// Largest script that keeps ordinary step indices below the sentinels
pub const MAX_STEPS: usize = (VISUAL_INDEX - 1) as usize;

/// A recorded user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Navigate to the target URL
    Open,
    /// Click the target element
    Click,
    /// Set the target element's text value
    Type,
    /// Pause for `value` milliseconds
    Wait,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Click => "click",
            Self::Type => "type",
            Self::Wait => "wait",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "click" => Ok(Self::Click),
            "type" => Ok(Self::Type),
            "wait" | "pause" => Ok(Self::Wait),
            _ => Err(format!("Invalid action: {}", s)),
        }
    }
}

/// One recorded step of a script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub command: Action,
    /// Prefixed selector descriptor (`css=`, `id=`, `xpath=`) or a URL for `open`
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub value: String,
}

impl Step {
    pub fn new(command: Action, target: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            command,
            target: target.into(),
            value: value.into(),
        }
    }

    pub fn open(url: impl Into<String>) -> Self {
        Self::new(Action::Open, url, "")
    }

    pub fn click(target: impl Into<String>) -> Self {
        Self::new(Action::Click, target, "")
    }

    pub fn type_text(target: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(Action::Type, target, value)
    }

    pub fn wait(millis: impl Into<String>) -> Self {
        Self::new(Action::Wait, "", millis)
    }
}

/// A recorded script owned by a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Set once any step has been rewritten by self-healing
    #[serde(default)]
    pub healed: bool,
}

impl Script {
    pub fn new(id: impl Into<String>, project_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            steps: Vec::new(),
            healed: false,
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps = steps;
        self
    }

    /// Display name, falling back to the id for unnamed scripts
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Run status, strictly forward-moving
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Error)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

/// Origin of a run invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    #[default]
    Manual,
    Scheduler,
    Ci,
    Webhook,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Scheduler => write!(f, "scheduler"),
            Self::Ci => write!(f, "ci"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

impl std::str::FromStr for TriggerSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "scheduler" | "schedule" => Ok(Self::Scheduler),
            "ci" => Ok(Self::Ci),
            "webhook" => Ok(Self::Webhook),
            _ => Err(format!("Invalid trigger source: {}", s)),
        }
    }
}

/// One execution attempt of a script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub script_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub trigger_source: TriggerSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Run {
    /// Create a freshly started run record
    pub fn start(project_id: impl Into<String>, script_id: impl Into<String>, trigger_source: TriggerSource) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            script_id: script_id.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            trigger_source,
            error_message: None,
        }
    }
}

/// Terminal fields written once when a run completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunUpdate {
    pub status: RunStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RunUpdate {
    pub fn passed(duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Passed,
            completed_at: Utc::now(),
            duration_ms,
            error_message: None,
        }
    }

    pub fn failed(duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            completed_at: Utc::now(),
            duration_ms,
            error_message: Some(error.into()),
        }
    }

    /// Apply the terminal fields to a run record
    pub fn apply_to(&self, run: &mut Run) {
        run.status = self.status;
        run.completed_at = Some(self.completed_at);
        run.duration_ms = Some(self.duration_ms);
        run.error_message = self.error_message.clone();
    }
}

/// Outcome of a single log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pass,
    Fail,
    Info,
    Warning,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// Append-only execution log row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub run_id: String,
    pub step_index: u32,
    pub action: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        run_id: impl Into<String>,
        step_index: u32,
        action: impl Into<String>,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_index,
            action: action.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Kind of visual artifact stored per id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Baseline,
    Latest,
    Diff,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [Self::Baseline, Self::Latest, Self::Diff];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Latest => "latest",
            Self::Diff => "diff",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "latest" => Ok(Self::Latest),
            "diff" => Ok(Self::Diff),
            _ => Err(format!("Invalid artifact kind: {}", s)),
        }
    }
}

/// An ad-hoc visual test: a URL screenshotted and compared under its own id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualTest {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub target_url: String,
    pub created_at: DateTime<Utc>,
}

impl VisualTest {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            target_url: target_url.into(),
            created_at: Utc::now(),
        }
    }

    /// Artifact id used for this test's baseline/latest/diff images
    pub fn artifact_id(&self) -> String {
        format!("visual-{}", self.id)
    }
}
