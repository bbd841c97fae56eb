//! Run orchestrator
//!
//! Drives one script through a fresh browser session:
//!
//! 1. load the script and create a `running` run record
//! 2. open a session and replay every step in order
//! 3. on a selector timeout, ask the healer for a new selector and retry once
//! 4. compare the final page against its baseline (advisory only)
//! 5. persist healed steps once, then finalize the run
//!
//! [`TestRunner::execute_test`] never returns an error: every failure mode
//! is folded into the returned [`RunOutcome`]. The session is closed on
//! every exit path, panics included.

use crate::run_log::RunLog;
use crate::store::{LogStore, RunStore, ScriptStore};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vigil_agent::{normalize_suggestion, truncate_snapshot, SelectorHealer, DEFAULT_SNAPSHOT_LIMIT};
use vigil_browser::{PageSession, SessionProvider, StepExecutor};
use vigil_core::fail_open::{fail_open, fail_open_with_retries};
use vigil_core::{
    resolve, Action, FailureKind, Run, RunStatus, RunUpdate, Script, Step, StepFailure,
    TriggerSource, VigilConfig, VigilError, END_INDEX, MAX_STEPS, PERSIST_INDEX, START_INDEX,
    VISUAL_INDEX,
};
use vigil_visual::VisualComparator;

/// Per-runner switches
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub headless: bool,
    pub visual: bool,
    pub healing: bool,
    pub snapshot_limit: usize,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            headless: true,
            visual: true,
            healing: true,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }
}

impl RunnerOptions {
    pub fn from_config(config: &VigilConfig) -> Self {
        Self {
            headless: config.browser.headless,
            visual: config.visual.enabled,
            healing: config.healing.enabled,
            snapshot_limit: config.healing.snapshot_limit,
        }
    }
}

/// Structured result of [`TestRunner::execute_test`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Absent when the run record was never created
    pub run_id: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }
}

/// The stores a runner reads and writes
#[derive(Clone)]
pub struct Stores {
    pub scripts: Arc<dyn ScriptStore>,
    pub runs: Arc<dyn RunStore>,
    pub logs: Arc<dyn LogStore>,
}

impl Stores {
    /// Use one backend for every store
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ScriptStore + RunStore + LogStore + 'static,
    {
        Self {
            scripts: store.clone(),
            runs: store.clone(),
            logs: store,
        }
    }
}

pub struct TestRunner {
    stores: Stores,
    sessions: Arc<dyn SessionProvider>,
    healer: Arc<dyn SelectorHealer>,
    comparator: Arc<VisualComparator>,
    executor: StepExecutor,
    options: RunnerOptions,
}

impl TestRunner {
    pub fn new(
        stores: Stores,
        sessions: Arc<dyn SessionProvider>,
        healer: Arc<dyn SelectorHealer>,
        comparator: Arc<VisualComparator>,
    ) -> Self {
        Self {
            stores,
            sessions,
            healer,
            comparator,
            executor: StepExecutor::default(),
            options: RunnerOptions::default(),
        }
    }

    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Execute a script once. Each call creates a new run.
    pub async fn execute_test(
        &self,
        script_id: &str,
        project_id: &str,
        trigger_source: TriggerSource,
    ) -> RunOutcome {
        let started = Instant::now();

        let script = match self.stores.scripts.get_script(script_id).await {
            Ok(Some(script)) => script,
            Ok(None) => {
                let err = VigilError::ScriptNotFound(script_id.to_string());
                error!("{}", err);
                return errored(started, err.to_string());
            }
            Err(e) => {
                error!("Failed to load script {}: {}", script_id, e);
                return errored(started, e.to_string());
            }
        };

        let run = match self
            .stores
            .runs
            .create_run(project_id, script_id, trigger_source)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                error!("Failed to create run for script {}: {}", script_id, e);
                return errored(started, e.to_string());
            }
        };

        info!(
            "Run {} started for script {} ({} steps, trigger: {})",
            run.id,
            script.display_name(),
            script.steps.len(),
            trigger_source
        );
        let log = RunLog::new(Arc::clone(&self.stores.logs), &run.id);

        if script.steps.len() > MAX_STEPS {
            let message = format!(
                "Script has {} steps; at most {} are supported",
                script.steps.len(),
                MAX_STEPS
            );
            log.fail(START_INDEX, "start", &message).await;
            return self.finish(&run, &log, started, Err(message)).await;
        }

        let session = match self.sessions.open_session(self.options.headless).await {
            Ok(session) => session,
            Err(e) => {
                let message = format!("Failed to open browser session: {}", e);
                log.fail(START_INDEX, "start", &message).await;
                return self.finish(&run, &log, started, Err(message)).await;
            }
        };

        let guarded = AssertUnwindSafe(async {
            let result = self.run_steps(session.as_ref(), &script, &log).await;
            self.finish(&run, &log, started, result).await
        })
        .catch_unwind()
        .await;

        fail_open("session::close", || session.close()).await;

        match guarded {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = format!("Run aborted by panic: {}", panic_message(&*panic));
                error!("{}", message);
                self.finish(&run, &log, started, Err(message)).await
            }
        }
    }

    /// Replay the script, then the visual check and healed-step persistence
    async fn run_steps(
        &self,
        session: &dyn PageSession,
        script: &Script,
        log: &RunLog,
    ) -> std::result::Result<(), String> {
        log.info(
            START_INDEX,
            "start",
            format!("Starting execution of {}", script.display_name()),
        )
        .await;

        // run-local copy; the store of record is written once after the loop
        let mut steps: Vec<Step> = script.steps.clone();
        let mut healed_count = 0usize;

        for position in 0..steps.len() {
            let step_index = (position + 1) as u32;
            let step = steps[position].clone();
            let action = step.command.as_str();
            let target = resolve(&step.target);
            debug!("Step {}: {} {:?} -> {:?}", step_index, action, step.target, target);

            log.info(step_index, action, describe(&step)).await;

            let failure = match self
                .executor
                .execute(session, step.command, &target, &step.value)
                .await
            {
                Ok(()) => {
                    log.pass(step_index, action, format!("Step {} passed", step_index)).await;
                    continue;
                }
                Err(failure) => failure,
            };

            if self.is_healable(step.command, &failure) {
                if let Some(new_target) = self.heal_and_retry(session, log, step_index, &step, &failure).await {
                    info!("Step {} healed: {} -> {}", step_index, step.target, new_target);
                    steps[position].target = new_target;
                    healed_count += 1;
                    log.pass(
                        step_index,
                        action,
                        format!("Step {} passed after self-healing", step_index),
                    )
                    .await;
                    continue;
                }
            }

            warn!("Step {} ({}) failed: {}", step_index, action, failure);
            log.fail(step_index, action, format!("Failed: {}", failure.message)).await;
            return Err(failure.message);
        }

        if self.options.visual {
            self.visual_check(session, script, log).await;
        }

        if healed_count > 0 {
            self.persist_healed(script, &steps, healed_count, log).await;
        }

        Ok(())
    }

    /// Timeout-class failures on element steps qualify for healing
    fn is_healable(&self, command: Action, failure: &StepFailure) -> bool {
        self.options.healing && command != Action::Open && failure.kind == FailureKind::Timeout
    }

    /// One healing round-trip and one retry. Returns the healed raw target.
    async fn heal_and_retry(
        &self,
        session: &dyn PageSession,
        log: &RunLog,
        step_index: u32,
        step: &Step,
        failure: &StepFailure,
    ) -> Option<String> {
        let action = step.command.as_str();
        log.warning(
            step_index,
            action,
            format!("Step {} timed out, attempting self-healing", step_index),
        )
        .await;

        let html = match session.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!("Could not capture page markup for healing: {}", e);
                return None;
            }
        };
        let snapshot = truncate_snapshot(&html, self.options.snapshot_limit);

        let suggestion = match self
            .healer
            .heal_selector(snapshot, &step.target, &failure.message)
            .await
        {
            Ok(Some(raw)) => normalize_suggestion(&raw)?,
            Ok(None) => {
                info!("No selector repair found for {}", step.target);
                return None;
            }
            Err(e) => {
                warn!("Healing unavailable for {}: {}", step.target, e);
                return None;
            }
        };

        log.info(
            step_index,
            action,
            format!("Self-healing suggested selector: {}", suggestion),
        )
        .await;

        let healed_target = resolve(&suggestion);
        match self
            .executor
            .execute(session, step.command, &healed_target, &step.value)
            .await
        {
            Ok(()) => Some(suggestion),
            Err(retry) => {
                warn!("Retry with healed selector {} failed: {}", suggestion, retry);
                None
            }
        }
    }

    /// Screenshot and compare; never affects the run outcome
    async fn visual_check(&self, session: &dyn PageSession, script: &Script, log: &RunLog) {
        const ACTION: &str = "visual_check";

        let compared = async {
            let screenshot = session.screenshot().await?;
            self.comparator.compare(&script.id, &screenshot).await
        }
        .await;

        match compared {
            Ok(result) if !result.has_baseline => {
                log.info(
                    VISUAL_INDEX,
                    ACTION,
                    "No baseline found; screenshot saved as latest for approval",
                )
                .await;
            }
            Ok(result) if result.diff_percentage == 0.0 => {
                log.pass(VISUAL_INDEX, ACTION, "Visual check passed: matches baseline")
                    .await;
            }
            Ok(result) => {
                warn!(
                    "Visual drift for {}: {:.2}% of pixels differ",
                    script.id, result.diff_percentage
                );
                log.warning(
                    VISUAL_INDEX,
                    ACTION,
                    format!(
                        "Visual mismatch: {:.2}% of pixels differ from baseline",
                        result.diff_percentage
                    ),
                )
                .await;
            }
            Err(e) => {
                warn!("Visual check for {} failed: {}", script.id, e);
                log.fail(VISUAL_INDEX, ACTION, format!("Visual check failed: {}", e))
                    .await;
            }
        }
    }

    /// Write healed steps back once per run
    async fn persist_healed(&self, script: &Script, steps: &[Step], healed_count: usize, log: &RunLog) {
        const ACTION: &str = "persist";

        let saved = fail_open("script_store::save_healed_steps", || {
            self.stores.scripts.save_healed_steps(&script.id, steps)
        })
        .await;

        match saved {
            Some(()) => {
                log.info(
                    PERSIST_INDEX,
                    ACTION,
                    format!("Saved {} healed selector(s) to script", healed_count),
                )
                .await;
            }
            None => {
                log.warning(
                    PERSIST_INDEX,
                    ACTION,
                    "Healed selectors could not be saved; the script is unchanged",
                )
                .await;
            }
        }
    }

    /// Terminal run update plus the end entry
    async fn finish(
        &self,
        run: &Run,
        log: &RunLog,
        started: Instant,
        result: std::result::Result<(), String>,
    ) -> RunOutcome {
        let duration_ms = elapsed_ms(started);

        let (update, outcome) = match result {
            Ok(()) => (
                RunUpdate::passed(duration_ms),
                RunOutcome {
                    status: RunStatus::Passed,
                    run_id: Some(run.id.clone()),
                    duration_ms,
                    error: None,
                },
            ),
            Err(message) => (
                RunUpdate::failed(duration_ms, message.clone()),
                RunOutcome {
                    status: RunStatus::Failed,
                    run_id: Some(run.id.clone()),
                    duration_ms,
                    error: Some(message),
                },
            ),
        };

        fail_open_with_retries("run_store::update_run", 3, Duration::from_millis(100), || {
            self.stores.runs.update_run(&run.id, &update)
        })
        .await;

        if outcome.passed() {
            log.info(END_INDEX, "end", "Test completed successfully").await;
            info!("Run {} passed in {}ms", run.id, duration_ms);
        } else {
            error!(
                "Run {} failed after {}ms: {}",
                run.id,
                duration_ms,
                outcome.error.as_deref().unwrap_or_default()
            );
        }

        if log.dropped() > 0 {
            warn!("Run {}: {} log entries could not be stored", run.id, log.dropped());
        }
        outcome
    }
}

fn describe(step: &Step) -> String {
    match step.command {
        Action::Open => format!("Executing: open {}", step.target),
        Action::Wait => format!("Executing: wait {}", step.value),
        _ => format!("Executing: {} on {}", step.command, step.target),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn errored(started: Instant, message: String) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Error,
        run_id: None,
        duration_ms: elapsed_ms(started),
        error: Some(message),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
