//! Step execution against a live page session
//!
//! One exhaustive match over [`Action`] dispatches each step with its own
//! ceiling. Failures are never swallowed here; they propagate to the
//! orchestrator for logging and healing evaluation.

use crate::session::PageSession;
use std::time::Duration;
use tracing::{debug, info};
use vigil_core::config::TimeoutSettings;
use vigil_core::{Action, FailureKind, StepFailure};

/// Executes interpreted steps with per-action timeouts
#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    timeouts: TimeoutSettings,
}

impl StepExecutor {
    pub fn new(timeouts: TimeoutSettings) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> &TimeoutSettings {
        &self.timeouts
    }

    /// Execute one action against `session`.
    ///
    /// `target` must already be resolved. For `open` it is the URL.
    pub async fn execute(
        &self,
        session: &dyn PageSession,
        command: Action,
        target: &str,
        value: &str,
    ) -> Result<(), StepFailure> {
        debug!("Executing {} on {:?}", command, target);

        match command {
            Action::Open => {
                if target.is_empty() {
                    return Err(StepFailure::protocol("open requires a target URL"));
                }
                session.goto(target, self.timeouts.open()).await
            }
            Action::Click => {
                Self::require_selector(command, target)?;
                session.click(target, self.timeouts.click()).await
            }
            Action::Type => {
                Self::require_selector(command, target)?;
                self.type_text(session, target, value).await
            }
            Action::Wait => {
                let millis = parse_wait_millis(value, self.timeouts.default_wait_ms);
                debug!("Waiting {}ms", millis);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(())
            }
        }
    }

    /// Fill, falling back to check/click for elements that reject text
    async fn type_text(&self, session: &dyn PageSession, target: &str, value: &str) -> Result<(), StepFailure> {
        let timeout = self.timeouts.type_text();

        match session.fill(target, value, timeout).await {
            Err(failure) if failure.kind == FailureKind::NotFillable => {
                info!("Input {} cannot be filled, attempting check/click", target);
                if wants_checked(value) {
                    session.check(target, timeout).await
                } else {
                    session.click(target, timeout).await
                }
            }
            other => other,
        }
    }

    fn require_selector(command: Action, target: &str) -> Result<(), StepFailure> {
        if target.is_empty() {
            return Err(StepFailure::not_found(format!(
                "{} requires a selector but the target resolved to nothing",
                command
            )));
        }
        Ok(())
    }
}

/// Whether a `type` value on a toggle means "make it checked"
fn wants_checked(value: &str) -> bool {
    value == "on" || value == "true"
}

/// Leading-integer parse of a wait value; zero or unparseable uses the default
pub fn parse_wait_millis(value: &str, default_ms: u64) -> u64 {
    let trimmed = value.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let leading: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    match leading.parse::<u64>() {
        Ok(0) | Err(_) => default_ms,
        Ok(_) if negative => 0,
        Ok(millis) => millis,
    }
}
