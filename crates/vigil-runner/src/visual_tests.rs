//! Ad-hoc visual tests
//!
//! A visual test is a bare URL: open it, take a full-page screenshot and
//! compare under its own artifact id (`visual-<id>`).

use crate::store::VisualTestStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{info, warn};
use vigil_browser::{PageSession, SessionProvider, StepExecutor};
use vigil_core::fail_open::fail_open;
use vigil_core::{Action, Result, VigilError, VisualTest};
use vigil_visual::{ArtifactPaths, ComparisonResult, VisualComparator};

pub struct VisualTestService {
    tests: Arc<dyn VisualTestStore>,
    sessions: Arc<dyn SessionProvider>,
    comparator: Arc<VisualComparator>,
    executor: StepExecutor,
    headless: bool,
}

impl VisualTestService {
    pub fn new(
        tests: Arc<dyn VisualTestStore>,
        sessions: Arc<dyn SessionProvider>,
        comparator: Arc<VisualComparator>,
    ) -> Self {
        Self {
            tests,
            sessions,
            comparator,
            executor: StepExecutor::default(),
            headless: true,
        }
    }

    pub fn with_executor(mut self, executor: StepExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub async fn create(&self, project_id: &str, name: &str, target_url: &str) -> Result<VisualTest> {
        if target_url.trim().is_empty() {
            return Err(VigilError::InvalidScript("A visual test needs a target URL".to_string()));
        }
        let test = VisualTest::new(project_id, name, target_url);
        self.tests.create_visual_test(&test).await?;
        info!("Created visual test {} for {}", test.id, test.target_url);
        Ok(test)
    }

    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<VisualTest>> {
        self.tests.list_visual_tests(project_id).await
    }

    async fn get(&self, id: &str) -> Result<VisualTest> {
        self.tests
            .get_visual_test(id)
            .await?
            .ok_or_else(|| VigilError::VisualTestNotFound(id.to_string()))
    }

    /// Screenshot the test's URL and compare it with the approved baseline
    pub async fn run(&self, id: &str) -> Result<ComparisonResult> {
        let test = self.get(id).await?;
        info!("Running visual test {} against {}", test.id, test.target_url);

        let session = self.sessions.open_session(self.headless).await?;
        let captured = AssertUnwindSafe(self.capture(session.as_ref(), &test.target_url))
            .catch_unwind()
            .await;
        fail_open("session::close", || session.close()).await;

        let screenshot = captured
            .map_err(|_| VigilError::Browser("Screenshot capture panicked".to_string()))??;
        self.comparator.compare(&test.artifact_id(), &screenshot).await
    }

    async fn capture(&self, session: &dyn PageSession, url: &str) -> Result<Vec<u8>> {
        self.executor.execute(session, Action::Open, url, "").await?;
        session.screenshot().await
    }

    /// Promote the latest screenshot to baseline
    pub async fn approve(&self, id: &str) -> Result<()> {
        let test = self.get(id).await?;
        self.comparator.approve(&test.artifact_id()).await
    }

    pub async fn images(&self, id: &str) -> Result<Option<ArtifactPaths>> {
        let test = self.get(id).await?;
        Ok(self.comparator.locate(&test.artifact_id()))
    }

    /// Remove the test and its artifacts
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let Some(test) = self.tests.get_visual_test(id).await? else {
            return Ok(false);
        };
        if let Err(e) = self.comparator.purge(&test.artifact_id()).await {
            warn!("Could not remove artifacts for visual test {}: {}", id, e);
        }
        self.tests.delete_visual_test(id).await
    }
}
