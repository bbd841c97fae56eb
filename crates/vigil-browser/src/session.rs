//! Page session abstraction
//!
//! The orchestrator drives pages only through these traits, so the
//! automation engine can be swapped (or faked in tests). Every interaction
//! failure is returned as a classified [`StepFailure`]; the failure kind is
//! part of this contract.

use async_trait::async_trait;
use std::time::Duration;
use vigil_core::{Result, StepFailure};

/// A live, isolated browser page
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate to `url`, waiting up to `timeout` for the load to finish
    async fn goto(&self, url: &str, timeout: Duration) -> std::result::Result<(), StepFailure>;

    /// Wait for `selector` and click it
    async fn click(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure>;

    /// Wait for `selector` and replace its text value.
    ///
    /// Elements that reject text assignment must fail with
    /// [`vigil_core::FailureKind::NotFillable`].
    async fn fill(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> std::result::Result<(), StepFailure>;

    /// Wait for `selector` and ensure it is checked
    async fn check(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure>;

    /// Full markup of the current page
    async fn content(&self) -> Result<String>;

    /// Full-page PNG screenshot
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Release the page and its browser
    async fn close(&self) -> Result<()>;
}

/// Opens isolated page sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open_session(&self, headless: bool) -> Result<Box<dyn PageSession>>;
}
