//! Browser sessions and step execution for vigil
//!
//! This crate drives live pages for test runs.
//!
//! # Features
//!
//! - **Session abstraction**: [`PageSession`] / [`SessionProvider`] traits with
//!   classified failures
//! - **Headless Chrome**: CDP-backed sessions via `headless_chrome`
//! - **Step execution**: per-action timeouts and the checkbox/radio fallback
//!   for `type` steps
//!
//! # Example
//!
//! ```no_run
//! use vigil_browser::{ChromeLauncher, SessionProvider, StepExecutor};
//! use vigil_core::Action;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = ChromeLauncher::default().open_session(true).await?;
//!     let executor = StepExecutor::default();
//!
//!     executor
//!         .execute(session.as_ref(), Action::Open, "https://example.com", "")
//!         .await?;
//!     executor
//!         .execute(session.as_ref(), Action::Click, "#more", "")
//!         .await?;
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Requirements
//!
//! - Chrome or Chromium installed for [`ChromeLauncher`]

pub mod chrome;
pub mod executor;
pub mod session;

pub use chrome::{ChromeLauncher, ChromeSession};
pub use executor::{parse_wait_millis, StepExecutor};
pub use session::{PageSession, SessionProvider};
