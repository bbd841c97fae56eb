//! # vigil-runner
//!
//! Run orchestration for vigil.
//!
//! [`TestRunner`] replays a stored script in an isolated browser session,
//! repairs stale selectors through a [`vigil_agent::SelectorHealer`], checks
//! the final page against its visual baseline and records an append-only
//! execution log for every run.
//!
//! ## Log indices
//!
//! | Index | Entry |
//! |-------|-------|
//! | 0 | run start |
//! | 1..=997 | script steps |
//! | 998 | visual check |
//! | 999 | healed-script persistence |
//! | 1000 | run end |

mod orchestrator;
mod run_log;
pub mod state_machine;
pub mod store;
mod visual_tests;

pub use orchestrator::{RunOutcome, RunnerOptions, Stores, TestRunner};
pub use run_log::RunLog;
pub use state_machine::{transition, RunEvent};
pub use store::{
    FileStore, LogStore, MemoryStore, RunStore, ScriptStore, VisualTestStore, HISTORY_LIMIT,
};
pub use visual_tests::VisualTestService;
