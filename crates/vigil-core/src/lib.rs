//! # vigil-core
//!
//! Core types for the vigil UI test execution engine.
//!
//! vigil replays recorded browser scripts against a live page, repairs
//! stale element selectors through an external reasoning service, and
//! compares the final page against an approved baseline screenshot.
//!
//! ## Core Paradigm
//!
//! - A Script is an ordered list of Steps (command + target + value)
//! - A Run is one execution attempt with a forward-only status
//! - Every Run produces an append-only execution log
//! - Visual regression is advisory: drift is reported, never fatal

pub mod config;
mod error;
pub mod fail_open;
pub mod selector;
mod types;

pub use config::VigilConfig;
pub use error::{FailureKind, Result, StepFailure, VigilError};
pub use selector::resolve;
pub use types::*;
