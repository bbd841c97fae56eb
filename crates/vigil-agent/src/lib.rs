//! # vigil-agent
//!
//! Anthropic API client and selector healing for vigil.
//!
//! When a step times out because its selector no longer matches, the run
//! orchestrator asks a [`SelectorHealer`] for a replacement. The default
//! healer sends the page markup (truncated), the stale selector and the
//! failure text to the Anthropic Messages API.
//!
//! - Single-turn, stateless requests
//! - Circuit breaker shared across the process
//! - Missing credentials surface as `HealingUnavailable`, never as a panic

mod auth;
mod circuit_breaker;
mod client;
mod healer;
mod types;

pub use auth::{credentials_from_env, has_credentials, Credentials, API_KEY_VAR, BASE_URL_VAR};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{circuit_breaker, AgentClient};
pub use healer::{
    normalize_suggestion, truncate_snapshot, AgentHealer, DisabledHealer, SelectorHealer,
    DEFAULT_SNAPSHOT_LIMIT,
};
pub use types::*;
