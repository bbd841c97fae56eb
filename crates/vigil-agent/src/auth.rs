//! Credentials for the Anthropic API
//!
//! `ANTHROPIC_API_KEY` is required. `ANTHROPIC_BASE_URL` optionally points
//! requests at a proxy or gateway.

use std::env;
use vigil_core::{Result, VigilError};

pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const BASE_URL_VAR: &str = "ANTHROPIC_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Resolved API endpoint and key
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
}

impl Credentials {
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Read credentials from the environment
pub fn credentials_from_env() -> Result<Credentials> {
    let api_key = env::var(API_KEY_VAR)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            VigilError::Auth(format!(
                "No API key found. Set {}=sk-ant-... to enable selector healing",
                API_KEY_VAR
            ))
        })?;

    let base_url = env::var(BASE_URL_VAR)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    tracing::debug!("Using Anthropic endpoint {}", base_url);
    Ok(Credentials { api_key, base_url })
}

/// Whether credentials are configured, without logging or failing
pub fn has_credentials() -> bool {
    env::var(API_KEY_VAR).map(|key| !key.trim().is_empty()).unwrap_or(false)
}
