//! Selector healing
//!
//! When a selector stops matching, the page markup, the stale selector and
//! the failure message go to a reasoning service that proposes a
//! replacement. `None` means no confident repair was found.

use crate::auth;
use crate::client::AgentClient;
use crate::types::Model;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use vigil_core::config::HealingSettings;
use vigil_core::{Result, VigilError};

/// Markup characters submitted with a healing request
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 15_000;

const SYSTEM_PROMPT: &str = "You repair broken element selectors for browser UI tests. \
Reply with exactly one selector and nothing else. Prefer stable attributes \
(id, name, data-testid, aria-label, type) over positional selectors. \
If no element in the markup plausibly matches the original intent, reply with null.";

/// Proposes a replacement for a selector that no longer matches
#[async_trait]
pub trait SelectorHealer: Send + Sync {
    async fn heal_selector(
        &self,
        html: &str,
        old_selector: &str,
        error_message: &str,
    ) -> Result<Option<String>>;
}

/// Keep at most `limit` characters of `html`, on a char boundary
pub fn truncate_snapshot(html: &str, limit: usize) -> &str {
    match html.char_indices().nth(limit) {
        Some((byte_idx, _)) => &html[..byte_idx],
        None => html,
    }
}

fn code_fence() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").ok())
        .as_ref()
}

/// Reduce a free-text reply to a bare selector
pub fn normalize_suggestion(raw: &str) -> Option<String> {
    let mut text = raw.trim();

    if let Some(caps) = code_fence().and_then(|fence| fence.captures(text)) {
        text = caps.get(1).map_or("", |m| m.as_str()).trim();
    }

    // only the first line carries the selector
    text = text.lines().next().unwrap_or("").trim();

    for quote in ['"', '\'', '`'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            text = text[1..text.len() - 1].trim();
        }
    }

    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }
    Some(text.to_string())
}

fn build_prompt(html: &str, old_selector: &str, error_message: &str) -> String {
    format!(
        "The selector `{old_selector}` failed with this error:\n\
         {error_message}\n\n\
         Current page markup:\n\
         ```html\n{html}\n```\n\n\
         Reply with a single replacement selector, or null."
    )
}

/// Healer backed by the Anthropic Messages API
#[derive(Debug, Clone)]
pub struct AgentHealer {
    client: AgentClient,
    snapshot_limit: usize,
}

impl AgentHealer {
    pub fn new(client: AgentClient) -> Self {
        Self {
            client,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
        }
    }

    pub fn from_settings(settings: &HealingSettings) -> Self {
        let model = settings.model.parse::<Model>().unwrap_or_else(|e| {
            tracing::warn!("{}; using {}", e, Model::default());
            Model::default()
        });
        Self {
            client: AgentClient::new(model).with_max_tokens(settings.max_tokens),
            snapshot_limit: settings.snapshot_limit,
        }
    }

    pub fn with_snapshot_limit(mut self, limit: usize) -> Self {
        self.snapshot_limit = limit;
        self
    }
}

#[async_trait]
impl SelectorHealer for AgentHealer {
    async fn heal_selector(
        &self,
        html: &str,
        old_selector: &str,
        error_message: &str,
    ) -> Result<Option<String>> {
        if !auth::has_credentials() {
            return Err(VigilError::HealingUnavailable(format!(
                "{} is not set",
                auth::API_KEY_VAR
            )));
        }

        let snapshot = truncate_snapshot(html, self.snapshot_limit);
        tracing::info!(
            "Requesting selector repair for {} ({} chars of markup)",
            old_selector,
            snapshot.chars().count()
        );

        let completion = self
            .client
            .complete(Some(SYSTEM_PROMPT), &build_prompt(snapshot, old_selector, error_message))
            .await?;

        let suggestion = normalize_suggestion(&completion.text);
        match &suggestion {
            Some(selector) => tracing::info!("Healer suggested {} for {}", selector, old_selector),
            None => tracing::info!("Healer found no confident repair for {}", old_selector),
        }
        Ok(suggestion)
    }
}

/// Healer that is switched off
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledHealer;

#[async_trait]
impl SelectorHealer for DisabledHealer {
    async fn heal_selector(&self, _html: &str, _old: &str, _error: &str) -> Result<Option<String>> {
        Err(VigilError::HealingUnavailable("selector healing is disabled".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_snapshot() {
        assert_eq!(truncate_snapshot("abcdef", 3), "abc");
        assert_eq!(truncate_snapshot("abc", 10), "abc");
        assert_eq!(truncate_snapshot("", 5), "");

        let long = "x".repeat(20_000);
        assert_eq!(truncate_snapshot(&long, DEFAULT_SNAPSHOT_LIMIT).len(), 15_000);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let html = "ééééé";
        assert_eq!(truncate_snapshot(html, 2), "éé");
    }

    #[test]
    fn test_normalize_plain_and_quoted() {
        assert_eq!(normalize_suggestion("  #login \n"), Some("#login".to_string()));
        assert_eq!(
            normalize_suggestion("\"css=button[type=submit]\""),
            Some("css=button[type=submit]".to_string())
        );
        assert_eq!(normalize_suggestion("`.btn-primary`"), Some(".btn-primary".to_string()));
    }

    #[test]
    fn test_normalize_code_fence() {
        let raw = "```css\nbutton[type=submit]\n```";
        assert_eq!(normalize_suggestion(raw), Some("button[type=submit]".to_string()));

        let raw = "```\n#save\n```";
        assert_eq!(normalize_suggestion(raw), Some("#save".to_string()));
    }

    #[test]
    fn test_normalize_null() {
        assert_eq!(normalize_suggestion("null"), None);
        assert_eq!(normalize_suggestion("NULL"), None);
        assert_eq!(normalize_suggestion("\"null\""), None);
        assert_eq!(normalize_suggestion("   "), None);
    }

    #[test]
    fn test_prompt_contains_inputs() {
        let prompt = build_prompt("<button>Go</button>", "id=submit", "Timeout 10000ms exceeded");
        assert!(prompt.contains("id=submit"));
        assert!(prompt.contains("<button>Go</button>"));
        assert!(prompt.contains("Timeout 10000ms exceeded"));
    }

    #[tokio::test]
    async fn test_disabled_healer() {
        let err = DisabledHealer.heal_selector("", "#a", "boom").await.unwrap_err();
        assert!(matches!(err, VigilError::HealingUnavailable(_)));
    }

    #[test]
    fn test_from_settings_falls_back_on_unknown_model() {
        let settings = HealingSettings {
            model: "mystery".to_string(),
            ..HealingSettings::default()
        };
        let healer = AgentHealer::from_settings(&settings);
        assert_eq!(healer.client.model(), Model::Sonnet);
        assert_eq!(healer.snapshot_limit, settings.snapshot_limit);
    }
}
