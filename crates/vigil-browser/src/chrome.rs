//! Headless Chrome sessions over the Chrome DevTools Protocol
//!
//! `headless_chrome` is synchronous, so every CDP round-trip runs on the
//! blocking pool under an outer tokio deadline.

use crate::session::{PageSession, SessionProvider};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vigil_core::config::BrowserSettings;
use vigil_core::selector::looks_like_xpath;
use vigil_core::{Result, StepFailure, VigilError};

/// Slack added to the outer deadline so CDP's own timeout fires first
const BLOCKING_GRACE: Duration = Duration::from_secs(2);

/// Ceiling for whole-page operations (markup capture, screenshots)
const PAGE_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Empty when the element accepts text, `input:<type>` for a toggle-like
/// input, `element:<tag>` for anything else
const FILLABLE_CHECK_JS: &str = r#"function() {
    const tag = this.tagName ? this.tagName.toLowerCase() : '';
    const type = (this.type || 'text').toLowerCase();
    const rejected = ['checkbox', 'radio', 'button', 'submit', 'reset', 'file', 'image', 'hidden'];
    if (tag === 'input') {
        return rejected.includes(type) ? 'input:' + type : '';
    }
    if (tag === 'textarea' || this.isContentEditable) {
        return '';
    }
    return 'element:' + tag;
}"#;

/// Returns `[scrollWidth, scrollHeight]` of the whole document as JSON
const CONTENT_SIZE_JS: &str = r#"JSON.stringify([
    Math.max(document.documentElement.scrollWidth, document.body ? document.body.scrollWidth : 0),
    Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)
])"#;

const SET_VALUE_JS: &str = r#"function(value) {
    this.focus();
    if (this.isContentEditable) {
        this.textContent = value;
    } else {
        this.value = value;
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
}"#;

const CHECK_JS: &str = r#"function() {
    if (!this.checked) {
        this.click();
    }
    return this.checked === true;
}"#;

/// Launches a fresh Chrome process per session
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self::new(BrowserSettings::default())
    }
}

#[async_trait]
impl SessionProvider for ChromeLauncher {
    async fn open_session(&self, headless: bool) -> Result<Box<dyn PageSession>> {
        let settings = self.settings.clone();
        let session = tokio::task::spawn_blocking(move || ChromeSession::launch(&settings, headless))
            .await
            .map_err(|e| VigilError::Browser(format!("Browser launch task failed: {}", e)))??;
        Ok(Box::new(session))
    }
}

/// One isolated Chrome process with a single tab
pub struct ChromeSession {
    /// Kept alive for the tab's lifetime; dropping it kills the process
    #[allow(dead_code)]
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    /// Launch a browser and open its working tab (blocking)
    pub fn launch(settings: &BrowserSettings, headless: bool) -> Result<Self> {
        info!(
            "Launching browser (headless: {}, size: {}x{})",
            headless, settings.window_width, settings.window_height
        );

        let launch_options = LaunchOptions::default_builder()
            .headless(headless)
            .sandbox(settings.sandbox)
            .window_size(Some((settings.window_width, settings.window_height)))
            .build()
            .map_err(|e| VigilError::Browser(format!("Invalid launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| VigilError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| VigilError::Browser(format!("Failed to create tab: {}", e)))?;

        info!("Browser launched successfully");
        Ok(Self { browser, tab })
    }
}

/// Run a blocking CDP interaction under an outer deadline
async fn run_blocking<T, F>(label: String, timeout: Duration, f: F) -> std::result::Result<T, StepFailure>
where
    F: FnOnce() -> std::result::Result<T, StepFailure> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout + BLOCKING_GRACE, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(StepFailure::protocol(format!(
            "{} aborted: {}",
            label, join_error
        ))),
        Err(_) => Err(StepFailure::timeout(format!(
            "Timeout {}ms exceeded during {}",
            timeout.as_millis(),
            label
        ))),
    }
}

/// Wait for an element; only an expired wait is a timeout-class failure
fn find_element<'a>(tab: &'a Tab, selector: &str, timeout: Duration) -> std::result::Result<Element<'a>, StepFailure> {
    if selector.is_empty() {
        return Err(StepFailure::not_found("Empty selector"));
    }

    let found = if looks_like_xpath(selector) {
        tab.wait_for_xpath_with_custom_timeout(selector, timeout)
    } else {
        tab.wait_for_element_with_custom_timeout(selector, timeout)
    };

    found.map_err(|e| {
        debug!("Lookup for {} failed: {}", selector, e);
        lookup_failure(selector, timeout, &e.to_string())
    })
}

/// Classify a failed element wait from the engine's error text.
///
/// headless_chrome keeps polling while nothing matches and reports
/// "The event waited for never came" once the ceiling passes. Anything
/// else (closed target, malformed selector) is a protocol failure.
fn lookup_failure(selector: &str, timeout: Duration, raw: &str) -> StepFailure {
    let lower = raw.to_lowercase();
    if lower.contains("never came") || lower.contains("timed out") || lower.contains("timeout") {
        StepFailure::timeout(format!(
            "Timeout {}ms exceeded waiting for selector \"{}\"",
            timeout.as_millis(),
            selector
        ))
    } else {
        StepFailure::protocol(format!("Lookup for \"{}\" failed: {}", selector, raw))
    }
}

/// Map the fillability check's answer to a failure, if any.
///
/// Toggle-like inputs are `NotFillable` so the executor can fall back to
/// check/click. Elements that are not form fields fail the step outright.
fn fill_rejection(selector: &str, answer: &str) -> Option<StepFailure> {
    if let Some(input_type) = answer.strip_prefix("input:") {
        Some(StepFailure::not_fillable(format!(
            "Input of type \"{}\" cannot be filled",
            input_type
        )))
    } else if let Some(tag) = answer.strip_prefix("element:") {
        Some(StepFailure::protocol(format!(
            "Element \"{}\" (<{}>) is not an <input>, <textarea> or [contenteditable] element",
            selector, tag
        )))
    } else if answer.is_empty() {
        None
    } else {
        Some(StepFailure::protocol(format!(
            "Unexpected fillability answer for \"{}\": {}",
            selector, answer
        )))
    }
}

/// Clip covering the whole document, or `None` to fall back to the viewport
fn full_page_clip(raw_size: &str) -> Option<Viewport> {
    let size: Vec<f64> = serde_json::from_str(raw_size).ok()?;
    match size.as_slice() {
        [width, height] if *width > 0.0 && *height > 0.0 => Some(Viewport {
            x: 0.0,
            y: 0.0,
            width: width.ceil(),
            height: height.ceil(),
            scale: 1.0,
        }),
        _ => None,
    }
}

fn js_failure(action: &str, selector: &str, e: impl std::fmt::Display) -> StepFailure {
    StepFailure::from_raw(format!("{} on \"{}\" failed: {}", action, selector, e))
}

#[async_trait]
impl PageSession for ChromeSession {
    async fn goto(&self, url: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        debug!("Navigating to {}", url);
        let tab = Arc::clone(&self.tab);
        let url = url.to_string();

        run_blocking(format!("navigation to {}", url), timeout, move || {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .map_err(|e| StepFailure::from_raw(format!("Failed to navigate to {}: {}", url, e)))?;
            tab.wait_until_navigated().map_err(|e| {
                StepFailure::timeout(format!(
                    "Timeout {}ms exceeded navigating to {}: {}",
                    timeout.as_millis(),
                    url,
                    e
                ))
            })?;
            info!("Successfully navigated to {}", url);
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        let tab = Arc::clone(&self.tab);
        let selector = selector.to_string();

        run_blocking(format!("click on {}", selector), timeout, move || {
            let element = find_element(&tab, &selector, timeout)?;
            element
                .click()
                .map_err(|e| js_failure("click", &selector, e))?;
            Ok(())
        })
        .await
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> std::result::Result<(), StepFailure> {
        let tab = Arc::clone(&self.tab);
        let selector = selector.to_string();
        let value = value.to_string();

        run_blocking(format!("fill on {}", selector), timeout, move || {
            let element = find_element(&tab, &selector, timeout)?;

            let answer = element
                .call_js_fn(FILLABLE_CHECK_JS, vec![], false)
                .map_err(|e| js_failure("fill", &selector, e))?;
            let answer = answer
                .value
                .as_ref()
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(failure) = fill_rejection(&selector, &answer) {
                return Err(failure);
            }

            element
                .call_js_fn(SET_VALUE_JS, vec![serde_json::Value::String(value)], false)
                .map_err(|e| js_failure("fill", &selector, e))?;
            Ok(())
        })
        .await
    }

    async fn check(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        let tab = Arc::clone(&self.tab);
        let selector = selector.to_string();

        run_blocking(format!("check on {}", selector), timeout, move || {
            let element = find_element(&tab, &selector, timeout)?;
            let result = element
                .call_js_fn(CHECK_JS, vec![], false)
                .map_err(|e| js_failure("check", &selector, e))?;

            let checked = result.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false);
            if !checked {
                return Err(StepFailure::protocol(format!(
                    "Clicking \"{}\" did not change its state to checked",
                    selector
                )));
            }
            Ok(())
        })
        .await
    }

    async fn content(&self) -> Result<String> {
        let tab = Arc::clone(&self.tab);
        run_blocking("markup capture".to_string(), PAGE_OP_TIMEOUT, move || {
            tab.get_content()
                .map_err(|e| StepFailure::protocol(format!("Failed to read page content: {}", e)))
        })
        .await
        .map_err(|failure| VigilError::Browser(failure.message))
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let tab = Arc::clone(&self.tab);
        run_blocking("screenshot".to_string(), PAGE_OP_TIMEOUT, move || {
            let clip = match tab.evaluate(CONTENT_SIZE_JS, false) {
                Ok(size) => size
                    .value
                    .as_ref()
                    .and_then(|v| v.as_str())
                    .and_then(full_page_clip),
                Err(e) => {
                    debug!("Content size unavailable, capturing viewport: {}", e);
                    None
                }
            };
            tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
                .map_err(|e| StepFailure::protocol(format!("CDP capture failed: {}", e)))
        })
        .await
        .map_err(|failure| VigilError::Browser(failure.message))
    }

    async fn close(&self) -> Result<()> {
        info!("Closing browser session");
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || tab.close(false))
            .await
            .map_err(|e| VigilError::Browser(format!("Close task failed: {}", e)))?
            .map_err(|e| VigilError::Browser(format!("Failed to close tab: {}", e)))?;
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        debug!("ChromeSession dropped, browser process will be terminated");
    }
}
