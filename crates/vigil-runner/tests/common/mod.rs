//! Scripted fakes for driving the orchestrator without a browser

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vigil_agent::SelectorHealer;
use vigil_browser::{PageSession, SessionProvider};
use vigil_core::{Result, StepFailure, VigilError};

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(color)))
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

fn lookup_timeout(selector: &str, timeout: Duration) -> StepFailure {
    StepFailure::timeout(format!(
        "Timeout {}ms exceeded waiting for selector \"{}\"",
        timeout.as_millis(),
        selector
    ))
}

/// How a fake page behaves
#[derive(Clone)]
pub struct PageScript {
    /// Resolved selectors that never appear
    pub missing: HashSet<String>,
    /// Resolved selectors that fail with a protocol error
    pub broken: HashSet<String>,
    /// Selector whose click panics
    pub panic_on: Option<String>,
    pub goto_failure: Option<StepFailure>,
    pub html: String,
    pub screenshot: Arc<Mutex<Option<Vec<u8>>>>,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            missing: HashSet::new(),
            broken: HashSet::new(),
            panic_on: None,
            goto_failure: None,
            html: "<html><body><button type=\"submit\">Sign in</button></body></html>".to_string(),
            screenshot: Arc::new(Mutex::new(Some(png(16, 16, [255, 255, 255, 255])))),
        }
    }
}

impl PageScript {
    pub fn missing(selectors: &[&str]) -> Self {
        Self {
            missing: selectors.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn set_screenshot(&self, bytes: Option<Vec<u8>>) {
        *self.screenshot.lock().unwrap() = bytes;
    }
}

/// Session provider handing out scripted sessions and recording activity
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub page: PageScript,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub refuse: bool,
}

impl FakeBrowser {
    pub fn new(page: PageScript) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for FakeBrowser {
    async fn open_session(&self, headless: bool) -> Result<Box<dyn PageSession>> {
        if self.refuse {
            return Err(VigilError::Browser("Failed to launch browser: no chrome".to_string()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(format!("open_session headless={}", headless));
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
            calls: Arc::clone(&self.calls),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeSession {
    page: PageScript,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeSession {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn lookup(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        if self.page.panic_on.as_deref() == Some(selector) {
            panic!("renderer crashed on {}", selector);
        }
        if self.page.missing.contains(selector) {
            return Err(lookup_timeout(selector, timeout));
        }
        if self.page.broken.contains(selector) {
            return Err(StepFailure::protocol(format!("Node is detached: {}", selector)));
        }
        Ok(())
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn goto(&self, url: &str, _timeout: Duration) -> std::result::Result<(), StepFailure> {
        self.record(format!("goto {}", url));
        match &self.page.goto_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        self.record(format!("click {}", selector));
        self.lookup(selector, timeout)
    }

    async fn fill(
        &self,
        selector: &str,
        value: &str,
        timeout: Duration,
    ) -> std::result::Result<(), StepFailure> {
        self.record(format!("fill {} {}", selector, value));
        self.lookup(selector, timeout)
    }

    async fn check(&self, selector: &str, timeout: Duration) -> std::result::Result<(), StepFailure> {
        self.record(format!("check {}", selector));
        self.lookup(selector, timeout)
    }

    async fn content(&self) -> Result<String> {
        self.record("content".to_string());
        Ok(self.page.html.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot".to_string());
        self.page
            .screenshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| VigilError::Browser("CDP capture failed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What the fake healer answers
#[derive(Clone)]
pub enum HealReply {
    Selector(String),
    Raw(String),
    Nothing,
    Unavailable,
}

pub struct FakeHealer {
    replies: Mutex<Vec<HealReply>>,
    pub requests: Mutex<Vec<(usize, String, String)>>,
}

impl FakeHealer {
    /// Answers in order; the last reply repeats
    pub fn new(replies: Vec<HealReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn suggesting(selector: &str) -> Self {
        Self::new(vec![HealReply::Selector(selector.to_string())])
    }

    pub fn nothing() -> Self {
        Self::new(vec![HealReply::Nothing])
    }

    pub fn unavailable() -> Self {
        Self::new(vec![HealReply::Unavailable])
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SelectorHealer for FakeHealer {
    async fn heal_selector(
        &self,
        html: &str,
        old_selector: &str,
        error_message: &str,
    ) -> Result<Option<String>> {
        self.requests.lock().unwrap().push((
            html.chars().count(),
            old_selector.to_string(),
            error_message.to_string(),
        ));

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                replies.first().cloned().unwrap_or(HealReply::Nothing)
            }
        };

        match reply {
            HealReply::Selector(selector) => Ok(Some(selector)),
            HealReply::Raw(text) => Ok(Some(text)),
            HealReply::Nothing => Ok(None),
            HealReply::Unavailable => Err(VigilError::Api("503 Service Unavailable".to_string())),
        }
    }
}
