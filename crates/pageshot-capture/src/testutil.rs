//! Scripted render engine for executor/batch tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pageshot_core::error::{PageshotError, Result};
use pageshot_core::render::{RenderEngine, RenderSession};
use pageshot_core::types::{Authentication, Viewport};

/// Shared failure script + call log. Clone the `Arc` into assertions.
#[derive(Default)]
pub struct FakeScript {
    /// URLs whose navigation fails with a delegate error.
    pub fail_navigate: Vec<String>,
    /// Selectors that never appear / never match.
    pub missing_selectors: Vec<String>,
    /// Make navigation hang forever (timeout tests, with a paused clock).
    pub hang_navigation: bool,
    /// Reported total content height in CSS pixels.
    pub content_height: u32,
}

pub struct FakeEngine {
    pub script: Arc<FakeScript>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl FakeEngine {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn plain() -> Self {
        Self::new(FakeScript {
            content_height: 800,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open(&self, _viewport: &Viewport) -> Result<Box<dyn RenderSession>> {
        self.log.lock().unwrap().push("open".into());
        Ok(Box::new(FakeSession {
            script: self.script.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeSession {
    script: Arc<FakeScript>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeSession {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    async fn login(&mut self, auth: &Authentication) -> Result<()> {
        self.record(format!("login:{}", auth.login_url));
        Ok(())
    }

    async fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        self.record(format!("viewport:{}x{}", viewport.width, viewport.height));
        Ok(())
    }

    async fn block_content(&mut self, hide_ads: bool, hide_cookie_banners: bool) -> Result<()> {
        self.record(format!("block:{hide_ads},{hide_cookie_banners}"));
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.record(format!("navigate:{url}"));
        if self.script.hang_navigation {
            std::future::pending::<()>().await;
        }
        if self.script.fail_navigate.iter().any(|u| u == url) {
            return Err(PageshotError::Delegate(format!("net::ERR_FAILED {url}")));
        }
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<()> {
        self.record(format!("wait:{selector}"));
        if self.script.missing_selectors.iter().any(|s| s == selector) {
            // Never appears; the executor's bounded wait expires.
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.record(format!("click:{selector}"));
        if self.script.missing_selectors.iter().any(|s| s == selector) {
            return Err(PageshotError::Delegate(format!("no node: {selector}")));
        }
        Ok(())
    }

    async fn hover(&mut self, selector: &str) -> Result<()> {
        self.record(format!("hover:{selector}"));
        if self.script.missing_selectors.iter().any(|s| s == selector) {
            return Err(PageshotError::Delegate(format!("no node: {selector}")));
        }
        Ok(())
    }

    async fn content_height(&mut self) -> Result<u32> {
        self.record("height".into());
        Ok(self.script.content_height)
    }

    async fn scroll_to(&mut self, y: u32) -> Result<()> {
        self.record(format!("scroll:{y}"));
        Ok(())
    }

    async fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.record("capture".into());
        Ok(b"fake-png".to_vec())
    }

    async fn capture_element(&mut self, selector: &str) -> Result<Vec<u8>> {
        self.record(format!("capture_element:{selector}"));
        if self.script.missing_selectors.iter().any(|s| s == selector) {
            return Err(PageshotError::ElementNotFound(selector.to_string()));
        }
        Ok(b"fake-element-png".to_vec())
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close".into());
        Ok(())
    }
}
