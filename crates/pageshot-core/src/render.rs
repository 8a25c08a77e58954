//! Render engine traits — the seam between capture orchestration and the
//! headless browser that actually produces pixels.
//!
//! The executor only ever talks to these traits. Production wires in an
//! HTTP delegate client; tests wire in a scripted fake. This replaces the
//! shared-browser-singleton pattern with an injected capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Authentication, Viewport};

/// Factory for render sessions. One session backs one capture run.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open(&self, viewport: &Viewport) -> Result<Box<dyn RenderSession>>;
}

/// One browser page/tab. Methods map 1:1 onto the executor's phases;
/// each is a single long-running call the executor may time out or abandon.
#[async_trait]
pub trait RenderSession: Send {
    /// Run the login flow (navigate to the login page, submit credentials).
    async fn login(&mut self, auth: &Authentication) -> Result<()>;

    async fn set_viewport(&mut self, viewport: &Viewport) -> Result<()>;

    /// Install request-blocking rules for ads / cookie-consent resources.
    async fn block_content(&mut self, hide_ads: bool, hide_cookie_banners: bool) -> Result<()>;

    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Resolves once the selector matches; the executor bounds the wait.
    async fn wait_for_selector(&mut self, selector: &str) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    async fn hover(&mut self, selector: &str) -> Result<()>;

    /// Total scrollable content height in CSS pixels, for sectioning.
    async fn content_height(&mut self) -> Result<u32>;

    async fn scroll_to(&mut self, y: u32) -> Result<()>;

    /// PNG bytes of the current viewport.
    async fn capture_viewport(&mut self) -> Result<Vec<u8>>;

    /// PNG bytes of the element matching `selector`.
    /// Fails with `ElementNotFound` when nothing matches.
    async fn capture_element(&mut self, selector: &str) -> Result<Vec<u8>>;

    /// Release the page. Best-effort; called even after failures.
    async fn close(&mut self) -> Result<()>;
}
