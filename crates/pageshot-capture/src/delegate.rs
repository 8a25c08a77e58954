//! HTTP render delegate — drives a headless-renderer sidecar over its REST
//! API. Each capture run gets its own page session; orchestration stays in
//! the executor, pixels stay in the sidecar.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pageshot_core::error::{PageshotError, Result};
use pageshot_core::render::{RenderEngine, RenderSession};
use pageshot_core::types::{Authentication, Viewport};
use std::time::Duration;

/// Per-call HTTP timeout. Phase-level timeouts (navigation, selector wait)
/// are enforced by the executor on top of this.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Render engine backed by a renderer sidecar's HTTP API.
pub struct HttpRenderEngine {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderEngine {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RenderEngine for HttpRenderEngine {
    async fn open(&self, viewport: &Viewport) -> Result<Box<dyn RenderSession>> {
        let resp = self
            .client
            .post(format!("{}/session", self.endpoint))
            .json(&serde_json::json!({
                "viewport": {
                    "width": viewport.width,
                    "height": viewport.height,
                    "device_scale_factor": viewport.scale_factor,
                    "is_mobile": viewport.is_mobile,
                }
            }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PageshotError::Delegate(format!("open session: {e}")))?;
        let body: serde_json::Value = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PageshotError::Delegate(format!("open session body: {e}")))?;
        let session_id = body["session_id"]
            .as_str()
            .ok_or_else(|| PageshotError::Delegate("missing session_id".into()))?
            .to_string();
        tracing::debug!("🖥️ renderer session opened: {session_id}");
        Ok(Box::new(HttpRenderSession {
            client: self.client.clone(),
            base: format!("{}/session/{session_id}", self.endpoint),
        }))
    }
}

struct HttpRenderSession {
    client: reqwest::Client,
    base: String,
}

impl HttpRenderSession {
    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PageshotError::Delegate(format!("{path}: {e}")))?;
        check(resp)
            .await?
            .json()
            .await
            .map_err(|e| PageshotError::Delegate(format!("{path} body: {e}")))
    }

    async fn image(&self, path: &str, body: serde_json::Value) -> Result<Vec<u8>> {
        let reply = self.post(path, body).await?;
        let encoded = reply["image"]
            .as_str()
            .ok_or_else(|| PageshotError::Delegate(format!("{path}: missing image field")))?;
        BASE64
            .decode(encoded)
            .map_err(|e| PageshotError::Delegate(format!("{path}: bad image payload: {e}")))
    }
}

/// Map HTTP status onto the error taxonomy: 404 from element endpoints
/// means the selector matched nothing, everything else non-2xx is opaque.
async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let detail = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(PageshotError::ElementNotFound(detail));
    }
    Err(PageshotError::Delegate(format!("renderer {status}: {detail}")))
}

#[async_trait]
impl RenderSession for HttpRenderSession {
    async fn login(&mut self, auth: &Authentication) -> Result<()> {
        self.post(
            "/login",
            serde_json::json!({
                "login_url": auth.login_url,
                "username": auth.username,
                "password": auth.password,
                "login_selector": auth.login_selector,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        self.post(
            "/viewport",
            serde_json::json!({
                "width": viewport.width,
                "height": viewport.height,
                "device_scale_factor": viewport.scale_factor,
                "is_mobile": viewport.is_mobile,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn block_content(&mut self, hide_ads: bool, hide_cookie_banners: bool) -> Result<()> {
        self.post(
            "/block",
            serde_json::json!({
                "ads": hide_ads,
                "cookie_banners": hide_cookie_banners,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.post("/navigate", serde_json::json!({ "url": url }))
            .await
            .map(|_| ())
    }

    async fn wait_for_selector(&mut self, selector: &str) -> Result<()> {
        self.post("/wait", serde_json::json!({ "selector": selector }))
            .await
            .map(|_| ())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.post("/click", serde_json::json!({ "selector": selector }))
            .await
            .map(|_| ())
    }

    async fn hover(&mut self, selector: &str) -> Result<()> {
        self.post("/hover", serde_json::json!({ "selector": selector }))
            .await
            .map(|_| ())
    }

    async fn content_height(&mut self) -> Result<u32> {
        let reply = self.post("/metrics", serde_json::json!({})).await?;
        reply["content_height"]
            .as_u64()
            .map(|h| h as u32)
            .ok_or_else(|| PageshotError::Delegate("missing content_height".into()))
    }

    async fn scroll_to(&mut self, y: u32) -> Result<()> {
        self.post("/scroll", serde_json::json!({ "y": y }))
            .await
            .map(|_| ())
    }

    async fn capture_viewport(&mut self) -> Result<Vec<u8>> {
        self.image("/screenshot", serde_json::json!({ "full_page": false }))
            .await
    }

    async fn capture_element(&mut self, selector: &str) -> Result<Vec<u8>> {
        self.image("/screenshot/element", serde_json::json!({ "selector": selector }))
            .await
    }

    async fn close(&mut self) -> Result<()> {
        self.client
            .delete(&self.base)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| PageshotError::Delegate(format!("close session: {e}")))?;
        Ok(())
    }
}
