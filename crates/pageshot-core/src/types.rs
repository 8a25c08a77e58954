//! Capture data model — requests, results, and the task lifecycle states
//! streamed to progress subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PageshotError, Result};

/// Browser viewport settings for a capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_scale")]
    pub scale_factor: f32,
    #[serde(default)]
    pub is_mobile: bool,
}

fn default_scale() -> f32 {
    1.0
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
            scale_factor: 1.0,
            is_mobile: false,
        }
    }
}

/// Width/height pair echoed back on results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Interactions to perform before the capture phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeforeCapture {
    #[serde(default)]
    pub click: Vec<String>,
    #[serde(default)]
    pub hover: Vec<String>,
    /// Extra wait after all interactions, in milliseconds.
    #[serde(default)]
    pub wait_ms: u64,
}

impl BeforeCapture {
    pub fn is_empty(&self) -> bool {
        self.click.is_empty() && self.hover.is_empty() && self.wait_ms == 0
    }
}

/// Login flow to run before navigating to the target URL.
/// The form-filling mechanics are the render delegate's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authentication {
    pub login_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub login_selector: Option<String>,
}

/// A single capture request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub url: String,
    #[serde(default)]
    pub viewport: Viewport,
    /// Seconds to wait before capturing (lets animations settle).
    #[serde(default)]
    pub delay_seconds: u64,
    /// Capture the whole page in viewport-height sections.
    #[serde(default)]
    pub full_page: bool,
    /// Capture only the element matching this selector.
    #[serde(default)]
    pub selector: Option<String>,
    /// Wait for this selector to appear before interacting/capturing.
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    #[serde(default)]
    pub before_capture: Option<BeforeCapture>,
    #[serde(default)]
    pub authentication: Option<Authentication>,
    /// Block ad/analytics requests during load.
    #[serde(default)]
    pub hide_ads: bool,
    /// Block cookie-consent resources during load.
    #[serde(default)]
    pub hide_cookie_banners: bool,
}

impl CaptureRequest {
    /// Minimal request for a URL with default viewport.
    pub fn for_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            viewport: Viewport::default(),
            delay_seconds: 0,
            full_page: false,
            selector: None,
            wait_for_selector: None,
            before_capture: None,
            authentication: None,
            hide_ads: false,
            hide_cookie_banners: false,
        }
    }

    /// Reject malformed requests before any capture phase starts.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(PageshotError::InvalidRequest("url is required".into()));
        }
        if !is_absolute_http_url(&self.url) {
            return Err(PageshotError::InvalidRequest(format!(
                "url must be an absolute http(s) URL: {}",
                self.url
            )));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(PageshotError::InvalidRequest(
                "viewport dimensions must be positive".into(),
            ));
        }
        if self.viewport.scale_factor <= 0.0 {
            return Err(PageshotError::InvalidRequest(
                "viewport scale_factor must be positive".into(),
            ));
        }
        if let Some(auth) = &self.authentication {
            if !is_absolute_http_url(&auth.login_url) {
                return Err(PageshotError::InvalidRequest(
                    "authentication.login_url must be an absolute http(s) URL".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Absolute http(s) URL with a non-empty host.
fn is_absolute_http_url(url: &str) -> bool {
    let rest = if let Some(r) = url.strip_prefix("https://") {
        r
    } else if let Some(r) = url.strip_prefix("http://") {
        r
    } else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    !host.is_empty()
}

/// One captured image. A full-page capture yields one result per section;
/// every capture yields a non-empty list (single shots have no section tags).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Base64-encoded PNG bytes.
    pub image_data: String,
    pub captured_at: DateTime<Utc>,
    pub source_url: String,
    pub viewport: ViewportSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_sections: Option<u32>,
}

/// Failure kinds surfaced on `TaskState::Failed` and per-batch-item slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidRequest,
    NavigationTimeout,
    ElementNotFound,
    InteractionTimeout,
    Delegate,
}

/// Outcome slot for one request inside a batch. Single captures reuse the
/// same shape with exactly one slot, so subscribers decode one terminal form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItem {
    Captured {
        url: String,
        results: Vec<CaptureResult>,
    },
    Failed {
        url: String,
        kind: FailureKind,
        error: String,
    },
}

impl BatchItem {
    pub fn url(&self) -> &str {
        match self {
            Self::Captured { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, Self::Captured { .. })
    }
}

/// Lifecycle state of one capture task (single or batch).
///
/// Monotonic within one execution: `Starting` → `Processing` with
/// non-decreasing percent → exactly one of `Completed`/`Failed`. A channel
/// closed without a terminal event means the run was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    Starting,
    Processing {
        progress: u8,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    Completed {
        results: Vec<BatchItem>,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

impl TaskState {
    /// Plain progress step with no batch bookkeeping.
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self::Processing {
            progress,
            message: message.into(),
            current_url: None,
            completed: None,
            total: None,
        }
    }

    pub fn failed(err: &PageshotError) -> Self {
        Self::Failed {
            kind: err.failure_kind(),
            error: err.to_string(),
        }
    }

    /// Terminal states are final; the channel must not emit after one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Percent value for ordering assertions (terminal states read as 100).
    pub fn percent(&self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Processing { progress, .. } => *progress,
            Self::Completed { .. } | Self::Failed { .. } => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ok() {
        let req = CaptureRequest::for_url("https://example.com/page?x=1");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        for url in ["", "example.com", "ftp://example.com", "https://"] {
            let req = CaptureRequest::for_url(url);
            assert!(
                matches!(req.validate(), Err(PageshotError::InvalidRequest(_))),
                "accepted: {url}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_zero_viewport() {
        let mut req = CaptureRequest::for_url("https://example.com");
        req.viewport.width = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Starting.is_terminal());
        assert!(!TaskState::processing(40, "loading").is_terminal());
        assert!(TaskState::Completed { results: vec![] }.is_terminal());
        assert!(TaskState::Failed {
            kind: FailureKind::Delegate,
            error: "boom".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_task_state_serde_tags() {
        let json = serde_json::to_value(TaskState::processing(40, "Loading page...")).unwrap();
        assert_eq!(json["status"], "processing");
        assert_eq!(json["progress"], 40);
        let json = serde_json::to_value(TaskState::Starting).unwrap();
        assert_eq!(json["status"], "starting");
    }
}
