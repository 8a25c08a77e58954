//! Capture executor — runs exactly one request through its phase sequence,
//! reporting progress and producing the captured sections.
//!
//! Phase order (optional phases skipped when their request fields are
//! unset): starting → auth → viewport → blocking → navigate →
//! wait-selector → interact → delay → capture. Percent values are fixed per
//! phase and non-decreasing across a run. The executor never retries; that
//! is the scheduler's job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use pageshot_core::config::RendererConfig;
use pageshot_core::error::{PageshotError, Result};
use pageshot_core::render::{RenderEngine, RenderSession};
use pageshot_core::types::{BatchItem, CaptureRequest, CaptureResult, TaskState, ViewportSize};

use crate::cancel::CancelFlag;
use crate::progress::{ProgressHub, ProgressSink};

// Phase → percent table. Order matters more than the exact numbers.
const PCT_STARTING: u8 = 0;
const PCT_AUTH: u8 = 15;
const PCT_VIEWPORT: u8 = 20;
const PCT_BLOCKING: u8 = 30;
const PCT_NAVIGATE: u8 = 40;
const PCT_WAIT_SELECTOR: u8 = 50;
const PCT_INTERACT: u8 = 60;
const PCT_DELAY: u8 = 70;
const PCT_CAPTURE: u8 = 90;

/// Settle delay between consecutive click/hover interactions.
const INTERACT_SETTLE: Duration = Duration::from_millis(100);

/// Runs single capture requests against an injected render engine.
pub struct CaptureExecutor {
    engine: Arc<dyn RenderEngine>,
    config: RendererConfig,
}

impl CaptureExecutor {
    pub fn new(engine: Arc<dyn RenderEngine>, config: RendererConfig) -> Self {
        Self { engine, config }
    }

    /// Full streaming lifecycle for one task id: publishes `Starting`, the
    /// phase sequence, and the terminal event. A cancelled run closes the
    /// channel with no terminal event instead.
    pub async fn run_streaming(
        &self,
        hub: &ProgressHub,
        task_id: &str,
        request: &CaptureRequest,
        cancel: &CancelFlag,
    ) {
        if let Err(e) = hub.publish(task_id, TaskState::Starting) {
            tracing::warn!("⚠️ capture {task_id}: cannot start: {e}");
            return;
        }
        let sink = ProgressSink::Channel { hub, task_id };
        match self.run(request, cancel, &sink).await {
            Ok(results) => {
                tracing::info!("✅ capture {task_id} completed ({} section(s))", results.len());
                let terminal = TaskState::Completed {
                    results: vec![BatchItem::Captured {
                        url: request.url.clone(),
                        results,
                    }],
                };
                hub.publish(task_id, terminal).ok();
            }
            Err(PageshotError::Cancelled) | Err(PageshotError::ChannelClosed(_)) => {
                tracing::info!("🚫 capture {task_id} cancelled");
                hub.close(task_id);
            }
            Err(e) => {
                tracing::warn!("❌ capture {task_id} failed: {e}");
                hub.publish(task_id, TaskState::failed(&e)).ok();
            }
        }
    }

    /// Run one request to completion, reporting phase progress into `sink`.
    /// Returns the captured sections (always non-empty) or the first fatal
    /// phase error.
    pub async fn run(
        &self,
        request: &CaptureRequest,
        cancel: &CancelFlag,
        sink: &ProgressSink<'_>,
    ) -> Result<Vec<CaptureResult>> {
        request.validate()?;
        let mut session = self.engine.open(&request.viewport).await?;
        let result = self.drive(session.as_mut(), request, cancel, sink).await;
        session.close().await.ok();
        result
    }

    async fn drive(
        &self,
        session: &mut dyn RenderSession,
        request: &CaptureRequest,
        cancel: &CancelFlag,
        sink: &ProgressSink<'_>,
    ) -> Result<Vec<CaptureResult>> {
        let nav_secs = self.config.navigation_timeout_secs;
        let nav_timeout = Duration::from_secs(nav_secs);
        let selector_timeout = Duration::from_secs(self.config.selector_timeout_secs);

        sink.publish(TaskState::processing(
            PCT_STARTING,
            format!("Starting capture for {}", request.url),
        ))?;

        if let Some(auth) = &request.authentication {
            sink.publish(TaskState::processing(PCT_AUTH, "Handling authentication..."))?;
            bounded(cancel, nav_timeout, session.login(auth), || {
                PageshotError::NavigationTimeout(nav_secs)
            })
            .await?;
        }

        sink.publish(TaskState::processing(PCT_VIEWPORT, "Setting viewport..."))?;
        guarded(cancel, session.set_viewport(&request.viewport)).await?;

        if request.hide_ads || request.hide_cookie_banners {
            sink.publish(TaskState::processing(
                PCT_BLOCKING,
                "Setting up content blocking...",
            ))?;
            guarded(
                cancel,
                session.block_content(request.hide_ads, request.hide_cookie_banners),
            )
            .await?;
        }

        sink.publish(TaskState::processing(PCT_NAVIGATE, "Loading page..."))?;
        bounded(cancel, nav_timeout, session.navigate(&request.url), || {
            PageshotError::NavigationTimeout(nav_secs)
        })
        .await?;

        if let Some(selector) = &request.wait_for_selector {
            sink.publish(TaskState::processing(
                PCT_WAIT_SELECTOR,
                format!("Waiting for element \"{selector}\"..."),
            ))?;
            bounded(
                cancel,
                selector_timeout,
                session.wait_for_selector(selector),
                || PageshotError::ElementNotFound(selector.clone()),
            )
            .await?;
        }

        if let Some(before) = request.before_capture.as_ref().filter(|b| !b.is_empty()) {
            sink.publish(TaskState::processing(
                PCT_INTERACT,
                "Performing interactions...",
            ))?;
            self.interact(session, before, cancel, selector_timeout)
                .await?;
        }

        if request.delay_seconds > 0 {
            sink.publish(TaskState::processing(
                PCT_DELAY,
                format!("Waiting for {} seconds...", request.delay_seconds),
            ))?;
            pause(cancel, Duration::from_secs(request.delay_seconds)).await?;
        }

        sink.publish(TaskState::processing(
            PCT_CAPTURE,
            "Capturing screenshot...",
        ))?;
        let shots = self.capture(session, request, cancel).await?;

        let captured_at = Utc::now();
        let viewport = ViewportSize {
            width: request.viewport.width,
            height: request.viewport.height,
        };
        Ok(shots
            .into_iter()
            .map(|(png, section)| CaptureResult {
                image_data: BASE64.encode(png),
                captured_at,
                source_url: request.url.clone(),
                viewport,
                section_index: section.map(|(i, _)| i),
                total_sections: section.map(|(_, n)| n),
            })
            .collect())
    }

    /// Click/hover failures are non-fatal: log and continue with the next
    /// selector. Cancellation still aborts.
    async fn interact(
        &self,
        session: &mut dyn RenderSession,
        before: &pageshot_core::types::BeforeCapture,
        cancel: &CancelFlag,
        selector_timeout: Duration,
    ) -> Result<()> {
        for selector in &before.click {
            let res = bounded(cancel, selector_timeout, session.click(selector), || {
                PageshotError::InteractionTimeout(selector.clone())
            })
            .await;
            match res {
                Ok(()) => {}
                Err(PageshotError::Cancelled) => return Err(PageshotError::Cancelled),
                Err(e) => tracing::warn!("⚠️ click \"{selector}\" failed: {e}"),
            }
            pause(cancel, INTERACT_SETTLE).await?;
        }
        for selector in &before.hover {
            let res = bounded(cancel, selector_timeout, session.hover(selector), || {
                PageshotError::InteractionTimeout(selector.clone())
            })
            .await;
            match res {
                Ok(()) => {}
                Err(PageshotError::Cancelled) => return Err(PageshotError::Cancelled),
                Err(e) => tracing::warn!("⚠️ hover \"{selector}\" failed: {e}"),
            }
            pause(cancel, INTERACT_SETTLE).await?;
        }
        if before.wait_ms > 0 {
            pause(cancel, Duration::from_millis(before.wait_ms)).await?;
        }
        Ok(())
    }

    /// Produce raw PNG shots: one element shot, N full-page sections, or a
    /// single viewport shot. The `Option` carries (section_index, total).
    async fn capture(
        &self,
        session: &mut dyn RenderSession,
        request: &CaptureRequest,
        cancel: &CancelFlag,
    ) -> Result<Vec<(Vec<u8>, Option<(u32, u32)>)>> {
        if let Some(selector) = &request.selector {
            let png = guarded(cancel, session.capture_element(selector)).await?;
            return Ok(vec![(png, None)]);
        }

        if request.full_page {
            let height = guarded(cancel, session.content_height()).await?;
            let viewport_height = request.viewport.height.max(1);
            let sections = height.div_ceil(viewport_height).max(1);
            if sections > 1 {
                let settle = Duration::from_millis(self.config.section_settle_ms);
                let mut shots = Vec::with_capacity(sections as usize);
                for i in 0..sections {
                    guarded(cancel, session.scroll_to(i * viewport_height)).await?;
                    // Let lazy content load before shooting the section.
                    pause(cancel, settle).await?;
                    let png = guarded(cancel, session.capture_viewport()).await?;
                    shots.push((png, Some((i + 1, sections))));
                }
                return Ok(shots);
            }
            // Whole page fits one viewport — same shape as a single shot.
        }

        let png = guarded(cancel, session.capture_viewport()).await?;
        Ok(vec![(png, None)])
    }
}

/// Race a phase future against cancellation.
async fn guarded<T>(cancel: &CancelFlag, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PageshotError::Cancelled),
        res = fut => res,
    }
}

/// Race a phase future against cancellation and a timeout.
async fn bounded<T>(
    cancel: &CancelFlag,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce() -> PageshotError,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PageshotError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(on_timeout()),
        },
    }
}

/// Cancellable sleep. Suspends, never busy-waits.
async fn pause(cancel: &CancelFlag, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PageshotError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
