//! Batch coordination — runs an ordered list of capture requests
//! sequentially through the executor, aggregating progress on one channel.
//!
//! One render engine backs all items, so execution is strictly sequential
//! by design. A failing item fills its own output slot and never aborts the
//! rest; the batch itself completes once every item was attempted.

use pageshot_core::error::PageshotError;
use pageshot_core::types::{BatchItem, CaptureRequest, TaskState};

use crate::cancel::CancelFlag;
use crate::executor::CaptureExecutor;
use crate::progress::{ProgressHub, ProgressSink};

pub struct BatchCoordinator<'a> {
    executor: &'a CaptureExecutor,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(executor: &'a CaptureExecutor) -> Self {
        Self { executor }
    }

    /// Full streaming lifecycle for a batch id: `Starting`, one
    /// `Processing` event per item, then `Completed` with the per-item
    /// outcome slots in input order. Cancellation mid-item closes the
    /// channel with no terminal event.
    pub async fn run_streaming(
        &self,
        hub: &ProgressHub,
        batch_id: &str,
        requests: &[CaptureRequest],
        cancel: &CancelFlag,
    ) {
        if let Err(e) = hub.publish(batch_id, TaskState::Starting) {
            tracing::warn!("⚠️ batch {batch_id}: cannot start: {e}");
            return;
        }

        let total = requests.len();
        let mut outcomes: Vec<BatchItem> = Vec::with_capacity(total);

        for (i, request) in requests.iter().enumerate() {
            let progress = TaskState::Processing {
                progress: ((100 * i) / total.max(1)) as u8,
                message: format!("Capturing {}", request.url),
                current_url: Some(request.url.clone()),
                completed: Some(i),
                total: Some(total),
            };
            if hub.publish(batch_id, progress).is_err() {
                // Channel closed under us — the batch was cancelled.
                tracing::info!("🚫 batch {batch_id} cancelled before item {i}");
                return;
            }

            match self
                .executor
                .run(request, cancel, &ProgressSink::Silent)
                .await
            {
                Ok(results) => outcomes.push(BatchItem::Captured {
                    url: request.url.clone(),
                    results,
                }),
                Err(PageshotError::Cancelled) => {
                    tracing::info!("🚫 batch {batch_id} cancelled during item {i}");
                    hub.close(batch_id);
                    return;
                }
                Err(e) => {
                    tracing::warn!("⚠️ batch {batch_id} item {} failed: {e}", request.url);
                    outcomes.push(BatchItem::Failed {
                        url: request.url.clone(),
                        kind: e.failure_kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let captured = outcomes.iter().filter(|o| o.is_captured()).count();
        tracing::info!("✅ batch {batch_id} completed: {captured}/{total} captured");
        hub.publish(batch_id, TaskState::Completed { results: outcomes })
            .ok();
    }

    /// Run a batch without progress streaming; returns the outcome slots
    /// aligned 1:1 with the input order.
    pub async fn run(&self, requests: &[CaptureRequest], cancel: &CancelFlag) -> Vec<BatchItem> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            match self
                .executor
                .run(request, cancel, &ProgressSink::Silent)
                .await
            {
                Ok(results) => outcomes.push(BatchItem::Captured {
                    url: request.url.clone(),
                    results,
                }),
                Err(e) => outcomes.push(BatchItem::Failed {
                    url: request.url.clone(),
                    kind: e.failure_kind(),
                    error: e.to_string(),
                }),
            }
        }
        outcomes
    }
}
