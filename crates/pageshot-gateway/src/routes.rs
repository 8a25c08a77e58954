//! API route handlers for the gateway.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use pageshot_capture::batch::BatchCoordinator;
use pageshot_capture::cancel::{cancel_pair, CancelHandle};
use pageshot_core::error::PageshotError;
use pageshot_core::types::CaptureRequest;
use pageshot_scheduler::NotificationSettings;
use serde::Deserialize;

use super::server::{AppState, PendingJob};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_response(e: &PageshotError) -> ApiError {
    let status = match e {
        PageshotError::InvalidRequest(_) | PageshotError::InvalidSchedule(_) => {
            StatusCode::BAD_REQUEST
        }
        PageshotError::UnknownTaskId(_) => StatusCode::NOT_FOUND,
        PageshotError::DuplicateTaskId(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({
            "error": e.to_string(),
            "kind": e.failure_kind(),
        })),
    )
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "pageshot-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Register a single capture. The run starts when the first progress
/// subscriber attaches, not here.
pub async fn submit_capture(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CaptureRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    request.validate().map_err(|e| error_response(&e))?;
    let id = uuid::Uuid::new_v4().to_string();
    state.hub.open(&id).map_err(|e| error_response(&e))?;
    state
        .pending
        .lock()
        .await
        .insert(id.clone(), (PendingJob::Single(request), Instant::now()));
    tracing::info!("📸 Capture {id} registered");
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "id": id }))))
}

#[derive(Deserialize)]
pub struct BatchSubmission {
    pub requests: Vec<CaptureRequest>,
}

/// Register an ordered batch of captures under one progress id.
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.requests.is_empty() {
        let e = PageshotError::InvalidRequest("batch must contain at least one request".into());
        return Err(error_response(&e));
    }
    for request in &body.requests {
        request.validate().map_err(|e| error_response(&e))?;
    }
    let id = uuid::Uuid::new_v4().to_string();
    state.hub.open(&id).map_err(|e| error_response(&e))?;
    let count = body.requests.len();
    state
        .pending
        .lock()
        .await
        .insert(id.clone(), (PendingJob::Batch(body.requests), Instant::now()));
    tracing::info!("📸 Batch {id} registered ({count} request(s))");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": id, "count": count })),
    ))
}

/// SSE progress stream for a single capture.
pub async fn capture_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    progress_stream(state, id).await
}

/// SSE progress stream for a batch.
pub async fn batch_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    progress_stream(state, id).await
}

/// Cancels the in-flight run if the subscriber disconnects before the
/// terminal event.
#[derive(Default)]
struct CancelOnDrop {
    handle: Option<CancelHandle>,
}

impl CancelOnDrop {
    fn arm(&mut self, handle: CancelHandle) {
        self.handle = Some(handle);
    }

    fn disarm(&mut self) {
        self.handle.take();
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::info!("🚫 Progress subscriber disconnected, cancelling run");
            handle.cancel();
        }
    }
}

async fn progress_stream(
    state: Arc<AppState>,
    id: String,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let stream = state.hub.subscribe(&id).map_err(|e| error_response(&e))?;

    // The first subscriber takes the pending job and starts the run.
    let job = state.pending.lock().await.remove(&id).map(|(job, _)| job);
    let mut guard = CancelOnDrop::default();
    if let Some(job) = job {
        let (handle, flag) = cancel_pair();
        guard.arm(handle);
        let state = state.clone();
        let task_id = id.clone();
        tokio::spawn(async move {
            match job {
                PendingJob::Single(request) => {
                    state
                        .executor
                        .run_streaming(&state.hub, &task_id, &request, &flag)
                        .await;
                }
                PendingJob::Batch(requests) => {
                    BatchCoordinator::new(&state.executor)
                        .run_streaming(&state.hub, &task_id, &requests, &flag)
                        .await;
                }
            }
        });
    }

    let events = async_stream::stream! {
        let mut guard = guard;
        tokio::pin!(stream);
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok::<_, Infallible>(sse_event),
                Err(e) => {
                    tracing::warn!("⚠️ Progress event serialization failed: {e}");
                    break;
                }
            }
            if terminal {
                // The run finished on its own; disconnecting now must not
                // look like a cancellation.
                guard.disarm();
                break;
            }
        }
    };
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
pub struct ScheduleSubmission {
    pub request: CaptureRequest,
    pub schedule: String,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// Create a recurring capture task.
pub async fn create_schedule_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScheduleSubmission>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let task = state
        .scheduler
        .schedule_task(body.request, &body.schedule, body.notifications)
        .await
        .map_err(|e| error_response(&e))?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "task": task })),
    ))
}

/// List all scheduled tasks.
pub async fn list_schedule_tasks(
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let tasks = state.scheduler.list_tasks().await;
    Json(serde_json::json!({ "tasks": tasks }))
}

/// Fetch one scheduled task.
pub async fn get_schedule_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.scheduler.get_task(&id).await {
        Some(task) => Ok(Json(serde_json::json!({ "task": task }))),
        None => Err(error_response(&PageshotError::UnknownTaskId(id))),
    }
}

/// Delete a scheduled task.
pub async fn delete_schedule_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.scheduler.delete_task(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(error_response(&PageshotError::UnknownTaskId(id)))
    }
}

/// Pause a scheduled task.
pub async fn pause_schedule_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.scheduler.pause_task(&id).await {
        return Err(error_response(&PageshotError::UnknownTaskId(id)));
    }
    Ok(Json(serde_json::json!({
        "task": state.scheduler.get_task(&id).await,
    })))
}

/// Resume a paused task from its next natural slot.
pub async fn resume_schedule_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.scheduler.resume_task(&id).await {
        return Err(error_response(&PageshotError::UnknownTaskId(id)));
    }
    Ok(Json(serde_json::json!({
        "task": state.scheduler.get_task(&id).await,
    })))
}
