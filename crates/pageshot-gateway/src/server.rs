//! HTTP server implementation using Axum.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    routing::{get, post},
    Router,
};
use pageshot_capture::executor::CaptureExecutor;
use pageshot_capture::progress::ProgressHub;
use pageshot_core::config::GatewayConfig;
use pageshot_core::types::CaptureRequest;
use pageshot_scheduler::TaskScheduler;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// How often the background sweep reclaims stale entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// How long a finished progress channel stays available for terminal
/// replay before it is reclaimed.
const FINISHED_RETENTION: Duration = Duration::from_secs(300);
/// How long a registered job waits for its first subscriber before it is
/// dropped along with its channel.
const UNCLAIMED_TTL: Duration = Duration::from_secs(300);

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Progress channels, one per registered capture or batch id.
    pub hub: Arc<ProgressHub>,
    pub executor: Arc<CaptureExecutor>,
    pub scheduler: TaskScheduler,
    /// Registered jobs that have not started yet, with their registration
    /// time. The first progress subscriber consumes the entry and spawns
    /// the run; unclaimed entries expire via [`AppState::sweep`].
    pub pending: Arc<tokio::sync::Mutex<HashMap<String, (PendingJob, Instant)>>>,
}

impl AppState {
    pub fn new(
        hub: Arc<ProgressHub>,
        executor: Arc<CaptureExecutor>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            hub,
            executor,
            scheduler,
            pending: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        }
    }

    /// Reclaim jobs that never got a subscriber and progress channels that
    /// finished longer than `finished_retention` ago. Without this the hub
    /// and pending maps grow with every submitted id.
    pub async fn sweep(&self, finished_retention: Duration, unclaimed_ttl: Duration) {
        let expired: Vec<String> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, (_, registered))| registered.elapsed() >= unclaimed_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                pending.remove(id);
            }
            ids
        };
        for id in &expired {
            self.hub.remove(id);
            tracing::info!("🗑️ Capture {id} expired with no progress subscriber");
        }
        let finished = self.hub.sweep(finished_retention);
        if finished > 0 {
            tracing::debug!("🗑️ Reclaimed {finished} finished progress channel(s)");
        }
    }
}

/// A submitted job waiting for its first progress subscriber.
pub enum PendingJob {
    Single(CaptureRequest),
    Batch(Vec<CaptureRequest>),
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/api/screenshot/capture",
            post(super::routes::submit_capture),
        )
        .route(
            "/api/screenshot/progress/{id}",
            get(super::routes::capture_progress),
        )
        .route("/api/screenshot/batch", post(super::routes::submit_batch))
        .route(
            "/api/screenshot/progress/batch/{id}",
            get(super::routes::batch_progress),
        )
        .route(
            "/api/schedule/tasks",
            get(super::routes::list_schedule_tasks).post(super::routes::create_schedule_task),
        )
        .route(
            "/api/schedule/tasks/{id}",
            get(super::routes::get_schedule_task)
                .delete(super::routes::delete_schedule_task),
        )
        .route(
            "/api/schedule/tasks/{id}/pause",
            post(super::routes::pause_schedule_task),
        )
        .route(
            "/api/schedule/tasks/{id}/resume",
            post(super::routes::resume_schedule_task),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server and the background sweep.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state.clone());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            state.sweep(FINISHED_RETENTION, UNCLAIMED_TTL).await;
        }
    });
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
