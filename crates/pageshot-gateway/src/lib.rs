//! # Pageshot Gateway
//!
//! HTTP surface of the capture service:
//!
//! ```text
//! POST /api/screenshot/capture        register a capture, returns {id}
//! GET  /api/screenshot/progress/{id}  SSE stream; first attach starts the run
//! POST /api/screenshot/batch          register an ordered batch, returns {id}
//! GET  /api/screenshot/progress/batch/{id}
//! POST /api/schedule/tasks            create a recurring task
//! GET  /api/schedule/tasks            list tasks
//! GET/DELETE /api/schedule/tasks/{id}
//! POST /api/schedule/tasks/{id}/pause | /resume
//! GET  /health
//! ```
//!
//! Capture work does not begin at submission: the run starts when the first
//! progress subscriber attaches, and that subscriber disconnecting before
//! the terminal event cancels the run.

pub mod routes;
pub mod server;

pub use server::{build_router, start, AppState, PendingJob};
