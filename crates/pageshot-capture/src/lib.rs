//! # Pageshot Capture
//!
//! Drives capture requests through their lifecycle and streams progress to
//! subscribers:
//!
//! ```text
//! submit → ProgressHub channel (task id)
//!            │
//!   CaptureExecutor (one request)      BatchCoordinator (ordered list)
//!     starting → auth? → viewport        per-item progress, failure
//!     → blocking? → navigate             isolation, input-order results
//!     → wait? → interact? → delay?
//!     → capture → completed/failed
//!            │
//!   subscriber (SSE or test) consumes the ordered TaskState sequence
//! ```
//!
//! Pixels come from a [`pageshot_core::render::RenderEngine`]; production
//! uses the HTTP delegate in [`delegate`], tests use a scripted fake.

pub mod batch;
pub mod cancel;
pub mod delegate;
pub mod executor;
pub mod progress;

#[cfg(test)]
pub(crate) mod testutil;

pub use batch::BatchCoordinator;
pub use cancel::{cancel_pair, CancelFlag, CancelHandle};
pub use delegate::HttpRenderEngine;
pub use executor::CaptureExecutor;
pub use progress::{ProgressHub, ProgressSink};
