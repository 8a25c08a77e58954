//! # Pageshot Core
//!
//! Shared foundation for the Pageshot capture service: the capture data
//! model, the error taxonomy, configuration, and the render-engine traits
//! that the executor drives.
//!
//! The actual pixel production (headless browser control) lives behind
//! [`render::RenderEngine`] — everything in this workspace treats it as an
//! injected collaborator, never a process-wide singleton.

pub mod config;
pub mod error;
pub mod render;
pub mod types;

pub use config::PageshotConfig;
pub use error::{PageshotError, Result};
pub use types::{
    Authentication, BatchItem, BeforeCapture, CaptureRequest, CaptureResult, FailureKind,
    TaskState, Viewport, ViewportSize,
};
