//! Pageshot error taxonomy.
//!
//! One enum covers the whole workspace: request validation, channel
//! lifecycle, capture phases, scheduling, and delegate failures. The
//! executor maps the capture-phase variants into `TaskState::Failed`
//! events via [`PageshotError::failure_kind`].

use thiserror::Error;

use crate::types::FailureKind;

/// Workspace-wide result alias.
pub type Result<T> = std::result::Result<T, PageshotError>;

#[derive(Debug, Error)]
pub enum PageshotError {
    /// Malformed capture request, rejected before any phase starts.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Cron expression did not validate at scheduling time.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Page navigation exceeded its timeout.
    #[error("navigation timed out after {0}s")]
    NavigationTimeout(u64),

    /// A required selector never appeared or matched nothing.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A click/hover interaction timed out (non-fatal at the executor level).
    #[error("interaction timed out: {0}")]
    InteractionTimeout(String),

    /// Opaque failure surfaced by the render delegate.
    #[error("render delegate: {0}")]
    Delegate(String),

    /// A progress channel is already open for this task id.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    /// No progress channel exists (or it was already reclaimed).
    #[error("unknown task id: {0}")]
    UnknownTaskId(String),

    /// Publish after a terminal event was already emitted.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// The run was cancelled before reaching a terminal state.
    #[error("cancelled")]
    Cancelled,

    /// Configuration load/parse failure.
    #[error("config: {0}")]
    Config(String),

    /// Notification delivery failure (swallowed by the dispatcher).
    #[error("notify: {0}")]
    Notify(String),

    /// Task-store persistence failure.
    #[error("task store: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PageshotError {
    /// Map a capture-phase error onto the wire-visible failure kind.
    /// Channel/scheduler errors have no kind — they never reach a
    /// `TaskState::Failed` event.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidRequest(_) => FailureKind::InvalidRequest,
            Self::NavigationTimeout(_) => FailureKind::NavigationTimeout,
            Self::ElementNotFound(_) => FailureKind::ElementNotFound,
            Self::InteractionTimeout(_) => FailureKind::InteractionTimeout,
            _ => FailureKind::Delegate,
        }
    }
}
