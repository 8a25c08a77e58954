//! # Pageshot Scheduler
//!
//! Recurring capture tasks on cron schedules.
//!
//! ## Architecture
//! ```text
//! TaskScheduler (tokio interval tick)
//!   ├── registry: ScheduledTask {request template, cron expr, targets}
//!   ├── due tasks → FIFO fire queue (bounded by max_concurrent)
//!   ├── fire → CaptureExecutor (silent), fixed-delay retry up to budget
//!   │     success → last_run/next_run updated, success notification
//!   │     exhausted → status Error, natural cadence kept
//!   └── NotificationDispatcher → webhook (HTTP POST) / email (SMTP)
//! ```
//!
//! Definitions persist as JSON (`~/.pageshot/scheduler/tasks.json`) and
//! reload at startup. Fires of the same task never overlap; a fire still
//! running at the next natural time skips that slot.

pub mod cron;
pub mod engine;
pub mod notify;
pub mod store;
pub mod tasks;

pub use engine::TaskScheduler;
pub use notify::{EventType, NotificationDispatcher, NotificationEvent};
pub use store::TaskStore;
pub use tasks::{EmailTarget, NotificationSettings, ScheduledTask, TaskStatus, WebhookTarget};
