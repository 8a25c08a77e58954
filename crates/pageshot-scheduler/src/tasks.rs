//! Scheduled task definitions — the registry's data model.

use chrono::{DateTime, Utc};
use pageshot_core::types::CaptureRequest;
use serde::{Deserialize, Serialize};

/// A recurring capture task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique task ID.
    pub id: String,
    /// Capture request fired on each run (URL included).
    pub request: CaptureRequest,
    /// Cron expression, validated at scheduling time.
    pub schedule: String,
    /// Where to report fire outcomes.
    #[serde(default)]
    pub notifications: NotificationSettings,
    /// Current status.
    pub status: TaskStatus,
    /// Last completed fire.
    pub last_run: Option<DateTime<Utc>>,
    /// Next natural fire time per the cron schedule.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// How many fires have run (including failed ones).
    #[serde(default)]
    pub run_count: u32,
}

/// Task status.
///
/// `Error` marks a fire whose retry budget was exhausted; the task stays
/// scheduled for its next natural fire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Error,
}

/// Delivery targets for fire notifications. Empty settings mean no
/// notifications for this task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailTarget>,
}

impl NotificationSettings {
    pub fn is_empty(&self) -> bool {
        self.webhook.is_none() && self.email.is_none()
    }
}

/// Generic HTTP webhook — POST with the JSON event body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// Email delivery target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTarget {
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Optional body template; `{{type}}`, `{{url}}`, `{{timestamp}}` are
    /// substituted.
    #[serde(default)]
    pub template: Option<String>,
}

impl ScheduledTask {
    /// Create a new Active task. The caller validates the schedule and
    /// computes `next_run`.
    pub fn new(
        request: CaptureRequest,
        schedule: &str,
        notifications: NotificationSettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            schedule: schedule.to_string(),
            notifications,
            status: TaskStatus::Active,
            last_run: None,
            next_run: None,
            created_at: now,
            updated_at: now,
            run_count: 0,
        }
    }

    /// Whether this task is due to fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status != TaskStatus::Paused && matches!(self.next_run, Some(next) if next <= now)
    }
}
