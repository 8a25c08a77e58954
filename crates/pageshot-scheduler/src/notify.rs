//! Notification dispatch — fans a fire lifecycle event out to configured
//! delivery targets. Targets are attempted independently; a failing
//! webhook never blocks the email and vice versa, and nothing here ever
//! fails the originating task run.

use chrono::{DateTime, Utc};
use pageshot_core::config::SmtpConfig;
use pageshot_core::error::{PageshotError, Result};
use serde::{Deserialize, Serialize};

use crate::tasks::{EmailTarget, NotificationSettings, ScheduledTask, WebhookTarget};

const WEBHOOK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Kind of lifecycle event being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Success,
    Error,
    Progress,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Progress => write!(f, "progress"),
        }
    }
}

/// Lifecycle event delivered to notification targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NotificationEvent {
    pub fn success(task: &ScheduledTask, data: serde_json::Value) -> Self {
        Self {
            event_type: EventType::Success,
            task_id: task.id.clone(),
            url: task.request.url.clone(),
            timestamp: Utc::now(),
            data,
            error: None,
        }
    }

    pub fn error(task: &ScheduledTask, message: &str) -> Self {
        Self {
            event_type: EventType::Error,
            task_id: task.id.clone(),
            url: task.request.url.clone(),
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
            error: Some(message.to_string()),
        }
    }
}

/// Fans lifecycle events out to webhook/email targets.
pub struct NotificationDispatcher {
    client: reqwest::Client,
    smtp: SmtpConfig,
}

impl NotificationDispatcher {
    pub fn new(smtp: SmtpConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            smtp,
        }
    }

    /// Attempt every configured target; log failures and keep going.
    pub async fn dispatch(&self, settings: &NotificationSettings, event: &NotificationEvent) {
        if let Some(webhook) = &settings.webhook {
            if let Err(e) = self.send_webhook(webhook, event).await {
                tracing::warn!("⚠️ webhook notification failed for {}: {e}", event.task_id);
            }
        }
        if let Some(email) = &settings.email {
            if let Err(e) = self.send_email(email, event).await {
                tracing::warn!("⚠️ email notification failed for {}: {e}", event.task_id);
            }
        }
    }

    /// POST the raw event payload with the target's configured headers.
    async fn send_webhook(&self, target: &WebhookTarget, event: &NotificationEvent) -> Result<()> {
        let mut req = self
            .client
            .post(&target.url)
            .json(event)
            .timeout(WEBHOOK_TIMEOUT);
        for (key, value) in &target.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PageshotError::Notify(format!("webhook send: {e}")))?;
        if resp.status().is_success() {
            tracing::info!("✅ webhook notification sent to {}", target.url);
            Ok(())
        } else {
            Err(PageshotError::Notify(format!(
                "webhook {}: {}",
                target.url,
                resp.status()
            )))
        }
    }

    /// Compose and send the event as an HTML email via SMTP.
    async fn send_email(&self, target: &EmailTarget, event: &NotificationEvent) -> Result<()> {
        if target.to.is_empty() {
            return Ok(());
        }
        if self.smtp.host.is_empty() {
            return Err(PageshotError::Notify("SMTP not configured".into()));
        }

        use lettre::{
            message::header::ContentType, message::Mailbox,
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Message, Tokio1Executor,
        };

        let subject = target
            .subject
            .clone()
            .unwrap_or_else(|| format!("Screenshot capture {}", event.event_type));
        let body = compose_body(event, target.template.as_deref());

        let from: Mailbox = self
            .smtp
            .from
            .parse()
            .map_err(|e| PageshotError::Notify(format!("invalid from address: {e}")))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for to in &target.to {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| PageshotError::Notify(format!("invalid recipient {to}: {e}")))?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .body(body)
            .map_err(|e| PageshotError::Notify(format!("build email: {e}")))?;

        let creds = Credentials::new(self.smtp.username.clone(), self.smtp.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp.host)
            .map_err(|e| PageshotError::Notify(format!("SMTP relay: {e}")))?
            .port(self.smtp.port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| PageshotError::Notify(format!("SMTP send: {e}")))?;
        tracing::info!("📤 email notification sent to {} recipient(s)", target.to.len());
        Ok(())
    }
}

/// Fill a custom template, or fall back to the default event summary.
fn compose_body(event: &NotificationEvent, template: Option<&str>) -> String {
    if let Some(template) = template {
        return template
            .replace("{{type}}", &event.event_type.to_string())
            .replace("{{url}}", &event.url)
            .replace("{{timestamp}}", &event.timestamp.to_rfc3339());
    }

    let mut body = format!(
        "<h2>Screenshot capture {}</h2>\n\
         <p><strong>Task ID:</strong> {}</p>\n\
         <p><strong>URL:</strong> {}</p>\n\
         <p><strong>Timestamp:</strong> {}</p>\n",
        event.event_type,
        event.task_id,
        event.url,
        event.timestamp.to_rfc3339()
    );
    if let Some(error) = &event.error {
        body.push_str(&format!("<p><strong>Error:</strong> {error}</p>\n"));
    }
    if !event.data.is_null() {
        body.push_str(&format!("<pre>{}</pre>\n", event.data));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageshot_core::types::CaptureRequest;

    fn task() -> ScheduledTask {
        ScheduledTask::new(
            CaptureRequest::for_url("https://example.com"),
            "0 8 * * *",
            NotificationSettings::default(),
        )
    }

    #[test]
    fn test_event_serialization_uses_type_tag() {
        let event = NotificationEvent::success(&task(), serde_json::json!({"sections": 1}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "success");
        assert_eq!(json["url"], "https://example.com");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_custom_template_substitution() {
        let event = NotificationEvent::error(&task(), "navigation timed out after 30s");
        let body = compose_body(&event, Some("{{type}} for {{url}} at {{timestamp}}"));
        assert!(body.starts_with("error for https://example.com at "));
    }

    #[test]
    fn test_default_body_includes_error() {
        let event = NotificationEvent::error(&task(), "boom");
        let body = compose_body(&event, None);
        assert!(body.contains("Screenshot capture error"));
        assert!(body.contains("<strong>Error:</strong> boom"));
    }

    #[tokio::test]
    async fn test_dispatch_with_no_targets_is_noop() {
        let dispatcher = NotificationDispatcher::new(SmtpConfig::default());
        let event = NotificationEvent::success(&task(), serde_json::Value::Null);
        // Must not error or panic — nothing configured, nothing attempted.
        dispatcher
            .dispatch(&NotificationSettings::default(), &event)
            .await;
    }

    #[tokio::test]
    async fn test_email_without_smtp_config_fails_softly() {
        let dispatcher = NotificationDispatcher::new(SmtpConfig::default());
        let settings = NotificationSettings {
            webhook: None,
            email: Some(EmailTarget {
                to: vec!["ops@example.com".into()],
                subject: None,
                template: None,
            }),
        };
        let event = NotificationEvent::error(&task(), "boom");
        // Delivery failure is swallowed (logged), never propagated.
        dispatcher.dispatch(&settings, &event).await;
    }
}
