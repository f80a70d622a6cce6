//! Notification policy evaluation and dispatch.
//!
//! Policy: a failure notifies according to `on_failure` (default: always),
//! a success according to `on_success` (default: only on status change).
//! Transport is behind the [`Notifier`] trait; the built-in implementation
//! writes to the structured log, with real delivery delegated externally.

use async_trait::async_trait;
use gantry_domain::{EmailNotifications, NotifyPolicy, Result, RunStatus};
use tracing::info;

/// Contract for delivering a notification to a recipient list.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[String], subject: &str, body: &str) -> Result<()>;
}

/// Whether the declared policy fires for this run.
///
/// Skipped runs never notify. With the `change` policy, a missing previous
/// status counts as a change.
pub fn should_notify(
    email: &EmailNotifications,
    previous: Option<RunStatus>,
    current: RunStatus,
) -> bool {
    let policy = match current {
        RunStatus::Succeeded => email.on_success,
        RunStatus::Failed => email.on_failure,
        RunStatus::Skipped => return false,
    };

    match policy {
        NotifyPolicy::Always => true,
        NotifyPolicy::Never => false,
        NotifyPolicy::Change => previous.map_or(true, |p| p != current),
    }
}

/// Notifier that emits the message as a structured log event.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        info!(
            event = "notification.sent",
            recipients = %recipients.join(", "),
            subject = %subject,
            body_lines = body.lines().count(),
        );
        Ok(())
    }
}
