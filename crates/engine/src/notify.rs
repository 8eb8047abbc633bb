// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator notifications for needs-attention escalations.
//!
//! The runner hands the notifier the full escalation context so the
//! notification itself tells the operator what went wrong and which
//! recovery choices the dashboard will offer.

use async_trait::async_trait;
use sf_core::{OrchestrationId, RecoveryOption};

/// What the operator needs to know when an orchestration escalates.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationNotice {
    pub orchestration_id: OrchestrationId,
    pub issue: String,
    pub options: Vec<RecoveryOption>,
}

impl EscalationNotice {
    pub fn new(
        orchestration_id: OrchestrationId,
        issue: impl Into<String>,
        options: Vec<RecoveryOption>,
    ) -> Self {
        Self { orchestration_id, issue: issue.into(), options }
    }

    pub fn title(&self) -> String {
        format!("Orchestration {} needs attention", self.orchestration_id.short(8))
    }

    /// Body line: the issue plus the recovery choices on offer.
    pub fn body(&self) -> String {
        if self.options.is_empty() {
            return self.issue.clone();
        }
        let choices =
            self.options.iter().map(|o| o.to_string()).collect::<Vec<_>>().join(" / ");
        format!("{} (choose: {})", self.issue, choices)
    }
}

/// Delivers escalation notices to the operator.
///
/// Delivery is best-effort: a lost notification must never stall the
/// runner, so implementations log failures instead of returning them.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn escalated(&self, notice: &EscalationNotice);
}

/// Desktop notifications via notify-rust.
#[derive(Clone, Copy, Debug, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        // macOS: pre-set the bundle identifier so the notification center
        // path never runs the AppleScript bundle lookup, which hangs in
        // daemon processes without Automation permissions.
        #[cfg(target_os = "macos")]
        {
            let _ = mac_notification_sys::set_application("com.apple.Terminal");
        }
        Self
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn escalated(&self, notice: &EscalationNotice) {
        let title = notice.title();
        let body = notice.body();
        // show() blocks on some platforms; keep it off the runner's thread.
        let result = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new().summary(&title).body(&body).show().map(|_| ())
        })
        .await;
        match result {
            Ok(Ok(())) => {
                tracing::info!(orchestration_id = %notice.orchestration_id, "escalation notice sent");
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    orchestration_id = %notice.orchestration_id,
                    error = %e,
                    "escalation notice failed"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "notification task failed");
            }
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
