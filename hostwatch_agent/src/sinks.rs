//! Collaborator seams: audit trail and operator notifications.
//! Both are fire-and-forget; real delivery transports live outside the agent.

use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: String,
    pub actor: String,
    pub detail: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        detail: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            detail: detail.into(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Default sink: one structured line under the `audit` target.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, e: AuditEntry) {
        info!(
            target: "audit",
            action = %e.action,
            actor = %e.actor,
            source = %e.source,
            detail = %e.detail,
            "control action"
        );
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(target: "notify", %message);
    }
}
