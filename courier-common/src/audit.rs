//! Audit logging for queue lifecycle events
//!
//! Every record passes through the same handful of events, each emitted as a
//! structured `tracing` event on the `audit` target:
//!
//! - `Enqueued`: a recipient of an accepted message was queued
//! - `RetryScheduled`: an attempt failed transiently and the record stays queued
//! - `Finalized`: the record was resolved and moved to the status store
//!
//! Sender and recipient addresses can be redacted (local part only) through
//! [`AuditConfig`].

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for queue lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact sender email addresses from audit logs
    #[serde(default)]
    pub redact_sender: bool,

    /// Redact recipient email addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_sender: false,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = email.rsplit_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

/// Emits audit events according to its configuration.
///
/// Handed to the components that need it rather than kept in a global.
#[derive(Debug, Clone, Default)]
pub struct Auditor {
    config: AuditConfig,
}

impl Auditor {
    #[must_use]
    pub const fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Logged once per recipient when an accepted message is queued.
    pub fn enqueued(&self, queue_id: &str, message_id: &str, sender: &str, recipient: &str, size: usize) {
        if !self.config.enabled {
            return;
        }

        let sender = redact_email(sender, self.config.redact_sender);
        let recipient = redact_email(recipient, self.config.redact_recipients);

        tracing::event!(
            target: "audit",
            tracing::Level::INFO,
            event = "Enqueued",
            queue_id = %queue_id,
            message_id = %message_id,
            sender = %sender,
            recipient = %recipient,
            size = size,
            "Audit: Recipient queued for delivery"
        );
    }

    /// Logged when a transient failure leaves the record queued.
    pub fn retry_scheduled(&self, queue_id: &str, recipient: &str, outcome: &str, repeat_count: u32) {
        if !self.config.enabled {
            return;
        }

        let recipient = redact_email(recipient, self.config.redact_recipients);

        tracing::event!(
            target: "audit",
            tracing::Level::INFO,
            event = "RetryScheduled",
            queue_id = %queue_id,
            recipient = %recipient,
            outcome = %outcome,
            repeat_count = repeat_count,
            "Audit: Delivery attempt failed, retry scheduled"
        );
    }

    /// Logged when a record is moved to the status store.
    pub fn finalized(
        &self,
        queue_id: &str,
        recipient: &str,
        outcome: &str,
        resolution: &str,
        repeat_count: u32,
    ) {
        if !self.config.enabled {
            return;
        }

        let recipient = redact_email(recipient, self.config.redact_recipients);

        tracing::event!(
            target: "audit",
            tracing::Level::INFO,
            event = "Finalized",
            queue_id = %queue_id,
            recipient = %recipient,
            outcome = %outcome,
            resolution = %resolution,
            repeat_count = repeat_count,
            "Audit: Delivery resolved"
        );
    }
}
