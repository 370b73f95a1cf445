//! Notification delivery seam used by the alert agent.

use async_trait::async_trait;
use railmind_common::Channel;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Rendered content for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    /// Email subject or push title. Unused for SMS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

impl NotificationContent {
    pub fn body(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("recipient '{0}' rejected")]
    Rejected(String),

    #[error("{channel} gateway unavailable: {reason}")]
    Unavailable { channel: Channel, reason: String },
}

/// Sends one piece of content to one recipient over one channel.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn deliver(
        &self,
        channel: Channel,
        recipient: &str,
        content: &NotificationContent,
    ) -> Result<(), DeliveryError>;
}

/// Logs each delivery and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunGateway;

#[async_trait]
impl NotificationGateway for DryRunGateway {
    async fn deliver(
        &self,
        channel: Channel,
        recipient: &str,
        content: &NotificationContent,
    ) -> Result<(), DeliveryError> {
        info!(
            channel = %channel,
            recipient,
            subject = content.subject.as_deref().unwrap_or(""),
            body_len = content.body.len(),
            "Dry-run notification"
        );
        Ok(())
    }
}
