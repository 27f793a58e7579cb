use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::ValidationError,
    models::{
        channel::Channel,
        priority::{Tier, UNASSIGNED_PRIORITY, requested_tier},
    },
};

fn unassigned() -> i32 {
    UNASSIGNED_PRIORITY
}

/// A notification as accepted at ingress and carried on the tier streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// 1, 2, 3, or -1 when the resolver should decide.
    #[serde(default = "unassigned")]
    pub notification_priority: i32,
    pub channels: Vec<String>,
    pub recipient: Recipient,
    pub content: Content,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,

    #[serde(default)]
    pub placeholders: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_subject: Option<String>,

    #[serde(default)]
    pub email_attachments: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_notification: Option<PushContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushContent {
    pub title: String,

    #[serde(default)]
    pub action: String,
}

impl NotificationRequest {
    pub fn requested_tier(&self) -> Result<Option<Tier>, ValidationError> {
        requested_tier(self.notification_priority)
    }

    /// Parses every requested channel, failing on the first unknown one.
    pub fn parsed_channels(&self) -> Result<Vec<Channel>, ValidationError> {
        if self.channels.is_empty() {
            return Err(ValidationError::NoChannels);
        }

        self.channels.iter().map(|c| c.parse()).collect()
    }

    /// Template name, if the request references a non-empty one.
    pub fn template_name(&self) -> Option<&str> {
        self.content
            .template_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    pub fn literal_message(&self) -> Option<&str> {
        self.content
            .message
            .as_deref()
            .filter(|message| !message.is_empty())
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.notification_priority = tier.as_i32();
        self
    }
}
