use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{channel::Channel, status::NotificationStatus};

/// One persisted notification row. Each channel of a request gets its own row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub message: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: String,
    pub channel: Channel,
    pub message: String,
    pub hash: String,
}

impl NewNotification {
    pub fn pending(user_id: String, channel: Channel, message: String) -> Self {
        let hash = notification_hash(&user_id, channel, &message);

        Self {
            user_id,
            channel,
            message,
            hash,
        }
    }
}

/// Dedup key for a notification: same user, channel and body hash the same.
pub fn notification_hash(user_id: &str, channel: Channel, message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(channel.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(message.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub notification_id: i64,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDeliveryLog {
    pub notification_id: i64,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub error_message: String,
}

impl NewDeliveryLog {
    pub fn new(notification_id: i64, channel: Channel, status: NotificationStatus) -> Self {
        Self {
            notification_id,
            channel,
            status,
            error_message: String::new(),
        }
    }
}

/// Contact details looked up when a request does not carry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}
