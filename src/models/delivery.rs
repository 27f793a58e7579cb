use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::channel::Channel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub notification_id: i64,
    pub email_id: String,
    pub email_subject: String,
    pub message: String,

    #[serde(default)]
    pub email_attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRequest {
    pub notification_id: i64,
    pub mobile_number: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub notification_id: i64,
    pub title: String,
    pub message: String,

    #[serde(default)]
    pub action: String,
}

/// A delivery request as carried on a channel stream.
///
/// On the wire each channel topic carries the bare inner JSON; the channel that
/// consumes the topic decides which variant to decode.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelRequest {
    Email(EmailRequest),
    Sms(SmsRequest),
    Push(PushRequest),
}

impl ChannelRequest {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelRequest::Email(_) => Channel::Email,
            ChannelRequest::Sms(_) => Channel::Sms,
            ChannelRequest::Push(_) => Channel::Push,
        }
    }

    pub fn notification_id(&self) -> i64 {
        match self {
            ChannelRequest::Email(r) => r.notification_id,
            ChannelRequest::Sms(r) => r.notification_id,
            ChannelRequest::Push(r) => r.notification_id,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ChannelRequest::Email(r) => serde_json::to_vec(r),
            ChannelRequest::Sms(r) => serde_json::to_vec(r),
            ChannelRequest::Push(r) => serde_json::to_vec(r),
        }
    }

    pub fn from_payload(channel: Channel, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match channel {
            Channel::Email => ChannelRequest::Email(serde_json::from_slice(payload)?),
            Channel::Sms => ChannelRequest::Sms(serde_json::from_slice(payload)?),
            Channel::Push => ChannelRequest::Push(serde_json::from_slice(payload)?),
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            ChannelRequest::Email(r) => serde_json::to_value(r),
            ChannelRequest::Sms(r) => serde_json::to_value(r),
            ChannelRequest::Push(r) => serde_json::to_value(r),
        }
    }
}

/// What a vendor adapter reports back. Success is any status in 200..300.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorResponse {
    pub status_code: u16,
    pub message: String,
}

impl VendorResponse {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Record published to `<channel-topic>-dlq` by the dead-letter failure path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: Uuid,
    pub channel: Channel,
    pub notification_id: i64,
    pub original_request: serde_json::Value,
    pub status_code: u16,
    pub failure_reason: String,
    pub failed_at: String,
}
