use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    models::{
        channel::Channel,
        delivery::{ChannelRequest, EmailRequest, PushRequest, SmsRequest},
        notification::{NewNotification, User},
        priority::Tier,
        request::NotificationRequest,
        status::NotificationStatus,
    },
    pipeline::ports::{LogConsumer, LogPublisher, NotificationStore, TemplateStore},
};

const DEFAULT_SUBJECT: &str = "Notification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Published { notification_id: i64, partition: i32 },
    Duplicate { notification_id: i64 },
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub outcomes: Vec<(String, ChannelOutcome)>,
}

impl FanOutReport {
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, ChannelOutcome::Published { .. }))
            .count()
    }
}

/// Consumes one tier stream and fans each request out to its channel streams.
///
/// Every channel record is written to partition `tier - 1`, so downstream
/// schedulers recover priority from the partition index alone.
pub struct TierProcessor {
    tier: Tier,
    publisher: Arc<dyn LogPublisher>,
    notifications: Arc<dyn NotificationStore>,
    templates: Arc<dyn TemplateStore>,
    dedup_enabled: bool,
}

impl TierProcessor {
    pub fn new(
        tier: Tier,
        publisher: Arc<dyn LogPublisher>,
        notifications: Arc<dyn NotificationStore>,
        templates: Arc<dyn TemplateStore>,
        dedup_enabled: bool,
    ) -> Self {
        Self {
            tier,
            publisher,
            notifications,
            templates,
            dedup_enabled,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Handles one serialized request. Returns `None` when the message was dropped.
    pub async fn on_message(&self, payload: &[u8]) -> Option<FanOutReport> {
        let request = match serde_json::from_slice::<NotificationRequest>(payload) {
            Ok(request) => request,
            Err(e) => {
                error!(tier = %self.tier, error = %e, "Dropping undecodable notification request");
                return None;
            }
        };

        if request.notification_priority != self.tier.as_i32() {
            warn!(
                tier = %self.tier,
                message_priority = request.notification_priority,
                "Request priority disagrees with its stream, placing by stream tier"
            );
        }

        let message = match self.message_body(&request).await {
            Ok(message) => message,
            Err(e) => {
                error!(
                    tier = %self.tier,
                    user_id = %request.recipient.user_id,
                    error = %e,
                    "Dropping notification request without a deliverable body"
                );
                return None;
            }
        };

        let mut user: Option<Option<User>> = None;
        let mut report = FanOutReport::default();

        for raw_channel in &request.channels {
            let outcome = match self
                .fan_out_channel(&request, raw_channel, &message, &mut user)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(
                        tier = %self.tier,
                        channel = %raw_channel,
                        user_id = %request.recipient.user_id,
                        error = %e,
                        "Channel fan-out failed"
                    );
                    ChannelOutcome::Failed(e.to_string())
                }
            };

            report.outcomes.push((raw_channel.clone(), outcome));
        }

        Some(report)
    }

    async fn fan_out_channel(
        &self,
        request: &NotificationRequest,
        raw_channel: &str,
        message: &str,
        user: &mut Option<Option<User>>,
    ) -> Result<ChannelOutcome, Error> {
        let channel: Channel = raw_channel.parse()?;
        let pending = NewNotification::pending(
            request.recipient.user_id.clone(),
            channel,
            message.to_string(),
        );

        if self.dedup_enabled {
            if let Some(existing) = self
                .notifications
                .find_notification_by_hash(&pending.hash)
                .await?
            {
                warn!(
                    channel = %channel,
                    notification_id = existing.id,
                    "Duplicate notification found, skipping channel"
                );
                return Ok(ChannelOutcome::Duplicate {
                    notification_id: existing.id,
                });
            }
        }

        // A recipient without contact details must not leave a pending row.
        let contact = self.contact_for(channel, request, user).await?;
        let mut notification = self.notifications.insert_notification(pending).await?;
        let channel_request =
            build_channel_request(channel, notification.id, request, message, contact);
        let partition = self.tier.partition();

        let published = match channel_request.to_payload() {
            Ok(payload) => self
                .publisher
                .publish(
                    channel.topic(),
                    Some(partition),
                    Some(&request.recipient.user_id),
                    &payload,
                )
                .await
                .map_err(Error::from),
            Err(e) => Err(e.into()),
        };

        // A row that never reached its channel stream must not block a redelivery.
        if let Err(e) = published {
            notification.status = NotificationStatus::Failed;
            if let Err(save_error) = self.notifications.save_notification(&notification).await {
                error!(
                    channel = %channel,
                    notification_id = notification.id,
                    error = %save_error,
                    "Failed to mark unpublished notification as failed"
                );
            }
            return Err(e);
        }

        info!(
            channel = %channel,
            topic = channel.topic(),
            partition,
            notification_id = notification.id,
            "Notification handed to channel stream"
        );

        Ok(ChannelOutcome::Published {
            notification_id: notification.id,
            partition,
        })
    }

    async fn message_body(&self, request: &NotificationRequest) -> Result<String, Error> {
        let Some(template_name) = request.template_name() else {
            return request
                .literal_message()
                .map(str::to_string)
                .ok_or_else(|| anyhow!("Request carries neither a message nor a template"));
        };

        let template = self
            .templates
            .find_template_by_name(template_name)
            .await?
            .ok_or_else(|| anyhow!("Template with name: {} not found", template_name))?;

        template.render(&request.content.placeholders)
    }

    async fn contact_for(
        &self,
        channel: Channel,
        request: &NotificationRequest,
        user: &mut Option<Option<User>>,
    ) -> Result<Option<String>, Error> {
        match channel {
            Channel::Email => {
                if let Some(email) = request
                    .recipient
                    .user_email
                    .as_deref()
                    .filter(|email| !email.is_empty())
                {
                    return Ok(Some(email.to_string()));
                }

                self.load_user(&request.recipient.user_id, user)
                    .await?
                    .and_then(|u| u.email.clone())
                    .map(Some)
                    .ok_or_else(|| {
                        anyhow!("No email address known for user {}", request.recipient.user_id)
                    })
            }
            Channel::Sms => self
                .load_user(&request.recipient.user_id, user)
                .await?
                .and_then(|u| u.phone.clone())
                .map(Some)
                .ok_or_else(|| {
                    anyhow!("No phone number known for user {}", request.recipient.user_id)
                }),
            Channel::Push => Ok(None),
        }
    }

    async fn load_user<'a>(
        &self,
        user_id: &str,
        user: &'a mut Option<Option<User>>,
    ) -> Result<Option<&'a User>, Error> {
        if user.is_none() {
            debug!(user_id, "Loading recipient contact details");
            *user = Some(self.notifications.find_user(user_id).await?);
        }

        Ok(user.as_ref().and_then(Option::as_ref))
    }

    /// Drives [`TierProcessor::on_message`] from a subscribed consumer until cancelled.
    pub async fn run<C: LogConsumer>(
        &self,
        consumer: &mut C,
        poll_timeout: Duration,
        cancel: CancellationToken,
    ) {
        info!(tier = %self.tier, topic = self.tier.topic(), "Tier processor started");

        while !cancel.is_cancelled() {
            let records = match consumer.poll(poll_timeout).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(tier = %self.tier, error = %e, "Poll failed, retrying next cycle");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(poll_timeout) => continue,
                    }
                }
            };

            for record in &records {
                if let Some(report) = self.on_message(&record.payload).await {
                    debug!(
                        tier = %self.tier,
                        offset = record.offset,
                        published = report.published(),
                        "Tier record processed"
                    );
                }

                if let Err(e) = consumer.commit(record) {
                    warn!(
                        tier = %self.tier,
                        offset = record.offset,
                        error = %e,
                        "Offset commit failed"
                    );
                }
            }
        }

        info!(tier = %self.tier, "Tier processor stopped");
    }
}

fn build_channel_request(
    channel: Channel,
    notification_id: i64,
    request: &NotificationRequest,
    message: &str,
    contact: Option<String>,
) -> ChannelRequest {
    let content = &request.content;

    match channel {
        Channel::Email => ChannelRequest::Email(EmailRequest {
            notification_id,
            email_id: contact.unwrap_or_default(),
            email_subject: content
                .email_subject
                .clone()
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            message: message.to_string(),
            email_attachments: content.email_attachments.clone(),
        }),
        Channel::Sms => ChannelRequest::Sms(SmsRequest {
            notification_id,
            mobile_number: contact.unwrap_or_default(),
            message: message.to_string(),
        }),
        Channel::Push => {
            let push = content.push_notification.clone().unwrap_or_default();

            ChannelRequest::Push(PushRequest {
                notification_id,
                title: if push.title.is_empty() {
                    DEFAULT_SUBJECT.to_string()
                } else {
                    push.title
                },
                message: message.to_string(),
                action: push.action,
            })
        }
    }
}
