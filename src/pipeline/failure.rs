//! What happens to a request the vendor did not accept.
//!
//! The delivery handler only knows the [`FailurePath`] trait, so retrying or
//! dead-lettering plug in here without touching scheduling or pacing.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    models::{
        delivery::{ChannelRequest, DeadLetter, VendorResponse},
        retry::RetryConfig,
    },
    pipeline::ports::{LogPublisher, VendorAdapter},
    utils::retry_with_backoff,
};

#[async_trait]
pub trait FailurePath: Send + Sync {
    /// Returns a successful response if the failure was recovered, `None` otherwise.
    async fn handle_failure(
        &self,
        request: &ChannelRequest,
        response: &VendorResponse,
    ) -> Option<VendorResponse>;
}

/// Logs the rejection and leaves the notification as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFailurePath;

#[async_trait]
impl FailurePath for LoggingFailurePath {
    async fn handle_failure(
        &self,
        request: &ChannelRequest,
        response: &VendorResponse,
    ) -> Option<VendorResponse> {
        error!(
            channel = %request.channel(),
            notification_id = request.notification_id(),
            status_code = response.status_code,
            message = %response.message,
            "Delivery failed"
        );
        None
    }
}

/// Republishes the failed request to the channel's dead-letter topic.
pub struct DeadLetterFailurePath {
    publisher: Arc<dyn LogPublisher>,
}

impl DeadLetterFailurePath {
    pub fn new(publisher: Arc<dyn LogPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl FailurePath for DeadLetterFailurePath {
    async fn handle_failure(
        &self,
        request: &ChannelRequest,
        response: &VendorResponse,
    ) -> Option<VendorResponse> {
        let channel = request.channel();
        let topic = channel.dead_letter_topic();

        let original_request = match request.to_json() {
            Ok(value) => value,
            Err(e) => {
                error!(channel = %channel, error = %e, "Cannot encode failed request for dead-lettering");
                return None;
            }
        };

        let dead_letter = DeadLetter {
            id: Uuid::new_v4(),
            channel,
            notification_id: request.notification_id(),
            original_request,
            status_code: response.status_code,
            failure_reason: response.message.clone(),
            failed_at: Utc::now().to_rfc3339(),
        };

        let payload = match serde_json::to_vec(&dead_letter) {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel = %channel, error = %e, "Failed to serialize dead letter");
                return None;
            }
        };

        let key = dead_letter.notification_id.to_string();

        match self
            .publisher
            .publish(&topic, None, Some(&key), &payload)
            .await
        {
            Ok(()) => warn!(
                topic = %topic,
                notification_id = dead_letter.notification_id,
                dead_letter_id = %dead_letter.id,
                status_code = response.status_code,
                "Failed delivery moved to dead-letter topic"
            ),
            Err(e) => error!(
                topic = %topic,
                notification_id = dead_letter.notification_id,
                error = %e,
                "Failed to publish dead letter, failure is only logged"
            ),
        }

        None
    }
}

/// Re-sends with exponential backoff, then hands over to `fallback`.
pub struct RetryingFailurePath {
    vendor: Arc<dyn VendorAdapter>,
    retry_config: RetryConfig,
    fallback: Arc<dyn FailurePath>,
}

impl RetryingFailurePath {
    pub fn new(
        vendor: Arc<dyn VendorAdapter>,
        retry_config: RetryConfig,
        fallback: Arc<dyn FailurePath>,
    ) -> Self {
        Self {
            vendor,
            retry_config,
            fallback,
        }
    }
}

#[async_trait]
impl FailurePath for RetryingFailurePath {
    async fn handle_failure(
        &self,
        request: &ChannelRequest,
        response: &VendorResponse,
    ) -> Option<VendorResponse> {
        let vendor = &self.vendor;

        let result = retry_with_backoff(&self.retry_config, || async move {
            let response = vendor.send(request).await;
            if response.is_success() {
                Ok(response)
            } else {
                Err(VendorRejection(response))
            }
        })
        .await;

        match result {
            Ok(recovered) => {
                info!(
                    channel = %request.channel(),
                    notification_id = request.notification_id(),
                    vendor = vendor.name(),
                    "Delivery recovered on retry"
                );
                Some(recovered)
            }
            Err(VendorRejection(last)) => {
                warn!(
                    channel = %request.channel(),
                    notification_id = request.notification_id(),
                    first_status = response.status_code,
                    last_status = last.status_code,
                    "Retries exhausted, handing over to fallback"
                );
                self.fallback.handle_failure(request, &last).await
            }
        }
    }
}

struct VendorRejection(VendorResponse);

impl std::fmt::Display for VendorRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vendor returned {}: {}", self.0.status_code, self.0.message)
    }
}
