use std::sync::Arc;

use tracing::{error, info};

use crate::{
    error::RouteError,
    models::{priority::Tier, request::NotificationRequest},
    pipeline::ports::LogPublisher,
};

/// Publishes resolved requests onto the stream dedicated to their tier.
pub struct TierRouter {
    publisher: Arc<dyn LogPublisher>,
}

impl TierRouter {
    pub fn new(publisher: Arc<dyn LogPublisher>) -> Self {
        Self { publisher }
    }

    /// Returns the topic the request landed on. Publish failures are not retried.
    pub async fn route(
        &self,
        request: NotificationRequest,
        tier: Tier,
    ) -> Result<&'static str, RouteError> {
        let request = request.with_tier(tier);
        let payload = serde_json::to_vec(&request)?;
        let topic = tier.topic();

        self.publisher
            .publish(topic, None, None, &payload)
            .await
            .map_err(|source| {
                error!(topic, error = %source, "Failed to forward notification to tier stream");
                RouteError::Publish {
                    topic: topic.to_string(),
                    source,
                }
            })?;

        info!(
            topic,
            priority = %tier,
            user_id = %request.recipient.user_id,
            "Notification forwarded to tier stream"
        );

        Ok(topic)
    }
}
