use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
    models::{
        channel::Channel,
        delivery::{ChannelRequest, VendorResponse},
        notification::NewDeliveryLog,
        status::NotificationStatus,
    },
    pipeline::{
        failure::FailurePath,
        pacer::RatePacer,
        ports::{LogRecord, NotificationStore, RecordHandler, VendorAdapter},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Vendor accepted; `recovered` is set when the failure path got it through.
    Delivered { notification_id: i64, recovered: bool },
    /// Vendor accepted but the notification row is gone.
    NotificationMissing { notification_id: i64 },
    Failed { notification_id: i64, status_code: u16 },
}

/// Sends one request and records the result against its notification.
pub struct DeliveryOutcomeHandler {
    vendor: Arc<dyn VendorAdapter>,
    notifications: Arc<dyn NotificationStore>,
    failure_path: Arc<dyn FailurePath>,
}

impl DeliveryOutcomeHandler {
    pub fn new(
        vendor: Arc<dyn VendorAdapter>,
        notifications: Arc<dyn NotificationStore>,
        failure_path: Arc<dyn FailurePath>,
    ) -> Self {
        Self {
            vendor,
            notifications,
            failure_path,
        }
    }

    pub async fn deliver(&self, request: &ChannelRequest) -> DeliveryOutcome {
        let notification_id = request.notification_id();
        let response = self.vendor.send(request).await;

        if response.is_success() {
            return self.record_success(request, &response, false).await;
        }

        warn!(
            channel = %request.channel(),
            notification_id,
            vendor = self.vendor.name(),
            status_code = response.status_code,
            "Vendor rejected delivery"
        );

        match self.failure_path.handle_failure(request, &response).await {
            Some(recovered) if recovered.is_success() => {
                self.record_success(request, &recovered, true).await
            }
            _ => DeliveryOutcome::Failed {
                notification_id,
                status_code: response.status_code,
            },
        }
    }

    async fn record_success(
        &self,
        request: &ChannelRequest,
        response: &VendorResponse,
        recovered: bool,
    ) -> DeliveryOutcome {
        let notification_id = request.notification_id();
        let channel = request.channel();

        let mut notification = match self.notifications.find_notification(notification_id).await {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                error!(
                    channel = %channel,
                    notification_id,
                    "Delivered notification not found, status left untouched"
                );
                return DeliveryOutcome::NotificationMissing { notification_id };
            }
            Err(e) => {
                error!(
                    channel = %channel,
                    notification_id,
                    error = %e,
                    "Failed to load delivered notification"
                );
                return DeliveryOutcome::NotificationMissing { notification_id };
            }
        };

        notification.status = NotificationStatus::Sent;
        if let Err(e) = self.notifications.save_notification(&notification).await {
            error!(
                channel = %channel,
                notification_id,
                error = %e,
                "Vendor delivered but status update failed"
            );
        }

        let log = NewDeliveryLog::new(notification_id, channel, NotificationStatus::Sent);
        if let Err(e) = self.notifications.append_delivery_log(log).await {
            error!(
                channel = %channel,
                notification_id,
                error = %e,
                "Vendor delivered but delivery log write failed"
            );
        }

        info!(
            channel = %channel,
            notification_id,
            status_code = response.status_code,
            recovered,
            "Notification delivered"
        );

        DeliveryOutcome::Delivered {
            notification_id,
            recovered,
        }
    }
}

/// Record handler for one channel stream: decode, deliver, pace.
pub struct ChannelDispatcher {
    channel: Channel,
    handler: DeliveryOutcomeHandler,
    pacer: RatePacer,
}

impl ChannelDispatcher {
    pub fn new(channel: Channel, handler: DeliveryOutcomeHandler, pacer: RatePacer) -> Self {
        Self {
            channel,
            handler,
            pacer,
        }
    }

    pub fn pacer(&self) -> &RatePacer {
        &self.pacer
    }
}

#[async_trait]
impl RecordHandler for ChannelDispatcher {
    async fn handle(&mut self, record: &LogRecord) {
        let request = match ChannelRequest::from_payload(self.channel, &record.payload) {
            Ok(request) => request,
            Err(e) => {
                error!(
                    channel = %self.channel,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Dropping undecodable channel request"
                );
                return;
            }
        };

        self.handler.deliver(&request).await;
        self.pacer.admit().await;
    }
}
