//! Seams between the pipeline and its collaborators.
//!
//! Production adapters live in `crate::clients`; tests plug in in-memory fakes.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;

use crate::{
    error::TransportError,
    models::{
        delivery::{ChannelRequest, VendorResponse},
        notification::{DeliveryLog, NewDeliveryLog, NewNotification, Notification, User},
        template::Template,
    },
};

/// One record as returned by a poll, detached from the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait PriorityCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_template_by_name(&self, name: &str) -> Result<Option<Template>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn find_notification(&self, id: i64) -> Result<Option<Notification>>;

    /// Oldest notification with this dedup hash, ignoring rows marked failed.
    async fn find_notification_by_hash(&self, hash: &str) -> Result<Option<Notification>>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;

    async fn save_notification(&self, notification: &Notification) -> Result<()>;

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> Result<DeliveryLog>;

    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;
}

#[async_trait]
pub trait LogPublisher: Send + Sync {
    /// Appends one record. `partition: None` lets the broker pick.
    async fn publish(
        &self,
        topic: &str,
        partition: Option<i32>,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError>;
}

#[async_trait]
pub trait LogConsumer: Send {
    /// Waits at most `timeout` and returns whatever the active partitions yielded.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError>;

    /// Marks `record` as processed so a restart resumes after it.
    fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError>;
}

/// Manual partition control over a single topic.
pub trait PartitionConsumer: LogConsumer {
    fn assign(&mut self, topic: &str, partitions: &[i32]) -> Result<(), TransportError>;

    fn unassign(&mut self) -> Result<(), TransportError>;

    /// Log-end offset per partition, in the order given.
    fn end_offsets(&mut self, partitions: &[i32]) -> Result<Vec<i64>, TransportError>;

    /// Offset of the next record this consumer will read from `partition`.
    fn position(&mut self, partition: i32) -> Result<i64, TransportError>;

    fn pause(&mut self, partitions: &[i32]) -> Result<(), TransportError>;

    fn resume(&mut self, partitions: &[i32]) -> Result<(), TransportError>;
}

#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Never fails: transport problems are reported as a non-2xx response.
    async fn send(&self, request: &ChannelRequest) -> VendorResponse;
}

#[async_trait]
pub trait RecordHandler: Send {
    /// Handles one record. Errors are dealt with inside; nothing escapes.
    async fn handle(&mut self, record: &LogRecord);
}

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);
}

/// Wall clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}
