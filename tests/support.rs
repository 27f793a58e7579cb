use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use notification_router::{
    error::TransportError,
    models::{
        channel::Channel,
        delivery::{ChannelRequest, VendorResponse},
        notification::{DeliveryLog, NewDeliveryLog, NewNotification, Notification, User},
        request::{Content, NotificationRequest, Recipient},
        status::NotificationStatus,
        template::Template,
    },
    pipeline::ports::{
        Clock, LogConsumer, LogPublisher, LogRecord, NotificationStore, PartitionConsumer,
        PriorityCache, RecordHandler, TemplateStore, VendorAdapter,
    },
};
use parking_lot::Mutex;
use tokio::time::Instant;

pub fn request(priority: i32, channels: &[&str], user_id: &str) -> NotificationRequest {
    NotificationRequest {
        notification_priority: priority,
        channels: channels.iter().map(|c| c.to_string()).collect(),
        recipient: Recipient {
            user_id: user_id.to_string(),
            user_email: Some(format!("{}@example.com", user_id)),
        },
        content: Content {
            message: Some(format!("Hello {}", user_id)),
            ..Content::default()
        },
    }
}

pub fn template_request(template_name: &str, user_id: &str) -> NotificationRequest {
    let mut request = request(-1, &["email"], user_id);
    request.content.message = None;
    request.content.template_name = Some(template_name.to_string());
    request
}

pub fn template(name: &str, priority: i32, body: &str) -> Template {
    Template {
        name: name.to_string(),
        priority,
        subject: None,
        body: body.to_string(),
    }
}

#[derive(Default)]
struct TopicLog {
    partitions: HashMap<i32, Vec<LogRecord>>,
}

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    fail_publishes: bool,
    poll_errors: VecDeque<TransportError>,
    fail_assign: bool,
    polls: Vec<BTreeSet<i32>>,
    committed: Vec<(i32, i64)>,
}

/// Partitioned append-only log shared by publishers and consumers.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, topic: &str, partition: i32, payload: &[u8]) -> i64 {
        let mut state = self.state.lock();
        let log = state
            .topics
            .entry(topic.to_string())
            .or_default()
            .partitions
            .entry(partition)
            .or_default();

        let offset = log.len() as i64;
        log.push(LogRecord {
            topic: topic.to_string(),
            partition,
            offset,
            key: None,
            payload: payload.to_vec(),
        });
        offset
    }

    pub fn records(&self, topic: &str, partition: i32) -> Vec<LogRecord> {
        self.state
            .lock()
            .topics
            .get(topic)
            .and_then(|log| log.partitions.get(&partition))
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_records(&self, topic: &str) -> Vec<LogRecord> {
        let state = self.state.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };

        let mut partitions: Vec<_> = log.partitions.keys().copied().collect();
        partitions.sort();
        partitions
            .into_iter()
            .flat_map(|p| log.partitions[&p].clone())
            .collect()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().fail_publishes = fail;
    }

    pub fn fail_assign(&self, fail: bool) {
        self.state.lock().fail_assign = fail;
    }

    pub fn push_poll_error(&self, error: TransportError) {
        self.state.lock().poll_errors.push_back(error);
    }

    /// Partitions that were active at each poll, in poll order.
    pub fn polls(&self) -> Vec<BTreeSet<i32>> {
        self.state.lock().polls.clone()
    }

    pub fn committed(&self) -> Vec<(i32, i64)> {
        self.state.lock().committed.clone()
    }

    pub fn consumer(&self, max_poll_records: usize) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            topic: None,
            partitions: Vec::new(),
            positions: HashMap::new(),
            paused: BTreeSet::new(),
            max_poll_records,
        }
    }
}

#[async_trait]
impl LogPublisher for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        partition: Option<i32>,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        if self.state.lock().fail_publishes {
            return Err(TransportError::transient("broker unavailable"));
        }

        let partition = partition.unwrap_or(0);
        let offset = self.append(topic, partition, payload);

        if let Some(key) = key {
            let mut state = self.state.lock();
            if let Some(record) = state
                .topics
                .get_mut(topic)
                .and_then(|log| log.partitions.get_mut(&partition))
                .and_then(|records| records.get_mut(offset as usize))
            {
                record.key = Some(key.as_bytes().to_vec());
            }
        }

        Ok(())
    }
}

/// Consumer over [`InMemoryBroker`]. Without pausing it drains the lowest
/// priority partition first, so ordering in tests comes from the scheduler.
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    topic: Option<String>,
    partitions: Vec<i32>,
    positions: HashMap<i32, i64>,
    paused: BTreeSet<i32>,
    max_poll_records: usize,
}

impl InMemoryConsumer {
    pub fn subscribe(&mut self, topic: &str, partitions: &[i32]) {
        self.topic = Some(topic.to_string());
        self.partitions = partitions.to_vec();
        self.positions = partitions.iter().map(|p| (*p, 0)).collect();
    }

    pub fn paused(&self) -> BTreeSet<i32> {
        self.paused.clone()
    }

    fn take_available(&mut self) -> Result<Vec<LogRecord>, TransportError> {
        let mut state = self.broker.state.lock();

        if let Some(error) = state.poll_errors.pop_front() {
            return Err(error);
        }

        let active: BTreeSet<i32> = self
            .partitions
            .iter()
            .copied()
            .filter(|p| !self.paused.contains(p))
            .collect();
        state.polls.push(active.clone());

        let Some(topic) = self.topic.as_ref().and_then(|t| state.topics.get(t)) else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for partition in active.iter().rev() {
            let Some(log) = topic.partitions.get(partition) else {
                continue;
            };
            let position = self.positions.get(partition).copied().unwrap_or_default();

            for record in log.iter().skip(position as usize) {
                if records.len() >= self.max_poll_records {
                    break;
                }
                records.push(record.clone());
            }
        }

        for record in &records {
            self.positions.insert(record.partition, record.offset + 1);
        }

        Ok(records)
    }
}

#[async_trait]
impl LogConsumer for InMemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError> {
        let records = self.take_available()?;

        if records.is_empty() {
            tokio::time::sleep(timeout).await;
        }

        Ok(records)
    }

    fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError> {
        self.broker
            .state
            .lock()
            .committed
            .push((record.partition, record.offset));
        Ok(())
    }
}

impl PartitionConsumer for InMemoryConsumer {
    fn assign(&mut self, topic: &str, partitions: &[i32]) -> Result<(), TransportError> {
        if self.broker.state.lock().fail_assign {
            return Err(TransportError::transient("assignment refused"));
        }

        self.subscribe(topic, partitions);
        self.paused.clear();
        Ok(())
    }

    fn unassign(&mut self) -> Result<(), TransportError> {
        self.partitions.clear();
        self.positions.clear();
        self.paused.clear();
        Ok(())
    }

    fn end_offsets(&mut self, partitions: &[i32]) -> Result<Vec<i64>, TransportError> {
        let topic = self.topic.clone().unwrap_or_default();

        Ok(partitions
            .iter()
            .map(|p| self.broker.records(&topic, *p).len() as i64)
            .collect())
    }

    fn position(&mut self, partition: i32) -> Result<i64, TransportError> {
        self.positions
            .get(&partition)
            .copied()
            .ok_or_else(|| TransportError::transient(format!("partition {} not assigned", partition)))
    }

    fn pause(&mut self, partitions: &[i32]) -> Result<(), TransportError> {
        self.paused.extend(partitions.iter().copied());
        Ok(())
    }

    fn resume(&mut self, partitions: &[i32]) -> Result<(), TransportError> {
        for partition in partitions {
            self.paused.remove(partition);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Duration)>>,
    pub gets: AtomicU32,
    pub sets: AtomicU32,
    pub fail: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), Duration::ZERO));
    }

    pub fn entry(&self, key: &str) -> Option<(String, Duration)> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl PriorityCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("cache unavailable"));
        }
        Ok(self.entries.lock().get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("cache unavailable"));
        }
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), ttl));
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    templates: HashMap<String, Template>,
    users: HashMap<String, User>,
    notifications: Vec<Notification>,
    logs: Vec<DeliveryLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    pub template_lookups: AtomicU32,
    pub fail_templates: AtomicBool,
    pub fail_saves: AtomicBool,
    pub fail_logs: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, template: Template) {
        self.state
            .lock()
            .templates
            .insert(template.name.clone(), template);
    }

    pub fn add_user(&self, user_id: &str, email: Option<&str>, phone: Option<&str>) {
        self.state.lock().users.insert(
            user_id.to_string(),
            User {
                user_id: user_id.to_string(),
                name: user_id.to_string(),
                email: email.map(str::to_string),
                phone: phone.map(str::to_string),
            },
        );
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }

    pub fn notification(&self, id: i64) -> Option<Notification> {
        self.state
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn delivery_logs(&self) -> Vec<DeliveryLog> {
        self.state.lock().logs.clone()
    }

    pub fn remove_notification(&self, id: i64) {
        self.state.lock().notifications.retain(|n| n.id != id);
    }

    pub fn seed_notification(&self, user_id: &str, channel: Channel, message: &str) -> i64 {
        let new = NewNotification::pending(user_id.to_string(), channel, message.to_string());
        let mut state = self.state.lock();
        let id = state.notifications.len() as i64 + 1;
        state.notifications.push(Notification {
            id,
            user_id: new.user_id,
            channel: new.channel,
            status: NotificationStatus::Pending,
            message: new.message,
            hash: new.hash,
        });
        id
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn find_template_by_name(&self, name: &str) -> Result<Option<Template>> {
        self.template_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_templates.load(Ordering::SeqCst) {
            return Err(anyhow!("template store unavailable"));
        }
        Ok(self.state.lock().templates.get(name).cloned())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn find_notification(&self, id: i64) -> Result<Option<Notification>> {
        Ok(self.notification(id))
    }

    async fn find_notification_by_hash(&self, hash: &str) -> Result<Option<Notification>> {
        Ok(self
            .state
            .lock()
            .notifications
            .iter()
            .find(|n| n.hash == hash && n.status != NotificationStatus::Failed)
            .cloned())
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let mut state = self.state.lock();
        let id = state.notifications.iter().map(|n| n.id).max().unwrap_or(0) + 1;
        let stored = Notification {
            id,
            user_id: notification.user_id,
            channel: notification.channel,
            status: NotificationStatus::Pending,
            message: notification.message,
            hash: notification.hash,
        };
        state.notifications.push(stored.clone());
        Ok(stored)
    }

    async fn save_notification(&self, notification: &Notification) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("store unavailable"));
        }
        let mut state = self.state.lock();
        let existing = state
            .notifications
            .iter_mut()
            .find(|n| n.id == notification.id)
            .ok_or_else(|| anyhow!("notification {} missing", notification.id))?;
        *existing = notification.clone();
        Ok(())
    }

    async fn append_delivery_log(&self, log: NewDeliveryLog) -> Result<DeliveryLog> {
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(anyhow!("store unavailable"));
        }
        let mut state = self.state.lock();
        let stored = DeliveryLog {
            id: state.logs.len() as i64 + 1,
            notification_id: log.notification_id,
            channel: log.channel,
            status: log.status,
            error_message: log.error_message,
            created_at: chrono::Utc::now(),
        };
        state.logs.push(stored.clone());
        Ok(stored)
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.state.lock().users.get(user_id).cloned())
    }
}

/// Vendor that replays scripted responses (200 once the script runs out).
#[derive(Default)]
pub struct RecordingVendor {
    script: Mutex<VecDeque<VendorResponse>>,
    sent: Mutex<Vec<ChannelRequest>>,
}

impl RecordingVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, responses: &[u16]) {
        self.script.lock().extend(
            responses
                .iter()
                .map(|status| VendorResponse::new(*status, format!("status {}", status))),
        );
    }

    pub fn sent(&self) -> Vec<ChannelRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl VendorAdapter for RecordingVendor {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, request: &ChannelRequest) -> VendorResponse {
        self.sent.lock().push(request.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| VendorResponse::new(200, "ok"))
    }
}

/// Clock that only moves when told to, or when something sleeps on it.
pub struct ManualClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Instant> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }

    async fn sleep_until(&self, deadline: Instant) {
        self.sleeps.lock().push(deadline);
        let mut now = self.now.lock();
        if *now < deadline {
            *now = deadline;
        }
    }
}

/// Handler that remembers what it saw.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Vec<(i32, i64)>,
}

#[async_trait]
impl RecordHandler for RecordingHandler {
    async fn handle(&mut self, record: &LogRecord) {
        self.seen.push((record.partition, record.offset));
    }
}
