use std::{collections::HashMap, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::FutureExt;
use rdkafka::{
    ClientConfig, Message, Offset, TopicPartitionList,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::KafkaError,
    message::BorrowedMessage,
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::TransportError,
    pipeline::ports::{LogConsumer, LogPublisher, LogRecord, PartitionConsumer},
};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

fn transport_error(context: &str, e: KafkaError) -> TransportError {
    match e {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => {
            TransportError::fatal(format!("{}: {}", context, e))
        }
        e => TransportError::transient(format!("{}: {}", context, e)),
    }
}

pub struct KafkaProducerClient {
    producer: FutureProducer,
    publish_timeout: Duration,
}

impl KafkaProducerClient {
    pub fn connect(config: &Config) -> Result<Self, Error> {
        info!(bootstrap_servers = %config.kafka_bootstrap_servers, "Creating Kafka producer");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("message.timeout.ms", config.kafka_publish_timeout_ms.to_string())
            .set("acks", "all")
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka producer: {}", e))?;

        Ok(Self {
            producer,
            publish_timeout: config.publish_timeout(),
        })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        let producer = self.producer.clone();

        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, METADATA_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| anyhow!("Metadata task failed: {}", e))?
        .map_err(|e| anyhow!("Kafka metadata request failed: {}", e))
    }
}

#[async_trait]
impl LogPublisher for KafkaProducerClient {
    async fn publish(
        &self,
        topic: &str,
        partition: Option<i32>,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).payload(payload);

        if let Some(key) = key {
            record = record.key(key);
        }

        if let Some(partition) = partition {
            record = record.partition(partition);
        }

        self.producer
            .send(record, Timeout::After(self.publish_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| transport_error(&format!("Publish to {} failed", topic), e))?;

        debug!(topic, ?partition, bytes = payload.len(), "Record published");

        Ok(())
    }
}

/// Consumer over either a subscription (tier processors) or a static
/// assignment (channel schedulers).
///
/// Positions are tracked locally: seeded from the committed offset (or the
/// low watermark) on assignment and advanced past every record returned.
pub struct KafkaLogConsumer {
    consumer: StreamConsumer,
    topic: Option<String>,
    positions: HashMap<i32, i64>,
    max_poll_records: usize,
}

impl KafkaLogConsumer {
    pub fn connect(config: &Config, group_id: &str) -> Result<Self, Error> {
        info!(
            bootstrap_servers = %config.kafka_bootstrap_servers,
            group_id,
            "Creating Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka consumer: {}", e))?;

        Ok(Self {
            consumer,
            topic: None,
            positions: HashMap::new(),
            max_poll_records: config.kafka_max_poll_records.max(1),
        })
    }

    pub fn subscribe(&mut self, topic: &str) -> Result<(), Error> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| anyhow!("Failed to subscribe to {}: {}", topic, e))?;
        self.topic = Some(topic.to_string());

        info!(topic, "Subscribed to topic");

        Ok(())
    }

    fn assigned_topic(&self) -> Result<&str, TransportError> {
        self.topic
            .as_deref()
            .ok_or_else(|| TransportError::fatal("Consumer has no topic assigned"))
    }

    fn partition_list(&self, partitions: &[i32]) -> Result<TopicPartitionList, TransportError> {
        let topic = self.assigned_topic()?;
        let mut tpl = TopicPartitionList::new();

        for partition in partitions {
            tpl.add_partition(topic, *partition);
        }

        Ok(tpl)
    }

    fn starting_offsets(
        &self,
        topic: &str,
        partitions: &[i32],
    ) -> Result<HashMap<i32, i64>, TransportError> {
        let mut request = TopicPartitionList::new();
        for partition in partitions {
            request.add_partition(topic, *partition);
        }

        let committed = tokio::task::block_in_place(|| {
            self.consumer.committed_offsets(request, METADATA_TIMEOUT)
        })
        .map_err(|e| transport_error("Committed offset lookup failed", e))?;

        let mut offsets = HashMap::with_capacity(partitions.len());

        for partition in partitions {
            let committed = committed
                .find_partition(topic, *partition)
                .and_then(|elem| match elem.offset() {
                    Offset::Offset(offset) => Some(offset),
                    _ => None,
                });

            let offset = match committed {
                Some(offset) => offset,
                None => {
                    let (low, _) = tokio::task::block_in_place(|| {
                        self.consumer
                            .fetch_watermarks(topic, *partition, METADATA_TIMEOUT)
                    })
                    .map_err(|e| transport_error("Watermark lookup failed", e))?;
                    low
                }
            };

            offsets.insert(*partition, offset);
        }

        Ok(offsets)
    }
}

fn detach(message: &BorrowedMessage<'_>) -> LogRecord {
    LogRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<LogRecord>, TransportError> {
        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(result) => detach(&result.map_err(|e| transport_error("Poll failed", e))?),
        };

        let mut records = vec![first];

        while records.len() < self.max_poll_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => records.push(detach(&message)),
                Some(Err(e)) => {
                    warn!(error = %e, "Consumer error while draining batch");
                    break;
                }
                None => break,
            }
        }

        for record in &records {
            self.positions.insert(record.partition, record.offset + 1);
        }

        Ok(records)
    }

    fn commit(&mut self, record: &LogRecord) -> Result<(), TransportError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| transport_error("Invalid commit offset", e))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| transport_error("Offset commit failed", e))
    }
}

impl PartitionConsumer for KafkaLogConsumer {
    fn assign(&mut self, topic: &str, partitions: &[i32]) -> Result<(), TransportError> {
        let offsets = self.starting_offsets(topic, partitions)?;

        let mut tpl = TopicPartitionList::new();
        for partition in partitions {
            let offset = offsets.get(partition).copied().unwrap_or_default();
            tpl.add_partition_offset(topic, *partition, Offset::Offset(offset))
                .map_err(|e| transport_error("Invalid starting offset", e))?;
        }

        self.consumer
            .assign(&tpl)
            .map_err(|e| transport_error("Partition assignment failed", e))?;

        info!(topic, partitions = ?partitions, offsets = ?offsets, "Partitions assigned");

        self.topic = Some(topic.to_string());
        self.positions = offsets;

        Ok(())
    }

    fn unassign(&mut self) -> Result<(), TransportError> {
        self.consumer
            .unassign()
            .map_err(|e| transport_error("Unassign failed", e))?;
        self.positions.clear();

        Ok(())
    }

    fn end_offsets(&mut self, partitions: &[i32]) -> Result<Vec<i64>, TransportError> {
        let topic = self.assigned_topic()?;

        partitions
            .iter()
            .map(|partition| {
                tokio::task::block_in_place(|| {
                    self.consumer
                        .fetch_watermarks(topic, *partition, METADATA_TIMEOUT)
                })
                .map(|(_, high)| high)
                .map_err(|e| transport_error("Watermark lookup failed", e))
            })
            .collect()
    }

    fn position(&mut self, partition: i32) -> Result<i64, TransportError> {
        self.positions.get(&partition).copied().ok_or_else(|| {
            TransportError::transient(format!("Partition {} is not assigned", partition))
        })
    }

    fn pause(&mut self, partitions: &[i32]) -> Result<(), TransportError> {
        let tpl = self.partition_list(partitions)?;
        self.consumer
            .pause(&tpl)
            .map_err(|e| transport_error("Pause failed", e))
    }

    fn resume(&mut self, partitions: &[i32]) -> Result<(), TransportError> {
        let tpl = self.partition_list(partitions)?;
        self.consumer
            .resume(&tpl)
            .map_err(|e| transport_error("Resume failed", e))
    }
}
