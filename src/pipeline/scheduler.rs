//! Partition-priority scheduling over one channel stream.
//!
//! A channel stream has one partition per tier, partition 0 being the highest.
//! The scheduler owns all of them through static assignment and, once per poll
//! cycle, pauses every partition below the highest one that still has backlog.
//!
//! The decision is taken per cycle, not per record: records a poll has already
//! returned are processed even if higher-priority work arrives meanwhile. What
//! holds is that after backlog is observed on a higher partition, no new poll
//! includes a lower partition until that backlog is gone.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::TransportError,
    pipeline::ports::{PartitionConsumer, RecordHandler},
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub topic: String,
    pub group_id: String,
    pub partition_count: i32,
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl SchedulerConfig {
    /// Partitions in priority order, highest first.
    pub fn partitions(&self) -> Vec<i32> {
        (0..self.partition_count).collect()
    }
}

/// Pause/resume instructions for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CyclePlan {
    pub pause: Vec<i32>,
    pub resume: Vec<i32>,
}

/// Decides which partitions may yield records this cycle.
///
/// `partitions` is in priority order and `lags` lines up with it. With `k` the
/// first partition holding backlog (or the last partition when none does),
/// everything after `k` is paused and partitions `1..=k` are resumed. The top
/// partition is never paused.
pub fn plan_cycle(partitions: &[i32], lags: &[i64]) -> CyclePlan {
    let Some(last) = partitions.len().checked_sub(1) else {
        return CyclePlan::default();
    };

    let active_upto = lags
        .iter()
        .take(partitions.len())
        .position(|lag| *lag > 0)
        .unwrap_or(last);

    let resume = if active_upto == 0 {
        Vec::new()
    } else {
        partitions[1..=active_upto].to_vec()
    };

    CyclePlan {
        pause: partitions[active_upto + 1..].to_vec(),
        resume,
    }
}

/// What one cycle observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub lags: Vec<i64>,
    pub plan: CyclePlan,
    pub processed: usize,
}

pub struct PartitionPriorityScheduler<C> {
    consumer: C,
    config: SchedulerConfig,
    partitions: Vec<i32>,
    assigned: bool,
}

impl<C: PartitionConsumer> PartitionPriorityScheduler<C> {
    pub fn new(consumer: C, config: SchedulerConfig) -> Self {
        let partitions = config.partitions();

        Self {
            consumer,
            config,
            partitions,
            assigned: false,
        }
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    /// Takes ownership of every partition of the topic. Failure here is fatal.
    pub fn assign(&mut self) -> Result<(), TransportError> {
        self.consumer
            .assign(&self.config.topic, &self.partitions)
            .map_err(|e| TransportError::fatal(e.to_string()))?;
        self.assigned = true;

        info!(
            topic = %self.config.topic,
            group_id = %self.config.group_id,
            partitions = ?self.partitions,
            "Partitions assigned to priority scheduler"
        );

        Ok(())
    }

    /// Current backlog per partition, in priority order.
    pub fn lags(&mut self) -> Result<Vec<i64>, TransportError> {
        let end_offsets = self.consumer.end_offsets(&self.partitions)?;
        let mut lags = Vec::with_capacity(self.partitions.len());

        for (partition, end_offset) in self.partitions.iter().zip(end_offsets) {
            let position = self.consumer.position(*partition)?;
            lags.push((end_offset - position).max(0));
        }

        Ok(lags)
    }

    /// One scheduling cycle: measure backlog, pause/resume, poll, handle, commit.
    pub async fn run_cycle<H: RecordHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<CycleReport, TransportError> {
        let lags = self.lags()?;
        let plan = plan_cycle(&self.partitions, &lags);

        if !plan.pause.is_empty() {
            self.consumer.pause(&plan.pause)?;
        }
        if !plan.resume.is_empty() {
            self.consumer.resume(&plan.resume)?;
        }

        debug!(
            topic = %self.config.topic,
            lags = ?lags,
            paused = ?plan.pause,
            resumed = ?plan.resume,
            "Priority plan applied"
        );

        let records = self.consumer.poll(self.config.poll_timeout).await?;

        for record in &records {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Record received"
            );

            handler.handle(record).await;

            if let Err(e) = self.consumer.commit(record) {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Offset commit failed, record may be redelivered"
                );
            }
        }

        Ok(CycleReport {
            lags,
            plan,
            processed: records.len(),
        })
    }

    /// Runs cycles until `cancel` fires or a fatal transport error occurs.
    ///
    /// Transient errors are logged and the loop carries on after
    /// `error_backoff`. The assignment is released on the way out.
    pub async fn run<H: RecordHandler>(
        mut self,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        if !self.assigned {
            self.assign()?;
        }

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            match self.run_cycle(handler).await {
                Ok(report) => {
                    if report.processed > 0 {
                        debug!(
                            topic = %self.config.topic,
                            processed = report.processed,
                            "Scheduler cycle complete"
                        );
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(topic = %self.config.topic, error = %e, "Priority scheduler stopping");
                    break Err(e);
                }
                Err(e) => {
                    error!(topic = %self.config.topic, error = %e, "Error in priority-aware consumer");

                    tokio::select! {
                        _ = cancel.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                }
            }
        };

        if let Err(e) = self.consumer.unassign() {
            warn!(topic = %self.config.topic, error = %e, "Failed to release partition assignment");
        }

        info!(topic = %self.config.topic, "Priority scheduler stopped");

        result
    }
}
