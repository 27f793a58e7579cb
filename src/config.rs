use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    channel::Channel,
    circuit_breaker::CircuitBreakerConfig,
    priority::{CHANNEL_PARTITION_COUNT, Tier},
    retry::RetryConfig,
};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceRole {
    Ingress,
    TierProcessor,
    ChannelConsumer,
}

impl ServiceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRole::Ingress => "ingress",
            ServiceRole::TierProcessor => "tier-processor",
            ServiceRole::ChannelConsumer => "channel-consumer",
        }
    }
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePathKind {
    Log,
    DeadLetter,
    Retry,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub service_role: ServiceRole,
    pub tier: Option<i32>,
    pub channel: Option<String>,

    pub kafka_bootstrap_servers: String,
    pub kafka_group_id: Option<String>,
    #[serde(default = "default_poll_timeout_ms")]
    pub kafka_poll_timeout_ms: u64,
    #[serde(default = "default_max_poll_records")]
    pub kafka_max_poll_records: usize,
    #[serde(default = "default_publish_timeout_ms")]
    pub kafka_publish_timeout_ms: u64,
    #[serde(default = "default_partition_count")]
    pub channel_partition_count: i32,
    #[serde(default = "default_poll_timeout_ms")]
    pub scheduler_error_backoff_ms: u64,

    pub redis_url: String,
    #[serde(default = "default_priority_ttl_seconds")]
    pub template_priority_ttl_seconds: u64,

    pub database_url: String,

    pub vendor_url: Option<String>,
    pub vendor_api_key: Option<String>,
    #[serde(default = "default_vendor_timeout_seconds")]
    pub vendor_timeout_seconds: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_failure_path")]
    pub failure_path: FailurePathKind,
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_max_poll_records() -> usize {
    500
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

fn default_partition_count() -> i32 {
    3
}

fn default_priority_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_vendor_timeout_seconds() -> u64 {
    10
}

fn default_rate_limit() -> u32 {
    600
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_seconds() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_failure_path() -> FailurePathKind {
    FailurePathKind::Log
}

fn default_true() -> bool {
    true
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;

        Ok(config)
    }

    /// Role-specific requirements envy cannot express.
    pub fn validate(&self) -> Result<(), Error> {
        match self.service_role {
            ServiceRole::Ingress => {}
            ServiceRole::TierProcessor => {
                self.tier()?;
            }
            ServiceRole::ChannelConsumer => {
                self.channel()?;
            }
        }

        if self.channel_partition_count < CHANNEL_PARTITION_COUNT {
            return Err(anyhow!(
                "CHANNEL_PARTITION_COUNT must be at least {} so every tier has a partition",
                CHANNEL_PARTITION_COUNT
            ));
        }

        if self.rate_limit_per_minute == 0 {
            return Err(anyhow!("RATE_LIMIT_PER_MINUTE must be positive"));
        }

        Ok(())
    }

    pub fn tier(&self) -> Result<Tier, Error> {
        let raw = self
            .tier
            .ok_or_else(|| anyhow!("TIER is required for the tier-processor role"))?;

        Tier::from_i32(raw).ok_or_else(|| anyhow!("TIER must be 1, 2 or 3, got {}", raw))
    }

    pub fn channel(&self) -> Result<Channel, Error> {
        let raw = self
            .channel
            .as_deref()
            .ok_or_else(|| anyhow!("CHANNEL is required for the channel-consumer role"))?;

        raw.parse()
            .map_err(|e| anyhow!("CHANNEL is not a known channel: {}", e))
    }

    /// Consumer group for this process: explicit override, else derived from the role.
    pub fn group_id(&self) -> Result<String, Error> {
        if let Some(group_id) = &self.kafka_group_id {
            return Ok(group_id.clone());
        }

        match self.service_role {
            ServiceRole::Ingress => Ok("notification-ingress".to_string()),
            ServiceRole::TierProcessor => Ok(format!("{}-processor", self.tier()?.topic())),
            ServiceRole::ChannelConsumer => Ok(self.channel()?.consumer_group().to_string()),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_poll_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_publish_timeout_ms)
    }

    pub fn scheduler_error_backoff(&self) -> Duration {
        Duration::from_millis(self.scheduler_error_backoff_ms)
    }

    pub fn template_priority_ttl(&self) -> Duration {
        Duration::from_secs(self.template_priority_ttl_seconds)
    }

    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            open_timeout: Duration::from_secs(self.circuit_breaker_timeout_seconds),
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }
}
