use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info};

use crate::pipeline::ports::PriorityCache;

/// Template priority cache. Keys are bare template names, values the decimal tier.
#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }

    pub async fn health_check(&self) -> Result<(), Error> {
        let mut connection = self.connection.clone();

        connection
            .ping::<String>()
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;

        Ok(())
    }
}

#[async_trait]
impl PriorityCache for RedisClient {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();

        let value: Option<String> = connection
            .get(key)
            .await
            .map_err(|e| anyhow!("Failed to get cached value for {}: {}", key, e))?;

        debug!(key, hit = value.is_some(), "Priority cache lookup");

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();

        connection
            .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| anyhow!("Failed to cache value for {}: {}", key, e))?;

        Ok(())
    }
}
