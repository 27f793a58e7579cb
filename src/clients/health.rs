use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker, database::DatabaseClient, kafka::KafkaProducerClient,
        redis::RedisClient,
    },
    config::ServiceRole,
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

const CRITICAL_CHECKS: [&str; 3] = ["database", "cache_service", "message_broker"];

/// Aggregates the dependencies a role actually holds.
pub struct HealthChecker {
    role: ServiceRole,
    database: Option<Arc<DatabaseClient>>,
    cache: Option<RedisClient>,
    broker: Option<Arc<KafkaProducerClient>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new(role: ServiceRole) -> Self {
        Self {
            role,
            database: None,
            cache: None,
            broker: None,
            circuit_breaker: None,
        }
    }

    pub fn with_database(mut self, database: Arc<DatabaseClient>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_cache(mut self, cache: RedisClient) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_broker(mut self, broker: Arc<KafkaProducerClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        if let Some(database) = &self.database {
            let start = Instant::now();
            let health = match database.health_check().await {
                Ok(()) => timed_healthy("database", start),
                Err(e) => {
                    warn!(error = %e, "Database health check failed");
                    ServiceHealth::unhealthy(e.to_string())
                }
            };
            checks.insert("database".to_string(), health);
        }

        if let Some(cache) = &self.cache {
            let start = Instant::now();
            let health = match cache.health_check().await {
                Ok(()) => timed_healthy("cache_service", start),
                Err(e) => {
                    warn!(error = %e, "Redis health check failed");
                    ServiceHealth::unhealthy(e.to_string())
                }
            };
            checks.insert("cache_service".to_string(), health);
        }

        if let Some(broker) = &self.broker {
            let start = Instant::now();
            let health = match broker.health_check().await {
                Ok(()) => timed_healthy("message_broker", start),
                Err(e) => {
                    warn!(error = %e, "Kafka health check failed");
                    ServiceHealth::unhealthy(e.to_string())
                }
            };
            checks.insert("message_broker".to_string(), health);
        }

        if let Some(circuit_breaker) = &self.circuit_breaker {
            let state = circuit_breaker.state();
            debug!(
                service = circuit_breaker.service_name(),
                circuit_state = state.as_str(),
                "Circuit breaker state checked"
            );
            checks.insert(
                circuit_breaker.service_name().to_string(),
                ServiceHealth::circuit(state.as_str(), state != CircuitState::Closed),
            );
        }

        HealthCheckResponse {
            status: overall_status(&checks),
            role: self.role.as_str().to_string(),
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            checks,
        }
    }
}

fn timed_healthy(name: &str, start: Instant) -> ServiceHealth {
    let elapsed = start.elapsed().as_millis() as u64;
    debug!(check = name, response_time_ms = elapsed, "Health check passed");
    ServiceHealth::healthy(elapsed)
}

pub fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| CRITICAL_CHECKS.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let has_degraded = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
