use std::sync::Arc;

use anyhow::{Error, Result};
use notification_router::{
    api::{AppState, Ingress, finish_with_server, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::DatabaseClient,
        health::HealthChecker,
        kafka::{KafkaLogConsumer, KafkaProducerClient},
        redis::RedisClient,
        vendor::{HttpVendorClient, NoopVendorAdapter},
    },
    config::{Config, FailurePathKind, LogFormat, ServiceRole},
    pipeline::{
        delivery::{ChannelDispatcher, DeliveryOutcomeHandler},
        failure::{DeadLetterFailurePath, FailurePath, LoggingFailurePath, RetryingFailurePath},
        pacer::RatePacer,
        ports::{SystemClock, VendorAdapter},
        processor::TierProcessor,
        resolver::PriorityResolver,
        router::TierRouter,
        scheduler::{PartitionPriorityScheduler, SchedulerConfig},
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Json => builder.json().with_current_span(false).init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn spawn_http(
    state: AppState,
    port: u16,
    cancel: CancellationToken,
) -> JoinHandle<Result<(), Error>> {
    tokio::spawn(run_api_server(Arc::new(state), port, cancel))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(config.log_format);

    info!(role = config.service_role.as_str(), "Configuration validated");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let result = match config.service_role {
        ServiceRole::Ingress => run_ingress(&config, cancel.clone()).await,
        ServiceRole::TierProcessor => run_tier_processor(&config, cancel.clone()).await,
        ServiceRole::ChannelConsumer => run_channel_consumer(&config, cancel.clone()).await,
    };

    cancel.cancel();

    if let Err(e) = &result {
        error!(error = %e, "Service stopped with error");
    }

    result
}

async fn run_ingress(config: &Config, cancel: CancellationToken) -> Result<(), Error> {
    let cache = RedisClient::connect(&config.redis_url).await?;
    let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    database.ensure_schema().await?;
    let producer = Arc::new(KafkaProducerClient::connect(config)?);

    let ingress = Ingress {
        resolver: PriorityResolver::new(
            Arc::new(cache.clone()),
            database.clone(),
            config.template_priority_ttl(),
        ),
        router: TierRouter::new(producer.clone()),
    };

    let state = AppState {
        health_checker: HealthChecker::new(config.service_role)
            .with_database(database)
            .with_cache(cache)
            .with_broker(producer),
        ingress: Some(ingress),
    };

    run_api_server(Arc::new(state), config.server_port, cancel).await
}

async fn run_tier_processor(config: &Config, cancel: CancellationToken) -> Result<(), Error> {
    let tier = config.tier()?;
    let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    database.ensure_schema().await?;
    let producer = Arc::new(KafkaProducerClient::connect(config)?);

    let mut consumer = KafkaLogConsumer::connect(config, &config.group_id()?)?;
    consumer.subscribe(tier.topic())?;

    let server = spawn_http(
        AppState {
            health_checker: HealthChecker::new(config.service_role)
                .with_database(database.clone())
                .with_broker(producer.clone()),
            ingress: None,
        },
        config.server_port,
        cancel.clone(),
    );

    let processor = TierProcessor::new(
        tier,
        producer,
        database.clone(),
        database,
        config.dedup_enabled,
    );
    processor
        .run(&mut consumer, config.poll_timeout(), cancel.clone())
        .await;

    cancel.cancel();
    finish_with_server(Ok::<(), Error>(()), server).await
}

async fn run_channel_consumer(config: &Config, cancel: CancellationToken) -> Result<(), Error> {
    let channel = config.channel()?;
    let group_id = config.group_id()?;
    let database = Arc::new(DatabaseClient::connect(&config.database_url).await?);
    database.ensure_schema().await?;
    let producer = Arc::new(KafkaProducerClient::connect(config)?);
    let consumer = KafkaLogConsumer::connect(config, &group_id)?;

    let mut health_checker = HealthChecker::new(config.service_role)
        .with_database(database.clone())
        .with_broker(producer.clone());

    let vendor: Arc<dyn VendorAdapter> = match &config.vendor_url {
        Some(vendor_url) => {
            let circuit_breaker = Arc::new(CircuitBreaker::new(
                format!("{}_vendor", channel),
                config.circuit_breaker_config(),
            ));
            health_checker = health_checker.with_circuit_breaker(circuit_breaker.clone());

            Arc::new(HttpVendorClient::new(
                vendor_url,
                config.vendor_api_key.clone(),
                config.vendor_timeout(),
                circuit_breaker,
            )?)
        }
        None => Arc::new(NoopVendorAdapter),
    };

    let failure_path: Arc<dyn FailurePath> = match config.failure_path {
        FailurePathKind::Log => Arc::new(LoggingFailurePath),
        FailurePathKind::DeadLetter => Arc::new(DeadLetterFailurePath::new(producer)),
        FailurePathKind::Retry => Arc::new(RetryingFailurePath::new(
            vendor.clone(),
            config.retry_config(),
            Arc::new(LoggingFailurePath),
        )),
    };

    let server = spawn_http(
        AppState {
            health_checker,
            ingress: None,
        },
        config.server_port,
        cancel.clone(),
    );

    let pacer = RatePacer::new(Arc::new(SystemClock), config.rate_limit_per_minute)
        .with_cancellation(cancel.clone());
    let mut dispatcher = ChannelDispatcher::new(
        channel,
        DeliveryOutcomeHandler::new(vendor, database, failure_path),
        pacer,
    );

    let scheduler = PartitionPriorityScheduler::new(
        consumer,
        SchedulerConfig {
            topic: channel.topic().to_string(),
            group_id,
            partition_count: config.channel_partition_count,
            poll_timeout: config.poll_timeout(),
            error_backoff: config.scheduler_error_backoff(),
        },
    );

    let result = scheduler.run(&mut dispatcher, cancel.clone()).await;

    cancel.cancel();
    finish_with_server(result, server).await
}
