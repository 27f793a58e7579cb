use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use notification_router::{
    api::{AppState, Ingress, finish_with_server, router},
    clients::{circuit_breaker::CircuitBreaker, health::{HealthChecker, overall_status}},
    config::ServiceRole,
    error::TransportError,
    models::{
        circuit_breaker::CircuitBreakerConfig,
        health::{HealthStatus, ServiceHealth},
        request::NotificationRequest,
    },
    pipeline::{resolver::PriorityResolver, router::TierRouter},
};
use serde_json::Value;
use tower::ServiceExt;

use crate::support::{InMemoryBroker, MemoryCache, MemoryStore, request, template, template_request};

fn ingress_app(broker: &InMemoryBroker, store: &Arc<MemoryStore>) -> Router {
    let ingress = Ingress {
        resolver: PriorityResolver::new(
            Arc::new(MemoryCache::new()),
            store.clone(),
            Duration::from_secs(60),
        ),
        router: TierRouter::new(Arc::new(broker.clone())),
    };

    router(Arc::new(AppState {
        health_checker: HealthChecker::new(ServiceRole::Ingress),
        ingress: Some(ingress),
    }))
}

async fn send(app: Router, body: &NotificationRequest) -> Result<(StatusCode, Value)> {
    let response = app
        .oneshot(
            Request::post("/api/send-notification")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body)?))?,
        )
        .await?;

    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, serde_json::from_slice(&bytes)?))
}

/// Test: A valid request is accepted and lands on its tier stream
#[tokio::test]
async fn test_send_notification_accepts_request() -> Result<()> {
    let broker = InMemoryBroker::new();
    let store = Arc::new(MemoryStore::new());

    let (status, body) = send(ingress_app(&broker, &store), &request(1, &["email"], "u")).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["priority"], 1);
    assert_eq!(body["data"]["topic"], "priority-1");
    assert_eq!(broker.all_records("priority-1").len(), 1);

    Ok(())
}

/// Test: The template's stored priority decides the stream when none is given
#[tokio::test]
async fn test_send_notification_resolves_template_priority() -> Result<()> {
    let broker = InMemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    store.add_template(template("digest", 3, "Weekly digest"));

    let (status, body) =
        send(ingress_app(&broker, &store), &template_request("digest", "u")).await?;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["topic"], "priority-3");

    let published: NotificationRequest =
        serde_json::from_slice(&broker.all_records("priority-3")[0].payload)?;
    assert_eq!(published.notification_priority, 3);

    Ok(())
}

/// Test: Invalid requests are rejected with 400 and nothing is published
#[tokio::test]
async fn test_send_notification_rejects_invalid_requests() -> Result<()> {
    let broker = InMemoryBroker::new();
    let store = Arc::new(MemoryStore::new());

    let mut no_content = request(2, &["sms"], "u");
    no_content.content.message = None;

    for invalid in [
        request(5, &["email"], "u"),
        request(1, &["fax"], "u"),
        request(1, &[], "u"),
        request(1, &["email"], " "),
        no_content,
    ] {
        let (status, body) = send(ingress_app(&broker, &store), &invalid).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    assert!(broker.all_records("priority-1").is_empty());
    assert!(broker.all_records("priority-2").is_empty());

    Ok(())
}

/// Test: A broker failure is reported as a server error
#[tokio::test]
async fn test_send_notification_reports_publish_failure() -> Result<()> {
    let broker = InMemoryBroker::new();
    broker.fail_publishes(true);
    let store = Arc::new(MemoryStore::new());

    let (status, body) = send(ingress_app(&broker, &store), &request(2, &["push"], "u")).await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("priority-2")));

    Ok(())
}

/// Test: The ingress liveness route answers with plain text
#[tokio::test]
async fn test_liveness_route() -> Result<()> {
    let app = ingress_app(&InMemoryBroker::new(), &Arc::new(MemoryStore::new()));

    let response = app
        .oneshot(Request::get("/api/health").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await?.to_bytes();
    assert_eq!(&bytes[..], b"Running");

    Ok(())
}

/// Test: Worker roles expose only the health route
#[tokio::test]
async fn test_worker_role_serves_health_only() -> Result<()> {
    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(ServiceRole::TierProcessor),
        ingress: None,
    });

    let response = router(state.clone())
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await?.to_bytes();
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["role"], "tier-processor");

    let response = router(state)
        .oneshot(
            Request::post("/api/send-notification")
                .header("content-type", "application/json")
                .body(Body::from("{}"))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

/// Test: An open vendor circuit degrades health without failing it
#[tokio::test]
async fn test_open_circuit_degrades_health() -> Result<()> {
    let breaker = Arc::new(CircuitBreaker::new(
        "email_vendor",
        CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_secs(60),
            success_threshold: 1,
        },
    ));
    let _ = breaker
        .call(|| async { Err::<(), _>(anyhow!("vendor down")) })
        .await;

    let state = Arc::new(AppState {
        health_checker: HealthChecker::new(ServiceRole::ChannelConsumer)
            .with_circuit_breaker(breaker),
        ingress: None,
    });

    let response = router(state)
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await?.to_bytes();
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["checks"]["email_vendor"]["circuit_breaker"], "open");

    Ok(())
}

/// Test: Critical dependencies make the service unhealthy, others only degrade it
#[tokio::test]
async fn test_overall_status_weighs_critical_checks() -> Result<()> {
    let mut checks = HashMap::new();
    checks.insert("database".to_string(), ServiceHealth::healthy(3));
    assert_eq!(overall_status(&checks), HealthStatus::Healthy);

    checks.insert("sms_vendor".to_string(), ServiceHealth::circuit("half_open", true));
    assert_eq!(overall_status(&checks), HealthStatus::Degraded);

    checks.insert(
        "message_broker".to_string(),
        ServiceHealth::unhealthy("metadata timeout".to_string()),
    );
    assert_eq!(overall_status(&checks), HealthStatus::Unhealthy);

    Ok(())
}

/// Test: A worker's fatal error is reported even when the HTTP task also failed
#[tokio::test]
async fn test_worker_error_wins_over_server_error() -> Result<()> {
    let server = tokio::spawn(async { Err::<(), _>(anyhow!("address in use")) });

    let result = finish_with_server(Err(TransportError::fatal("assignment refused")), server).await;

    let message = result.expect_err("worker error should surface").to_string();
    assert!(message.contains("assignment refused"), "{message}");

    Ok(())
}

/// Test: The HTTP task's error is returned when the worker stopped cleanly
#[tokio::test]
async fn test_server_error_returned_after_clean_worker_exit() -> Result<()> {
    let failing = tokio::spawn(async { Err::<(), _>(anyhow!("address in use")) });
    let result = finish_with_server(Ok::<(), TransportError>(()), failing).await;
    assert!(result.is_err_and(|e| e.to_string().contains("address in use")));

    let clean = tokio::spawn(async { Ok::<(), anyhow::Error>(()) });
    finish_with_server(Ok::<(), TransportError>(()), clean).await?;

    Ok(())
}
