use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    clients::health::HealthChecker,
    models::{
        health::HealthStatus,
        request::NotificationRequest,
        response::{Accepted, ApiResponse},
        validation::validate_request,
    },
    pipeline::{resolver::PriorityResolver, router::TierRouter},
};

/// Resolver and router are only present on the ingress role.
pub struct Ingress {
    pub resolver: PriorityResolver,
    pub router: TierRouter,
}

pub struct AppState {
    pub health_checker: HealthChecker,
    pub ingress: Option<Ingress>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new().route("/health", get(health_check));

    if state.ingress.is_some() {
        app = app
            .route("/api/health", get(liveness))
            .route("/api/send-notification", post(send_notification));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

/// Joins the side HTTP task of a worker role once the worker returned.
///
/// A worker failure is reported ahead of any server failure, which is then
/// only logged.
pub async fn finish_with_server<E>(
    worker: Result<(), E>,
    server: JoinHandle<Result<(), Error>>,
) -> Result<(), Error>
where
    E: Into<Error>,
{
    let served = match server.await {
        Ok(result) => result,
        Err(e) => Err(e.into()),
    };

    match worker {
        Err(e) => {
            if let Err(server_error) = served {
                warn!(error = %server_error, "HTTP server failed while the worker was stopping");
            }
            Err(e.into())
        }
        Ok(()) => served,
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn liveness() -> &'static str {
    "Running"
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationRequest>,
) -> (StatusCode, Json<ApiResponse<Accepted>>) {
    let Some(ingress) = &state.ingress else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                "Ingress is not enabled".to_string(),
                "Notification not accepted".to_string(),
            )),
        );
    };

    if let Err(e) = validate_request(&request) {
        warn!(user_id = %request.recipient.user_id, error = %e, "Rejected notification request");
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string(), "Invalid notification request".to_string())),
        );
    }

    let tier = match ingress.resolver.resolve(&request).await {
        Ok(tier) => tier,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(e.to_string(), "Invalid notification request".to_string())),
            );
        }
    };

    match ingress.router.route(request, tier).await {
        Ok(topic) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                Accepted {
                    priority: tier.as_i32(),
                    topic: topic.to_string(),
                },
                "Notification accepted".to_string(),
            )),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string(), "Failed to accept notification".to_string())),
        ),
    }
}
