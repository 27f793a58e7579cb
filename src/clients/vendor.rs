use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error as ThisError;
use tracing::{debug, error, info};

use crate::{
    clients::circuit_breaker::{CircuitBreaker, CircuitOpenError},
    models::delivery::{ChannelRequest, VendorResponse},
    pipeline::ports::VendorAdapter,
};

pub const TRANSPORT_FAILURE_STATUS: u16 = 500;
pub const CIRCUIT_OPEN_STATUS: u16 = 503;

/// A non-2xx answer, carried as an error so the breaker counts it.
#[derive(Debug, ThisError)]
#[error("Vendor returned status {}", .0.status_code)]
struct VendorRejected(VendorResponse);

/// Posts each request as JSON to `{base_url}/{channel}`.
pub struct HttpVendorClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpVendorClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, vendor = circuit_breaker.service_name(), "Vendor client initialized");

        Ok(Self {
            http_client,
            base_url,
            api_key,
            circuit_breaker,
        })
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    async fn send_once(&self, request: &ChannelRequest) -> Result<VendorResponse, Error> {
        let url = format!("{}/{}", self.base_url, request.channel());
        let body = request.to_json()?;

        let mut builder = self.http_client.post(&url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        let response = VendorResponse::new(status_code, message);

        if response.is_success() {
            Ok(response)
        } else {
            Err(VendorRejected(response).into())
        }
    }
}

#[async_trait]
impl VendorAdapter for HttpVendorClient {
    fn name(&self) -> &str {
        self.circuit_breaker.service_name()
    }

    async fn send(&self, request: &ChannelRequest) -> VendorResponse {
        debug!(
            channel = %request.channel(),
            notification_id = request.notification_id(),
            "Sending to vendor"
        );

        match self.circuit_breaker.call(|| self.send_once(request)).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(VendorRejected(response)) = e.downcast_ref::<VendorRejected>() {
                    return response.clone();
                }

                if e.downcast_ref::<CircuitOpenError>().is_some() {
                    return VendorResponse::new(CIRCUIT_OPEN_STATUS, e.to_string());
                }

                error!(
                    channel = %request.channel(),
                    notification_id = request.notification_id(),
                    error = %e,
                    "Vendor request failed"
                );
                VendorResponse::new(TRANSPORT_FAILURE_STATUS, format!("Vendor request failed: {}", e))
            }
        }
    }
}

/// Accepts everything without sending; used when no vendor URL is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopVendorAdapter;

#[async_trait]
impl VendorAdapter for NoopVendorAdapter {
    fn name(&self) -> &str {
        "noop"
    }

    async fn send(&self, request: &ChannelRequest) -> VendorResponse {
        info!(
            channel = %request.channel(),
            notification_id = request.notification_id(),
            "No vendor configured, accepting without delivery"
        );
        VendorResponse::new(202, "Accepted without delivery")
    }
}
