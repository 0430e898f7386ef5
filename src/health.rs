//! Startup reachability check. Advisory only: the workflow never waits on it.

use crate::error::{ErrorKind, RequestError};
use crate::gateway::{RequestBody, RequestGateway, RequestOptions};
use crate::model::HealthStatus;
use reqwest::Method;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct HealthReply {
    #[serde(default)]
    status: Option<String>,
}

pub struct HealthProbe {
    gateway: RequestGateway,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(gateway: RequestGateway, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    pub fn base_url(&self) -> &str {
        self.gateway.base_url()
    }

    pub async fn check(&self) -> HealthStatus {
        let res = self
            .gateway
            .send_json::<HealthReply>(
                Method::GET,
                "/health",
                RequestBody::Empty,
                RequestOptions::default().with_timeout(self.timeout),
            )
            .await;

        let status = match res {
            Ok(reply) if reply.status.as_deref() == Some("ok") => HealthStatus::Ok,
            Ok(reply) => HealthStatus::Unreachable {
                reason: format!(
                    "health endpoint reported status {:?}",
                    reply.status.as_deref().unwrap_or("<missing>")
                ),
            },
            Err(e) => HealthStatus::Unreachable {
                reason: short_reason(&e, self.timeout),
            },
        };

        match &status {
            HealthStatus::Ok => tracing::info!(base_url = self.gateway.base_url(), "backend healthy"),
            HealthStatus::Unreachable { reason } => {
                tracing::warn!(base_url = self.gateway.base_url(), %reason, "backend health check failed")
            }
        }
        status
    }
}

/// Condensed cause for the advisory; the caller adds the backend URL and advice.
fn short_reason(e: &RequestError, timeout: Duration) -> String {
    match (e.kind, e.status) {
        (ErrorKind::NetworkUnreachable, _) => "connection failed".to_string(),
        (ErrorKind::Timeout, _) => {
            format!("timed out after {}", humantime::format_duration(timeout))
        }
        (_, Some(status)) => format!("status {status}: {}", e.message),
        _ => e.message.clone(),
    }
}
