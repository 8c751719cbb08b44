//! Ingestion endpoint client

use crate::error::TransportError;
use async_trait::async_trait;
use fdc_common::api::{ErrorResponse, IngestRequest, IngestResponse};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;

const USER_AGENT: &str = concat!("fdc-capture/", env!("CARGO_PKG_VERSION"));

/// Sends batches of sanitized payloads to the ingestion endpoint
#[async_trait]
pub trait IngestTransport: Send + Sync {
    async fn send(&self, payloads: Vec<Map<String, Value>>) -> Result<IngestResponse, TransportError>;
}

/// reqwest-backed transport with bearer authentication
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint_url: String,
    access_token: String,
}

impl HttpTransport {
    pub fn new(
        endpoint_url: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint_url: endpoint_url.into(),
            access_token: access_token.into(),
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Whether the endpoint host answers at all
    ///
    /// Any HTTP response (even an error status) counts as reachable.
    pub async fn is_reachable(&self) -> bool {
        self.http_client
            .head(&self.endpoint_url)
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl IngestTransport for HttpTransport {
    async fn send(&self, payloads: Vec<Map<String, Value>>) -> Result<IngestResponse, TransportError> {
        let body = IngestRequest::new(payloads.into_iter().map(Value::Object).collect());

        tracing::debug!(
            items = body.encuestas.as_ref().map(Vec::len).unwrap_or(0),
            "Posting survey batch"
        );

        let response = self
            .http_client
            .post(&self.endpoint_url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            let message = error_message(response).await;
            return Err(TransportError::Unauthorized(message));
        }

        if !status.is_success() {
            let message = error_message(response).await;
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<IngestResponse>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Extract `{error}` from a failure body, falling back to the raw text
async fn error_message(response: reqwest::Response) -> String {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => match body.errors {
            Some(items) if !items.is_empty() => format!(
                "{} ({})",
                body.error,
                items
                    .iter()
                    .map(|item| format!("#{}: {}", item.index, item.error))
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
            _ => body.error,
        },
        Err(_) => text,
    }
}
