use crate::metrics;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// How a failed outbound call should be handled by the caller.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("upstream rejected credentials (HTTP {status})")]
    Reauthenticate { status: u16 },
    #[error("upstream rejected request (HTTP {status})")]
    BadRequest { status: u16, body: String },
    #[error("upstream unavailable: {detail}")]
    Retryable { status: Option<u16>, detail: String },
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

/// Credential attached to an outbound call.
#[derive(Clone, Copy)]
pub enum ApiAuth<'a> {
    Bearer(&'a str),
    Header {
        name: &'static str,
        value: &'a str,
    },
}

/// Maps a non-2xx status to its failure class. Never called for 2xx.
pub fn classify(status: StatusCode, body: String) -> GatewayError {
    let code = status.as_u16();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        GatewayError::Reauthenticate { status: code }
    } else if status.is_client_error() {
        GatewayError::BadRequest { status: code, body }
    } else if status.is_server_error() {
        GatewayError::Retryable {
            status: Some(code),
            detail: body,
        }
    } else {
        GatewayError::InvalidResponse(format!("unexpected HTTP {code}"))
    }
}

/// Thin wrapper around every call to the marketplace and model APIs.
#[derive(Clone)]
pub struct Gateway {
    http: Client,
}

impl Gateway {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        auth: ApiAuth<'_>,
    ) -> Result<T, GatewayError> {
        let response = self.execute(operation, request, auth).await?;
        response
            .json()
            .await
            .map_err(|err| GatewayError::InvalidResponse(err.to_string()))
    }

    pub async fn send_empty(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        auth: ApiAuth<'_>,
    ) -> Result<(), GatewayError> {
        self.execute(operation, request, auth).await.map(|_| ())
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        auth: ApiAuth<'_>,
    ) -> Result<Response, GatewayError> {
        let request = match auth {
            ApiAuth::Bearer(token) => request.bearer_auth(token),
            ApiAuth::Header { name, value } => request.header(name, value),
        };
        let started = Instant::now();
        let result = request.send().await;
        metrics::upstream_elapsed(operation, started.elapsed().as_millis());

        let response = result.map_err(|err| {
            warn!(
                target = "lister.gateway",
                operation,
                timeout = err.is_timeout(),
                error = %err,
                "upstream call failed"
            );
            GatewayError::Retryable {
                status: None,
                detail: err.to_string(),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(target = "lister.gateway", operation, status = status.as_u16(), "upstream ok");
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(
            target = "lister.gateway",
            operation,
            status = status.as_u16(),
            body = %body,
            "upstream returned an error"
        );
        Err(classify(status, body))
    }
}
