use crate::config::ConfigError;
use crate::ebay::auth::EbayAuthError;
use crate::ebay::gateway::GatewayError;
use crate::ebay::token_blob::TokenDecodeError;
use crate::llm::LlmError;
use crate::models::ApiError;
use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Every failure a handler can surface. Upstream and configuration detail is
/// logged here and replaced with a generic message in the response body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication required: {0}")]
    Authentication(String),
    #[error("upstream error (status {status:?}): {detail}")]
    Upstream {
        status: Option<u16>,
        retryable: bool,
        detail: String,
    },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn unauthenticated() -> Self {
        Self::Authentication("not connected to eBay".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Upstream {
                retryable: true, ..
            } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = match self {
            Self::Configuration(detail) => {
                error!(target = "lister.api", %detail, "configuration error");
                ApiError::new("configuration_error", None)
            }
            Self::Authentication(detail) => ApiError::new("reauthenticate", Some(detail)),
            Self::Upstream {
                status: upstream,
                detail,
                ..
            } => {
                warn!(target = "lister.api", upstream_status = ?upstream, %detail, "upstream failure");
                ApiError {
                    error: "upstream_error".to_string(),
                    detail: Some("The marketplace or model service request failed".to_string()),
                    upstream_status: upstream,
                }
            }
            Self::BadRequest(detail) => ApiError::new("bad_request", Some(detail)),
            Self::NotFound(what) => ApiError::new(what, None),
            Self::Store(err) => {
                error!(target = "lister.api", error = %err, "store failure");
                ApiError::new("storage_error", None)
            }
        };
        (status, Json(payload)).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Reauthenticate { status } => {
                Self::Authentication(format!("marketplace rejected the token (HTTP {status})"))
            }
            GatewayError::BadRequest { status, body } => Self::Upstream {
                status: Some(status),
                retryable: false,
                detail: body,
            },
            GatewayError::Retryable { status, detail } => Self::Upstream {
                status,
                retryable: true,
                detail,
            },
            GatewayError::InvalidResponse(detail) => Self::Upstream {
                status: None,
                retryable: false,
                detail,
            },
        }
    }
}

impl From<EbayAuthError> for AppError {
    fn from(err: EbayAuthError) -> Self {
        match err {
            EbayAuthError::Config(err) => err.into(),
            EbayAuthError::Rejected { status, body } => {
                warn!(target = "lister.oauth", status, %body, "token endpoint rejected grant");
                Self::Authentication(format!("token endpoint returned HTTP {status}"))
            }
            EbayAuthError::Request(detail) => Self::Upstream {
                status: None,
                retryable: true,
                detail,
            },
            EbayAuthError::InvalidResponse(detail) => Self::Upstream {
                status: None,
                retryable: false,
                detail,
            },
        }
    }
}

impl From<LlmError> for AppError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey => {
                Self::Configuration(LlmError::MissingApiKey.to_string())
            }
            LlmError::Gateway(err) => err.into(),
            LlmError::InvalidResponse(detail) => Self::Upstream {
                status: None,
                retryable: false,
                detail,
            },
        }
    }
}

impl From<TokenDecodeError> for AppError {
    fn from(err: TokenDecodeError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn gateway_auth_failure_asks_for_reauthentication() {
        let (status, json) = body(GatewayError::Reauthenticate { status: 401 }.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "reauthenticate");
    }

    #[tokio::test]
    async fn upstream_body_is_not_echoed() {
        let err: AppError = GatewayError::BadRequest {
            status: 422,
            body: "secret diagnostics".into(),
        }
        .into();
        let (status, json) = body(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["upstreamStatus"], 422);
        assert!(!json.to_string().contains("secret diagnostics"));
    }

    #[tokio::test]
    async fn transient_failures_map_to_503() {
        let err: AppError = GatewayError::Retryable {
            status: None,
            detail: "timeout".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn configuration_errors_are_generic_500s() {
        let (status, json) = body(ConfigError::Missing("EBAY_CLIENT_ID").into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"], "configuration_error");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn rejected_exchange_is_an_authentication_error() {
        let err: AppError = EbayAuthError::Rejected {
            status: 400,
            body: "invalid_grant".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
