/// Unified error types for EduHub
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the portal
#[derive(Error, Debug)]
pub enum PortalError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Personal email belongs to the reserved institutional domain
    #[error("Domain blocked: {0}")]
    DomainBlocked(String),

    /// Required secret or endpoint absent from configuration
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    /// Identity provider rejected the request
    #[error("Identity provider rejected request: {message}")]
    UpstreamAuth { status: u16, message: String },

    /// Activation code is not eligible for redemption
    #[error("Redemption failed: {0}")]
    RedeemFailed(String),

    /// External mailbox system unreachable or rejected the request
    #[error("Mailbox provisioning failed: {detail}")]
    ProvisioningFailed {
        detail: String,
        cleanup_error: Option<String>,
    },

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: std::time::Duration },

    /// Missing or invalid session / credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Suspended account or expired mailbox
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

impl PortalError {
    /// HTTP status and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            PortalError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            PortalError::DomainBlocked(_) => (StatusCode::BAD_REQUEST, "DomainBlocked"),
            PortalError::ConfigMissing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigMissing"),
            PortalError::UpstreamAuth { status, .. } => match *status {
                401 => (StatusCode::UNAUTHORIZED, "UpstreamAuthError"),
                403 => (StatusCode::FORBIDDEN, "UpstreamAuthError"),
                _ => (StatusCode::BAD_REQUEST, "UpstreamAuthError"),
            },
            PortalError::RedeemFailed(_) => (StatusCode::BAD_REQUEST, "RedeemFailed"),
            PortalError::ProvisioningFailed { .. } => (StatusCode::BAD_GATEWAY, "ProvisioningFailed"),
            PortalError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RateLimitExceeded"),
            PortalError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AuthenticationRequired"),
            PortalError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            PortalError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            PortalError::Database(_) | PortalError::Io(_) | PortalError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError")
            }
        }
    }
}

/// Convert PortalError to HTTP response
impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            // Don't leak details
            PortalError::Database(_) | PortalError::Io(_) | PortalError::Internal(_) => {
                "Internal server error".to_string()
            }
            PortalError::ConfigMissing(_) => "Server is not fully configured".to_string(),
            _ => self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let retry_after = match &self {
            PortalError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let cleanup_error = match &self {
            PortalError::ProvisioningFailed { cleanup_error, .. } => cleanup_error.clone(),
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            retry_after,
            cleanup_error,
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for portal operations
pub type PortalResult<T> = Result<T, PortalError>;
