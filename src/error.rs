use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Failure class of a single attempt through an upstream gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Gateway hostname did not resolve
    Dns,
    /// TCP/TLS connection to the gateway failed
    Connect,
    /// Gateway rejected the proxy credentials (407)
    ProxyAuth,
    /// Attempt exceeded the caller's timeout
    Timeout,
    /// Gateway answered with a proxy-layer 5xx
    Gateway,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::ProxyAuth => "proxy_auth",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Gateway => "gateway",
            TransportErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Network-level failure talking to one specific gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(TransportErrorKind::Timeout, "attempt timed out")
    }
}

/// One failed attempt inside an exhausted `execute()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: TransportErrorKind,
    pub message: String,
}

/// Unified error type for the egress router
#[derive(Error, Debug)]
pub enum EgressError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Routing errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No eligible provider: {0}")]
    NoEligibleProvider(String),

    #[error("All proxy providers exhausted after {attempts} attempts")]
    ProxyExhausted {
        attempts: u32,
        failures: Vec<ProviderFailure>,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Target responded with status {status} via {provider}")]
    Target { provider: String, status: u16 },

    #[error("Request cancelled")]
    Cancelled,

    // Operator errors
    #[error("Provider already exists: {0}")]
    DuplicateName(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for egress router operations
pub type Result<T> = std::result::Result<T, EgressError>;

impl EgressError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            EgressError::InvalidRequest(_) | EgressError::Configuration(_) => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            EgressError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            EgressError::DuplicateName(_) => StatusCode::CONFLICT,

            // 408 Request Timeout
            EgressError::Cancelled => StatusCode::REQUEST_TIMEOUT,

            // 502 Bad Gateway
            EgressError::ProxyExhausted { .. } | EgressError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }

            // Target errors keep the destination's own status
            EgressError::Target { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }

            // 503 Service Unavailable
            EgressError::NoEligibleProvider(_) | EgressError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            EgressError::Database(_) | EgressError::Io(_) | EgressError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            EgressError::Database(_) | EgressError::DatabaseConnection(_) => "database_error",
            EgressError::Configuration(_) => "configuration_error",
            EgressError::NoEligibleProvider(_) => "no_eligible_provider",
            EgressError::ProxyExhausted { .. } => "proxy_exhausted",
            EgressError::Transport(_) => "transport_error",
            EgressError::Target { .. } => "target_error",
            EgressError::Cancelled => "cancelled",
            EgressError::DuplicateName(_) => "duplicate_name",
            EgressError::NotFound(_) => "not_found",
            EgressError::InvalidRequest(_) => "invalid_request",
            EgressError::Io(_) | EgressError::Internal(_) => "internal_error",
        }
    }

    /// Whether the executor may move on to the next candidate
    pub fn is_retriable(&self) -> bool {
        matches!(self, EgressError::Transport(_))
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for EgressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });

        match &self {
            EgressError::ProxyExhausted { failures, .. } => {
                body["failures"] = json!(failures);
            }
            EgressError::Transport(e) => {
                body["transport_kind"] = json!(e.kind);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for EgressError {
    fn from(err: url::ParseError) -> Self {
        EgressError::InvalidRequest(format!("invalid URL: {}", err))
    }
}
