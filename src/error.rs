use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// The external store a dependency failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Graph,
    Search,
    Cache,
    Blob,
    Identity,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Graph => "graph",
            StoreKind::Search => "search",
            StoreKind::Cache => "cache",
            StoreKind::Blob => "blob",
            StoreKind::Identity => "identity",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum AppError {
    // Caller errors, surfaced as-is with no side effects attempted
    Validation(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    // Store failures
    Dependency { store: StoreKind, message: String },
    Unavailable { store: StoreKind, message: String },
    // What callers see once a saga has been compensated
    OperationFailed(String),
    ConsistencyViolation(String),
    ConfigurationError(String),
    SerializationError(String),
    Internal(String),
}

impl AppError {
    pub fn dependency(store: StoreKind, message: impl Into<String>) -> Self {
        AppError::Dependency {
            store,
            message: message.into(),
        }
    }

    pub fn unavailable(store: StoreKind, message: impl Into<String>) -> Self {
        AppError::Unavailable {
            store,
            message: message.into(),
        }
    }

    /// Transient failures may be retried by the store client that produced them.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Unavailable { .. })
    }

    /// Validation and authorization failures never trigger compensation.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::NotFound(_)
                | AppError::Unauthorized(_)
                | AppError::Forbidden(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Dependency { store, message } => {
                write!(f, "{} store error: {}", store, message)
            }
            AppError::Unavailable { store, message } => {
                write!(f, "{} store unavailable: {}", store, message)
            }
            AppError::OperationFailed(msg) => write!(f, "Operation failed: {}", msg),
            AppError::ConsistencyViolation(msg) => write!(f, "Consistency violation: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Unavailable { store, message } => {
                tracing::error!("{} store unavailable: {}", store, message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }
            AppError::OperationFailed(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Dependency { store, message } => {
                tracing::error!("{} store error: {}", store, message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::ConsistencyViolation(msg) => {
                tracing::error!(integrity = true, "Consistency violation: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::ConfigurationError(msg)
            | AppError::SerializationError(msg)
            | AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                AppError::unavailable(StoreKind::Graph, err.to_string())
            }
            other => AppError::dependency(StoreKind::Graph, other.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
