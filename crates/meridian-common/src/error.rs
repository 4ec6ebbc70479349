//! Error types for Meridian services

use std::fmt;
use tonic::Status;

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Main error type for Meridian services
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Invalid request/argument, rejected before any collaborator call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found (instance, connector, table)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Authorization denied by the instance security policy
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Query execution error from a collaborator
    #[error("Query execution failed: {0}")]
    QueryExecutionFailed(String),

    /// Query exceeded its runtime limit
    #[error("Query timeout after {0} ms")]
    QueryTimeout(i64),

    /// Query cancelled by the caller
    #[error("Query was cancelled")]
    QueryCancelled,

    /// Cost estimation failed (always non-fatal for admission control)
    #[error("Cost estimation failed: {0}")]
    EstimationFailed(String),

    /// Query shape or dialect not supported by this surface
    #[error("Unsupported query: {0}")]
    Unsupported(String),

    /// gRPC transport error
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create an internal error from any displayable error
    pub fn internal<E: fmt::Display>(err: E) -> Self {
        GatewayError::Internal(err.to_string())
    }

    /// Stable error code for logs and client-side handling
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidArgument(_) => "INVALID_ARGUMENT",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::PermissionDenied(_) => "PERMISSION_DENIED",
            GatewayError::QueryExecutionFailed(_) => "QUERY_FAILED",
            GatewayError::QueryTimeout(_) => "DEADLINE_EXCEEDED",
            GatewayError::QueryCancelled => "CANCELLED",
            GatewayError::EstimationFailed(_) => "ESTIMATION_FAILED",
            GatewayError::Unsupported(_) => "UNSUPPORTED",
            GatewayError::Transport(_) => "TRANSPORT_ERROR",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Internal(_) => "INTERNAL",
        }
    }
}

/// Convert GatewayError to gRPC Status for RPC responses
impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        let code = match &err {
            GatewayError::InvalidArgument(_) => tonic::Code::InvalidArgument,
            GatewayError::NotFound(_) => tonic::Code::NotFound,
            GatewayError::PermissionDenied(_) => tonic::Code::PermissionDenied,
            GatewayError::QueryExecutionFailed(_) => tonic::Code::Internal,
            GatewayError::QueryTimeout(_) => tonic::Code::DeadlineExceeded,
            GatewayError::QueryCancelled => tonic::Code::Cancelled,
            GatewayError::EstimationFailed(_) => tonic::Code::Internal,
            GatewayError::Unsupported(_) => tonic::Code::Unimplemented,
            GatewayError::Transport(_) => tonic::Code::Unavailable,
            GatewayError::Serialization(_) => tonic::Code::Internal,
            GatewayError::Config(_) => tonic::Code::Internal,
            GatewayError::Internal(_) => tonic::Code::Internal,
        };

        Status::new(code, err.to_string())
    }
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        match status.code() {
            tonic::Code::InvalidArgument => {
                GatewayError::InvalidArgument(status.message().to_string())
            }
            tonic::Code::NotFound => GatewayError::NotFound(status.message().to_string()),
            tonic::Code::PermissionDenied => {
                GatewayError::PermissionDenied(status.message().to_string())
            }
            tonic::Code::DeadlineExceeded => GatewayError::QueryTimeout(0),
            tonic::Code::Cancelled => GatewayError::QueryCancelled,
            _ => GatewayError::QueryExecutionFailed(status.message().to_string()),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Internal(format!("IO error: {}", err))
    }
}
