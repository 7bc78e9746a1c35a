//! Error handling module
//!
//! Provides the unified error type for the registry, the connection
//! acquirer and the admin API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool or schema failed to build; the triggering change is rejected.
    #[error("Can not build data source, name is `{backend}`: {source}")]
    ConfigurationBuild {
        backend: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Schema `{0}` does not exist")]
    SchemaNotFound(String),

    #[error("Data source `{backend}` does not exist in schema `{schema}`")]
    DataSourceNotFound { schema: String, backend: String },

    #[error("Could not get {requested} connections at once, {released} already acquired connection(s) have been released: {source}")]
    BatchAcquisition {
        requested: usize,
        released: usize,
        #[source]
        source: Box<AppError>,
    },

    /// Closing a superseded resource failed. Logged, never escalated.
    #[error("Failed to close {resource}: {reason}")]
    ResourceClose { resource: String, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Invalid rule configuration: {0}")]
    InvalidRule(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Wrap an error as a build failure of the named backend
    pub fn configuration_build(backend: impl Into<String>, source: AppError) -> Self {
        AppError::ConfigurationBuild {
            backend: backend.into(),
            source: Box::new(source),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Backend connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::ConfigurationBuild { backend, source } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CONFIGURATION_BUILD_ERROR",
                format!("Can not build data source `{}`", backend),
                Some(source.to_string()),
            ),
            AppError::SchemaNotFound(_) | AppError::DataSourceNotFound { .. } => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                self.to_string(),
                None,
            ),
            AppError::BatchAcquisition { source, .. } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "BATCH_ACQUISITION_ERROR",
                self.to_string(),
                Some(source.to_string()),
            ),
            AppError::ResourceClose { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "RESOURCE_CLOSE_ERROR",
                self.to_string(),
                None,
            ),
            AppError::Connection(msg) => (
                StatusCode::BAD_GATEWAY,
                "CONNECTION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Transaction(msg) => (
                StatusCode::CONFLICT,
                "TRANSACTION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::InvalidRule(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_RULE",
                msg.clone(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::BAD_REQUEST,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}
