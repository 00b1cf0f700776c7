//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - **AppError**: what an HTTP handler returns; converts itself into a JSON
//!   error response
//! - **PipelineError**: the failure taxonomy of the audio pipeline itself;
//!   travels inside `anyhow::Error` through the internal plumbing
//!
//! ## Key Rust Concepts:
//! - **From trait**: lets `?` convert lower-level errors automatically
//! - **ResponseError trait**: actix-web turns the error into an HTTP response
//! - **std::error::Error**: lets `PipelineError` be wrapped by `anyhow` and
//!   recovered later with `downcast_ref`

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned from HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: unexpected server-side failure (500)
/// - **ServiceUnavailable**: the pipeline is not ready or has failed (503)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    ServiceUnavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// JSON body shape:
/// ```json
/// {
///   "error": {
///     "type": "service_unavailable",
///     "message": "inference engine stopped",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::Internal(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ServiceUnavailable(_) => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

/// Failure taxonomy of the audio pipeline.
///
/// ## Variants:
/// - **ProtocolViolation**: a client message that breaks the wire format; the
///   message is dropped and the session continues
/// - **ConnectionTermination**: the websocket closed or errored; only that
///   session ends
/// - **StartupConfiguration**: missing or invalid settings; the process does
///   not start
/// - **EngineFailure**: the inference engine or codec died; the pipeline is
///   marked failed and every session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    ProtocolViolation(String),
    ConnectionTermination(String),
    StartupConfiguration(String),
    EngineFailure(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            PipelineError::ConnectionTermination(msg) => write!(f, "connection terminated: {}", msg),
            PipelineError::StartupConfiguration(msg) => {
                write!(f, "startup configuration error: {}", msg)
            }
            PipelineError::EngineFailure(msg) => write!(f, "engine failure: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}
