//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{SegmentationError, WriteError, WriteFailure};
use crate::models::TransactionId;
use crate::sap::TransportError;

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Transaction to inspect via the status endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            transaction_id: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_transaction_id(mut self, transaction_id: Option<TransactionId>) -> Self {
        self.transaction_id = transaction_id;
        self
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found
    NotFound(String),
    /// Invalid request (validation error)
    BadRequest(String),
    /// Internal server error
    Internal(String),
    /// Analysis or payload error
    Segmentation(SegmentationError),
    /// Write-back failure, with its transaction id
    Write(WriteError),
}

fn segmentation_response(err: &SegmentationError) -> (StatusCode, ApiError) {
    let message = err.to_string();
    match err {
        SegmentationError::Configuration(_) => {
            (StatusCode::BAD_REQUEST, ApiError::new("CONFIGURATION_ERROR", message))
        }
        SegmentationError::DataValidation { missing, .. } => {
            let error = ApiError::new("DATA_VALIDATION_ERROR", message);
            let error = if missing.is_empty() {
                error
            } else {
                error.with_details(format!("missing: {}", missing.join(",")))
            };
            (StatusCode::BAD_REQUEST, error)
        }
        SegmentationError::PayloadIntegrity(_) => {
            (StatusCode::BAD_REQUEST, ApiError::new("PAYLOAD_ERROR", message))
        }
        SegmentationError::NoData(_) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", message)),
        SegmentationError::InsufficientData(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::new("INSUFFICIENT_DATA", message),
        ),
        SegmentationError::Transport(e) => transport_response(e),
        SegmentationError::Internal(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::new("INTERNAL_ERROR", message),
        ),
    }
}

fn transport_response(err: &TransportError) -> (StatusCode, ApiError) {
    (
        StatusCode::BAD_GATEWAY,
        ApiError::new("SAP_ERROR", err.message()).with_details(err.context().to_string()),
    )
}

fn write_response(err: &WriteError) -> (StatusCode, ApiError) {
    let (status, error) = match &err.failure {
        WriteFailure::Segmentation(inner) => segmentation_response(inner),
        WriteFailure::Batches { errors, .. } => (
            StatusCode::BAD_GATEWAY,
            ApiError::new("SAP_WRITE_ERROR", err.failure.to_string()).with_details(errors.join("; ")),
        ),
        _ => (
            StatusCode::BAD_GATEWAY,
            ApiError::new("SAP_WRITE_ERROR", err.failure.to_string()),
        ),
    };
    let error = if err.succeeded_batches.is_empty() && err.failed_batches.is_empty() {
        error
    } else {
        let summary = format!(
            "succeeded batches: {:?}, failed batches: {:?}",
            err.succeeded_batches, err.failed_batches
        );
        match error.details.clone() {
            Some(details) => error.with_details(format!("{}; {}", details, summary)),
            None => error.with_details(summary),
        }
    };
    (status, error.with_transaction_id(err.transaction_id.clone()))
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg.clone())),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("BAD_REQUEST", msg.clone()),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", msg.clone()),
            ),
            AppError::Segmentation(e) => segmentation_response(e),
            AppError::Write(e) => write_response(e),
        };

        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            log::error!("Request failed ({}): {}", status, error.message);
        } else {
            log::warn!("Request rejected ({}): {}", status, error.message);
        }

        (status, Json(error)).into_response()
    }
}

impl From<SegmentationError> for AppError {
    fn from(err: SegmentationError) -> Self {
        AppError::Segmentation(err)
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::Segmentation(SegmentationError::Transport(err))
    }
}

impl From<WriteError> for AppError {
    fn from(err: WriteError) -> Self {
        AppError::Write(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(SegmentationError::configuration("bad").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SegmentationError::NoData("none".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SegmentationError::InsufficientData("few".into()).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(TransportError::http(503, "down").into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SegmentationError::Internal("panic".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_write_error_keeps_transaction_id() {
        let err = WriteError::new(
            Some(TransactionId::from_sink("T9")),
            WriteFailure::Batch {
                index: 2,
                source: TransportError::http(500, "boom"),
            },
        )
        .with_batches(vec![1], vec![2]);
        let (status, body) = write_response(&err);
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.transaction_id, Some(TransactionId::from_sink("T9")));
        assert!(body.details.unwrap_or_default().contains("failed batches: [2]"));
    }
}
