//! Error taxonomy for segmentation and write-back.
//!
//! Validation failures surface as [`SegmentationError`] before any network
//! call is made. Once a transaction id exists, failures are wrapped in
//! [`WriteError`], which always carries that id together with the batch
//! indices that did and did not reach the sink.

use std::fmt;

use crate::models::TransactionId;
use crate::sap::TransportError;

/// Result type for analysis and payload operations
pub type SegmentationResult<T> = Result<T, SegmentationError>;

/// Errors raised by the segmentation engine and payload builder.
#[derive(Debug, thiserror::Error)]
pub enum SegmentationError {
    /// Invalid configuration (threshold ordering, primary key, method).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Requested dimensions are absent from the fetched data.
    #[error("Data validation error: {message}")]
    DataValidation {
        message: String,
        missing: Vec<String>,
    },

    /// The source returned no rows at all.
    #[error("No data found: {0}")]
    NoData(String),

    /// No group survived the minimum-period filter.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// A record could not be placed in a write payload.
    #[error("Payload integrity error: {0}")]
    PayloadIntegrity(String),

    /// Source-side transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Background task failed to complete.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SegmentationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn missing_attributes(missing: Vec<String>) -> Self {
        Self::DataValidation {
            message: format!("Missing attributes in data: {:?}", missing),
            missing,
        }
    }
}

/// What went wrong during a write-back transaction.
#[derive(Debug, thiserror::Error)]
pub enum WriteFailure {
    #[error(transparent)]
    Segmentation(#[from] SegmentationError),

    #[error("failed to obtain SAP session: {0}")]
    Session(#[source] TransportError),

    #[error("failed to initiate parallel process: {0}")]
    Initiate(#[source] TransportError),

    #[error("failed to write data to SAP: {0}")]
    Send(#[source] TransportError),

    #[error("failed to send batch {index}: {source}")]
    Batch {
        index: usize,
        #[source]
        source: TransportError,
    },

    #[error("some batches failed: {indices:?}")]
    Batches {
        indices: Vec<usize>,
        errors: Vec<String>,
    },

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] TransportError),
}

/// Terminal write-back error.
///
/// Carries the transaction id (when one was generated or assigned) so the
/// caller can query status and messages after the fact, plus the 1-based
/// indices of batches acknowledged and rejected before the abort.
#[derive(Debug)]
pub struct WriteError {
    pub transaction_id: Option<TransactionId>,
    pub succeeded_batches: Vec<usize>,
    pub failed_batches: Vec<usize>,
    pub failure: WriteFailure,
}

impl WriteError {
    pub fn new(transaction_id: Option<TransactionId>, failure: WriteFailure) -> Self {
        Self {
            transaction_id,
            succeeded_batches: Vec::new(),
            failed_batches: Vec::new(),
            failure,
        }
    }

    pub fn with_batches(mut self, succeeded: Vec<usize>, failed: Vec<usize>) -> Self {
        self.succeeded_batches = succeeded;
        self.failed_batches = failed;
        self
    }

    /// The sink error text, when the failure came from the transport.
    pub fn sink_message(&self) -> Option<&str> {
        match &self.failure {
            WriteFailure::Session(e)
            | WriteFailure::Initiate(e)
            | WriteFailure::Send(e)
            | WriteFailure::Commit(e)
            | WriteFailure::Batch { source: e, .. } => Some(e.message()),
            WriteFailure::Segmentation(_) | WriteFailure::Batches { .. } => None,
        }
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transaction_id {
            Some(id) => write!(f, "{} (transaction {})", self.failure, id),
            None => write!(f, "{}", self.failure),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.failure)
    }
}

impl From<SegmentationError> for WriteError {
    fn from(err: SegmentationError) -> Self {
        WriteError::new(None, WriteFailure::Segmentation(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_display_includes_transaction_id() {
        let id = TransactionId::from_sink("ABC123");
        let err = WriteError::new(
            Some(id),
            WriteFailure::Batch {
                index: 2,
                source: TransportError::http(500, "boom"),
            },
        );
        let text = err.to_string();
        assert!(text.contains("batch 2"));
        assert!(text.contains("ABC123"));
        assert_eq!(err.sink_message(), Some("boom"));
    }

    #[test]
    fn test_missing_attributes_lists_names() {
        let err = SegmentationError::missing_attributes(vec!["LOCID".into()]);
        match err {
            SegmentationError::DataValidation { missing, message } => {
                assert_eq!(missing, vec!["LOCID".to_string()]);
                assert!(message.contains("LOCID"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
