//! Transport boundary to the planning system.
//!
//! The analysis and write-back services only see the [`DataSource`] and
//! [`DataSink`] traits, so the OData client and the in-memory backend are
//! interchangeable.
//!
//! ```text
//!   services ──► DataSource::fetch ──────────────► OData GET / memory
//!            └─► DataSink::{begin_session, send,  ► OData POST / memory
//!                           initiate_parallel,
//!                           commit, get_result,
//!                           get_messages}
//! ```

pub mod error;
pub mod factory;
pub mod local;
#[cfg(feature = "odata")]
pub mod odata;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::models::{RawObservation, TransactionId, WritePayload};

pub use error::{ErrorContext, TransportError, TransportResult};
pub use factory::{BackendType, Transport, TransportFactory};
pub use local::{LocalSink, LocalSource, SinkCall};
#[cfg(feature = "odata")]
pub use odata::{ODataSink, ODataSource};

/// Read side: time-series observations for a set of dimensions.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Fetch observations carrying `primary_key` and every name in
    /// `dimensions`. `filter` is passed through to the backend verbatim.
    async fn fetch(
        &self,
        primary_key: &str,
        dimensions: &[String],
        filter: Option<&str>,
    ) -> TransportResult<Vec<RawObservation>>;
}

/// Authenticated context for write calls (CSRF token plus cookie jar).
#[derive(Clone)]
pub struct SinkSession {
    pub token: String,
    pub opened_at: DateTime<Utc>,
    #[cfg(feature = "odata")]
    pub(crate) http: Option<reqwest::Client>,
}

impl SinkSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            opened_at: Utc::now(),
            #[cfg(feature = "odata")]
            http: None,
        }
    }
}

impl fmt::Debug for SinkSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSession")
            .field("token", &"<redacted>")
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

/// Write side: transactional import of segment assignments.
#[async_trait]
pub trait DataSink: Send + Sync {
    async fn begin_session(&self) -> TransportResult<SinkSession>;

    /// Post one payload. The acknowledgement body is returned as-is.
    async fn send(
        &self,
        session: &SinkSession,
        payload: &WritePayload,
        timeout: Duration,
    ) -> TransportResult<Value>;

    /// Ask the sink for a transaction id usable by concurrent batches.
    async fn initiate_parallel(
        &self,
        session: &SinkSession,
        version_id: Option<&str>,
        scenario_id: Option<&str>,
    ) -> TransportResult<TransactionId>;

    async fn commit(&self, session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<()>;

    async fn get_result(&self, session: &SinkSession, transaction_id: &TransactionId) -> TransportResult<Value>;

    async fn get_messages(
        &self,
        session: &SinkSession,
        transaction_id: &TransactionId,
    ) -> TransportResult<Vec<Value>>;
}
