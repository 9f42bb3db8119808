//! Error types for SAP IBP transport operations.
//!
//! Every call that crosses the network boundary (data fetch, CSRF handshake,
//! batch send, commit, result lookup) reports failures through
//! [`TransportError`], carrying an [`ErrorContext`] that records which
//! operation and endpoint were involved.

use std::fmt;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Structured context for transport errors.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation being performed (e.g., "fetch", "send_batch", "commit")
    pub operation: Option<String>,
    /// The endpoint or URL involved
    pub endpoint: Option<String>,
    /// HTTP status returned by the remote side, if any
    pub status: Option<u16>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref op) = self.operation {
            parts.push(format!("operation={}", op));
        }
        if let Some(ref endpoint) = self.endpoint {
            parts.push(format!("endpoint={}", endpoint));
        }
        if let Some(status) = self.status {
            parts.push(format!("status={}", status));
        }
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Error type for SAP transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network-level failure (DNS, TLS, connection reset).
    #[error("Connection error: {message} {context}")]
    Connection {
        message: String,
        context: ErrorContext,
    },

    /// Authentication or CSRF handshake failure.
    #[error("Authentication error: {message} {context}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    /// Non-2xx response. `message` holds the response body verbatim.
    #[error("HTTP error: {message} {context}")]
    Http {
        message: String,
        context: ErrorContext,
    },

    /// Timeout waiting for the remote side.
    #[error("Timeout error: {message} {context}")]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    /// Response body could not be decoded.
    #[error("Decode error: {message} {context}")]
    Decode {
        message: String,
        context: ErrorContext,
    },

    /// Transport is missing required settings.
    #[error("Configuration error: {message} {context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create an HTTP error for a non-success status.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            message: body.into(),
            context: ErrorContext {
                status: Some(status),
                ..ErrorContext::default()
            },
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    /// The remote error text, without context decoration.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. }
            | Self::Authentication { message, .. }
            | Self::Http { message, .. }
            | Self::Timeout { message, .. }
            | Self::Decode { message, .. }
            | Self::Configuration { message, .. } => message,
        }
    }

    /// Get the error context.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Connection { context, .. }
            | Self::Authentication { context, .. }
            | Self::Http { context, .. }
            | Self::Timeout { context, .. }
            | Self::Decode { context, .. }
            | Self::Configuration { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Connection { context, .. }
            | Self::Authentication { context, .. }
            | Self::Http { context, .. }
            | Self::Timeout { context, .. }
            | Self::Decode { context, .. }
            | Self::Configuration { context, .. } => context,
        }
    }

    /// Add or update the operation in the error context.
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add or update the endpoint in the error context.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.context_mut().endpoint = Some(endpoint.into());
        self
    }
}

#[cfg(feature = "odata")]
impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err.url().map(|u| u.to_string());
        let mut mapped = if err.is_timeout() {
            TransportError::timeout(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::http(status.as_u16(), err.to_string())
        } else if err.is_decode() {
            TransportError::decode(err.to_string())
        } else {
            TransportError::connection(err.to_string())
        };
        if let Some(endpoint) = endpoint {
            mapped = mapped.with_endpoint(endpoint);
        }
        mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_keeps_body_verbatim() {
        let err = TransportError::http(400, "<error><message>Invalid key figure</message></error>");
        assert_eq!(
            err.message(),
            "<error><message>Invalid key figure</message></error>"
        );
        assert_eq!(err.context().status, Some(400));
        assert!(err.to_string().contains("status=400"));
    }

    #[test]
    fn test_context_display() {
        let err = TransportError::authentication("no token")
            .with_operation("begin_session")
            .with_endpoint("https://ibp.example.com/api");
        let text = err.to_string();
        assert!(text.contains("operation=begin_session"));
        assert!(text.contains("endpoint=https://ibp.example.com/api"));
    }
}
