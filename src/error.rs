// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for stock synchronization.
//!
//! Errors are categorized by the collaborator that produced them (cache,
//! warehouse authority, product store, event payload) so callers can decide
//! between fallback, retry, and surfacing the failure.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `CacheFault` | Yes | Redis timeouts, dropped connections, command failures |
//! | `UpstreamUnavailable` | Yes | Warehouse unreachable, non-2xx status, circuit open |
//! | `Store` | Yes | Product store transaction or query failure |
//! | `Decode` | No | Malformed event payload or authority response |
//! | `NotFound` | No | Product absent or inactive in the product store |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Service lifecycle violation |
//! | `Shutdown` | No | Service is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Propagation
//!
//! A `CacheFault` never reaches a caller of the read path: the synchronizer
//! treats it as a miss. `UpstreamUnavailable` on the read path is surfaced.

use thiserror::Error;

/// Result type alias for stock synchronization operations.
pub type Result<T> = std::result::Result<T, StockError>;

/// Errors that can occur while synchronizing stock availability.
#[derive(Error, Debug)]
pub enum StockError {
    /// Availability cache backend failure.
    ///
    /// Non-fatal on the read path (treated as a miss).
    #[error("Cache fault ({operation}): {message}")]
    CacheFault {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// The warehouse authority could not serve the request.
    ///
    /// Covers transport errors, timeouts, non-success statuses and
    /// circuit breaker rejections.
    #[error("Upstream unavailable ({operation}): {message}")]
    UpstreamUnavailable { operation: String, message: String },

    /// Malformed payload (stream event or authority response body).
    #[error("Decode error: {0}")]
    Decode(String),

    /// Product absent (or inactive) in the local product store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local product store failure.
    #[error("Product store error: {0}")]
    Store(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StockError {
    /// Create a cache fault from a redis::RedisError
    pub fn cache(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::CacheFault {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a cache fault without source
    pub fn cache_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CacheFault {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an upstream error for a named authority operation
    pub fn upstream(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::CacheFault { .. } => true,
            Self::UpstreamUnavailable { .. } => true,
            Self::Store(_) => true,
            Self::Decode(_) => false, // Retrying a malformed payload yields the same result
            Self::NotFound(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CacheFault { .. } => "cache_fault",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Decode(_) => "decode",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<redis::RedisError> for StockError {
    fn from(e: redis::RedisError) -> Self {
        Self::cache("unknown", e)
    }
}

impl From<serde_json::Error> for StockError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
