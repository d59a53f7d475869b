// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the pooling layer.
//!
//! # Error Categories
//!
//! ```text
//! PoolError
//! ├── Connection         - Transport connect/disconnect failures
//! ├── Discovery          - Server/endpoint discovery failures
//! ├── Security           - Certificate and security-config failures
//! ├── InvalidRequest     - Caller-caused request-shape errors
//! ├── MultiEndpointAsync - Asynchronous request spanning >1 endpoint
//! ├── UnknownResource    - Lookup of an id the pool does not know
//! └── Unexpected         - Internal invariant violations
//! ```
//!
//! Lower layers never panic for normal conditions; `Unexpected` is reserved
//! for internal-consistency failures and is always logged at error severity
//! by the caller that produces it.

use std::time::Duration;

use thiserror::Error;

use crate::status::{Status, StatusCode};

/// Convenience alias used across the workspace.
pub type PoolResult<T> = Result<T, PoolError>;

// =============================================================================
// PoolError
// =============================================================================

/// The top-level error type for pooling operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Transport-level connection failure.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Discovery failure while locating servers or endpoints.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// Security configuration or certificate failure.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Caller-caused request-shape error.
    #[error("{0}")]
    InvalidRequest(#[from] InvalidRequestError),

    /// An asynchronous request addressed more than one endpoint.
    #[error("asynchronous request addresses {endpoints} endpoints; exactly one is allowed")]
    MultiEndpointAsync {
        /// Number of distinct endpoints the targets resolved to.
        endpoints: usize,
    },

    /// A lookup referenced an id the pool does not know.
    #[error("unknown {kind} id {id}")]
    UnknownResource {
        /// Kind of resource looked up.
        kind: ResourceKind,
        /// The unknown id.
        id: u32,
    },

    /// Internal invariant violation. Indicates a bug, not a transient
    /// condition.
    #[error("invariant violation: {0}")]
    Unexpected(String),
}

impl PoolError {
    /// Creates a multi-endpoint-async error.
    pub fn multi_endpoint_async(endpoints: usize) -> Self {
        Self::MultiEndpointAsync { endpoints }
    }

    /// Creates an unknown-resource error.
    pub fn unknown(kind: ResourceKind, id: u32) -> Self {
        Self::UnknownResource { kind, id }
    }

    /// Creates an invariant-violation error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Returns `true` if retrying the affected targets may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Discovery(e) => e.is_retryable(),
            Self::Security(_) => false,
            Self::InvalidRequest(_) => false,
            Self::MultiEndpointAsync { .. } => false,
            Self::UnknownResource { .. } => false,
            Self::Unexpected(_) => false,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Discovery(_) => "discovery",
            Self::Security(_) => "security",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MultiEndpointAsync { .. } => "fan_out_policy",
            Self::UnknownResource { .. } => "unknown_resource",
            Self::Unexpected(_) => "invariant",
        }
    }

    /// Maps this error to the per-target status recorded for targets the
    /// failed step covered.
    pub fn to_status(&self) -> Status {
        let code = match self {
            Self::Connection(e) => e.status_code(),
            Self::Discovery(_) => StatusCode::BAD_SERVER_NOT_CONNECTED,
            Self::Security(_) => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::InvalidRequest(_) => StatusCode::BAD_NOTHING_TO_DO,
            Self::MultiEndpointAsync { .. } => StatusCode::BAD_NOT_SUPPORTED,
            Self::UnknownResource { .. } => StatusCode::BAD_NOT_FOUND,
            Self::Unexpected(_) => StatusCode::BAD_UNEXPECTED_ERROR,
        };
        Status::bad_with(code, self.to_string())
    }
}

/// Kinds of pooled resources addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A pooled session, addressed by connection id.
    Session,
    /// A subscription, addressed by its client-assigned handle.
    Subscription,
    /// A monitored item, addressed by its client-assigned handle.
    MonitoredItem,
    /// A persisted request, addressed by its request handle.
    Request,
    /// An in-flight transaction, addressed by its transaction id.
    Transaction,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Session => "session",
            Self::Subscription => "subscription",
            Self::MonitoredItem => "monitored item",
            Self::Request => "request",
            Self::Transaction => "transaction",
        };
        f.write_str(name)
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Transport-level connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The endpoint refused the connection.
    #[error("connection refused by '{endpoint}'")]
    Refused {
        /// Target endpoint URL.
        endpoint: String,
    },

    /// The connection attempt timed out.
    #[error("connection to '{endpoint}' timed out after {duration:?}")]
    TimedOut {
        /// Target endpoint URL.
        endpoint: String,
        /// Elapsed timeout.
        duration: Duration,
    },

    /// No connection is established.
    #[error("not connected to '{endpoint}'")]
    NotConnected {
        /// Target endpoint URL.
        endpoint: String,
    },

    /// The connection was closed by the remote side.
    #[error("connection to '{endpoint}' closed: {reason}")]
    Closed {
        /// Target endpoint URL.
        endpoint: String,
        /// Reason reported by the transport.
        reason: String,
    },

    /// The protocol handshake failed.
    #[error("handshake with '{endpoint}' failed: {reason}")]
    HandshakeFailed {
        /// Target endpoint URL.
        endpoint: String,
        /// Reason reported by the transport.
        reason: String,
    },
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a connection timed out error.
    pub fn timed_out(endpoint: impl Into<String>, duration: Duration) -> Self {
        Self::TimedOut {
            endpoint: endpoint.into(),
            duration,
        }
    }

    /// Creates a not connected error.
    pub fn not_connected(endpoint: impl Into<String>) -> Self {
        Self::NotConnected {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Closed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a handshake failed error.
    pub fn handshake_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::HandshakeFailed { .. })
    }

    /// Maps to the closest per-target status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TimedOut { .. } => StatusCode::BAD_TIMEOUT,
            Self::NotConnected { .. } => StatusCode::BAD_SERVER_NOT_CONNECTED,
            Self::Closed { .. } => StatusCode::BAD_SESSION_CLOSED,
            Self::Refused { .. } | Self::HandshakeFailed { .. } => {
                StatusCode::BAD_COMMUNICATION_ERROR
            }
        }
    }
}

// =============================================================================
// DiscoveryError
// =============================================================================

/// Discovery failures while resolving servers and endpoints.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No server answered the discovery request.
    #[error("no servers found via discovery urls {urls:?}")]
    NoServersFound {
        /// Discovery URLs that were queried.
        urls: Vec<String>,
    },

    /// The server reported no endpoints.
    #[error("no endpoints reported by '{discovery_url}'")]
    NoEndpoints {
        /// The discovery URL queried.
        discovery_url: String,
    },

    /// None of the offered endpoints matched the acceptable security
    /// configurations.
    #[error("no endpoint of '{discovery_url}' matches any acceptable security configuration")]
    NoMatchingSecurity {
        /// The discovery URL queried.
        discovery_url: String,
    },

    /// The discovery collaborator itself failed.
    #[error("discovery via '{discovery_url}' failed: {reason}")]
    Failed {
        /// The discovery URL queried.
        discovery_url: String,
        /// Reason reported by the collaborator.
        reason: String,
    },
}

impl DiscoveryError {
    /// Creates a no-servers-found error.
    pub fn no_servers_found(urls: Vec<String>) -> Self {
        Self::NoServersFound { urls }
    }

    /// Creates a no-endpoints error.
    pub fn no_endpoints(discovery_url: impl Into<String>) -> Self {
        Self::NoEndpoints {
            discovery_url: discovery_url.into(),
        }
    }

    /// Creates a no-matching-security error.
    pub fn no_matching_security(discovery_url: impl Into<String>) -> Self {
        Self::NoMatchingSecurity {
            discovery_url: discovery_url.into(),
        }
    }

    /// Creates a generic discovery failure.
    pub fn failed(discovery_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            discovery_url: discovery_url.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NoMatchingSecurity { .. })
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Certificate and security-configuration failures.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The remote certificate was rejected by the caller-supplied validator.
    #[error("server certificate of '{endpoint}' rejected")]
    CertificateRejected {
        /// Target endpoint URL.
        endpoint: String,
    },

    /// The remote certificate could not be validated.
    #[error("certificate validation for '{endpoint}' failed: {reason}")]
    ValidationFailed {
        /// Target endpoint URL.
        endpoint: String,
        /// Reason validation failed.
        reason: String,
    },
}

impl SecurityError {
    /// Creates a certificate rejected error.
    pub fn certificate_rejected(endpoint: impl Into<String>) -> Self {
        Self::CertificateRejected {
            endpoint: endpoint.into(),
        }
    }

    /// Creates a validation failed error.
    pub fn validation_failed(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// InvalidRequestError
// =============================================================================

/// Caller-caused request-shape errors.
#[derive(Debug, Error)]
pub enum InvalidRequestError {
    /// The request contained no targets.
    #[error("request {handle} has no targets")]
    EmptyTargetList {
        /// The offending request handle.
        handle: u32,
    },

    /// The selection mask does not match the target list length.
    #[error("mask size {mask_size} does not match target count {target_count}")]
    MaskSizeMismatch {
        /// Size of the supplied mask.
        mask_size: usize,
        /// Number of targets in the request.
        target_count: usize,
    },

    /// A node id string could not be parsed.
    #[error("invalid node id '{input}': {reason}")]
    InvalidNodeId {
        /// The offending input.
        input: String,
        /// Why parsing failed.
        reason: String,
    },
}

impl InvalidRequestError {
    /// Creates an empty-target-list error.
    pub fn empty_target_list(handle: u32) -> Self {
        Self::EmptyTargetList { handle }
    }

    /// Creates a mask-size-mismatch error.
    pub fn mask_size_mismatch(mask_size: usize, target_count: usize) -> Self {
        Self::MaskSizeMismatch {
            mask_size,
            target_count,
        }
    }

    /// Creates an invalid-node-id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
