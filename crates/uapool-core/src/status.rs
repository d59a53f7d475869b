// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Two-tier status model for per-target and per-result outcomes.
//!
//! Every target of a request carries its own [`Status`]; every result
//! carries one overall status computed by dominance summarization
//! (Bad > Uncertain > Good).

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// StatusCode
// =============================================================================

/// An OPC UA-style numeric status code.
///
/// The two most significant bits encode the severity: `00` = Good,
/// `01` = Uncertain, `10` = Bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u32);

impl StatusCode {
    /// The operation succeeded.
    pub const GOOD: Self = Self(0x0000_0000);

    /// The outcome is uncertain.
    pub const UNCERTAIN: Self = Self(0x4000_0000);

    /// The operation failed.
    pub const BAD: Self = Self(0x8000_0000);

    /// An unexpected internal error occurred.
    pub const BAD_UNEXPECTED_ERROR: Self = Self(0x8001_0000);

    /// A low level communication error occurred.
    pub const BAD_COMMUNICATION_ERROR: Self = Self(0x8005_0000);

    /// The operation timed out.
    pub const BAD_TIMEOUT: Self = Self(0x800C_0000);

    /// The server has stopped and cannot process any requests.
    pub const BAD_SHUTDOWN: Self = Self(0x800E_0000);

    /// No connection to the server is established.
    pub const BAD_SERVER_NOT_CONNECTED: Self = Self(0x800F_0000);

    /// There was nothing to do because the request specified no targets.
    pub const BAD_NOTHING_TO_DO: Self = Self(0x8011_0000);

    /// An error occurred verifying security.
    pub const BAD_SECURITY_CHECKS_FAILED: Self = Self(0x8016_0000);

    /// The server certificate is not trusted.
    pub const BAD_CERTIFICATE_UNTRUSTED: Self = Self(0x801D_0000);

    /// The session was closed by the client or server.
    pub const BAD_SESSION_CLOSED: Self = Self(0x802A_0000);

    /// The subscription id is not valid.
    pub const BAD_SUBSCRIPTION_ID_INVALID: Self = Self(0x802C_0000);

    /// The node id refers to a node that does not exist.
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8062_0000);

    /// The requested operation is not supported.
    pub const BAD_NOT_SUPPORTED: Self = Self(0x806B_0000);

    /// The requested item was not found.
    pub const BAD_NOT_FOUND: Self = Self(0x806C_0000);

    /// There is no subscription available for this item.
    pub const BAD_NO_SUBSCRIPTION: Self = Self(0x808A_0000);

    /// The operation was not issued because an earlier step failed.
    pub const BAD_NO_COMMUNICATION: Self = Self(0x8031_0000);

    /// Returns `true` if the severity is Good.
    #[inline]
    pub const fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` if the severity is Uncertain.
    #[inline]
    pub const fn is_uncertain(self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` if the severity is Bad.
    #[inline]
    pub const fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns `true` if the severity is anything other than Good.
    #[inline]
    pub const fn is_not_good(self) -> bool {
        !self.is_good()
    }

    /// Returns the symbolic name for well-known codes.
    pub fn name(self) -> &'static str {
        match self {
            Self::GOOD => "Good",
            Self::UNCERTAIN => "Uncertain",
            Self::BAD => "Bad",
            Self::BAD_UNEXPECTED_ERROR => "BadUnexpectedError",
            Self::BAD_COMMUNICATION_ERROR => "BadCommunicationError",
            Self::BAD_TIMEOUT => "BadTimeout",
            Self::BAD_SHUTDOWN => "BadShutdown",
            Self::BAD_SERVER_NOT_CONNECTED => "BadServerNotConnected",
            Self::BAD_NOTHING_TO_DO => "BadNothingToDo",
            Self::BAD_SECURITY_CHECKS_FAILED => "BadSecurityChecksFailed",
            Self::BAD_CERTIFICATE_UNTRUSTED => "BadCertificateUntrusted",
            Self::BAD_SESSION_CLOSED => "BadSessionClosed",
            Self::BAD_SUBSCRIPTION_ID_INVALID => "BadSubscriptionIdInvalid",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_NOT_SUPPORTED => "BadNotSupported",
            Self::BAD_NOT_FOUND => "BadNotFound",
            Self::BAD_NO_SUBSCRIPTION => "BadNoSubscription",
            Self::BAD_NO_COMMUNICATION => "BadNoCommunication",
            _ if self.is_bad() => "Bad (unmapped)",
            _ if self.is_uncertain() => "Uncertain (unmapped)",
            _ => "Good (unmapped)",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self.name(), self.0)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::GOOD
    }
}

// =============================================================================
// Status
// =============================================================================

/// A status code plus an optional human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Status {
    /// The numeric status code.
    pub code: StatusCode,

    /// Optional detail describing the failure.
    pub description: Option<String>,
}

impl Status {
    /// A good status without description.
    pub const fn good() -> Self {
        Self {
            code: StatusCode::GOOD,
            description: None,
        }
    }

    /// An uncertain status without description.
    pub const fn uncertain() -> Self {
        Self {
            code: StatusCode::UNCERTAIN,
            description: None,
        }
    }

    /// A bad status with the given code.
    pub const fn bad(code: StatusCode) -> Self {
        Self {
            code,
            description: None,
        }
    }

    /// A bad status with code and description.
    pub fn bad_with(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }

    /// Returns `true` if the code severity is Good.
    #[inline]
    pub fn is_good(&self) -> bool {
        self.code.is_good()
    }

    /// Returns `true` if the code severity is anything other than Good.
    #[inline]
    pub fn is_not_good(&self) -> bool {
        self.code.is_not_good()
    }

    /// Returns `true` if the code severity is Bad.
    #[inline]
    pub fn is_bad(&self) -> bool {
        self.code.is_bad()
    }

    /// Computes the dominance-ordered summary of a set of statuses.
    ///
    /// Any Bad status makes the summary an aggregate Bad; otherwise any
    /// Uncertain status makes it Uncertain; otherwise it is Good.
    pub fn summarize<'a>(statuses: impl IntoIterator<Item = &'a Status>) -> Status {
        let mut saw_uncertain = false;
        for status in statuses {
            if status.is_bad() {
                return Status::bad_with(StatusCode::BAD, "one or more targets failed");
            }
            if status.code.is_uncertain() {
                saw_uncertain = true;
            }
        }
        if saw_uncertain {
            Status::uncertain()
        } else {
            Status::good()
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Self {
            code,
            description: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
