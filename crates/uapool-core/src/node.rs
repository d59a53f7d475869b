// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node addressing types shared by the request model and the address cache.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidRequestError, PoolError};

// =============================================================================
// EndpointId
// =============================================================================

/// Identity of a remote, independently addressable server instance.
///
/// The string is the endpoint URL the client connects to, e.g.
/// `opc.tcp://plant-a:4840`. Endpoint ids key the session pool and scope
/// the address cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub String);

impl EndpointId {
    /// Creates an endpoint id from a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(url: &str) -> Self {
        Self(url.to_string())
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// A canonical node identifier within one server's address space.
///
/// Consists of a namespace index and a numeric or string identifier.
///
/// # Examples
///
/// ```
/// use uapool_core::node::NodeId;
///
/// let numeric = NodeId::numeric(2, 1001);
/// let string = NodeId::string(2, "Line1.Temperature");
/// let parsed: NodeId = "ns=2;s=Line1.Temperature".parse().unwrap();
/// assert_eq!(string, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),
}

impl NodeId {
    /// Creates a numeric node id.
    #[inline]
    pub fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node id.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// The null node id (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self {
            namespace_index: 0,
            identifier: NodeIdentifier::Numeric(0),
        }
    }

    /// Returns `true` if this is the null node id.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            NodeIdentifier::String(_) => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => write!(f, "ns={};i={}", self.namespace_index, v),
            NodeIdentifier::String(v) => write!(f, "ns={};s={}", self.namespace_index, v),
        }
    }
}

impl FromStr for NodeId {
    type Err = PoolError;

    /// Parses the `ns=<namespace>;{i|s}=<identifier>` format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| {
            PoolError::InvalidRequest(InvalidRequestError::invalid_node_id(s, reason))
        };

        let (namespace_index, rest) = match s.split_once(';') {
            Some((ns, rest)) => {
                let ns = ns
                    .strip_prefix("ns=")
                    .ok_or_else(|| invalid("expected 'ns=' prefix"))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| invalid("namespace index is not a u16"))?;
                (ns, rest)
            }
            None => (0, s),
        };

        if let Some(v) = rest.strip_prefix("i=") {
            let v = v
                .parse::<u32>()
                .map_err(|_| invalid("numeric identifier is not a u32"))?;
            Ok(NodeId::numeric(namespace_index, v))
        } else if let Some(v) = rest.strip_prefix("s=") {
            Ok(NodeId::string(namespace_index, v))
        } else {
            Err(invalid("expected 'i=' or 's=' identifier"))
        }
    }
}

// =============================================================================
// NodeAddress
// =============================================================================

/// Either a canonical node id or a logical path still to be resolved.
///
/// Logical paths are endpoint-relative browse paths; their resolution to a
/// canonical [`NodeId`] is cached per endpoint and is not guaranteed stable
/// across reconnection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddress {
    /// A resolved canonical node id.
    Resolved(NodeId),

    /// A logical, endpoint-relative browse path.
    Path(String),
}

impl NodeAddress {
    /// Returns the node id if already resolved.
    pub fn resolved(&self) -> Option<&NodeId> {
        match self {
            Self::Resolved(id) => Some(id),
            Self::Path(_) => None,
        }
    }

    /// Returns the logical path if unresolved.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Resolved(_) => None,
            Self::Path(p) => Some(p),
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(id) => write!(f, "{id}"),
            Self::Path(p) => write!(f, "path:{p}"),
        }
    }
}

impl From<NodeId> for NodeAddress {
    fn from(id: NodeId) -> Self {
        Self::Resolved(id)
    }
}

// =============================================================================
// Value
// =============================================================================

/// A scalar value carried by read/write/call targets and notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Boolean value.
    Bool(bool),

    /// Signed integer value.
    Int64(i64),

    /// Unsigned integer value.
    UInt64(u64),

    /// Floating point value.
    Double(f64),

    /// String value.
    String(String),

    /// Raw byte string.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns a short name for the contained type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int64(_) => "int64",
            Self::UInt64(_) => "uint64",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Bytes(v) => write!(f, "{} bytes", v.len()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
