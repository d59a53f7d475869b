// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Discovery collaborator: resolves a logical endpoint to connectable
//! network addresses and their offered security configurations.
//!
//! Used only by `Session::connect`; not otherwise part of the pooling core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use uapool_core::error::PoolResult;

use crate::config::{SecurityMode, SecurityPolicy};

// =============================================================================
// Descriptions
// =============================================================================

/// One server found by discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescription {
    /// Application URI of the server.
    pub application_uri: String,

    /// Human-readable application name.
    pub application_name: String,

    /// Discovery URLs the server can be queried on.
    pub discovery_urls: Vec<String>,
}

/// One connectable endpoint offered by a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescription {
    /// The URL to connect to.
    pub endpoint_url: String,

    /// Offered message security mode.
    pub security_mode: SecurityMode,

    /// Offered security policy.
    pub security_policy: SecurityPolicy,

    /// The server's certificate, when security is offered.
    pub server_certificate: Option<Vec<u8>>,
}

// =============================================================================
// Discovery trait
// =============================================================================

/// The discovery collaborator.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Finds servers reachable via the given discovery URLs.
    async fn find_servers(&self, discovery_urls: &[String]) -> PoolResult<Vec<ServerDescription>>;

    /// Fetches the endpoints offered by one discovery URL.
    async fn get_endpoints(&self, discovery_url: &str) -> PoolResult<Vec<EndpointDescription>>;
}
