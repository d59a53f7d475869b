// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Concurrent cache from logical address to resolved canonical node id,
//! scoped per endpoint.
//!
//! The association between a logical path and its canonical node id is not
//! guaranteed stable across reconnection, so all entries of an endpoint are
//! purged whenever its session enters a broken state.

use dashmap::DashMap;
use std::collections::HashMap;
use tracing::debug;

use uapool_core::node::{EndpointId, NodeId};

// =============================================================================
// AddressCache
// =============================================================================

/// Concurrent map from (endpoint, logical address) to canonical node id.
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: DashMap<EndpointId, HashMap<String, NodeId>>,
}

impl AddressCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a logical address within an endpoint's scope.
    pub fn resolve(&self, endpoint: &EndpointId, address: &str) -> Option<NodeId> {
        self.entries
            .get(endpoint)
            .and_then(|scope| scope.get(address).cloned())
    }

    /// Stores a resolved address within an endpoint's scope, replacing any
    /// earlier resolution.
    pub fn insert(&self, endpoint: &EndpointId, address: impl Into<String>, node: NodeId) {
        self.entries
            .entry(endpoint.clone())
            .or_default()
            .insert(address.into(), node);
    }

    /// Purges every entry associated with one endpoint. Entries of other
    /// endpoints remain findable.
    pub fn clear_endpoint(&self, endpoint: &EndpointId) {
        if let Some((_, scope)) = self.entries.remove(endpoint) {
            if !scope.is_empty() {
                debug!(
                    endpoint = %endpoint,
                    purged = scope.len(),
                    "address cache purged for endpoint"
                );
            }
        }
    }

    /// Total number of cached resolutions across all endpoints.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|scope| scope.len()).sum()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
