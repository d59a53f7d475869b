// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Process-wide shared state: the address cache, the persistent request
//! stores, client-wide settings, and the monotonic handle generators.
//!
//! Created once per client lifetime and shared by reference everywhere. No
//! entity outside the database mutates the counters directly.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use uapool_core::mask::Mask;
use uapool_core::service::{CreateMonitoredItems, RequestHandle};
use uapool_core::status::Status;

use crate::address_cache::AddressCache;
use crate::config::ClientSettings;
use crate::store::RequestStore;

// =============================================================================
// HandleGenerator
// =============================================================================

/// A monotonically increasing handle generator under its own lock.
#[derive(Debug)]
pub struct HandleGenerator {
    next: Mutex<u32>,
}

impl HandleGenerator {
    /// Creates a generator starting at 1. Zero is reserved as "no handle".
    pub fn new() -> Self {
        Self { next: Mutex::new(1) }
    }

    /// Returns the next handle.
    pub fn next(&self) -> u32 {
        let mut next = self.next.lock();
        let handle = *next;
        *next = next.wrapping_add(1).max(1);
        handle
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Transaction map
// =============================================================================

/// Correlation record for one in-flight asynchronous invocation.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// The originating request handle.
    pub request_handle: RequestHandle,

    /// Original ranks of the targets carried by this transaction, in the
    /// order the transport reports their outcomes.
    pub ranks: Vec<usize>,

    /// Whether the originating service kind persists its requests.
    pub persistent: bool,
}

/// The callback-delivered final outcome of one asynchronous invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCompletion {
    /// The originating request handle.
    pub request_handle: RequestHandle,

    /// Original ranks of the completed targets, parallel to `statuses`.
    pub ranks: Vec<usize>,

    /// Final per-target statuses, in rank order.
    pub statuses: Vec<Status>,

    /// Summarized overall status reported by the transport.
    pub overall: Status,
}

// =============================================================================
// Database
// =============================================================================

/// Process-wide shared state for one client.
#[derive(Debug)]
pub struct Database {
    settings: ClientSettings,
    address_cache: AddressCache,
    monitored_items: RequestStore<CreateMonitoredItems>,

    connection_ids: HandleGenerator,
    subscription_handles: HandleGenerator,
    monitored_item_handles: HandleGenerator,
    notification_handles: HandleGenerator,

    transactions: Mutex<HashMap<u64, Transaction>>,
    next_transaction_id: Mutex<u64>,
    completions: broadcast::Sender<ServiceCompletion>,
}

impl Database {
    /// Creates a database with the given client-wide settings.
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            address_cache: AddressCache::new(),
            monitored_items: RequestStore::new(),
            connection_ids: HandleGenerator::new(),
            subscription_handles: HandleGenerator::new(),
            monitored_item_handles: HandleGenerator::new(),
            notification_handles: HandleGenerator::new(),
            transactions: Mutex::new(HashMap::new()),
            next_transaction_id: Mutex::new(1),
            completions: broadcast::channel(256).0,
        }
    }

    /// Client-wide settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The address-resolution cache.
    pub fn address_cache(&self) -> &AddressCache {
        &self.address_cache
    }

    /// The persistent store for monitored-item requests.
    pub fn monitored_items(&self) -> &RequestStore<CreateMonitoredItems> {
        &self.monitored_items
    }

    // =========================================================================
    // Handle generators
    // =========================================================================

    /// Assigns the next connection id.
    pub fn next_connection_id(&self) -> u32 {
        self.connection_ids.next()
    }

    /// Assigns the next client-side subscription handle.
    pub fn next_subscription_handle(&self) -> u32 {
        self.subscription_handles.next()
    }

    /// Assigns the next client-side monitored-item handle.
    pub fn next_monitored_item_handle(&self) -> u32 {
        self.monitored_item_handles.next()
    }

    /// Assigns the next notification handle.
    pub fn next_notification_handle(&self) -> u32 {
        self.notification_handles.next()
    }

    // =========================================================================
    // Transaction map
    // =========================================================================

    /// Registers an in-flight asynchronous invocation, returning its
    /// transaction id.
    pub fn register_transaction(&self, transaction: Transaction) -> u64 {
        let id = {
            let mut next = self.next_transaction_id.lock();
            let id = *next;
            *next += 1;
            id
        };
        self.transactions.lock().insert(id, transaction);
        id
    }

    /// Completes an asynchronous invocation delivered by the transport
    /// callback.
    ///
    /// The final statuses are published on the completion stream keyed by
    /// the originating request handle; for persistent services they are
    /// additionally written into the request store. Unknown transaction ids
    /// are discarded: the result cannot be attributed to any request.
    pub fn complete_transaction(&self, transaction_id: u64, overall: Status, statuses: &[Status]) {
        let Some(transaction) = self.transactions.lock().remove(&transaction_id) else {
            debug!(transaction_id, "discarding completion for unknown transaction");
            return;
        };

        if transaction.persistent {
            for (position, rank) in transaction.ranks.iter().enumerate() {
                if let Some(status) = statuses.get(position) {
                    self.monitored_items.update_target_status(
                        transaction.request_handle,
                        *rank,
                        status.clone(),
                    );
                }
            }
        }

        // No subscribers is a normal condition.
        let _ = self.completions.send(ServiceCompletion {
            request_handle: transaction.request_handle,
            ranks: transaction.ranks,
            statuses: statuses.to_vec(),
            overall,
        });
    }

    /// Subscribes to the final outcomes of asynchronous invocations.
    pub fn completions(&self) -> broadcast::Receiver<ServiceCompletion> {
        self.completions.subscribe()
    }

    /// Drops a registered transaction without completing it.
    pub fn forget_transaction(&self, transaction_id: u64) -> Option<Transaction> {
        self.transactions.lock().remove(&transaction_id)
    }

    /// Number of in-flight transactions.
    pub fn pending_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    // =========================================================================
    // Recovery surface
    // =========================================================================

    /// Returns the bad-target mask of one persisted request, used by callers
    /// to selectively retry.
    pub fn bad_target_mask(&self, handle: RequestHandle) -> Option<Mask> {
        self.monitored_items.get(handle).map(|item| item.bad_targets)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(ClientSettings::default())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uapool_core::node::{EndpointId, NodeId};
    use uapool_core::service::{
        MonitorTarget, MonitoredItemSettings, Request, ServiceResult,
    };
    use uapool_core::status::StatusCode;

    #[test]
    fn test_handles_are_monotonic_and_independent() {
        let db = Database::default();
        assert_eq!(db.next_connection_id(), 1);
        assert_eq!(db.next_connection_id(), 2);
        assert_eq!(db.next_subscription_handle(), 1);
        assert_eq!(db.next_monitored_item_handle(), 1);
        assert_eq!(db.next_notification_handle(), 1);
        assert_eq!(db.next_connection_id(), 3);
    }

    #[test]
    fn test_unknown_transaction_is_discarded() {
        let db = Database::default();
        let mut completions = db.completions();
        db.complete_transaction(42, Status::good(), &[Status::good()]);
        assert_eq!(db.pending_transactions(), 0);
        assert!(completions.try_recv().is_err());
    }

    #[test]
    fn test_completions_are_published() {
        let db = Database::default();
        let mut completions = db.completions();

        let id = db.register_transaction(Transaction {
            request_handle: 4,
            ranks: vec![0, 2],
            persistent: false,
        });
        db.complete_transaction(
            id,
            Status::bad(StatusCode::BAD_TIMEOUT),
            &[Status::good(), Status::bad(StatusCode::BAD_TIMEOUT)],
        );

        let completion = completions.try_recv().unwrap();
        assert_eq!(completion.request_handle, 4);
        assert_eq!(completion.ranks, vec![0, 2]);
        assert!(completion.statuses[0].is_good());
        assert!(completion.statuses[1].is_bad());
        assert!(completion.overall.is_bad());
        assert_eq!(db.pending_transactions(), 0);
    }

    #[test]
    fn test_persistent_transaction_updates_store() {
        let db = Database::default();

        let request: Request<CreateMonitoredItems> = Request::new(
            9,
            vec![
                MonitorTarget {
                    endpoint: EndpointId::from("opc.tcp://a:4840"),
                    node: NodeId::numeric(2, 1).into(),
                    settings: MonitoredItemSettings::default(),
                },
                MonitorTarget {
                    endpoint: EndpointId::from("opc.tcp://a:4840"),
                    node: NodeId::numeric(2, 2).into(),
                    settings: MonitoredItemSettings::default(),
                },
            ],
        );
        db.monitored_items().store_if_needed(
            request,
            ServiceResult::unattempted(2),
            Mask::all_set(2),
        );

        let id = db.register_transaction(Transaction {
            request_handle: 9,
            ranks: vec![1],
            persistent: true,
        });
        db.complete_transaction(id, Status::good(), &[Status::good()]);

        let item = db.monitored_items().get(9).unwrap();
        assert!(item.bad_targets.is_set(0));
        assert!(!item.bad_targets.is_set(1));
        assert_eq!(
            item.result.targets[0].status.code,
            StatusCode::BAD_NO_COMMUNICATION
        );
    }
}
