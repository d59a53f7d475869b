// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Persistent request store for services whose requests survive failures.
//!
//! A stored item is the tuple (request, result-so-far, bad-target mask),
//! keyed by the caller-visible request handle. The bad-target mask always
//! reflects the current stored per-target statuses, which is what a caller
//! recovers to selectively retry failed targets after reconnection.
//!
//! State is in-memory only and does not survive process restart.

use std::collections::HashMap;

use parking_lot::Mutex;

use uapool_core::mask::Mask;
use uapool_core::service::{Request, RequestHandle, Service, ServiceResult, TargetOutcome};
use uapool_core::status::Status;

// =============================================================================
// StoredRequest
// =============================================================================

/// One persisted request with its in-progress result and bad-target mask.
#[derive(Debug)]
pub struct StoredRequest<S: Service> {
    /// The original request.
    pub request: Request<S>,

    /// The result accumulated so far, parallel to the request targets.
    pub result: ServiceResult<S>,

    /// Bit per target: set when the stored status is not good.
    pub bad_targets: Mask,
}

// The derive would bound `S: Clone`; only the field types need it.
impl<S: Service> Clone for StoredRequest<S> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            result: self.result.clone(),
            bad_targets: self.bad_targets.clone(),
        }
    }
}

impl<S: Service> StoredRequest<S> {
    fn recompute_bad_mask(&mut self) {
        for (rank, outcome) in self.result.targets.iter().enumerate() {
            self.bad_targets.assign(rank, outcome.status().is_not_good());
        }
    }
}

// =============================================================================
// RequestStore
// =============================================================================

/// Map from request handle to persisted request state, guarded by a single
/// per-store lock.
#[derive(Debug)]
pub struct RequestStore<S: Service> {
    items: Mutex<HashMap<RequestHandle, StoredRequest<S>>>,
}

impl<S: Service> Default for RequestStore<S> {
    fn default() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: Service> RequestStore<S> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new item unless the request handle is already present.
    ///
    /// Returns `true` if the item was inserted. The second store of the same
    /// handle is a no-op, which makes re-invocation after partial failure
    /// idempotent.
    pub fn store_if_needed(
        &self,
        request: Request<S>,
        result: ServiceResult<S>,
        bad_targets: Mask,
    ) -> bool {
        let mut items = self.items.lock();
        if items.contains_key(&request.handle) {
            return false;
        }
        let handle = request.handle;
        items.insert(
            handle,
            StoredRequest {
                request,
                result,
                bad_targets,
            },
        );
        true
    }

    /// Returns a snapshot of the item stored under `handle`.
    pub fn get(&self, handle: RequestHandle) -> Option<StoredRequest<S>> {
        self.items.lock().get(&handle).cloned()
    }

    /// Removes the item stored under `handle`, returning it if present.
    pub fn remove(&self, handle: RequestHandle) -> Option<StoredRequest<S>> {
        self.items.lock().remove(&handle)
    }

    /// Returns every stored item whose bad-target mask has at least one set
    /// bit.
    pub fn bad_items(&self) -> Vec<StoredRequest<S>> {
        self.items
            .lock()
            .values()
            .filter(|item| item.bad_targets.any_set())
            .cloned()
            .collect()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Overwrites the stored status of one target and re-derives its
    /// bad-target bit.
    ///
    /// Returns `false` if the handle is unknown or the rank is out of range;
    /// both are normal conditions (the request may have been removed).
    pub fn update_target_status(
        &self,
        handle: RequestHandle,
        rank: usize,
        status: Status,
    ) -> bool {
        let mut items = self.items.lock();
        let Some(item) = items.get_mut(&handle) else {
            return false;
        };
        let Some(outcome) = item.result.targets.get_mut(rank) else {
            return false;
        };
        item.bad_targets.assign(rank, status.is_not_good());
        outcome.set_status(status);
        item.result.summarize();
        true
    }

    /// Overwrites the stored targets selected by `mask` from `result`, then
    /// recomputes the bad-target bit of every index in range from the stored
    /// statuses.
    ///
    /// The recomputation deliberately runs over all indices, not only the
    /// masked ones: the bad mask always reflects current stored status.
    pub fn update_result(
        &self,
        handle: RequestHandle,
        result: &ServiceResult<S>,
        mask: &Mask,
    ) -> bool {
        let mut items = self.items.lock();
        let Some(item) = items.get_mut(&handle) else {
            return false;
        };
        for rank in mask.iter_set() {
            if let (Some(stored), Some(incoming)) = (
                item.result.targets.get_mut(rank),
                result.targets.get(rank),
            ) {
                *stored = incoming.clone();
            }
        }
        item.recompute_bad_mask();
        item.result.summarize();
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
