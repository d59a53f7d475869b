// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Fan-out/fan-in of one request across the sessions of its endpoints.
//!
//! Targets are grouped by owning endpoint; each group is executed through
//! an acquired session and its outcomes merged back into the result at the
//! targets' original ranks. The grouping step may resolve logical addresses
//! through the address cache.
//!
//! Each service kind plugs its execution and persistence behavior in
//! through the [`Invocable`] descriptor extension instead of specializing
//! the fan-out path per call site.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use uapool_core::error::{InvalidRequestError, PoolError, PoolResult};
use uapool_core::mask::Mask;
use uapool_core::node::{EndpointId, NodeAddress};
use uapool_core::service::{
    Browse, BrowseNext, CallMethod, CreateMonitoredItems, HistoryReadRawModified, Read, Request,
    RequestHandle, RequestOptions, Service, ServiceResult, ServiceTarget, TargetOutcome,
    TranslateBrowsePaths, Write,
};

use crate::config::ConnectionSettings;
use crate::database::{Database, Transaction};
use crate::session::Session;
use crate::session_factory::SessionFactory;
use crate::transport::CallOptions;

// =============================================================================
// GroupContext
// =============================================================================

/// Per-endpoint-group context handed to a service's execute hook.
pub struct GroupContext<'a> {
    /// Handle of the originating request.
    pub request_handle: RequestHandle,

    /// Original ranks of the group's targets, in group order.
    pub ranks: &'a [usize],

    /// The originating request's options.
    pub options: &'a RequestOptions,

    /// Per-call options derived from the request options, including the
    /// transaction id for asynchronous requests.
    pub call: CallOptions,

    /// Shared client state.
    pub database: &'a Arc<Database>,
}

// =============================================================================
// Invocable
// =============================================================================

/// Execution and persistence behavior of one service kind.
///
/// The default hooks do nothing; persistent and cache-feeding services
/// override the ones they need.
#[async_trait]
pub trait Invocable: Service {
    /// Executes one endpoint group through an acquired session.
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>>;

    /// Called once before any group executes, after validation passed.
    fn persist_before(database: &Database, request: &Request<Self>) {
        let _ = (database, request);
    }

    /// Called once after all groups executed and the result was merged.
    /// `mask` is the selection the invocation ran with; only the selected
    /// ranks carry fresh outcomes.
    fn persist_after(
        database: &Database,
        request: &Request<Self>,
        result: &ServiceResult<Self>,
        mask: &Mask,
    ) {
        let _ = (database, request, result, mask);
    }

    /// Called per successful group with its targets and outcomes, e.g. to
    /// feed the address cache.
    fn absorb(
        database: &Database,
        endpoint: &EndpointId,
        targets: &[Self::Target],
        outcomes: &[Self::Outcome],
    ) {
        let _ = (database, endpoint, targets, outcomes);
    }
}

// =============================================================================
// InvocationFactory
// =============================================================================

/// Drives the fan-out/fan-in of requests over the session pool.
pub struct InvocationFactory {
    database: Arc<Database>,
    sessions: Arc<SessionFactory>,
    default_settings: ConnectionSettings,
    endpoint_settings: Mutex<HashMap<EndpointId, ConnectionSettings>>,
}

impl InvocationFactory {
    /// Creates a factory over the given pool and shared state.
    pub fn new(
        database: Arc<Database>,
        sessions: Arc<SessionFactory>,
        default_settings: ConnectionSettings,
    ) -> Self {
        Self {
            database,
            sessions,
            default_settings,
            endpoint_settings: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the connection settings used for one endpoint.
    pub fn set_connection_settings(&self, endpoint: &EndpointId, settings: ConnectionSettings) {
        self.endpoint_settings
            .lock()
            .insert(endpoint.clone(), settings);
    }

    /// The connection settings used when acquiring a session for `endpoint`.
    pub fn connection_settings(&self, endpoint: &EndpointId) -> ConnectionSettings {
        self.endpoint_settings
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| self.default_settings.clone())
    }

    /// Invokes the targets of one request selected by `mask`.
    ///
    /// The mask is parallel to the target list; a first invocation selects
    /// every target, a retry selects the recovered bad-target mask. The
    /// result stays parallel to the full request: unselected ranks keep
    /// their unattempted placeholder.
    ///
    /// Validation and the asynchronous single-endpoint check run before any
    /// side effect; a mask-size mismatch or a multi-endpoint asynchronous
    /// request fails without acquiring a session or persisting anything. A
    /// group whose session call fails contributes the error's status to
    /// each of its targets; other groups are unaffected.
    pub async fn invoke<S: Invocable>(
        &self,
        mut request: Request<S>,
        mask: &Mask,
    ) -> PoolResult<ServiceResult<S>> {
        if request.is_empty() {
            return Err(InvalidRequestError::empty_target_list(request.handle).into());
        }
        if mask.size() != request.len() {
            return Err(InvalidRequestError::mask_size_mismatch(mask.size(), request.len()).into());
        }

        self.resolve_addresses(&mut request, mask);

        // Group the selected ranks by endpoint in first-appearance order.
        let mut groups: Vec<(EndpointId, Vec<usize>)> = Vec::new();
        for rank in mask.iter_set() {
            let target = &request.targets[rank];
            match groups.iter_mut().find(|(e, _)| *e == *target.endpoint()) {
                Some((_, ranks)) => ranks.push(rank),
                None => groups.push((target.endpoint().clone(), vec![rank])),
            }
        }

        if request.options.asynchronous && groups.len() > 1 {
            return Err(PoolError::multi_endpoint_async(groups.len()));
        }

        S::persist_before(&self.database, &request);

        let mut result = ServiceResult::<S>::unattempted(request.len());
        for (endpoint, ranks) in &groups {
            let group_targets: Vec<S::Target> =
                ranks.iter().map(|&rank| request.targets[rank].clone()).collect();

            let session = self
                .sessions
                .acquire(endpoint, &self.connection_settings(endpoint))
                .await?;
            let connection_id = session.connection_id();

            let transaction_id = request.options.asynchronous.then(|| {
                self.database.register_transaction(Transaction {
                    request_handle: request.handle,
                    ranks: ranks.clone(),
                    persistent: S::PERSISTENT,
                })
            });

            let group = GroupContext {
                request_handle: request.handle,
                ranks,
                options: &request.options,
                call: CallOptions {
                    timeout: request.options.timeout,
                    transaction_id,
                },
                database: &self.database,
            };

            let executed = S::execute(&session, &group, &group_targets).await;
            let released = self.sessions.release(connection_id, true).await;

            match executed {
                Ok(outcomes) => {
                    debug!(
                        service = S::NAME,
                        request_handle = request.handle,
                        endpoint = %endpoint,
                        targets = ranks.len(),
                        "service group executed"
                    );
                    for (position, rank) in ranks.iter().enumerate() {
                        if let Some(outcome) = outcomes.get(position) {
                            result.targets[*rank] = outcome.clone();
                        }
                    }
                    S::absorb(&self.database, endpoint, &group_targets, &outcomes);
                }
                Err(err) => {
                    if let Some(id) = transaction_id {
                        self.database.forget_transaction(id);
                    }
                    warn!(
                        service = S::NAME,
                        request_handle = request.handle,
                        endpoint = %endpoint,
                        category = err.category(),
                        error = %err,
                        "service group failed"
                    );
                    let status = err.to_status();
                    for rank in ranks {
                        result.targets[*rank].set_status(status.clone());
                    }
                }
            }
            released?;
        }

        result.summarize();
        S::persist_after(&self.database, &request, &result, mask);
        Ok(result)
    }

    fn resolve_addresses<S: Service>(&self, request: &mut Request<S>, mask: &Mask) {
        let cache = self.database.address_cache();
        for rank in mask.iter_set() {
            let target = &mut request.targets[rank];
            let endpoint = target.endpoint().clone();
            let Some(address) = target.address_mut() else {
                continue;
            };
            if let Some(path) = address.path() {
                if let Some(node) = cache.resolve(&endpoint, path) {
                    *address = NodeAddress::Resolved(node);
                }
            }
        }
    }
}

impl std::fmt::Debug for InvocationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationFactory").finish_non_exhaustive()
    }
}

// =============================================================================
// Per-service behavior
// =============================================================================

#[async_trait]
impl Invocable for Read {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.read(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for Write {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.write(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for CallMethod {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.call_method(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for Browse {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.browse(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for BrowseNext {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.browse_next(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for HistoryReadRawModified {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.history_read_raw_modified(targets, &group.call).await
    }
}

#[async_trait]
impl Invocable for TranslateBrowsePaths {
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        session.translate_browse_paths(targets, &group.call).await
    }

    /// Successful single resolutions feed the address cache, scoped to the
    /// group's endpoint.
    fn absorb(
        database: &Database,
        endpoint: &EndpointId,
        targets: &[Self::Target],
        outcomes: &[Self::Outcome],
    ) {
        let cache = database.address_cache();
        for (target, outcome) in targets.iter().zip(outcomes) {
            if outcome.status.is_good() {
                if let Some(node) = outcome.resolved.first() {
                    cache.insert(endpoint, target.relative_path.clone(), node.clone());
                }
            }
        }
    }
}

#[async_trait]
impl Invocable for CreateMonitoredItems {
    /// Runs on a subscription acquired from the session's pool: an existing
    /// shareable channel with equal settings is joined unless the request
    /// demands a dedicated one. The acquisition hold is dropped after the
    /// items are established; the items themselves keep the channel alive
    /// until it is explicitly deleted.
    async fn execute(
        session: &Session,
        group: &GroupContext<'_>,
        targets: &[Self::Target],
    ) -> PoolResult<Vec<Self::Outcome>> {
        let subscription = session
            .subscriptions()
            .acquire(
                &group.options.subscription,
                group.options.unique_subscription,
            )
            .await?;

        let created = subscription
            .create_monitored_items(group.request_handle, targets, group.ranks, &group.call)
            .await;
        let released = session
            .subscriptions()
            .release(subscription.handle(), false)
            .await;

        let outcomes = created?;
        released?;
        Ok(outcomes)
    }

    fn persist_before(database: &Database, request: &Request<Self>) {
        database.monitored_items().store_if_needed(
            request.clone(),
            ServiceResult::unattempted(request.len()),
            Mask::all_set(request.len()),
        );
    }

    fn persist_after(
        database: &Database,
        request: &Request<Self>,
        result: &ServiceResult<Self>,
        mask: &Mask,
    ) {
        database
            .monitored_items()
            .update_result(request.handle, result, mask);
    }
}
