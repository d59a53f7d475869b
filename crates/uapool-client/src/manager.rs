// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The caller-facing surface of the pooling layer.
//!
//! One [`ServiceManager`] owns the shared database, the session pool, and
//! the invocation machinery. Callers hand it requests and manual
//! connection/subscription commands; everything else (pooling, fan-out,
//! recovery bookkeeping) happens behind it.

use std::sync::Arc;

use tracing::info;

use uapool_core::error::{PoolError, PoolResult, ResourceKind};
use uapool_core::mask::Mask;
use uapool_core::node::EndpointId;
use uapool_core::service::{
    Request, RequestHandle, ServiceResult, SubscriptionSettings,
};

use crate::config::{ClientSettings, ConnectionSettings};
use crate::database::{Database, ServiceCompletion};
use crate::discovery::Discovery;
use crate::invocation::{Invocable, InvocationFactory};
use crate::session::{CertificateValidator, SessionInfo};
use crate::session_factory::{FactoryStatsSnapshot, SessionFactory};
use crate::subscription::{MonitoredItem, SubscriptionInfo};
use crate::transport::TransportFactory;

// =============================================================================
// ServiceManager
// =============================================================================

/// Entry point tying the pool, the shared state, and the invocation
/// machinery together.
pub struct ServiceManager {
    database: Arc<Database>,
    sessions: Arc<SessionFactory>,
    invocations: InvocationFactory,
}

impl ServiceManager {
    /// Creates a manager over the given collaborators.
    pub fn new(
        settings: ClientSettings,
        default_connection: ConnectionSettings,
        transports: Arc<dyn TransportFactory>,
        discovery: Arc<dyn Discovery>,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        let database = Arc::new(Database::new(settings));
        let sessions = Arc::new(SessionFactory::new(
            database.clone(),
            transports,
            discovery,
            validator,
        ));
        let invocations =
            InvocationFactory::new(database.clone(), sessions.clone(), default_connection);
        Self {
            database,
            sessions,
            invocations,
        }
    }

    /// Shared client state.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The session pool.
    pub fn sessions(&self) -> &Arc<SessionFactory> {
        &self.sessions
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Invokes the targets of one request selected by `mask`, fanning them
    /// out over the sessions of their endpoints and merging the outcomes
    /// back in target order.
    ///
    /// A first invocation selects every target with `Mask::all_set`; to
    /// retry only the failed targets of a persistent request, pass the mask
    /// recovered from [`Self::bad_target_mask`].
    pub async fn invoke_request<S: Invocable>(
        &self,
        request: Request<S>,
        mask: &Mask,
    ) -> PoolResult<ServiceResult<S>> {
        self.invocations.invoke(request, mask).await
    }

    /// The bad-target mask of one persisted request; callers use it to
    /// select the targets of a retry.
    pub fn bad_target_mask(&self, handle: RequestHandle) -> Option<Mask> {
        self.database.bad_target_mask(handle)
    }

    /// Drops the persisted state of one request.
    pub fn forget_request(&self, handle: RequestHandle) -> bool {
        self.database.monitored_items().remove(handle).is_some()
    }

    /// Subscribes to the final outcomes of asynchronous invocations,
    /// correlated by request handle.
    pub fn completions(&self) -> tokio::sync::broadcast::Receiver<ServiceCompletion> {
        self.database.completions()
    }

    // =========================================================================
    // Manual connection management
    // =========================================================================

    /// Acquires (and keeps holding) the session for an endpoint, connecting
    /// it if it is new. The hold lasts until [`Self::manually_disconnect`].
    ///
    /// Returns the session's connection id. A failed connect attempt is
    /// recorded on the session, not returned; inspect
    /// [`Self::session_information`] for the last attempt.
    pub async fn manually_connect(
        &self,
        endpoint: &EndpointId,
        settings: ConnectionSettings,
    ) -> PoolResult<u32> {
        self.invocations
            .set_connection_settings(endpoint, settings.clone());
        let session = self.sessions.acquire(endpoint, &settings).await?;
        info!(
            connection_id = session.connection_id(),
            endpoint = %endpoint,
            "manual connection established"
        );
        Ok(session.connection_id())
    }

    /// Releases the hold taken by [`Self::manually_connect`]. When nobody
    /// else holds the session, the transport is told to close and the
    /// session is collected once it reports `Disconnected`.
    pub async fn manually_disconnect(&self, connection_id: u32) -> PoolResult<()> {
        let session = self
            .sessions
            .get(connection_id)
            .ok_or(PoolError::unknown(ResourceKind::Session, connection_id))?;

        self.sessions.release(connection_id, false).await?;

        if session.activity_count() == 0 {
            session.subscriptions().delete_all().await?;
            session.disconnect().await?;
            self.sessions.try_collect(connection_id);
        }
        Ok(())
    }

    // =========================================================================
    // Manual subscription management
    // =========================================================================

    /// Creates or joins a subscription on an existing session and keeps
    /// holding it. The hold lasts until [`Self::manually_unsubscribe`].
    ///
    /// Returns the subscription's client-assigned handle.
    pub async fn manually_subscribe(
        &self,
        connection_id: u32,
        settings: &SubscriptionSettings,
        unique: bool,
    ) -> PoolResult<u32> {
        let session = self.sessions.acquire_existing(connection_id)?;
        let acquired = session.subscriptions().acquire(settings, unique).await;
        self.sessions.release(connection_id, false).await?;
        Ok(acquired?.handle())
    }

    /// Deletes a subscription's channel and releases the hold taken by
    /// [`Self::manually_subscribe`]. Persistent requests referencing the
    /// subscription's items are marked bad before removal.
    pub async fn manually_unsubscribe(
        &self,
        connection_id: u32,
        subscription_handle: u32,
    ) -> PoolResult<()> {
        let session = self
            .sessions
            .get(connection_id)
            .ok_or(PoolError::unknown(ResourceKind::Session, connection_id))?;
        let subscriptions = session.subscriptions();
        subscriptions.delete(subscription_handle).await?;
        subscriptions.release(subscription_handle, true).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Snapshots of every pooled session.
    pub fn session_information(&self) -> Vec<SessionInfo> {
        self.sessions.information()
    }

    /// Snapshots of one session's subscriptions.
    pub fn subscription_information(&self, connection_id: u32) -> PoolResult<Vec<SubscriptionInfo>> {
        let session = self
            .sessions
            .get(connection_id)
            .ok_or(PoolError::unknown(ResourceKind::Session, connection_id))?;
        Ok(session.subscriptions().information())
    }

    /// Snapshots of one subscription's monitored items.
    pub fn monitored_item_information(
        &self,
        connection_id: u32,
        subscription_handle: u32,
    ) -> PoolResult<Vec<MonitoredItem>> {
        let session = self
            .sessions
            .get(connection_id)
            .ok_or(PoolError::unknown(ResourceKind::Session, connection_id))?;
        let subscription = session
            .subscriptions()
            .get(subscription_handle)
            .ok_or(PoolError::unknown(
                ResourceKind::Subscription,
                subscription_handle,
            ))?;
        Ok(subscription.items())
    }

    /// Session pool counters.
    pub fn stats(&self) -> FactoryStatsSnapshot {
        self.sessions.stats()
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// One housekeeping pass: reconnect held-but-disconnected sessions and
    /// collect abandoned ones.
    pub async fn do_housekeeping(&self) {
        self.sessions.do_housekeeping().await;
    }

    /// Spawns a task running [`Self::do_housekeeping`] at the interval from
    /// the client settings until the manager is dropped.
    pub fn start_housekeeping(this: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(this);
        let interval = this.database.settings().housekeeping_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                manager.do_housekeeping().await;
            }
        })
    }
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
