// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pooled sessions: one logical connection to one endpoint.
//!
//! A session's lifecycle state is driven by callbacks from the transport
//! collaborator, not by caller action: `connect()` attempts the initial
//! transition out of `Disconnected`, but subsequent transitions arrive
//! asynchronously through the registered event sink.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use uapool_core::error::{DiscoveryError, PoolResult, SecurityError};
use uapool_core::node::EndpointId;
use uapool_core::service::{
    BrowseNextTarget, BrowseOutcome, BrowseTarget, CallMethodOutcome, CallMethodTarget,
    HistoryReadOutcome, HistoryReadTarget, ReadOutcome, ReadTarget, TranslateOutcome,
    TranslateTarget, WriteOutcome, WriteTarget,
};
use uapool_core::status::Status;

use crate::config::{ConnectionSettings, SecurityConfig};
use crate::database::Database;
use crate::discovery::{Discovery, EndpointDescription};
use crate::subscription_factory::SubscriptionFactory;
use crate::transport::{
    CallOptions, DataChange, ItemEvent, ServerMetadata, TransportEvents, UaTransport,
};

// =============================================================================
// SessionState
// =============================================================================

/// Lifecycle state of a pooled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No connection is established.
    #[default]
    Disconnected,

    /// The connection is established and usable.
    Connected,

    /// The transport's watchdog missed a keep-alive.
    ConnectionWarningWatchdogTimeout,

    /// The transport lost the connection and is reconnecting.
    ConnectionErrorApiReconnect,

    /// The server announced a shutdown.
    ServerShutdown,

    /// The transport re-established with a fresh server-side session.
    NewSessionCreated,
}

impl SessionState {
    /// Returns `true` if the session is usable for service calls.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` for states in which the logical-address associations
    /// of the endpoint are no longer trustworthy.
    #[inline]
    pub fn is_broken(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::ConnectionWarningWatchdogTimeout
                | Self::ConnectionErrorApiReconnect
                | Self::ServerShutdown
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::ConnectionWarningWatchdogTimeout => write!(f, "ConnectionWarningWatchdogTimeout"),
            Self::ConnectionErrorApiReconnect => write!(f, "ConnectionErrorApiReconnect"),
            Self::ServerShutdown => write!(f, "ServerShutdown"),
            Self::NewSessionCreated => write!(f, "NewSessionCreated"),
        }
    }
}

// =============================================================================
// Connect attempt bookkeeping
// =============================================================================

/// The steps of the connect pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStep {
    /// Resolving discovery URLs for the endpoint.
    ResolveDiscoveryUrls,

    /// Fetching endpoint descriptions.
    GetEndpoints,

    /// Selecting a mutually acceptable security configuration.
    SelectSecurity,

    /// Verifying the remote certificate.
    VerifyCertificate,

    /// Opening the connection.
    OpenConnection,
}

impl fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResolveDiscoveryUrls => "resolve discovery urls",
            Self::GetEndpoints => "get endpoints",
            Self::SelectSecurity => "select security",
            Self::VerifyCertificate => "verify certificate",
            Self::OpenConnection => "open connection",
        };
        f.write_str(name)
    }
}

/// Step and status of the most recent connect attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectAttempt {
    /// The step the attempt ended at.
    pub step: ConnectStep,

    /// The status the step ended with.
    pub status: Status,
}

// =============================================================================
// Certificate validation
// =============================================================================

/// Caller verdict on an untrusted remote certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateVerdict {
    /// Accept the certificate and continue connecting.
    Accept,

    /// Reject the certificate and abort the connect attempt.
    Reject,
}

/// Caller-supplied accept/reject decision for remote certificates.
pub trait CertificateValidator: Send + Sync {
    /// Decides whether to accept the certificate presented by `endpoint`.
    fn verdict(&self, endpoint: &EndpointId, certificate: &[u8]) -> CertificateVerdict;
}

/// Accepts every certificate. Intended for tests and unsecured setups.
#[derive(Debug, Default)]
pub struct AcceptAllCertificates;

impl CertificateValidator for AcceptAllCertificates {
    fn verdict(&self, _endpoint: &EndpointId, _certificate: &[u8]) -> CertificateVerdict {
        CertificateVerdict::Accept
    }
}

// =============================================================================
// Session
// =============================================================================

/// A snapshot of one session, assembled under the relevant locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Unique connection id.
    pub connection_id: u32,

    /// Target endpoint identity.
    pub endpoint: EndpointId,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Number of callers currently holding the session.
    pub activity_count: u32,

    /// Step and status of the most recent connect attempt.
    pub last_attempt: Option<ConnectAttempt>,

    /// Number of live subscriptions on this session.
    pub subscription_count: usize,
}

pub(crate) struct SessionShared {
    connection_id: u32,
    endpoint: EndpointId,
    settings: ConnectionSettings,
    database: Arc<Database>,
    transport: Arc<dyn UaTransport>,
    discovery: Arc<dyn Discovery>,
    validator: Arc<dyn CertificateValidator>,
    state: RwLock<SessionState>,
    last_attempt: Mutex<Option<ConnectAttempt>>,
    metadata: RwLock<ServerMetadata>,
    activity: AtomicU32,
    subscriptions: SubscriptionFactory,
    // Captured at creation; transport callbacks arrive on threads the
    // transport owns, where no ambient runtime is available.
    runtime: Option<tokio::runtime::Handle>,
}

/// One pooled logical connection to an endpoint.
///
/// Cloning is cheap and shares the underlying connection. Callers obtain
/// sessions exclusively through the session factory's acquire/release
/// discipline.
#[derive(Clone)]
pub struct Session {
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(
        connection_id: u32,
        endpoint: EndpointId,
        settings: ConnectionSettings,
        database: Arc<Database>,
        transport: Arc<dyn UaTransport>,
        discovery: Arc<dyn Discovery>,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        let subscriptions =
            SubscriptionFactory::new(connection_id, database.clone(), transport.clone());
        Self {
            shared: Arc::new(SessionShared {
                connection_id,
                endpoint,
                settings,
                database,
                transport,
                discovery,
                validator,
                state: RwLock::new(SessionState::Disconnected),
                last_attempt: Mutex::new(None),
                metadata: RwLock::new(ServerMetadata::default()),
                activity: AtomicU32::new(0),
                subscriptions,
                runtime: tokio::runtime::Handle::try_current().ok(),
            }),
        }
    }

    /// The session's unique connection id.
    pub fn connection_id(&self) -> u32 {
        self.shared.connection_id
    }

    /// The endpoint this session connects to.
    pub fn endpoint(&self) -> &EndpointId {
        &self.shared.endpoint
    }

    /// The immutable connection settings the session was created with.
    pub fn settings(&self) -> &ConnectionSettings {
        &self.shared.settings
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// The subscription factory owned by this session.
    pub fn subscriptions(&self) -> &SubscriptionFactory {
        &self.shared.subscriptions
    }

    /// Step and status of the most recent connect attempt.
    pub fn last_attempt(&self) -> Option<ConnectAttempt> {
        self.shared.last_attempt.lock().clone()
    }

    /// The server/namespace arrays fetched on the last transition into
    /// `Connected`.
    pub fn metadata(&self) -> ServerMetadata {
        self.shared.metadata.read().clone()
    }

    /// Read-only snapshot of this session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.shared.connection_id,
            endpoint: self.shared.endpoint.clone(),
            state: self.state(),
            activity_count: self.activity_count(),
            last_attempt: self.last_attempt(),
            subscription_count: self.shared.subscriptions.len(),
        }
    }

    pub(crate) fn activity_count(&self) -> u32 {
        self.shared.activity.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_activity(&self) -> u32 {
        self.shared.activity.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the activity count. Returns `None` when the count was
    /// already zero, which callers must report as an invariant violation.
    pub(crate) fn decrement_activity(&self) -> Option<u32> {
        self.shared
            .activity
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    // =========================================================================
    // Connect pipeline
    // =========================================================================

    /// Attempts to connect this session to its endpoint.
    ///
    /// Runs, in order: resolve discovery URLs, fetch endpoint descriptions,
    /// select a mutually acceptable security configuration, verify the
    /// remote certificate, open the connection. Failure at any step is
    /// recorded as the last connection attempt and returned; the lifecycle
    /// state itself only changes through the transport callback.
    pub async fn connect(&self) -> PoolResult<()> {
        let endpoint_url = self.shared.endpoint.url().to_string();

        // Step 1: resolve discovery URLs.
        let discovery_urls = match self
            .shared
            .discovery
            .find_servers(std::slice::from_ref(&endpoint_url))
            .await
        {
            Ok(servers) => {
                let urls: Vec<String> = servers
                    .into_iter()
                    .flat_map(|s| s.discovery_urls)
                    .collect();
                if urls.is_empty() {
                    let err = DiscoveryError::no_servers_found(vec![endpoint_url]).into();
                    self.record_attempt(ConnectStep::ResolveDiscoveryUrls, &err);
                    return Err(err);
                }
                urls
            }
            Err(err) => {
                self.record_attempt(ConnectStep::ResolveDiscoveryUrls, &err);
                return Err(err);
            }
        };

        // Step 2: fetch endpoint descriptions.
        let discovery_url = &discovery_urls[0];
        let endpoints = match self.shared.discovery.get_endpoints(discovery_url).await {
            Ok(endpoints) if endpoints.is_empty() => {
                let err = DiscoveryError::no_endpoints(discovery_url.clone()).into();
                self.record_attempt(ConnectStep::GetEndpoints, &err);
                return Err(err);
            }
            Ok(endpoints) => endpoints,
            Err(err) => {
                self.record_attempt(ConnectStep::GetEndpoints, &err);
                return Err(err);
            }
        };

        // Step 3: select security, honoring the caller's preference order.
        let Some((description, security)) = self.select_security(&endpoints) else {
            let err = DiscoveryError::no_matching_security(discovery_url.clone()).into();
            self.record_attempt(ConnectStep::SelectSecurity, &err);
            return Err(err);
        };

        // Step 4: verify the remote certificate.
        if let Some(certificate) = &description.server_certificate {
            if self.shared.validator.verdict(&self.shared.endpoint, certificate)
                == CertificateVerdict::Reject
            {
                let err = SecurityError::certificate_rejected(endpoint_url).into();
                self.record_attempt(ConnectStep::VerifyCertificate, &err);
                return Err(err);
            }
        }

        // Step 5: open the connection.
        let sink: Arc<dyn TransportEvents> = Arc::new(SessionEventSink {
            shared: Arc::downgrade(&self.shared),
        });
        match self
            .shared
            .transport
            .connect(&description, &self.shared.settings, &security, sink)
            .await
        {
            Ok(()) => {
                self.shared.last_attempt.lock().replace(ConnectAttempt {
                    step: ConnectStep::OpenConnection,
                    status: Status::good(),
                });
                info!(
                    connection_id = self.shared.connection_id,
                    endpoint = %self.shared.endpoint,
                    security = %security,
                    "session connected"
                );
                Ok(())
            }
            Err(err) => {
                self.record_attempt(ConnectStep::OpenConnection, &err);
                Err(err)
            }
        }
    }

    /// Disconnects the transport. The resulting state change arrives through
    /// the callback.
    pub async fn disconnect(&self) -> PoolResult<()> {
        self.shared.transport.disconnect().await
    }

    fn select_security(
        &self,
        endpoints: &[EndpointDescription],
    ) -> Option<(EndpointDescription, SecurityConfig)> {
        for preference in &self.shared.settings.security_preferences {
            if let Some(description) = endpoints.iter().find(|e| {
                e.security_mode == preference.mode && e.security_policy == preference.policy
            }) {
                return Some((description.clone(), *preference));
            }
        }
        None
    }

    fn record_attempt(&self, step: ConnectStep, error: &uapool_core::error::PoolError) {
        let status = error.to_status();
        warn!(
            connection_id = self.shared.connection_id,
            endpoint = %self.shared.endpoint,
            step = %step,
            status = %status,
            "connect attempt failed"
        );
        self.shared
            .last_attempt
            .lock()
            .replace(ConnectAttempt { step, status });
    }

    // =========================================================================
    // Service entry points
    // =========================================================================

    /// Reads an ordered list of attributes through this session.
    pub async fn read(
        &self,
        targets: &[ReadTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<ReadOutcome>> {
        self.shared.transport.read(targets, options).await
    }

    /// Writes an ordered list of values through this session.
    pub async fn write(
        &self,
        targets: &[WriteTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<WriteOutcome>> {
        self.shared.transport.write(targets, options).await
    }

    /// Calls an ordered list of methods through this session.
    pub async fn call_method(
        &self,
        targets: &[CallMethodTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<CallMethodOutcome>> {
        self.shared.transport.call_method(targets, options).await
    }

    /// Browses an ordered list of nodes through this session.
    pub async fn browse(
        &self,
        targets: &[BrowseTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>> {
        self.shared.transport.browse(targets, options).await
    }

    /// Continues earlier browse operations through this session.
    pub async fn browse_next(
        &self,
        targets: &[BrowseNextTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>> {
        self.shared.transport.browse_next(targets, options).await
    }

    /// Reads history through this session.
    pub async fn history_read_raw_modified(
        &self,
        targets: &[HistoryReadTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<HistoryReadOutcome>> {
        self.shared
            .transport
            .history_read_raw_modified(targets, options)
            .await
    }

    /// Translates browse paths through this session.
    pub async fn translate_browse_paths(
        &self,
        targets: &[TranslateTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<TranslateOutcome>> {
        self.shared
            .transport
            .translate_browse_paths(targets, options)
            .await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.shared.connection_id)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionShared {
    fn apply_transition(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };
        if old_state == new_state {
            return;
        }

        trace!(
            connection_id = self.connection_id,
            old_state = %old_state,
            new_state = %new_state,
            "session state changed"
        );

        if new_state.is_broken() {
            // Logical-address associations are not stable across reconnects.
            self.database.address_cache().clear_endpoint(&self.endpoint);
        }
    }
}

// =============================================================================
// SessionEventSink
// =============================================================================

/// Adapts transport callbacks onto one session. Holds the session weakly so
/// a destroyed session silences its callbacks.
struct SessionEventSink {
    shared: Weak<SessionShared>,
}

impl SessionEventSink {
    fn with_shared(&self, f: impl FnOnce(&Arc<SessionShared>)) {
        if let Some(shared) = self.shared.upgrade() {
            f(&shared);
        }
    }
}

impl TransportEvents for SessionEventSink {
    fn connection_status_changed(&self, connection_id: u32, state: SessionState) {
        self.with_shared(|shared| {
            if connection_id != shared.connection_id {
                debug!(
                    connection_id,
                    expected = shared.connection_id,
                    "discarding status change for foreign connection"
                );
                return;
            }
            shared.apply_transition(state);

            if state.is_connected() {
                // One-time metadata refresh per transition into Connected.
                let runtime = shared
                    .runtime
                    .clone()
                    .or_else(|| tokio::runtime::Handle::try_current().ok());
                let Some(runtime) = runtime else {
                    warn!(
                        connection_id = shared.connection_id,
                        "no runtime available; metadata refresh skipped"
                    );
                    return;
                };
                let shared = Arc::downgrade(shared);
                runtime.spawn(async move {
                    let Some(shared) = shared.upgrade() else { return };
                    match shared.transport.server_metadata().await {
                        Ok(metadata) => {
                            *shared.metadata.write() = metadata;
                        }
                        Err(err) => {
                            warn!(
                                connection_id = shared.connection_id,
                                error = %err,
                                "metadata refresh failed"
                            );
                        }
                    }
                });
            }
        });
    }

    fn service_completed(&self, transaction_id: u64, overall: Status, statuses: Vec<Status>) {
        self.with_shared(|shared| {
            shared
                .database
                .complete_transaction(transaction_id, overall.clone(), &statuses);
        });
    }

    fn subscription_status_changed(&self, subscription_handle: u32, status: Status) {
        self.with_shared(|shared| {
            shared
                .subscriptions
                .on_status_changed(subscription_handle, status);
        });
    }

    fn keep_alive(&self, subscription_handle: u32) {
        self.with_shared(|shared| {
            shared.subscriptions.on_keep_alive(subscription_handle);
        });
    }

    fn notifications_missing(&self, subscription_handle: u32, expected_sequence: u32) {
        self.with_shared(|shared| {
            shared
                .subscriptions
                .on_notifications_missing(subscription_handle, expected_sequence);
        });
    }

    fn data_change(&self, subscription_handle: u32, change: DataChange) {
        self.with_shared(|shared| {
            shared.subscriptions.on_data_change(subscription_handle, change);
        });
    }

    fn new_events(&self, subscription_handle: u32, event: ItemEvent) {
        self.with_shared(|shared| {
            shared.subscriptions.on_new_events(subscription_handle, event);
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_classification() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connected.is_broken());
        assert!(SessionState::Disconnected.is_broken());
        assert!(SessionState::ConnectionErrorApiReconnect.is_broken());
        assert!(SessionState::ConnectionWarningWatchdogTimeout.is_broken());
        assert!(SessionState::ServerShutdown.is_broken());
        assert!(!SessionState::NewSessionCreated.is_broken());
    }

    #[test]
    fn test_connect_step_display() {
        assert_eq!(ConnectStep::SelectSecurity.to_string(), "select security");
    }
}
