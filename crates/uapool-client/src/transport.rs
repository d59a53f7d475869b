// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport collaborator abstraction.
//!
//! The transport performs the actual protocol encoding, security handshake,
//! and network I/O. One transport instance backs one pooled session.
//! Asynchronous outcomes (connection status, completions, notifications)
//! are delivered through the [`TransportEvents`] sink registered at connect
//! time, from threads owned by the transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uapool_core::error::PoolResult;
use uapool_core::node::Value;
use uapool_core::service::{
    BrowseNextTarget, BrowseOutcome, BrowseTarget, CallMethodOutcome, CallMethodTarget,
    HistoryReadOutcome, HistoryReadTarget, MonitorOutcome, MonitorTarget, MonitoringMode,
    ReadOutcome, ReadTarget, SubscriptionSettings, TranslateOutcome, TranslateTarget,
    WriteOutcome, WriteTarget,
};
use uapool_core::status::Status;

use crate::config::{ConnectionSettings, SecurityConfig};
use crate::discovery::EndpointDescription;
use crate::session::SessionState;

// =============================================================================
// Call options
// =============================================================================

/// Per-call options handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Round-trip timeout enforced by the transport.
    pub timeout: Duration,

    /// When set, the call is asynchronous: the transport returns
    /// send-accepted outcomes immediately and delivers the final outcomes
    /// via [`TransportEvents::service_completed`] under this id.
    pub transaction_id: Option<u64>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            transaction_id: None,
        }
    }
}

// =============================================================================
// Subscription-level wire types
// =============================================================================

/// Server-revised parameters of a created notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisedSubscription {
    /// Server-assigned subscription id.
    pub server_id: u32,

    /// Publishing interval the server actually applied.
    pub revised_publishing_interval: Duration,

    /// Lifetime count the server actually applied.
    pub revised_lifetime_count: u32,

    /// Keep-alive count the server actually applied.
    pub revised_max_keep_alive_count: u32,
}

/// Server and namespace arrays fetched after a session connects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerMetadata {
    /// The server array.
    pub server_array: Vec<String>,

    /// The namespace array.
    pub namespace_array: Vec<String>,
}

/// A data-change notification for one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChange {
    /// Client-assigned handle of the monitored item.
    pub item_handle: u32,

    /// The new value, when the status is good.
    pub value: Option<Value>,

    /// Status the value was sampled with.
    pub status: Status,

    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// An event notification for one monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEvent {
    /// Client-assigned handle of the monitored item.
    pub item_handle: u32,

    /// Selected event field values, in filter order.
    pub fields: Vec<Value>,
}

// =============================================================================
// TransportEvents
// =============================================================================

/// Callback sink for asynchronous transport deliveries.
///
/// Implementations must be cheap and non-blocking; they are invoked from
/// callback threads owned by the transport.
pub trait TransportEvents: Send + Sync {
    /// The connection's lifecycle state changed.
    fn connection_status_changed(&self, connection_id: u32, state: SessionState);

    /// An asynchronous service call completed.
    fn service_completed(&self, transaction_id: u64, overall: Status, statuses: Vec<Status>);

    /// The status of a subscription changed.
    fn subscription_status_changed(&self, subscription_handle: u32, status: Status);

    /// A keep-alive arrived for a subscription.
    fn keep_alive(&self, subscription_handle: u32) {
        let _ = subscription_handle;
    }

    /// The transport detected a gap in notification sequence numbers.
    fn notifications_missing(&self, subscription_handle: u32, expected_sequence: u32) {
        let _ = (subscription_handle, expected_sequence);
    }

    /// New data-change notifications arrived for a subscription.
    fn data_change(&self, subscription_handle: u32, change: DataChange);

    /// New event notifications arrived for a subscription.
    fn new_events(&self, subscription_handle: u32, event: ItemEvent);
}

// =============================================================================
// UaTransport
// =============================================================================

/// The transport collaborator backing one pooled session.
///
/// Synchronous service calls block until the round trip completes or the
/// per-call timeout elapses; there is no mid-flight cancellation.
#[async_trait]
pub trait UaTransport: Send + Sync {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Opens the connection described by `endpoint` using the selected
    /// security configuration, registering the callback sink.
    async fn connect(
        &self,
        endpoint: &EndpointDescription,
        settings: &ConnectionSettings,
        security: &SecurityConfig,
        events: Arc<dyn TransportEvents>,
    ) -> PoolResult<()>;

    /// Closes the connection.
    async fn disconnect(&self) -> PoolResult<()>;

    /// Fetches the server and namespace arrays.
    async fn server_metadata(&self) -> PoolResult<ServerMetadata>;

    // =========================================================================
    // Session-level services
    // =========================================================================

    /// Reads an ordered list of attributes.
    async fn read(&self, targets: &[ReadTarget], options: &CallOptions)
        -> PoolResult<Vec<ReadOutcome>>;

    /// Writes an ordered list of values.
    async fn write(
        &self,
        targets: &[WriteTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<WriteOutcome>>;

    /// Calls an ordered list of methods.
    async fn call_method(
        &self,
        targets: &[CallMethodTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<CallMethodOutcome>>;

    /// Browses an ordered list of nodes.
    async fn browse(
        &self,
        targets: &[BrowseTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>>;

    /// Continues earlier browse operations.
    async fn browse_next(
        &self,
        targets: &[BrowseNextTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>>;

    /// Reads raw/modified history for an ordered list of nodes.
    async fn history_read_raw_modified(
        &self,
        targets: &[HistoryReadTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<HistoryReadOutcome>>;

    /// Translates an ordered list of browse paths.
    async fn translate_browse_paths(
        &self,
        targets: &[TranslateTarget],
        options: &CallOptions,
    ) -> PoolResult<Vec<TranslateOutcome>>;

    // =========================================================================
    // Subscription-level services
    // =========================================================================

    /// Creates a notification channel.
    async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
    ) -> PoolResult<RevisedSubscription>;

    /// Deletes a notification channel.
    async fn delete_subscription(&self, server_id: u32) -> PoolResult<()>;

    /// Enables or disables publishing on a notification channel.
    async fn set_publishing_mode(&self, server_id: u32, enabled: bool) -> PoolResult<()>;

    /// Establishes monitored items on a notification channel. The
    /// `client_handles` list is parallel to `targets`.
    async fn create_monitored_items(
        &self,
        server_id: u32,
        targets: &[MonitorTarget],
        client_handles: &[u32],
        options: &CallOptions,
    ) -> PoolResult<Vec<MonitorOutcome>>;

    /// Changes the monitoring mode of existing items.
    async fn set_monitoring_mode(
        &self,
        server_id: u32,
        mode: MonitoringMode,
        item_server_ids: &[u32],
    ) -> PoolResult<Vec<Status>>;
}

// =============================================================================
// TransportFactory
// =============================================================================

/// Creates one transport instance per new pooled session.
pub trait TransportFactory: Send + Sync {
    /// Creates the transport backing the session with `connection_id`.
    fn create(&self, connection_id: u32) -> Arc<dyn UaTransport>;
}
