// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions: one notification channel layered on a session, grouping
//! monitored items.
//!
//! A subscription's identity is its client-assigned handle, unique within
//! the owning session. Monitored items keep a back-reference to the
//! persistent request (handle + rank) that established them, so a deleted
//! subscription can record why its items became invalid.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use uapool_core::error::PoolResult;
use uapool_core::node::NodeAddress;
use uapool_core::service::{
    MonitorOutcome, MonitorTarget, MonitoredItemSettings, MonitoringMode, RequestHandle,
    SubscriptionSettings,
};
use uapool_core::status::{Status, StatusCode};

use crate::database::Database;
use crate::transport::{CallOptions, DataChange, ItemEvent, RevisedSubscription, UaTransport};

// =============================================================================
// SubscriptionState
// =============================================================================

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// The notification channel exists on the server.
    #[default]
    Created,

    /// The notification channel has been deleted.
    Deleted,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

// =============================================================================
// MonitoredItem
// =============================================================================

/// One item watched for change/event notifications within a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItem {
    /// Client-assigned handle, unique within the client.
    pub client_handle: u32,

    /// The monitored node.
    pub node: NodeAddress,

    /// Requested sampling/queueing parameters.
    pub settings: MonitoredItemSettings,

    /// Handle of the persistent request that established this item.
    pub request_handle: RequestHandle,

    /// Rank of the establishing target within its request.
    pub rank: usize,

    /// Server-assigned monitored-item id.
    pub server_id: u32,

    /// Sampling interval the server actually applied.
    pub revised_sampling_interval: Duration,

    /// Queue size the server actually applied.
    pub revised_queue_size: u32,

    /// Current monitoring mode.
    pub mode: MonitoringMode,
}

// =============================================================================
// Notification stream
// =============================================================================

/// One notification delivered on a subscription's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A monitored item's value changed.
    DataChange {
        /// Unique handle assigned to this notification.
        notification_handle: u32,
        /// The change payload.
        change: DataChange,
    },

    /// A monitored item produced events.
    Event {
        /// Unique handle assigned to this notification.
        notification_handle: u32,
        /// The event payload.
        event: ItemEvent,
    },

    /// The subscription's status changed on the server.
    StatusChanged(Status),

    /// The server signalled liveness without data.
    KeepAlive,

    /// A gap in notification sequence numbers was detected.
    NotificationsMissing {
        /// The sequence number that was expected next.
        expected_sequence: u32,
    },
}

// =============================================================================
// Subscription
// =============================================================================

/// A snapshot of one subscription, assembled under the relevant locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    /// Client-assigned subscription handle.
    pub handle: u32,

    /// Connection id of the owning session.
    pub connection_id: u32,

    /// Current lifecycle state.
    pub state: SubscriptionState,

    /// The settings the subscription was created with.
    pub settings: SubscriptionSettings,

    /// Whether the subscription was created as a dedicated channel.
    pub unique: bool,

    /// Number of callers currently holding the subscription.
    pub activity_count: u32,

    /// Number of monitored items.
    pub item_count: usize,

    /// Server-revised channel parameters.
    pub revised: Option<RevisedSubscription>,
}

pub(crate) struct SubscriptionShared {
    handle: u32,
    connection_id: u32,
    settings: SubscriptionSettings,
    unique: bool,
    state: RwLock<SubscriptionState>,
    revised: RwLock<Option<RevisedSubscription>>,
    items: Mutex<HashMap<u32, MonitoredItem>>,
    activity: AtomicU32,
    notifications: broadcast::Sender<Notification>,
    transport: Arc<dyn UaTransport>,
    database: Arc<Database>,
}

/// One notification channel on top of a session.
///
/// Cloning is cheap and shares the underlying channel. Callers obtain
/// subscriptions exclusively through the owning session's subscription
/// factory.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    pub(crate) fn new(
        handle: u32,
        connection_id: u32,
        settings: SubscriptionSettings,
        unique: bool,
        transport: Arc<dyn UaTransport>,
        database: Arc<Database>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(SubscriptionShared {
                handle,
                connection_id,
                settings,
                unique,
                state: RwLock::new(SubscriptionState::Created),
                revised: RwLock::new(None),
                items: Mutex::new(HashMap::new()),
                activity: AtomicU32::new(0),
                notifications,
                transport,
                database,
            }),
        }
    }

    /// Client-assigned subscription handle.
    pub fn handle(&self) -> u32 {
        self.shared.handle
    }

    /// Connection id of the owning session.
    pub fn connection_id(&self) -> u32 {
        self.shared.connection_id
    }

    /// The settings this subscription was created with.
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.shared.settings
    }

    /// Whether the subscription was created as a dedicated channel.
    pub fn is_unique(&self) -> bool {
        self.shared.unique
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        *self.shared.state.read()
    }

    /// Server-assigned subscription id, while the channel exists.
    pub fn server_id(&self) -> Option<u32> {
        self.shared.revised.read().as_ref().map(|r| r.server_id)
    }

    pub(crate) fn set_revised(&self, revised: RevisedSubscription) {
        *self.shared.revised.write() = Some(revised);
    }

    /// Subscribes to this channel's notification stream.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    /// Read-only snapshot of this subscription.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            handle: self.shared.handle,
            connection_id: self.shared.connection_id,
            state: self.state(),
            settings: self.shared.settings.clone(),
            unique: self.shared.unique,
            activity_count: self.activity_count(),
            item_count: self.shared.items.lock().len(),
            revised: self.shared.revised.read().clone(),
        }
    }

    /// Snapshot of one monitored item by client handle.
    pub fn item_info(&self, client_handle: u32) -> Option<MonitoredItem> {
        self.shared.items.lock().get(&client_handle).cloned()
    }

    /// Snapshot of all monitored items.
    pub fn items(&self) -> Vec<MonitoredItem> {
        self.shared.items.lock().values().cloned().collect()
    }

    pub(crate) fn activity_count(&self) -> u32 {
        self.shared.activity.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_activity(&self) -> u32 {
        self.shared.activity.fetch_add(1, Ordering::SeqCst) + 1
    }

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
    // Monitored items
    // =========================================================================

    /// Establishes monitored items on this channel.
    ///
    /// `ranks` is parallel to `targets` and carries each target's rank
    /// within the originating request. Items whose outcome is good are
    /// recorded in the item map with their revised parameters and the
    /// originating (request handle, rank) back-reference.
    pub async fn create_monitored_items(
        &self,
        request_handle: RequestHandle,
        targets: &[MonitorTarget],
        ranks: &[usize],
        options: &CallOptions,
    ) -> PoolResult<Vec<MonitorOutcome>> {
        debug_assert_eq!(targets.len(), ranks.len());

        let server_id = self.server_id().unwrap_or(0);
        let client_handles: Vec<u32> = targets
            .iter()
            .map(|_| self.shared.database.next_monitored_item_handle())
            .collect();

        let mut outcomes = self
            .shared
            .transport
            .create_monitored_items(server_id, targets, &client_handles, options)
            .await?;

        let mut items = self.shared.items.lock();
        for (position, outcome) in outcomes.iter_mut().enumerate() {
            outcome.client_handle = client_handles[position];
            if outcome.status.is_good() {
                items.insert(
                    outcome.client_handle,
                    MonitoredItem {
                        client_handle: outcome.client_handle,
                        node: targets[position].node.clone(),
                        settings: targets[position].settings.clone(),
                        request_handle,
                        rank: ranks[position],
                        server_id: outcome.server_id,
                        revised_sampling_interval: outcome.revised_sampling_interval,
                        revised_queue_size: outcome.revised_queue_size,
                        mode: targets[position].settings.mode,
                    },
                );
            }
        }
        drop(items);

        Ok(outcomes)
    }

    /// Changes the monitoring mode of items addressed by client handle.
    pub async fn set_monitoring_mode(
        &self,
        mode: MonitoringMode,
        client_handles: &[u32],
    ) -> PoolResult<Vec<Status>> {
        let server_id = self.server_id().unwrap_or(0);
        // Unknown handles are skipped; statuses stay parallel to the known
        // ones.
        let known: Vec<(u32, u32)> = {
            let items = self.shared.items.lock();
            client_handles
                .iter()
                .filter_map(|h| items.get(h).map(|item| (*h, item.server_id)))
                .collect()
        };
        let item_server_ids: Vec<u32> = known.iter().map(|(_, id)| *id).collect();

        let statuses = self
            .shared
            .transport
            .set_monitoring_mode(server_id, mode, &item_server_ids)
            .await?;

        let mut items = self.shared.items.lock();
        for ((handle, _), status) in known.iter().zip(&statuses) {
            if status.is_good() {
                if let Some(item) = items.get_mut(handle) {
                    item.mode = mode;
                }
            }
        }
        Ok(statuses)
    }

    /// Enables or disables publishing on this channel.
    pub async fn set_publishing_mode(&self, enabled: bool) -> PoolResult<()> {
        let server_id = self.server_id().unwrap_or(0);
        self.shared
            .transport
            .set_publishing_mode(server_id, enabled)
            .await
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Deletes the notification channel.
    ///
    /// Before removal, every persistent request entry referenced by this
    /// subscription's monitored items receives a "subscription deleted" bad
    /// status at the item's rank, so a later retry can discover why its
    /// targets are currently invalid.
    pub(crate) async fn delete(&self) -> PoolResult<()> {
        let items: Vec<MonitoredItem> = {
            let mut map = self.shared.items.lock();
            map.drain().map(|(_, item)| item).collect()
        };

        let store = self.shared.database.monitored_items();
        for item in &items {
            store.update_target_status(
                item.request_handle,
                item.rank,
                Status::bad_with(StatusCode::BAD_NO_SUBSCRIPTION, "subscription deleted"),
            );
        }

        let result = match self.server_id() {
            Some(server_id) => self.shared.transport.delete_subscription(server_id).await,
            None => Ok(()),
        };

        *self.shared.state.write() = SubscriptionState::Deleted;
        *self.shared.revised.write() = None;

        info!(
            subscription_handle = self.shared.handle,
            connection_id = self.shared.connection_id,
            items = items.len(),
            "subscription deleted"
        );
        result
    }

    // =========================================================================
    // Notification delivery (called from the session event sink)
    // =========================================================================

    pub(crate) fn publish_status_changed(&self, status: Status) {
        let _ = self
            .shared
            .notifications
            .send(Notification::StatusChanged(status));
    }

    pub(crate) fn publish_keep_alive(&self) {
        let _ = self.shared.notifications.send(Notification::KeepAlive);
    }

    pub(crate) fn publish_notifications_missing(&self, expected_sequence: u32) {
        let _ = self
            .shared
            .notifications
            .send(Notification::NotificationsMissing { expected_sequence });
    }

    pub(crate) fn publish_data_change(&self, change: DataChange) {
        if self.item_info(change.item_handle).is_none() {
            debug!(
                subscription_handle = self.shared.handle,
                item_handle = change.item_handle,
                "discarding data change for unknown item"
            );
            return;
        }
        let notification_handle = self.shared.database.next_notification_handle();
        let _ = self.shared.notifications.send(Notification::DataChange {
            notification_handle,
            change,
        });
    }

    pub(crate) fn publish_event(&self, event: ItemEvent) {
        if self.item_info(event.item_handle).is_none() {
            debug!(
                subscription_handle = self.shared.handle,
                item_handle = event.item_handle,
                "discarding event for unknown item"
            );
            return;
        }
        let notification_handle = self.shared.database.next_notification_handle();
        let _ = self.shared.notifications.send(Notification::Event {
            notification_handle,
            event,
        });
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.shared.handle)
            .field("connection_id", &self.shared.connection_id)
            .field("state", &self.state())
            .finish()
    }
}
