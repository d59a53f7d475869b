// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Per-session subscription pool.
//!
//! Subscriptions are reference counted with the same acquire/release
//! discipline as sessions: an acquire with settings equal to a pooled,
//! shareable subscription joins it instead of creating a second channel.
//! Channel creation runs after the pool lock is released; a newly pooled
//! subscription acts as the dedup marker for concurrent acquirers.
//!
//! Unlike sessions, a failed channel creation fails the acquisition: the
//! marker is removed from the pool and the error is returned.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use uapool_core::error::{PoolError, PoolResult, ResourceKind};
use uapool_core::service::SubscriptionSettings;
use uapool_core::status::Status;

use crate::database::Database;
use crate::subscription::{Subscription, SubscriptionInfo, SubscriptionState};
use crate::transport::{DataChange, ItemEvent, UaTransport};

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Monotonic counters describing one session's subscription pool.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    created: AtomicU64,
    joined: AtomicU64,
    collected: AtomicU64,
    create_failures: AtomicU64,
}

/// Point-in-time snapshot of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatsSnapshot {
    /// Channels newly created by acquires.
    pub created: u64,

    /// Acquires that joined an already-pooled channel.
    pub joined: u64,

    /// Subscriptions removed by garbage collection.
    pub collected: u64,

    /// Channel creations that failed.
    pub create_failures: u64,
}

impl SubscriptionStats {
    fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// SubscriptionFactory
// =============================================================================

/// Pools the subscriptions of one session.
pub struct SubscriptionFactory {
    connection_id: u32,
    database: Arc<Database>,
    transport: Arc<dyn UaTransport>,
    pool: Mutex<Vec<Subscription>>,
    stats: SubscriptionStats,
}

impl SubscriptionFactory {
    pub(crate) fn new(
        connection_id: u32,
        database: Arc<Database>,
        transport: Arc<dyn UaTransport>,
    ) -> Self {
        Self {
            connection_id,
            database,
            transport,
            pool: Mutex::new(Vec::new()),
            stats: SubscriptionStats::default(),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SubscriptionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of pooled subscriptions.
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Returns `true` if no subscriptions are pooled.
    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    /// Read-only snapshots of all pooled subscriptions.
    pub fn information(&self) -> Vec<SubscriptionInfo> {
        self.pool.lock().iter().map(Subscription::info).collect()
    }

    /// Looks up a pooled subscription by handle without acquiring it.
    pub fn get(&self, handle: u32) -> Option<Subscription> {
        self.pool.lock().iter().find(|s| s.handle() == handle).cloned()
    }

    // =========================================================================
    // Acquire / release
    // =========================================================================

    /// Acquires a subscription with the given settings, incrementing its
    /// activity count.
    ///
    /// With `unique` false, a pooled shareable subscription whose settings
    /// compare equal is joined. Otherwise a new channel is created; creation
    /// failure removes the pooled entry again and fails the acquisition.
    pub async fn acquire(
        &self,
        settings: &SubscriptionSettings,
        unique: bool,
    ) -> PoolResult<Subscription> {
        let subscription = {
            let mut pool = self.pool.lock();

            if !unique {
                if let Some(existing) = pool.iter().find(|s| {
                    !s.is_unique()
                        && s.state() == SubscriptionState::Created
                        && s.settings() == settings
                }) {
                    let count = existing.increment_activity();
                    self.stats.joined.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        connection_id = self.connection_id,
                        subscription_handle = existing.handle(),
                        activity_count = count,
                        "subscription joined"
                    );
                    return Ok(existing.clone());
                }
            }

            let subscription = Subscription::new(
                self.database.next_subscription_handle(),
                self.connection_id,
                settings.clone(),
                unique,
                self.transport.clone(),
                self.database.clone(),
            );
            subscription.increment_activity();
            pool.push(subscription.clone());
            subscription
        };

        // Channel creation runs outside the pool lock.
        match self.transport.create_subscription(settings).await {
            Ok(revised) => {
                subscription.set_revised(revised);
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                info!(
                    connection_id = self.connection_id,
                    subscription_handle = subscription.handle(),
                    unique,
                    "subscription created"
                );
                Ok(subscription)
            }
            Err(err) => {
                self.stats.create_failures.fetch_add(1, Ordering::Relaxed);
                self.pool
                    .lock()
                    .retain(|s| s.handle() != subscription.handle());
                Err(err)
            }
        }
    }

    /// Acquires an already-pooled subscription by handle, incrementing its
    /// activity count.
    pub fn acquire_existing(&self, handle: u32) -> PoolResult<Subscription> {
        let pool = self.pool.lock();
        let Some(subscription) = pool.iter().find(|s| s.handle() == handle) else {
            return Err(PoolError::unknown(ResourceKind::Subscription, handle));
        };
        subscription.increment_activity();
        Ok(subscription.clone())
    }

    /// Releases one hold on a subscription.
    ///
    /// When the activity count reaches zero, the channel is already
    /// `Deleted`, and `allow_gc` is set, the subscription is removed from
    /// the pool. A live channel nobody holds stays pooled: its monitored
    /// items keep it alive until it is explicitly deleted.
    pub async fn release(&self, handle: u32, allow_gc: bool) -> PoolResult<()> {
        let subscription = self
            .get(handle)
            .ok_or(PoolError::unknown(ResourceKind::Subscription, handle))?;

        let Some(remaining) = subscription.decrement_activity() else {
            error!(
                connection_id = self.connection_id,
                subscription_handle = handle,
                "release of subscription with zero activity count"
            );
            return Err(PoolError::unexpected(format!(
                "subscription {handle} released more often than acquired"
            )));
        };

        if remaining == 0 && allow_gc {
            // Re-check under the pool lock: a concurrent acquire may have
            // re-held the subscription since the decrement.
            let collected = {
                let mut pool = self.pool.lock();
                let before = pool.len();
                pool.retain(|s| {
                    s.handle() != handle
                        || s.activity_count() != 0
                        || s.state() != SubscriptionState::Deleted
                });
                pool.len() < before
            };
            if collected {
                self.stats.collected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    connection_id = self.connection_id,
                    subscription_handle = handle,
                    "subscription collected"
                );
            }
        }
        Ok(())
    }

    /// Deletes a pooled subscription's channel.
    ///
    /// A subscription nobody holds is removed from the pool immediately;
    /// one still held is removed when its last hold is released with GC
    /// allowed.
    pub async fn delete(&self, handle: u32) -> PoolResult<()> {
        let subscription = self
            .get(handle)
            .ok_or(PoolError::unknown(ResourceKind::Subscription, handle))?;
        subscription.delete().await?;

        let collected = {
            let mut pool = self.pool.lock();
            let before = pool.len();
            pool.retain(|s| s.handle() != handle || s.activity_count() != 0);
            pool.len() < before
        };
        if collected {
            self.stats.collected.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Deletes every pooled channel. Used when the owning session is torn
    /// down.
    pub async fn delete_all(&self) -> PoolResult<()> {
        let subscriptions: Vec<Subscription> = self.pool.lock().clone();
        for subscription in subscriptions {
            if subscription.state() != SubscriptionState::Deleted {
                subscription.delete().await?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Transport event forwarding
    // =========================================================================

    pub(crate) fn on_status_changed(&self, handle: u32, status: Status) {
        match self.get(handle) {
            Some(subscription) => subscription.publish_status_changed(status),
            None => self.discard(handle, "status change"),
        }
    }

    pub(crate) fn on_keep_alive(&self, handle: u32) {
        match self.get(handle) {
            Some(subscription) => subscription.publish_keep_alive(),
            None => self.discard(handle, "keep-alive"),
        }
    }

    pub(crate) fn on_notifications_missing(&self, handle: u32, expected_sequence: u32) {
        match self.get(handle) {
            Some(subscription) => subscription.publish_notifications_missing(expected_sequence),
            None => self.discard(handle, "missing-notifications report"),
        }
    }

    pub(crate) fn on_data_change(&self, handle: u32, change: DataChange) {
        match self.get(handle) {
            Some(subscription) => subscription.publish_data_change(change),
            None => self.discard(handle, "data change"),
        }
    }

    pub(crate) fn on_new_events(&self, handle: u32, event: ItemEvent) {
        match self.get(handle) {
            Some(subscription) => subscription.publish_event(event),
            None => self.discard(handle, "event"),
        }
    }

    fn discard(&self, handle: u32, what: &str) {
        debug!(
            connection_id = self.connection_id,
            subscription_handle = handle,
            "discarding {what} for unknown subscription"
        );
    }
}

impl std::fmt::Debug for SubscriptionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionFactory")
            .field("connection_id", &self.connection_id)
            .field("pooled", &self.len())
            .finish()
    }
}
