// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The session pool.
//!
//! Sessions are reference counted: an acquire for an (endpoint, settings)
//! pair that already has a pooled session joins it, whatever its connection
//! state. The connect attempt of a new session runs after the pool lock is
//! released; the freshly pooled entry acts as the dedup marker for
//! concurrent acquirers.
//!
//! A failed connect does not fail the acquisition. The failure is recorded
//! as the session's last connect attempt and the caller still receives the
//! pooled session; housekeeping and later acquires retry the connect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use uapool_core::error::{PoolError, PoolResult, ResourceKind};
use uapool_core::node::EndpointId;

use crate::config::ConnectionSettings;
use crate::database::Database;
use crate::discovery::Discovery;
use crate::session::{CertificateValidator, Session, SessionInfo, SessionState};
use crate::transport::TransportFactory;

// =============================================================================
// FactoryStats
// =============================================================================

/// Monotonic counters describing pool behavior over the client lifetime.
#[derive(Debug, Default)]
pub struct FactoryStats {
    sessions_created: AtomicU64,
    sessions_joined: AtomicU64,
    sessions_collected: AtomicU64,
    connect_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    release_errors: AtomicU64,
}

/// Point-in-time snapshot of [`FactoryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryStatsSnapshot {
    /// Sessions newly created by acquires.
    pub sessions_created: u64,

    /// Acquires that joined an already-pooled session.
    pub sessions_joined: u64,

    /// Sessions removed by garbage collection.
    pub sessions_collected: u64,

    /// Connect attempts that failed.
    pub connect_failures: u64,

    /// Reconnects attempted by housekeeping.
    pub reconnect_attempts: u64,

    /// Releases of sessions whose activity count was already zero.
    pub release_errors: u64,
}

impl FactoryStats {
    fn snapshot(&self) -> FactoryStatsSnapshot {
        FactoryStatsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_joined: self.sessions_joined.load(Ordering::Relaxed),
            sessions_collected: self.sessions_collected.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            release_errors: self.release_errors.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// SessionFactory
// =============================================================================

/// Creates, pools, and collects sessions.
pub struct SessionFactory {
    database: Arc<Database>,
    transports: Arc<dyn TransportFactory>,
    discovery: Arc<dyn Discovery>,
    validator: Arc<dyn CertificateValidator>,
    pool: Mutex<Vec<Session>>,
    stats: FactoryStats,
}

impl SessionFactory {
    /// Creates a factory over the given collaborators.
    pub fn new(
        database: Arc<Database>,
        transports: Arc<dyn TransportFactory>,
        discovery: Arc<dyn Discovery>,
        validator: Arc<dyn CertificateValidator>,
    ) -> Self {
        Self {
            database,
            transports,
            discovery,
            validator,
            pool: Mutex::new(Vec::new()),
            stats: FactoryStats::default(),
        }
    }

    /// Number of pooled sessions.
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Returns `true` if no sessions are pooled.
    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    /// Read-only snapshots of all pooled sessions.
    pub fn information(&self) -> Vec<SessionInfo> {
        self.pool.lock().iter().map(Session::info).collect()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> FactoryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Looks up a pooled session by connection id without acquiring it.
    pub fn get(&self, connection_id: u32) -> Option<Session> {
        self.pool
            .lock()
            .iter()
            .find(|s| s.connection_id() == connection_id)
            .cloned()
    }

    // =========================================================================
    // Acquire / release
    // =========================================================================

    /// Acquires the session for (endpoint, settings), incrementing its
    /// activity count.
    ///
    /// When no such session is pooled, a new one is pooled and its connect
    /// pipeline runs after the pool lock is dropped. A connect failure is
    /// recorded on the session and logged but does not fail the
    /// acquisition; the session stays pooled in `Disconnected`.
    pub async fn acquire(
        &self,
        endpoint: &EndpointId,
        settings: &ConnectionSettings,
    ) -> PoolResult<Session> {
        let (session, created) = {
            let mut pool = self.pool.lock();

            if let Some(existing) = pool
                .iter()
                .find(|s| s.endpoint() == endpoint && s.settings() == settings)
            {
                let count = existing.increment_activity();
                debug!(
                    connection_id = existing.connection_id(),
                    endpoint = %endpoint,
                    activity_count = count,
                    "session joined"
                );
                (existing.clone(), false)
            } else {
                let connection_id = self.database.next_connection_id();
                let session = Session::new(
                    connection_id,
                    endpoint.clone(),
                    settings.clone(),
                    self.database.clone(),
                    self.transports.create(connection_id),
                    self.discovery.clone(),
                    self.validator.clone(),
                );
                session.increment_activity();
                pool.push(session.clone());
                (session, true)
            }
        };

        if !created {
            self.stats.sessions_joined.fetch_add(1, Ordering::Relaxed);
            return Ok(session);
        }

        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        info!(
            connection_id = session.connection_id(),
            endpoint = %endpoint,
            "session pooled"
        );

        // Connect outside the pool lock. The session was already handed out
        // as the dedup marker, so a failure here only records the attempt.
        if let Err(err) = session.connect().await {
            self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                connection_id = session.connection_id(),
                endpoint = %endpoint,
                error = %err,
                "initial connect failed; session remains pooled"
            );
        }
        Ok(session)
    }

    /// Acquires an already-pooled session by connection id, incrementing
    /// its activity count.
    pub fn acquire_existing(&self, connection_id: u32) -> PoolResult<Session> {
        let pool = self.pool.lock();
        let Some(session) = pool.iter().find(|s| s.connection_id() == connection_id) else {
            return Err(PoolError::unknown(ResourceKind::Session, connection_id));
        };
        session.increment_activity();
        Ok(session.clone())
    }

    /// Releases one hold on a session.
    ///
    /// When the activity count reaches zero, the session is `Disconnected`,
    /// and `allow_gc` is set, the session is removed from the pool.
    pub async fn release(&self, connection_id: u32, allow_gc: bool) -> PoolResult<()> {
        let session = self
            .get(connection_id)
            .ok_or(PoolError::unknown(ResourceKind::Session, connection_id))?;

        let Some(remaining) = session.decrement_activity() else {
            self.stats.release_errors.fetch_add(1, Ordering::Relaxed);
            error!(
                connection_id,
                "release of session with zero activity count"
            );
            return Err(PoolError::unexpected(format!(
                "session {connection_id} released more often than acquired"
            )));
        };

        if remaining == 0 && allow_gc && session.state() == SessionState::Disconnected {
            // Re-check under the pool lock: a concurrent acquire may have
            // re-held the session since the decrement.
            let collected = {
                let mut pool = self.pool.lock();
                let before = pool.len();
                pool.retain(|s| {
                    s.connection_id() != connection_id
                        || s.activity_count() != 0
                        || s.state() != SessionState::Disconnected
                });
                pool.len() < before
            };
            if collected {
                self.stats.sessions_collected.fetch_add(1, Ordering::Relaxed);
                debug!(connection_id, "session collected");
            }
        }
        Ok(())
    }

    /// Removes a session that nobody holds and that is `Disconnected`.
    ///
    /// Used after a manual disconnect, where the caller's hold was already
    /// released before the transport was told to close.
    pub fn try_collect(&self, connection_id: u32) -> bool {
        let mut pool = self.pool.lock();
        let Some(position) = pool.iter().position(|s| {
            s.connection_id() == connection_id
                && s.activity_count() == 0
                && s.state() == SessionState::Disconnected
        }) else {
            return false;
        };
        pool.remove(position);
        self.stats.sessions_collected.fetch_add(1, Ordering::Relaxed);
        debug!(connection_id, "session collected");
        true
    }

    // =========================================================================
    // Housekeeping
    // =========================================================================

    /// One housekeeping pass over the pool.
    ///
    /// Every `Disconnected` session is briefly acquired; if anyone else is
    /// still holding it, a reconnect is attempted. The closing release runs
    /// with GC allowed, so sessions nobody holds are collected by the same
    /// pass.
    pub async fn do_housekeeping(&self) {
        let disconnected: Vec<u32> = self
            .pool
            .lock()
            .iter()
            .filter(|s| s.state() == SessionState::Disconnected)
            .map(Session::connection_id)
            .collect();

        for connection_id in disconnected {
            // The session may have been collected since the scan.
            let Ok(session) = self.acquire_existing(connection_id) else {
                continue;
            };

            if session.activity_count() > 1 {
                self.stats.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = session.connect().await {
                    self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        connection_id,
                        error = %err,
                        "housekeeping reconnect failed"
                    );
                }
            }

            if let Err(err) = self.release(connection_id, true).await {
                error!(connection_id, error = %err, "housekeeping release failed");
            }
        }
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("pooled", &self.len())
            .finish()
    }
}
