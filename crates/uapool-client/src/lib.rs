// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pooled OPC UA-style client layer: reference-counted sessions and
//! subscriptions, request fan-out across endpoints, and recovery
//! bookkeeping for persistent requests.
//!
//! The pooling layer does not speak the wire protocol itself. It drives
//! caller-supplied [`transport::UaTransport`] and [`discovery::Discovery`]
//! collaborators and concentrates on what sits above them: one session per
//! (endpoint, settings), one shareable subscription per settings value,
//! positional fan-out/fan-in of multi-endpoint requests, and the
//! bookkeeping that lets callers selectively retry failed targets.
//!
//! # Usage
//!
//! ```ignore
//! let manager = Arc::new(ServiceManager::new(
//!     ClientSettings::default(),
//!     ConnectionSettings::default(),
//!     transports,
//!     discovery,
//!     Arc::new(AcceptAllCertificates),
//! ));
//!
//! let request = Request::<Read>::new(1, targets);
//! let mask = Mask::all_set(request.len());
//! let result = manager.invoke_request(request, &mask).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod address_cache;
pub mod config;
pub mod database;
pub mod discovery;
pub mod invocation;
pub mod manager;
pub mod session;
pub mod session_factory;
pub mod store;
pub mod subscription;
pub mod subscription_factory;
pub mod transport;

pub use address_cache::AddressCache;
pub use config::{
    ClientSettings, ConnectionSettings, SecurityConfig, SecurityMode, SecurityPolicy,
};
pub use database::{Database, HandleGenerator, ServiceCompletion, Transaction};
pub use discovery::{Discovery, EndpointDescription, ServerDescription};
pub use invocation::{GroupContext, Invocable, InvocationFactory};
pub use manager::ServiceManager;
pub use session::{
    AcceptAllCertificates, CertificateValidator, CertificateVerdict, ConnectAttempt, ConnectStep,
    Session, SessionInfo, SessionState,
};
pub use session_factory::{FactoryStats, FactoryStatsSnapshot, SessionFactory};
pub use store::{RequestStore, StoredRequest};
pub use subscription::{
    MonitoredItem, Notification, Subscription, SubscriptionInfo, SubscriptionState,
};
pub use subscription_factory::{
    SubscriptionFactory, SubscriptionStats, SubscriptionStatsSnapshot,
};
pub use transport::{
    CallOptions, DataChange, ItemEvent, RevisedSubscription, ServerMetadata, TransportEvents,
    TransportFactory, UaTransport,
};
