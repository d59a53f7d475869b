// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data model for the uapool client pooling layer.
//!
//! This crate carries the leaf types the pooling layer is built on:
//!
//! - **Status model**: per-target [`Status`]/[`StatusCode`] with
//!   dominance-ordered summarization (Bad > Uncertain > Good)
//! - **Mask**: growable bit-vector with O(1) set-count tracking, used
//!   wherever partial subsets of an ordered target list are addressed
//! - **Node addressing**: [`NodeId`], logical [`NodeAddress`] paths, and
//!   [`EndpointId`] identities
//! - **Request model**: generic [`Request`]/[`ServiceResult`] pairs over
//!   zero-sized [`Service`] descriptors
//! - **Errors**: the [`PoolError`] hierarchy
//!
//! The pooling layer itself (sessions, subscriptions, fan-out routing)
//! lives in `uapool-client`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod mask;
pub mod node;
pub mod service;
pub mod status;

pub use error::{
    ConnectionError, DiscoveryError, InvalidRequestError, PoolError, PoolResult, ResourceKind,
    SecurityError,
};
pub use mask::Mask;
pub use node::{EndpointId, NodeAddress, NodeId, NodeIdentifier, Value};
pub use service::{
    AttributeId, Browse, BrowseDirection, BrowseNext, BrowseNextTarget, BrowseOutcome,
    BrowseTarget, CallMethod, CallMethodOutcome, CallMethodTarget, CreateMonitoredItems,
    HistoryReadOutcome, HistoryReadRawModified, HistoryReadTarget, HistoryValue,
    MonitorOutcome, MonitorTarget, MonitoredItemSettings, MonitoringMode, Read, ReadOutcome,
    ReadTarget, ReferenceDescription, Request, RequestHandle, RequestOptions, Service,
    ServiceResult, ServiceTarget, SubscriptionSettings, TargetOutcome, TranslateBrowsePaths,
    TranslateOutcome, TranslateTarget, Write, WriteOutcome, WriteTarget,
};
pub use status::{Status, StatusCode};
