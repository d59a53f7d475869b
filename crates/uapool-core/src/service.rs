// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Generic request/result/target data model and service descriptors.
//!
//! A [`Request`] is an ordered sequence of targets plus per-request options;
//! a [`ServiceResult`] is a parallel ordered sequence of per-target outcomes
//! plus one summarized overall status. The index of a target within its
//! request (its *rank*) is preserved through fan-out so results can be
//! merged back positionally regardless of how many endpoints a request was
//! split across.
//!
//! Each supported operation is described by a zero-sized [`Service`] type
//! fixing the target and outcome shapes. Persistence and handle-assignment
//! behavior hang off the descriptor instead of being specialized per call
//! site.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::{EndpointId, NodeAddress, NodeId, Value};
use crate::status::Status;

/// Caller-visible handle correlating a request with its persisted state and
/// asynchronous completions.
pub type RequestHandle = u32;

// =============================================================================
// Target / Outcome traits
// =============================================================================

/// A single unit of work within a request.
pub trait ServiceTarget {
    /// The endpoint this target belongs to.
    fn endpoint(&self) -> &EndpointId;

    /// The node address of this target, if it has one.
    fn address(&self) -> Option<&NodeAddress> {
        None
    }

    /// Mutable access to the node address, for cache-driven resolution.
    fn address_mut(&mut self) -> Option<&mut NodeAddress> {
        None
    }
}

/// The per-target outcome of one service invocation.
pub trait TargetOutcome {
    /// The status of this target.
    fn status(&self) -> &Status;

    /// Overwrites the status of this target.
    fn set_status(&mut self, status: Status);

    /// The placeholder outcome for a target that has not been attempted yet.
    fn unattempted() -> Self;
}

// =============================================================================
// Service descriptor
// =============================================================================

/// Describes one service kind: its name, target/outcome shapes, and whether
/// its requests are persisted for recovery.
pub trait Service: Sized + Send + Sync + 'static {
    /// Service name used in logs.
    const NAME: &'static str;

    /// Whether requests of this kind are stored for selective retry.
    const PERSISTENT: bool = false;

    /// Whether this service operates on a notification channel rather than
    /// directly on a session.
    const SUBSCRIPTION_LEVEL: bool = false;

    /// One unit of work.
    type Target: ServiceTarget + Clone + Send + Sync + std::fmt::Debug;

    /// The per-target outcome.
    type Outcome: TargetOutcome + Clone + Send + Sync + std::fmt::Debug;
}

// =============================================================================
// Request / ServiceResult
// =============================================================================

/// Per-request configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Deliver the final result via completion callback instead of blocking.
    /// Asynchronous requests may address only one endpoint.
    pub asynchronous: bool,

    /// Round-trip timeout enforced by the transport.
    pub timeout: Duration,

    /// Desired notification-channel settings, for subscription-level
    /// services.
    pub subscription: SubscriptionSettings,

    /// Always create a dedicated notification channel instead of sharing an
    /// existing one with equal settings.
    pub unique_subscription: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            asynchronous: false,
            timeout: Duration::from_secs(10),
            subscription: SubscriptionSettings::default(),
            unique_subscription: false,
        }
    }
}

/// An ordered sequence of targets plus per-request options.
#[derive(Debug)]
pub struct Request<S: Service> {
    /// Caller-visible request handle.
    pub handle: RequestHandle,

    /// The ordered targets. A target's index is its rank.
    pub targets: Vec<S::Target>,

    /// Per-request configuration.
    pub options: RequestOptions,
}

impl<S: Service> Request<S> {
    /// Creates a request with default options.
    pub fn new(handle: RequestHandle, targets: Vec<S::Target>) -> Self {
        Self {
            handle,
            targets,
            options: RequestOptions::default(),
        }
    }

    /// Creates a request with explicit options.
    pub fn with_options(
        handle: RequestHandle,
        targets: Vec<S::Target>,
        options: RequestOptions,
    ) -> Self {
        Self {
            handle,
            targets,
            options,
        }
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if the request has no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

// The derive would bound `S: Clone`; only the field types need it.
impl<S: Service> Clone for Request<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle,
            targets: self.targets.clone(),
            options: self.options.clone(),
        }
    }
}

/// A parallel ordered sequence of per-target outcomes plus one overall
/// status.
///
/// `targets.len()` always equals the originating request's target count.
#[derive(Debug)]
pub struct ServiceResult<S: Service> {
    /// Dominance-ordered summary of the per-target statuses.
    pub overall: Status,

    /// Per-target outcomes, indexed by rank.
    pub targets: Vec<S::Outcome>,
}

impl<S: Service> ServiceResult<S> {
    /// Creates a result of `len` unattempted outcomes.
    pub fn unattempted(len: usize) -> Self {
        Self {
            overall: Status::good(),
            targets: (0..len).map(|_| S::Outcome::unattempted()).collect(),
        }
    }

    /// Recomputes the overall status from all per-target statuses.
    pub fn summarize(&mut self) {
        self.overall = Status::summarize(self.targets.iter().map(|t| t.status()));
    }

    /// Number of per-target outcomes.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns `true` if the result carries no outcomes.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<S: Service> Clone for ServiceResult<S> {
    fn clone(&self) -> Self {
        Self {
            overall: self.overall.clone(),
            targets: self.targets.clone(),
        }
    }
}

// =============================================================================
// Shared service types
// =============================================================================

/// Node attribute selector for read targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    /// The node's value attribute.
    Value,
    /// The node's display name.
    DisplayName,
    /// The node's description.
    Description,
    /// The node's browse name.
    BrowseName,
}

impl Default for AttributeId {
    fn default() -> Self {
        Self::Value
    }
}

/// Browse direction for browse targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowseDirection {
    /// Follow forward references.
    Forward,
    /// Follow inverse references.
    Inverse,
    /// Follow references in both directions.
    Both,
}

impl Default for BrowseDirection {
    fn default() -> Self {
        Self::Forward
    }
}

/// One reference returned by a browse operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDescription {
    /// The target node of the reference.
    pub node_id: NodeId,

    /// Browse name of the target node.
    pub browse_name: String,

    /// Display name of the target node.
    pub display_name: String,

    /// Whether the reference is a forward reference.
    pub is_forward: bool,
}

/// Settings of a notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Requested publishing interval.
    pub publishing_interval: Duration,

    /// Requested lifetime count.
    pub lifetime_count: u32,

    /// Requested max keep-alive count.
    pub max_keep_alive_count: u32,

    /// Maximum notifications per publish response (0 = unlimited).
    pub max_notifications_per_publish: u32,

    /// Relative priority among subscriptions of a session.
    pub priority: u8,

    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: Duration::from_millis(500),
            lifetime_count: 60,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

/// Monitoring mode of a monitored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringMode {
    /// Item is disabled.
    Disabled,
    /// Item samples but does not report.
    Sampling,
    /// Item samples and reports.
    Reporting,
}

impl Default for MonitoringMode {
    fn default() -> Self {
        Self::Reporting
    }
}

/// Sampling and queueing parameters of a monitored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemSettings {
    /// Requested sampling interval.
    pub sampling_interval: Duration,

    /// Requested queue size.
    pub queue_size: u32,

    /// Discard oldest when the queue overflows.
    pub discard_oldest: bool,

    /// Initial monitoring mode.
    pub mode: MonitoringMode,
}

impl Default for MonitoredItemSettings {
    fn default() -> Self {
        Self {
            sampling_interval: Duration::from_millis(250),
            queue_size: 1,
            discard_oldest: true,
            mode: MonitoringMode::Reporting,
        }
    }
}

// =============================================================================
// Service descriptors
// =============================================================================

macro_rules! node_target {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* pub $field:ident: $ty:ty,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// The endpoint this target belongs to.
            pub endpoint: EndpointId,

            /// The node addressed by this target.
            pub node: NodeAddress,

            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl ServiceTarget for $name {
            fn endpoint(&self) -> &EndpointId {
                &self.endpoint
            }

            fn address(&self) -> Option<&NodeAddress> {
                Some(&self.node)
            }

            fn address_mut(&mut self) -> Option<&mut NodeAddress> {
                Some(&mut self.node)
            }
        }
    };
}

macro_rules! status_outcome {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* pub $field:ident: $ty:ty,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// Status of this target.
            pub status: Status,

            $($(#[$fmeta])* pub $field: $ty,)*
        }

        impl TargetOutcome for $name {
            fn status(&self) -> &Status {
                &self.status
            }

            fn set_status(&mut self, status: Status) {
                self.status = status;
            }

            fn unattempted() -> Self {
                Self {
                    status: Status::bad(crate::status::StatusCode::BAD_NO_COMMUNICATION),
                    ..Default::default()
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    status: Status::good(),
                    $($field: Default::default(),)*
                }
            }
        }
    };
}

// ---- Read -------------------------------------------------------------------

/// The attribute read service.
#[derive(Debug, Clone, Copy)]
pub struct Read;

node_target! {
    /// One attribute to read.
    ReadTarget {
        /// Attribute to read.
        pub attribute: AttributeId,
    }
}

status_outcome! {
    /// Outcome of reading one attribute.
    ReadOutcome {
        /// The value read, if the status is good.
        pub value: Option<Value>,
        /// Timestamp assigned by the data source.
        pub source_timestamp: Option<DateTime<Utc>>,
        /// Timestamp assigned by the server.
        pub server_timestamp: Option<DateTime<Utc>>,
    }
}

impl Service for Read {
    const NAME: &'static str = "read";
    type Target = ReadTarget;
    type Outcome = ReadOutcome;
}

// ---- Write ------------------------------------------------------------------

/// The attribute write service.
#[derive(Debug, Clone, Copy)]
pub struct Write;

node_target! {
    /// One value to write.
    WriteTarget {
        /// The value to write.
        pub value: Value,
    }
}

status_outcome! {
    /// Outcome of writing one value.
    WriteOutcome {}
}

impl Service for Write {
    const NAME: &'static str = "write";
    type Target = WriteTarget;
    type Outcome = WriteOutcome;
}

// ---- CallMethod -------------------------------------------------------------

/// The method call service.
#[derive(Debug, Clone, Copy)]
pub struct CallMethod;

/// One method to call on an object node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodTarget {
    /// The endpoint this target belongs to.
    pub endpoint: EndpointId,

    /// The object node owning the method.
    pub object: NodeAddress,

    /// The method node to call.
    pub method: NodeAddress,

    /// Input arguments.
    pub arguments: Vec<Value>,
}

impl ServiceTarget for CallMethodTarget {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    fn address(&self) -> Option<&NodeAddress> {
        Some(&self.object)
    }

    fn address_mut(&mut self) -> Option<&mut NodeAddress> {
        Some(&mut self.object)
    }
}

status_outcome! {
    /// Outcome of one method call.
    CallMethodOutcome {
        /// Output arguments returned by the method.
        pub outputs: Vec<Value>,
    }
}

impl Service for CallMethod {
    const NAME: &'static str = "call_method";
    type Target = CallMethodTarget;
    type Outcome = CallMethodOutcome;
}

// ---- Browse -----------------------------------------------------------------

/// The browse service.
#[derive(Debug, Clone, Copy)]
pub struct Browse;

node_target! {
    /// One node whose references to browse.
    BrowseTarget {
        /// Direction of references to follow.
        pub direction: BrowseDirection,
    }
}

status_outcome! {
    /// Outcome of browsing one node.
    BrowseOutcome {
        /// References found.
        pub references: Vec<ReferenceDescription>,
        /// Continuation point when the server truncated the result.
        pub continuation_point: Option<Vec<u8>>,
    }
}

impl Service for Browse {
    const NAME: &'static str = "browse";
    type Target = BrowseTarget;
    type Outcome = BrowseOutcome;
}

// ---- BrowseNext -------------------------------------------------------------

/// The browse continuation service.
#[derive(Debug, Clone, Copy)]
pub struct BrowseNext;

/// One continuation point to follow up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseNextTarget {
    /// The endpoint this target belongs to.
    pub endpoint: EndpointId,

    /// Continuation point from an earlier browse.
    pub continuation_point: Vec<u8>,

    /// Release the continuation point without fetching more results.
    pub release: bool,
}

impl ServiceTarget for BrowseNextTarget {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }
}

impl Service for BrowseNext {
    const NAME: &'static str = "browse_next";
    type Target = BrowseNextTarget;
    type Outcome = BrowseOutcome;
}

// ---- HistoryReadRawModified -------------------------------------------------

/// The raw/modified history read service.
#[derive(Debug, Clone, Copy)]
pub struct HistoryReadRawModified;

node_target! {
    /// One node whose history to read.
    HistoryReadTarget {
        /// Start of the requested time range.
        pub start_time: DateTime<Utc>,
        /// End of the requested time range.
        pub end_time: DateTime<Utc>,
        /// Maximum number of values to return per node (0 = unlimited).
        pub max_values: u32,
    }
}

/// One historical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryValue {
    /// The recorded value.
    pub value: Value,

    /// Timestamp assigned by the data source.
    pub source_timestamp: DateTime<Utc>,

    /// Status the value was recorded with.
    pub status: Status,
}

status_outcome! {
    /// Outcome of reading one node's history.
    HistoryReadOutcome {
        /// Historical values in the requested range.
        pub values: Vec<HistoryValue>,
        /// Continuation point when the server truncated the result.
        pub continuation_point: Option<Vec<u8>>,
    }
}

impl Service for HistoryReadRawModified {
    const NAME: &'static str = "history_read_raw_modified";
    type Target = HistoryReadTarget;
    type Outcome = HistoryReadOutcome;
}

// ---- TranslateBrowsePaths ---------------------------------------------------

/// The browse-path translation service.
#[derive(Debug, Clone, Copy)]
pub struct TranslateBrowsePaths;

/// One browse path to translate to a canonical node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateTarget {
    /// The endpoint this target belongs to.
    pub endpoint: EndpointId,

    /// The node the path starts at.
    pub starting_node: NodeId,

    /// The endpoint-relative path to translate.
    pub relative_path: String,
}

impl ServiceTarget for TranslateTarget {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }
}

status_outcome! {
    /// Outcome of translating one browse path.
    TranslateOutcome {
        /// The canonical node ids the path resolved to.
        pub resolved: Vec<NodeId>,
    }
}

impl Service for TranslateBrowsePaths {
    const NAME: &'static str = "translate_browse_paths";
    type Target = TranslateTarget;
    type Outcome = TranslateOutcome;
}

// ---- CreateMonitoredItems ---------------------------------------------------

/// The monitored-item establishment service. The only persistent service
/// kind: its requests are stored so partially-failed targets can be retried
/// after reconnection.
#[derive(Debug, Clone, Copy)]
pub struct CreateMonitoredItems;

node_target! {
    /// One item to monitor.
    MonitorTarget {
        /// Sampling and queueing parameters.
        pub settings: MonitoredItemSettings,
    }
}

status_outcome! {
    /// Outcome of establishing one monitored item.
    MonitorOutcome {
        /// Client-assigned monitored-item handle.
        pub client_handle: u32,
        /// Server-assigned monitored-item id.
        pub server_id: u32,
        /// Sampling interval the server actually applied.
        pub revised_sampling_interval: Duration,
        /// Queue size the server actually applied.
        pub revised_queue_size: u32,
    }
}

impl Service for CreateMonitoredItems {
    const NAME: &'static str = "create_monitored_items";
    const PERSISTENT: bool = true;
    const SUBSCRIPTION_LEVEL: bool = true;
    type Target = MonitorTarget;
    type Outcome = MonitorOutcome;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusCode;

    fn read_target(endpoint: &str, node: u32) -> ReadTarget {
        ReadTarget {
            endpoint: EndpointId::from(endpoint),
            node: NodeId::numeric(2, node).into(),
            attribute: AttributeId::Value,
        }
    }

    #[test]
    fn test_result_parallel_to_request() {
        let request: Request<Read> = Request::new(
            7,
            vec![read_target("opc.tcp://a:4840", 1), read_target("opc.tcp://a:4840", 2)],
        );
        let result = ServiceResult::<Read>::unattempted(request.len());
        assert_eq!(result.len(), request.len());
        for outcome in &result.targets {
            assert_eq!(outcome.status.code, StatusCode::BAD_NO_COMMUNICATION);
        }
    }

    #[test]
    fn test_summarize_overall() {
        let mut result = ServiceResult::<Read>::unattempted(2);
        result.targets[0].set_status(Status::good());
        result.summarize();
        assert!(result.overall.is_bad());

        result.targets[1].set_status(Status::good());
        result.summarize();
        assert!(result.overall.is_good());
    }

    #[test]
    fn test_target_address_access() {
        let mut target = read_target("opc.tcp://a:4840", 9);
        assert!(target.address().is_some());
        *target.address_mut().unwrap() = NodeAddress::Path("Line1/Temp".into());
        assert_eq!(target.node.path(), Some("Line1/Temp"));

        let translate = TranslateTarget {
            endpoint: EndpointId::from("opc.tcp://a:4840"),
            starting_node: NodeId::numeric(0, 85),
            relative_path: "Line1/Temp".into(),
        };
        assert!(translate.address().is_none());
    }
}
