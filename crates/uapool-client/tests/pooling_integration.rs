// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Integration tests driving the pooling layer through scripted in-memory
//! transport and discovery collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use uapool_core::error::{ConnectionError, InvalidRequestError, PoolError, PoolResult};
use uapool_core::mask::Mask;
use uapool_core::node::{EndpointId, NodeId, Value};
use uapool_core::service::{
    AttributeId, BrowseNextTarget, BrowseOutcome, BrowseTarget, CallMethodOutcome,
    CallMethodTarget, CreateMonitoredItems, HistoryReadOutcome, HistoryReadTarget, MonitorOutcome,
    MonitorTarget, MonitoredItemSettings, MonitoringMode, Read, ReadOutcome, ReadTarget, Request,
    RequestOptions, SubscriptionSettings, TranslateBrowsePaths, TranslateOutcome, TranslateTarget,
    WriteOutcome, WriteTarget,
};
use uapool_core::status::{Status, StatusCode};

use uapool_client::config::{ClientSettings, ConnectionSettings, SecurityConfig};
use uapool_client::discovery::{Discovery, EndpointDescription, ServerDescription};
use uapool_client::manager::ServiceManager;
use uapool_client::session::{AcceptAllCertificates, SessionState};
use uapool_client::session_factory::SessionFactory;
use uapool_client::subscription::{Notification, SubscriptionState};
use uapool_client::transport::{
    CallOptions, DataChange, ItemEvent, RevisedSubscription, ServerMetadata, TransportEvents,
    TransportFactory, UaTransport,
};

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Shared switches controlling scripted failure behavior.
#[derive(Default)]
struct Script {
    fail_connect: AtomicBool,
    fail_create_subscription: AtomicBool,
}

struct MockTransport {
    connection_id: u32,
    script: Arc<Script>,
    connected: AtomicBool,
    connects: AtomicUsize,
    metadata_fetches: AtomicUsize,
    next_server_id: AtomicU32,
    events: Mutex<Option<Arc<dyn TransportEvents>>>,
}

impl MockTransport {
    fn new(connection_id: u32, script: Arc<Script>) -> Self {
        Self {
            connection_id,
            script,
            connected: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            metadata_fetches: AtomicUsize::new(0),
            next_server_id: AtomicU32::new(100),
            events: Mutex::new(None),
        }
    }

    fn fire_state(&self, state: SessionState) {
        if let Some(events) = self.events.lock().clone() {
            events.connection_status_changed(self.connection_id, state);
        }
    }

    fn fire_data_change(&self, subscription_handle: u32, change: DataChange) {
        if let Some(events) = self.events.lock().clone() {
            events.data_change(subscription_handle, change);
        }
    }

    fn fire_service_completed(&self, transaction_id: u64, overall: Status, statuses: Vec<Status>) {
        if let Some(events) = self.events.lock().clone() {
            events.service_completed(transaction_id, overall, statuses);
        }
    }

    fn require_connected(&self) -> PoolResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnectionError::not_connected("mock").into())
        }
    }
}

#[async_trait]
impl UaTransport for MockTransport {
    async fn connect(
        &self,
        endpoint: &EndpointDescription,
        _settings: &ConnectionSettings,
        _security: &SecurityConfig,
        events: Arc<dyn TransportEvents>,
    ) -> PoolResult<()> {
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::refused(endpoint.endpoint_url.clone()).into());
        }
        self.events.lock().replace(events);
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.fire_state(SessionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> PoolResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.fire_state(SessionState::Disconnected);
        Ok(())
    }

    async fn server_metadata(&self) -> PoolResult<ServerMetadata> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ServerMetadata {
            server_array: vec!["urn:mock:server".into()],
            namespace_array: vec![
                "http://opcfoundation.org/UA/".into(),
                "urn:mock:ns".into(),
            ],
        })
    }

    async fn read(
        &self,
        targets: &[ReadTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<ReadOutcome>> {
        self.require_connected()?;
        Ok(targets
            .iter()
            .map(|target| match target.node.resolved().and_then(NodeId::as_numeric) {
                Some(value) => ReadOutcome {
                    status: Status::good(),
                    value: Some(Value::Int64(i64::from(value))),
                    ..Default::default()
                },
                None => ReadOutcome {
                    status: Status::bad(StatusCode::BAD_NODE_ID_UNKNOWN),
                    ..Default::default()
                },
            })
            .collect())
    }

    async fn write(
        &self,
        targets: &[WriteTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<WriteOutcome>> {
        self.require_connected()?;
        Ok(targets.iter().map(|_| WriteOutcome::default()).collect())
    }

    async fn call_method(
        &self,
        targets: &[CallMethodTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<CallMethodOutcome>> {
        self.require_connected()?;
        Ok(targets.iter().map(|_| CallMethodOutcome::default()).collect())
    }

    async fn browse(
        &self,
        targets: &[BrowseTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>> {
        self.require_connected()?;
        Ok(targets.iter().map(|_| BrowseOutcome::default()).collect())
    }

    async fn browse_next(
        &self,
        targets: &[BrowseNextTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<BrowseOutcome>> {
        self.require_connected()?;
        Ok(targets.iter().map(|_| BrowseOutcome::default()).collect())
    }

    async fn history_read_raw_modified(
        &self,
        targets: &[HistoryReadTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<HistoryReadOutcome>> {
        self.require_connected()?;
        Ok(targets.iter().map(|_| HistoryReadOutcome::default()).collect())
    }

    async fn translate_browse_paths(
        &self,
        targets: &[TranslateTarget],
        _options: &CallOptions,
    ) -> PoolResult<Vec<TranslateOutcome>> {
        self.require_connected()?;
        Ok(targets
            .iter()
            .map(|_| TranslateOutcome {
                status: Status::good(),
                resolved: vec![NodeId::numeric(2, 1001)],
            })
            .collect())
    }

    async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
    ) -> PoolResult<RevisedSubscription> {
        self.require_connected()?;
        if self.script.fail_create_subscription.load(Ordering::SeqCst) {
            return Err(ConnectionError::closed("mock", "subscription refused").into());
        }
        Ok(RevisedSubscription {
            server_id: self.next_server_id.fetch_add(1, Ordering::SeqCst),
            revised_publishing_interval: settings.publishing_interval,
            revised_lifetime_count: settings.lifetime_count,
            revised_max_keep_alive_count: settings.max_keep_alive_count,
        })
    }

    async fn delete_subscription(&self, _server_id: u32) -> PoolResult<()> {
        Ok(())
    }

    async fn set_publishing_mode(&self, _server_id: u32, _enabled: bool) -> PoolResult<()> {
        Ok(())
    }

    async fn create_monitored_items(
        &self,
        _server_id: u32,
        targets: &[MonitorTarget],
        client_handles: &[u32],
        _options: &CallOptions,
    ) -> PoolResult<Vec<MonitorOutcome>> {
        self.require_connected()?;
        Ok(targets
            .iter()
            .zip(client_handles)
            .map(|(target, &client_handle)| {
                // Nodes numbered 9000 and above are scripted to fail.
                let bad = target
                    .node
                    .resolved()
                    .and_then(NodeId::as_numeric)
                    .is_some_and(|v| v >= 9000);
                MonitorOutcome {
                    status: if bad {
                        Status::bad(StatusCode::BAD_NODE_ID_UNKNOWN)
                    } else {
                        Status::good()
                    },
                    client_handle,
                    server_id: self.next_server_id.fetch_add(1, Ordering::SeqCst),
                    revised_sampling_interval: target.settings.sampling_interval,
                    revised_queue_size: target.settings.queue_size,
                }
            })
            .collect())
    }

    async fn set_monitoring_mode(
        &self,
        _server_id: u32,
        _mode: MonitoringMode,
        item_server_ids: &[u32],
    ) -> PoolResult<Vec<Status>> {
        self.require_connected()?;
        Ok(item_server_ids.iter().map(|_| Status::good()).collect())
    }
}

#[derive(Default)]
struct MockTransportFactory {
    script: Arc<Script>,
    created: Mutex<HashMap<u32, Arc<MockTransport>>>,
}

impl MockTransportFactory {
    fn transport(&self, connection_id: u32) -> Arc<MockTransport> {
        self.created
            .lock()
            .get(&connection_id)
            .cloned()
            .expect("transport not created")
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, connection_id: u32) -> Arc<dyn UaTransport> {
        let transport = Arc::new(MockTransport::new(connection_id, self.script.clone()));
        self.created.lock().insert(connection_id, transport.clone());
        transport
    }
}

struct MockDiscovery;

#[async_trait]
impl Discovery for MockDiscovery {
    async fn find_servers(&self, discovery_urls: &[String]) -> PoolResult<Vec<ServerDescription>> {
        Ok(vec![ServerDescription {
            application_uri: "urn:mock:server".into(),
            application_name: "mock".into(),
            discovery_urls: discovery_urls.to_vec(),
        }])
    }

    async fn get_endpoints(&self, discovery_url: &str) -> PoolResult<Vec<EndpointDescription>> {
        Ok(vec![EndpointDescription {
            endpoint_url: discovery_url.to_string(),
            security_mode: Default::default(),
            security_policy: Default::default(),
            server_certificate: None,
        }])
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_manager() -> (Arc<ServiceManager>, Arc<MockTransportFactory>) {
    init_tracing();
    let transports = Arc::new(MockTransportFactory::default());
    let manager = Arc::new(ServiceManager::new(
        ClientSettings::default(),
        ConnectionSettings::default(),
        transports.clone(),
        Arc::new(MockDiscovery),
        Arc::new(AcceptAllCertificates),
    ));
    (manager, transports)
}

fn make_factory() -> (Arc<SessionFactory>, Arc<MockTransportFactory>) {
    init_tracing();
    let transports = Arc::new(MockTransportFactory::default());
    let database = Arc::new(uapool_client::database::Database::default());
    let factory = Arc::new(SessionFactory::new(
        database,
        transports.clone(),
        Arc::new(MockDiscovery),
        Arc::new(AcceptAllCertificates),
    ));
    (factory, transports)
}

fn read_target(endpoint: &str, node: u32) -> ReadTarget {
    ReadTarget {
        endpoint: EndpointId::from(endpoint),
        node: NodeId::numeric(2, node).into(),
        attribute: AttributeId::Value,
    }
}

fn monitor_target(endpoint: &str, node: u32) -> MonitorTarget {
    MonitorTarget {
        endpoint: EndpointId::from(endpoint),
        node: NodeId::numeric(2, node).into(),
        settings: MonitoredItemSettings::default(),
    }
}

const ENDPOINT_A: &str = "opc.tcp://plant-a:4840";
const ENDPOINT_B: &str = "opc.tcp://plant-b:4840";

// =============================================================================
// Session pooling
// =============================================================================

#[tokio::test]
async fn concurrent_acquires_share_one_session() {
    let (factory, transports) = make_factory();
    let endpoint = EndpointId::from(ENDPOINT_A);
    let settings = ConnectionSettings::default();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let factory = factory.clone();
        let endpoint = endpoint.clone();
        let settings = settings.clone();
        tasks.spawn(async move { factory.acquire(&endpoint, &settings).await });
    }
    let mut connection_ids = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        connection_ids.push(joined.unwrap().unwrap().connection_id());
    }

    assert_eq!(factory.len(), 1);
    assert!(connection_ids.windows(2).all(|w| w[0] == w[1]));

    let info = &factory.information()[0];
    assert_eq!(info.activity_count, 8);
    assert_eq!(info.state, SessionState::Connected);

    // Exactly one transport instance was created and connected once.
    let transport = transports.transport(connection_ids[0]);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 1);

    let stats = factory.stats();
    assert_eq!(stats.sessions_created, 1);
    assert_eq!(stats.sessions_joined, 7);
}

#[tokio::test]
async fn differing_settings_get_separate_sessions() {
    let (factory, _) = make_factory();
    let endpoint = EndpointId::from(ENDPOINT_A);

    let default_settings = ConnectionSettings::default();
    let long_timeout = ConnectionSettings {
        session_timeout: Duration::from_secs(300),
        ..ConnectionSettings::default()
    };

    let first = factory.acquire(&endpoint, &default_settings).await.unwrap();
    let second = factory.acquire(&endpoint, &long_timeout).await.unwrap();

    assert_ne!(first.connection_id(), second.connection_id());
    assert_eq!(factory.len(), 2);
}

#[tokio::test]
async fn acquire_succeeds_when_connect_fails() {
    let (factory, transports) = make_factory();
    transports.script.fail_connect.store(true, Ordering::SeqCst);

    let endpoint = EndpointId::from(ENDPOINT_A);
    let session = factory
        .acquire(&endpoint, &ConnectionSettings::default())
        .await
        .expect("acquisition must not fail on connect failure");

    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(factory.len(), 1);

    let attempt = session.last_attempt().expect("attempt recorded");
    assert!(attempt.status.is_bad());
}

#[tokio::test]
async fn release_collects_only_terminal_unheld_sessions() {
    let (factory, transports) = make_factory();
    let endpoint = EndpointId::from(ENDPOINT_A);
    let settings = ConnectionSettings::default();

    // Connected session: released but not collected.
    let session = factory.acquire(&endpoint, &settings).await.unwrap();
    let connection_id = session.connection_id();
    factory.release(connection_id, true).await.unwrap();
    assert_eq!(factory.len(), 1);

    // A second release of the same session violates the counting invariant.
    let err = factory.release(connection_id, true).await.unwrap_err();
    assert!(matches!(err, PoolError::Unexpected(_)));

    // Once the transport reports Disconnected, an acquire/release cycle
    // with GC allowed collects it.
    transports.transport(connection_id).fire_state(SessionState::Disconnected);
    factory.acquire_existing(connection_id).unwrap();
    factory.release(connection_id, true).await.unwrap();
    assert_eq!(factory.len(), 0);

    // The collected id is gone.
    assert!(factory.acquire_existing(connection_id).is_err());
}

#[tokio::test]
async fn housekeeping_reconnects_held_and_collects_abandoned() {
    let (factory, transports) = make_factory();
    transports.script.fail_connect.store(true, Ordering::SeqCst);
    let settings = ConnectionSettings::default();

    // Held session: caller keeps its hold across the outage.
    let held = factory
        .acquire(&EndpointId::from(ENDPOINT_A), &settings)
        .await
        .unwrap();

    // Abandoned session: hold dropped without GC.
    let abandoned = factory
        .acquire(&EndpointId::from(ENDPOINT_B), &settings)
        .await
        .unwrap();
    let abandoned_id = abandoned.connection_id();
    factory.release(abandoned_id, false).await.unwrap();

    assert_eq!(factory.len(), 2);

    // Outage ends; one housekeeping pass reconnects the held session and
    // collects the abandoned one.
    transports.script.fail_connect.store(false, Ordering::SeqCst);
    factory.do_housekeeping().await;

    assert_eq!(held.state(), SessionState::Connected);
    assert_eq!(factory.len(), 1);
    assert!(factory.acquire_existing(abandoned_id).is_err());

    let stats = factory.stats();
    assert_eq!(stats.reconnect_attempts, 1);
    assert_eq!(stats.sessions_collected, 1);
}

#[tokio::test]
async fn concurrent_cycles_on_a_terminal_session_stay_consistent() {
    let (factory, transports) = make_factory();
    let session = factory
        .acquire(&EndpointId::from(ENDPOINT_A), &ConnectionSettings::default())
        .await
        .unwrap();
    let connection_id = session.connection_id();
    transports
        .transport(connection_id)
        .fire_state(SessionState::Disconnected);
    factory.release(connection_id, false).await.unwrap();

    // Tasks race acquire/release cycles against collection. A successful
    // acquire must always be releasable: collection may only happen
    // between holds, never while one exists.
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let factory = factory.clone();
        tasks.spawn(async move {
            for _ in 0..100 {
                if factory.acquire_existing(connection_id).is_err() {
                    return;
                }
                factory.release(connection_id, true).await.unwrap();
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    if factory.acquire_existing(connection_id).is_ok() {
        factory.release(connection_id, true).await.unwrap();
    }
    assert!(factory.acquire_existing(connection_id).is_err());
    assert_eq!(factory.len(), 0);
}

#[tokio::test]
async fn metadata_refresh_runs_for_transport_thread_callbacks() {
    let (factory, transports) = make_factory();
    let session = factory
        .acquire(&EndpointId::from(ENDPOINT_A), &ConnectionSettings::default())
        .await
        .unwrap();
    let transport = transports.transport(session.connection_id());

    // The initial connect refreshed the metadata once from the runtime.
    for _ in 0..50 {
        if transport.metadata_fetches.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.metadata_fetches.load(Ordering::SeqCst), 1);

    // Status callbacks arrive on threads the transport owns, with no
    // ambient runtime. Reconnecting from such a thread must still refresh.
    let callback_transport = transport.clone();
    std::thread::spawn(move || {
        callback_transport.fire_state(SessionState::ConnectionErrorApiReconnect);
        callback_transport.fire_state(SessionState::Connected);
    })
    .join()
    .unwrap();

    let mut refreshed = false;
    for _ in 0..50 {
        if transport.metadata_fetches.load(Ordering::SeqCst) == 2 {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refreshed);
    assert_eq!(session.metadata().namespace_array.len(), 2);
}

// =============================================================================
// Fan-out / fan-in
// =============================================================================

#[tokio::test]
async fn fanout_merges_outcomes_by_rank() {
    let (manager, _) = make_manager();

    // Targets interleave two endpoints; ranks must survive the grouping.
    let request = Request::<Read>::new(
        1,
        vec![
            read_target(ENDPOINT_A, 11),
            read_target(ENDPOINT_B, 22),
            read_target(ENDPOINT_A, 33),
            read_target(ENDPOINT_B, 44),
        ],
    );

    let result = manager.invoke_request(request, &Mask::all_set(4)).await.unwrap();

    assert!(result.overall.is_good());
    let values: Vec<_> = result
        .targets
        .iter()
        .map(|outcome| outcome.value.clone().unwrap())
        .collect();
    assert_eq!(
        values,
        vec![
            Value::Int64(11),
            Value::Int64(22),
            Value::Int64(33),
            Value::Int64(44)
        ]
    );

    // One pooled session per endpoint, all holds released.
    let sessions = manager.session_information();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.activity_count == 0));
}

#[tokio::test]
async fn failed_group_does_not_poison_other_groups() {
    let (manager, transports) = make_manager();

    // Pre-pool endpoint A connected, then script connect failures so the
    // session for endpoint B never comes up.
    let a_id = manager
        .manually_connect(&EndpointId::from(ENDPOINT_A), ConnectionSettings::default())
        .await
        .unwrap();
    transports.script.fail_connect.store(true, Ordering::SeqCst);

    let request = Request::<Read>::new(
        2,
        vec![read_target(ENDPOINT_A, 7), read_target(ENDPOINT_B, 8)],
    );
    let result = manager.invoke_request(request, &Mask::all_set(2)).await.unwrap();

    assert!(result.overall.is_bad());
    assert!(result.targets[0].status.is_good());
    assert_eq!(result.targets[0].value, Some(Value::Int64(7)));
    assert!(result.targets[1].status.is_bad());

    manager.manually_disconnect(a_id).await.unwrap();
}

#[tokio::test]
async fn async_request_rejects_multiple_endpoints_without_side_effects() {
    let (manager, _) = make_manager();

    let request = Request::<Read>::with_options(
        3,
        vec![read_target(ENDPOINT_A, 1), read_target(ENDPOINT_B, 2)],
        RequestOptions {
            asynchronous: true,
            ..Default::default()
        },
    );

    let err = manager.invoke_request(request, &Mask::all_set(2)).await.unwrap_err();
    assert!(matches!(err, PoolError::MultiEndpointAsync { endpoints: 2 }));

    // No session acquired, no transaction registered.
    assert!(manager.session_information().is_empty());
    assert_eq!(manager.database().pending_transactions(), 0);
}

#[tokio::test]
async fn empty_request_is_rejected() {
    let (manager, _) = make_manager();
    let request = Request::<Read>::new(4, Vec::new());
    let err = manager.invoke_request(request, &Mask::new()).await.unwrap_err();
    assert!(matches!(err, PoolError::InvalidRequest(_)));
}

#[tokio::test]
async fn mask_size_mismatch_is_rejected() {
    let (manager, _) = make_manager();

    let request = Request::<Read>::new(
        6,
        vec![read_target(ENDPOINT_A, 1), read_target(ENDPOINT_A, 2)],
    );
    let err = manager
        .invoke_request(request, &Mask::all_set(3))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PoolError::InvalidRequest(InvalidRequestError::MaskSizeMismatch { .. })
    ));

    // Rejected before any side effect.
    assert!(manager.session_information().is_empty());
}

#[tokio::test]
async fn async_completion_reaches_subscribers() {
    let (manager, transports) = make_manager();
    let mut completions = manager.completions();

    let request = Request::<Read>::with_options(
        12,
        vec![read_target(ENDPOINT_A, 1), read_target(ENDPOINT_A, 2)],
        RequestOptions {
            asynchronous: true,
            ..Default::default()
        },
    );
    let result = manager
        .invoke_request(request, &Mask::all_set(2))
        .await
        .unwrap();
    assert!(result.overall.is_good());
    assert_eq!(manager.database().pending_transactions(), 1);

    // The transport delivers the final statuses through the callback; the
    // first registered transaction carries id 1.
    let connection_id = manager.session_information()[0].connection_id;
    transports.transport(connection_id).fire_service_completed(
        1,
        Status::good(),
        vec![Status::good(), Status::good()],
    );

    let completion = completions.recv().await.unwrap();
    assert_eq!(completion.request_handle, 12);
    assert_eq!(completion.ranks, vec![0, 1]);
    assert!(completion.overall.is_good());
    assert_eq!(manager.database().pending_transactions(), 0);
}

// =============================================================================
// Address cache
// =============================================================================

#[tokio::test]
async fn translation_feeds_cache_and_broken_state_purges_it() {
    let (manager, transports) = make_manager();
    let endpoint = EndpointId::from(ENDPOINT_A);

    let request = Request::<TranslateBrowsePaths>::new(
        5,
        vec![TranslateTarget {
            endpoint: endpoint.clone(),
            starting_node: NodeId::numeric(0, 85),
            relative_path: "Line1/Temp".into(),
        }],
    );
    let result = manager.invoke_request(request, &Mask::all_set(1)).await.unwrap();
    assert!(result.overall.is_good());

    let cache = manager.database().address_cache();
    assert_eq!(
        cache.resolve(&endpoint, "Line1/Temp"),
        Some(NodeId::numeric(2, 1001))
    );

    // Connection trouble invalidates the endpoint's resolutions.
    let connection_id = manager.session_information()[0].connection_id;
    transports
        .transport(connection_id)
        .fire_state(SessionState::ConnectionErrorApiReconnect);

    assert!(cache.resolve(&endpoint, "Line1/Temp").is_none());
}

// =============================================================================
// Subscriptions and monitored items
// =============================================================================

#[tokio::test]
async fn equal_settings_share_a_subscription_unique_does_not() {
    let (manager, _) = make_manager();
    let connection_id = manager
        .manually_connect(&EndpointId::from(ENDPOINT_A), ConnectionSettings::default())
        .await
        .unwrap();

    let settings = SubscriptionSettings::default();
    let first = manager
        .manually_subscribe(connection_id, &settings, false)
        .await
        .unwrap();
    let second = manager
        .manually_subscribe(connection_id, &settings, false)
        .await
        .unwrap();
    let dedicated = manager
        .manually_subscribe(connection_id, &settings, true)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first, dedicated);

    let info = manager.subscription_information(connection_id).unwrap();
    assert_eq!(info.len(), 2);
    let shared = info.iter().find(|s| s.handle == first).unwrap();
    assert_eq!(shared.activity_count, 2);
}

#[tokio::test]
async fn failed_channel_creation_fails_the_acquisition() {
    let (manager, transports) = make_manager();
    let connection_id = manager
        .manually_connect(&EndpointId::from(ENDPOINT_A), ConnectionSettings::default())
        .await
        .unwrap();

    transports
        .script
        .fail_create_subscription
        .store(true, Ordering::SeqCst);

    let err = manager
        .manually_subscribe(connection_id, &SubscriptionSettings::default(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Connection(_)));

    // The failed channel left nothing pooled.
    assert!(manager
        .subscription_information(connection_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn monitored_items_persist_with_partial_failures() {
    let (manager, _) = make_manager();

    // Node 9001 is scripted to fail item creation.
    let request = Request::<CreateMonitoredItems>::new(
        77,
        vec![
            monitor_target(ENDPOINT_A, 10),
            monitor_target(ENDPOINT_A, 9001),
            monitor_target(ENDPOINT_A, 20),
        ],
    );
    let result = manager.invoke_request(request, &Mask::all_set(3)).await.unwrap();

    assert!(result.overall.is_bad());
    assert!(result.targets[0].status.is_good());
    assert!(result.targets[1].status.is_bad());
    assert!(result.targets[2].status.is_good());

    // The persisted entry tracks exactly the failed rank.
    let mask = manager.bad_target_mask(77).unwrap();
    assert!(!mask.is_set(0));
    assert!(mask.is_set(1));
    assert!(!mask.is_set(2));
    assert_eq!(mask.set_count(), 1);

    // Only successful targets became items.
    let connection_id = manager.session_information()[0].connection_id;
    let subscriptions = manager.subscription_information(connection_id).unwrap();
    assert_eq!(subscriptions.len(), 1);
    let items = manager
        .monitored_item_information(connection_id, subscriptions[0].handle)
        .unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item.request_handle == 77));
}

#[tokio::test]
async fn masked_retry_leaves_established_items_alone() {
    let (manager, _) = make_manager();

    // Node 9001 is scripted to fail item creation.
    let targets = vec![
        monitor_target(ENDPOINT_A, 10),
        monitor_target(ENDPOINT_A, 9001),
        monitor_target(ENDPOINT_A, 20),
    ];
    let request = Request::<CreateMonitoredItems>::new(66, targets.clone());
    let result = manager
        .invoke_request(request, &Mask::all_set(3))
        .await
        .unwrap();
    assert!(result.overall.is_bad());

    let connection_id = manager.session_information()[0].connection_id;
    let subscription_handle = manager.subscription_information(connection_id).unwrap()[0].handle;
    assert_eq!(
        manager
            .monitored_item_information(connection_id, subscription_handle)
            .unwrap()
            .len(),
        2
    );

    // Retry only the failed rank; the established items must not be
    // duplicated by re-invoking the good targets.
    let mask = manager.bad_target_mask(66).unwrap();
    assert_eq!(mask.set_count(), 1);
    let retry = Request::<CreateMonitoredItems>::new(66, targets);
    let retried = manager.invoke_request(retry, &mask).await.unwrap();
    assert!(retried.targets[1].status.is_bad());

    // The unselected ranks keep their stored good outcomes.
    let stored = manager.database().monitored_items().get(66).unwrap();
    assert!(stored.result.targets[0].status.is_good());
    assert!(stored.result.targets[2].status.is_good());
    assert_eq!(manager.bad_target_mask(66).unwrap().set_count(), 1);

    // Still one channel, still two items.
    assert_eq!(manager.subscription_information(connection_id).unwrap().len(), 1);
    assert_eq!(
        manager
            .monitored_item_information(connection_id, subscription_handle)
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn release_keeps_live_channels_until_deleted() {
    let (manager, _) = make_manager();
    let connection_id = manager
        .manually_connect(&EndpointId::from(ENDPOINT_A), ConnectionSettings::default())
        .await
        .unwrap();
    let handle = manager
        .manually_subscribe(connection_id, &SubscriptionSettings::default(), false)
        .await
        .unwrap();

    // Dropping the only hold with GC allowed must not tear down a channel
    // that is still Created; its items may outlive the hold.
    let session = manager.sessions().get(connection_id).unwrap();
    session.subscriptions().release(handle, true).await.unwrap();

    let info = manager.subscription_information(connection_id).unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].state, SubscriptionState::Created);
    assert_eq!(info[0].activity_count, 0);

    // Deletion is the state driver; a deleted channel nobody holds is
    // collected immediately.
    session.subscriptions().delete(handle).await.unwrap();
    assert!(manager
        .subscription_information(connection_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unsubscribe_marks_persisted_targets_bad() {
    let (manager, _) = make_manager();
    let connection_id = manager
        .manually_connect(&EndpointId::from(ENDPOINT_A), ConnectionSettings::default())
        .await
        .unwrap();
    let subscription_handle = manager
        .manually_subscribe(connection_id, &SubscriptionSettings::default(), false)
        .await
        .unwrap();

    let request = Request::<CreateMonitoredItems>::new(
        88,
        vec![
            monitor_target(ENDPOINT_A, 1),
            monitor_target(ENDPOINT_A, 2),
        ],
    );
    let result = manager.invoke_request(request, &Mask::all_set(2)).await.unwrap();
    assert!(result.overall.is_good());
    assert!(!manager.bad_target_mask(88).unwrap().any_set());

    manager
        .manually_unsubscribe(connection_id, subscription_handle)
        .await
        .unwrap();

    // Every target that lived on the deleted channel is bad again, with the
    // dedicated status, ready for selective retry.
    let mask = manager.bad_target_mask(88).unwrap();
    assert_eq!(mask.set_count(), 2);

    let stored = manager.database().monitored_items().get(88).unwrap();
    for outcome in &stored.result.targets {
        assert_eq!(outcome.status.code, StatusCode::BAD_NO_SUBSCRIPTION);
    }

    assert!(manager
        .subscription_information(connection_id)
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn data_changes_reach_subscribers_with_fresh_handles() {
    let (manager, transports) = make_manager();

    let request = Request::<CreateMonitoredItems>::new(
        99,
        vec![monitor_target(ENDPOINT_A, 5)],
    );
    let result = manager.invoke_request(request, &Mask::all_set(1)).await.unwrap();
    assert!(result.overall.is_good());
    let item_handle = result.targets[0].client_handle;

    let connection_id = manager.session_information()[0].connection_id;
    let subscriptions = manager.subscription_information(connection_id).unwrap();
    let session = manager.sessions().get(connection_id).unwrap();
    let subscription = session
        .subscriptions()
        .get(subscriptions[0].handle)
        .unwrap();

    let mut notifications = subscription.notifications();
    transports.transport(connection_id).fire_data_change(
        subscription.handle(),
        DataChange {
            item_handle,
            value: Some(Value::Double(21.5)),
            status: Status::good(),
            source_timestamp: None,
        },
    );
    // A change for an item the subscription does not know is dropped.
    transports.transport(connection_id).fire_data_change(
        subscription.handle(),
        DataChange {
            item_handle: 0xdead,
            value: None,
            status: Status::good(),
            source_timestamp: None,
        },
    );

    let notification = notifications.recv().await.unwrap();
    match notification {
        Notification::DataChange {
            notification_handle,
            change,
        } => {
            assert!(notification_handle > 0);
            assert_eq!(change.item_handle, item_handle);
            assert_eq!(change.value, Some(Value::Double(21.5)));
        }
        other => panic!("unexpected notification: {other:?}"),
    }
    assert!(notifications.try_recv().is_err());
}

// =============================================================================
// Manual lifecycle
// =============================================================================

#[tokio::test]
async fn manual_connect_disconnect_round_trip() {
    let (manager, _) = make_manager();
    let endpoint = EndpointId::from(ENDPOINT_A);

    let connection_id = manager
        .manually_connect(&endpoint, ConnectionSettings::default())
        .await
        .unwrap();

    let info = manager.session_information();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].state, SessionState::Connected);
    assert_eq!(info[0].activity_count, 1);

    manager.manually_disconnect(connection_id).await.unwrap();
    assert!(manager.session_information().is_empty());

    let err = manager.manually_disconnect(connection_id).await.unwrap_err();
    assert!(matches!(err, PoolError::UnknownResource { .. }));
}

#[derive(Default)]
struct NullEvents;

impl TransportEvents for NullEvents {
    fn connection_status_changed(&self, _connection_id: u32, _state: SessionState) {}
    fn service_completed(&self, _transaction_id: u64, _overall: Status, _statuses: Vec<Status>) {}
    fn subscription_status_changed(&self, _subscription_handle: u32, _status: Status) {}
    fn data_change(&self, _subscription_handle: u32, _change: DataChange) {}
    fn new_events(&self, _subscription_handle: u32, _event: ItemEvent) {}
}

#[tokio::test]
async fn mock_transport_sanity() {
    // Guards the scripted collaborator itself so pooling tests fail for
    // pooling reasons.
    let transport = MockTransport::new(1, Arc::new(Script::default()));
    assert!(transport.read(&[], &CallOptions::default()).await.is_err());

    transport
        .connect(
            &EndpointDescription {
                endpoint_url: ENDPOINT_A.into(),
                security_mode: Default::default(),
                security_policy: Default::default(),
                server_certificate: None,
            },
            &ConnectionSettings::default(),
            &SecurityConfig::none(),
            Arc::new(NullEvents),
        )
        .await
        .unwrap();
    assert!(transport.read(&[], &CallOptions::default()).await.is_ok());
}
