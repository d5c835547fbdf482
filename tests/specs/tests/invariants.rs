// SPDX-License-Identifier: Apache-2.0

//! Black-box tests for the nine cross-cutting invariants a correct
//! implementation of this core must hold, independent of any one scenario.

use std::sync::Arc;
use std::time::Duration;

use gatewayd_core::descriptor::catalog::DeviceIdentity;
use gatewayd_core::descriptor::{DescriptorEvents, DescriptorHandler, SslVerifyMode};
use gatewayd_core::error::{LifecycleError, StoreError};
use gatewayd_core::events::{ChannelEventSink, EventSink, GatewayEvent};
use gatewayd_core::lifecycle::pair::DeviceFoundDetails;
use gatewayd_core::lifecycle::reconfigure::ReconfigureCoordinator;
use gatewayd_core::lifecycle::LifecycleCoordinator;
use gatewayd_core::model::device::{CachingPolicy, Resource, ResourceMode};
use gatewayd_core::model::uri;
use gatewayd_core::registry::driver::{DriverRegistration, DriverRegistry};
use gatewayd_core::registry::subsystem::SubsystemRegistry;
use gatewayd_core::store::protect::ReversibleProtector;
use gatewayd_core::store::ObjectStore;
use gatewayd_core::watchdog::{effective_timeout_secs, Watchdog};

use gatewayd_specs::{identity, wait_until, MockDriver};

#[test]
fn uri_round_trip_across_all_four_shapes() {
    let device = uri::device_uri("dev1").unwrap();
    assert_eq!(uri::parse(&device).unwrap().uuid, "dev1");

    let endpoint = uri::endpoint_uri("dev1", "ep1").unwrap();
    let parsed = uri::parse(&endpoint).unwrap();
    assert_eq!(parsed.uuid, "dev1");
    assert_eq!(parsed.endpoint_id.as_deref(), Some("ep1"));

    let resource = uri::resource_uri(&device, "r1").unwrap();
    let parsed = uri::parse(&resource).unwrap();
    assert_eq!(parsed.leaf_id.as_deref(), Some("r1"));
    assert!(parsed.endpoint_id.is_none());

    let endpoint_resource = uri::resource_uri(&endpoint, "r2").unwrap();
    let parsed = uri::parse(&endpoint_resource).unwrap();
    assert_eq!(parsed.uuid, "dev1");
    assert_eq!(parsed.endpoint_id.as_deref(), Some("ep1"));
    assert_eq!(parsed.leaf_id.as_deref(), Some("r2"));

    let metadata = uri::metadata_uri(&device, "m1").unwrap();
    let parsed = uri::parse(&metadata).unwrap();
    assert_eq!(parsed.leaf_id.as_deref(), Some("m1"));
}

#[tokio::test]
async fn index_consistency_rejects_duplicate_uri_insertion() {
    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::new(dir.path(), Arc::new(ReversibleProtector));
    store.init().await.unwrap();

    let device = gatewayd_core::model::Device::new("dev1", "lock", 1, "driverA").unwrap();
    store.add_device(device.clone()).await.unwrap();

    // The same UUID again must fail without corrupting the existing entry.
    assert_eq!(store.add_device(device).await, Err(StoreError::AlreadyExists));
    assert!(store.get_device_by_uri("/dev1").await.is_ok());

    let endpoint =
        gatewayd_core::model::Endpoint::new("/dev1", "dev1", "ep1", "profileA", 1).unwrap();
    store.add_endpoint(endpoint.clone()).await.unwrap();
    assert_eq!(store.add_endpoint(endpoint).await, Err(StoreError::AlreadyExists));
}

#[tokio::test]
async fn atomic_subgraph_add_rolls_back_on_persistence_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = ObjectStore::new(dir.path(), Arc::new(ReversibleProtector));
    store.init().await.unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();

        let device = gatewayd_core::model::Device::new("dev1", "lock", 1, "driverA").unwrap();
        let result = store.add_device(device).await;

        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(result.is_err(), "persistence failure should surface as an error");
        assert_eq!(
            store.get_device_by_uri("/dev1").await,
            Err(StoreError::NotFound),
            "a device whose persistence failed must leave no trace in the in-memory graph or index"
        );

        // The namespace is writable again: the same UUID must now succeed,
        // proving the rollback didn't leave a stale index/map entry behind.
        let device = gatewayd_core::model::Device::new("dev1", "lock", 1, "driverA").unwrap();
        store.add_device(device).await.unwrap();
    }
}

#[test]
fn sensitive_bit_is_monotonic() {
    let mut resource = Resource::new(
        "/dev1",
        "dev1",
        None,
        "secretToken",
        "string",
        ResourceMode::READABLE | ResourceMode::SENSITIVE,
        CachingPolicy::Never,
    )
    .unwrap();
    assert!(resource.mode.contains(ResourceMode::SENSITIVE));

    // Requesting a mode without SENSITIVE must not clear it once set.
    resource.set_mode(ResourceMode::READABLE | ResourceMode::WRITABLE);
    assert!(resource.mode.contains(ResourceMode::SENSITIVE));
}

#[test]
fn dynamic_implies_dynamic_capable() {
    let resource = Resource::new(
        "/dev1",
        "dev1",
        None,
        "liveFeed",
        "string",
        ResourceMode::READABLE | ResourceMode::DYNAMIC,
        CachingPolicy::Never,
    )
    .unwrap();
    assert!(resource.mode.contains(ResourceMode::DYNAMIC_CAPABLE));
}

#[tokio::test]
async fn idempotent_reopen_yields_the_same_graph() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = ObjectStore::new(dir.path(), Arc::new(ReversibleProtector));
        store.init().await.unwrap();
        let device = gatewayd_core::model::Device::new("dev1", "lock", 1, "driverA").unwrap();
        store.add_device(device).await.unwrap();
    }

    // A fresh store over the same namespace, opened twice, must see the
    // same device both times.
    for _ in 0..2 {
        let store = ObjectStore::new(dir.path(), Arc::new(ReversibleProtector));
        store.init().await.unwrap();
        let device = store.get_device_by_uri("/dev1").await.unwrap();
        assert_eq!(device.uuid, "dev1");
    }
}

struct NoopDescriptorEvents;
impl DescriptorEvents for NoopDescriptorEvents {}

#[tokio::test]
async fn descriptor_readiness_is_monotonic_once_fired() {
    let store_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(store_dir.path(), Arc::new(ReversibleProtector)));
    store.init().await.unwrap();

    let list_dir = tempfile::tempdir().unwrap();
    let allow_src = list_dir.path().join("allow.json");
    let deny_src = list_dir.path().join("deny.json");
    tokio::fs::write(&allow_src, b"[]").await.unwrap();
    tokio::fs::write(&deny_src, b"[]").await.unwrap();

    let state_dir = list_dir.path().join("state");
    tokio::fs::create_dir_all(&state_dir).await.unwrap();

    let handler = DescriptorHandler::new(
        state_dir,
        store.clone(),
        Arc::new(NoopDescriptorEvents),
        Arc::new(|_bytes: &[u8]| true),
        SslVerifyMode::Both,
    );

    handler.clone().update_allowlist(Some(format!("file://{}", allow_src.display())), false).await;
    handler.clone().update_denylist(Some(format!("file://{}", deny_src.display()))).await;

    assert!(wait_until(Duration::from_secs(5), || handler.is_ready_for_pairing()).await);

    // Feeding a brand-new allow-list URL must not un-fire readiness.
    let allow_src2 = list_dir.path().join("allow2.json");
    tokio::fs::write(&allow_src2, b"[1]").await.unwrap();
    handler.clone().update_allowlist(Some(format!("file://{}", allow_src2.display())), true).await;
    assert!(wait_until(Duration::from_secs(5), || handler.is_allow_valid()).await);
    assert!(handler.is_ready_for_pairing());

    handler.shutdown();
}

struct RejectingCatalog;
impl gatewayd_core::descriptor::catalog::DescriptorCatalog for RejectingCatalog {
    fn lookup(&self, _identity: &DeviceIdentity) -> Option<gatewayd_core::descriptor::catalog::DescriptorEntry> {
        None
    }
}

#[tokio::test]
async fn lifecycle_ordering_emits_discovered_then_configure_then_added() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(dir.path(), Arc::new(ReversibleProtector)));
    store.init().await.unwrap();

    let drivers = Arc::new(DriverRegistry::new());
    let driver = MockDriver::new("driverA", &["lock"]).never_reject();
    drivers.register(DriverRegistration::new(driver.clone())).unwrap();

    let subsystems = Arc::new(SubsystemRegistry::new());
    let watchdog = Arc::new(Watchdog::new());
    let events = Arc::new(ChannelEventSink::new(32));
    let mut rx = events.subscribe();

    let coordinator =
        LifecycleCoordinator::with_catalog(store, drivers, subsystems, watchdog, events, Arc::new(RejectingCatalog));

    let details = DeviceFoundDetails {
        uuid: "dev1".into(),
        device_class: "lock".into(),
        driver_name: "driverA".into(),
        identity: identity("acme"),
        endpoints: Vec::new(),
    };
    coordinator.device_found(details, true, None, false, false, false).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind().to_owned());
    }

    let expected_order = [
        "deviceDiscovered",
        "deviceConfigureStarted",
        "deviceConfigureCompleted",
        "deviceAdded",
    ];
    let mut cursor = 0;
    for expected in expected_order {
        let found = kinds[cursor..].iter().position(|k| k == expected);
        assert!(found.is_some(), "expected {expected} somewhere after index {cursor} in {kinds:?}");
        cursor += found.unwrap();
    }
}

#[tokio::test]
async fn reconfiguration_excludes_a_second_concurrent_context() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(dir.path(), Arc::new(ReversibleProtector)));
    store.init().await.unwrap();
    let device = gatewayd_core::model::Device::new("dev1", "lock", 1, "driverA").unwrap();
    store.add_device(device).await.unwrap();

    let drivers = Arc::new(DriverRegistry::new());
    let driver = MockDriver::new("driverA", &["lock"]);
    drivers.register(DriverRegistration::new(driver)).unwrap();
    let watchdog = Arc::new(Watchdog::new());
    let events: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(32));

    let reconfigure = Arc::new(ReconfigureCoordinator::new(store, drivers, watchdog, events));

    // A real delay with `allow_asap=false` keeps the first context alive for
    // the whole test, so the second registration deterministically collides
    // with it instead of racing a near-instant completion.
    reconfigure.clone().reconfigure_device("dev1".into(), 1, false, None).await.unwrap();
    let second = reconfigure.clone().reconfigure_device("dev1".into(), 0, true, None).await;
    assert_eq!(second, Err(LifecycleError::ReconfigurationInProgress));

    reconfigure.shutdown().await;
}

#[test]
fn comm_fail_effective_timeout_prefers_a_valid_override() {
    assert_eq!(effective_timeout_secs(Some("45"), 120), 45);
    assert_eq!(effective_timeout_secs(Some("not-a-number"), 120), 120);
    assert_eq!(effective_timeout_secs(Some("-3"), 120), 120);
    assert_eq!(effective_timeout_secs(None, 120), 120);
}

#[tokio::test]
async fn comm_fail_effective_timeout_notifies_the_driver() {
    let watchdog = Watchdog::new();
    watchdog.set_global_default_secs(300);
    let driver = MockDriver::new("driverA", &["lock"]);

    let effective = watchdog.set_timeout("dev1", Some("10"), driver.as_ref(), false).await;
    assert_eq!(effective, 10);
    assert_eq!(driver.comm_fail_timeout_secs.load(std::sync::atomic::Ordering::SeqCst), 10);
    assert!(watchdog.is_monitored("dev1"));

    let effective = watchdog.set_timeout("dev2", None, driver.as_ref(), false).await;
    assert_eq!(effective, 300);
}
