// SPDX-License-Identifier: Apache-2.0

//! Black-box tests for the six concrete end-to-end scenarios a correct
//! implementation of this core must get right, each driven entirely through
//! `LifecycleCoordinator`/`GatewayCore`'s public surface.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use gatewayd_core::descriptor::catalog::{DescriptorCatalog, DescriptorEntry, DeviceIdentity};
use gatewayd_core::error::LifecycleError;
use gatewayd_core::events::{ChannelEventSink, EventSink, GatewayEvent};
use gatewayd_core::lifecycle::discovery::DiscoveryCoordinator;
use gatewayd_core::lifecycle::pair::DeviceFoundDetails;
use gatewayd_core::lifecycle::LifecycleCoordinator;
use gatewayd_core::model::common_resource;
use gatewayd_core::model::system_property;
use gatewayd_core::registry::driver::{DriverRegistration, DriverRegistry};
use gatewayd_core::registry::subsystem::SubsystemRegistry;
use gatewayd_core::store::protect::ReversibleProtector;
use gatewayd_core::store::ObjectStore;
use gatewayd_core::watchdog::Watchdog;

use gatewayd_specs::{identity, wait_until, MockDriver};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct EmptyCatalog;
impl DescriptorCatalog for EmptyCatalog {
    fn lookup(&self, _identity: &DeviceIdentity) -> Option<DescriptorEntry> {
        None
    }
}

#[tokio::test]
async fn single_driver_discovery_success() {
    let drivers = Arc::new(DriverRegistry::new());
    let driver = MockDriver::new("driverA", &["lock"]);
    drivers.register(DriverRegistration::new(driver.clone())).unwrap();

    let events = Arc::new(ChannelEventSink::new(16));
    let mut rx = events.subscribe();
    let coordinator = Arc::new(DiscoveryCoordinator::new(drivers, events));

    coordinator.clone().discover_start(&["lock".to_owned()], 0, false, true).await.unwrap();
    assert!(wait_until(WAIT, || driver.discover_calls.load(Ordering::SeqCst) == 1).await);

    coordinator.discover_stop(None).await;
    assert!(wait_until(WAIT, || driver.stop_calls.load(Ordering::SeqCst) == 1).await);

    let mut saw_stopped = false;
    while let Ok(event) = rx.try_recv() {
        if let GatewayEvent::DiscoveryStopped { device_class, all_started } = event.as_ref() {
            if device_class == "lock" {
                assert!(all_started, "the lone eligible driver succeeded, so the class fully started");
                saw_stopped = true;
            }
        }
    }
    assert!(saw_stopped);
}

#[tokio::test]
async fn partial_failure_stops_only_the_drivers_that_actually_started() {
    let drivers = Arc::new(DriverRegistry::new());
    let good_a = MockDriver::new("good-a", &["sensor"]);
    let good_b = MockDriver::new("good-b", &["sensor"]);
    let bad = MockDriver::new("bad", &["sensor"]).failing_discovery();
    for d in [&good_a, &good_b, &bad] {
        drivers.register(DriverRegistration::new(d.clone())).unwrap();
    }

    let events = Arc::new(ChannelEventSink::new(16));
    let mut rx = events.subscribe();
    let coordinator = Arc::new(DiscoveryCoordinator::new(drivers, events));

    coordinator.clone().discover_start(&["sensor".to_owned()], 0, false, true).await.unwrap();
    assert!(
        wait_until(WAIT, || {
            good_a.discover_calls.load(Ordering::SeqCst) == 1
                && good_b.discover_calls.load(Ordering::SeqCst) == 1
                && bad.discover_calls.load(Ordering::SeqCst) == 1
        })
        .await
    );

    coordinator.discover_stop(None).await;
    assert!(
        wait_until(WAIT, || {
            good_a.stop_calls.load(Ordering::SeqCst) == 1 && good_b.stop_calls.load(Ordering::SeqCst) == 1
        })
        .await
    );
    // The driver whose discoverDevices returned false never "started", so
    // it must not see a matching stopDiscoveringDevices call.
    assert_eq!(bad.stop_calls.load(Ordering::SeqCst), 0);

    let mut stopped_count = 0;
    while let Ok(event) = rx.try_recv() {
        if let GatewayEvent::DiscoveryStopped { device_class, all_started } = event.as_ref() {
            if device_class == "sensor" {
                assert!(!all_started, "the failing driver must surface as returned value false");
                stopped_count += 1;
            }
        }
    }
    assert_eq!(stopped_count, 1, "one partial-failure class stop must still be a single event");
}

#[tokio::test]
async fn never_reject_driver_discovers_even_when_descriptors_are_not_ready() {
    let drivers = Arc::new(DriverRegistry::new());
    let eager = MockDriver::new("eager", &["lock"]).never_reject();
    let cautious = MockDriver::new("cautious", &["lock"]);
    drivers.register(DriverRegistration::new(eager.clone())).unwrap();
    drivers.register(DriverRegistration::new(cautious.clone())).unwrap();

    let events = Arc::new(ChannelEventSink::new(16));
    let coordinator = Arc::new(DiscoveryCoordinator::new(drivers, events));

    coordinator.clone().discover_start(&["lock".to_owned()], 0, false, false).await.unwrap();
    assert!(wait_until(WAIT, || eager.discover_calls.load(Ordering::SeqCst) == 1).await);

    // Give the (deliberately ineligible) cautious driver a fair chance to
    // have been called in error before asserting it wasn't.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cautious.discover_calls.load(Ordering::SeqCst), 0);

    coordinator.discover_stop(None).await;
    assert!(wait_until(WAIT, || eager.stop_calls.load(Ordering::SeqCst) == 1).await);
}

async fn harness() -> (tempfile::TempDir, LifecycleCoordinator, Arc<MockDriver>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(dir.path(), Arc::new(ReversibleProtector)));
    store.init().await.unwrap();
    let drivers = Arc::new(DriverRegistry::new());
    let driver = MockDriver::new("driverA", &["lock"]).never_reject();
    drivers.register(DriverRegistration::new(driver.clone())).unwrap();
    let subsystems = Arc::new(SubsystemRegistry::new());
    let watchdog = Arc::new(Watchdog::new());
    let events: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(32));
    let coordinator = LifecycleCoordinator::new(store, drivers, subsystems, watchdog, events);
    (dir, coordinator, driver)
}

#[tokio::test]
async fn reconfiguration_round_trip_preserves_date_added() {
    let (_dir, coordinator, _driver) = harness().await;

    let details = DeviceFoundDetails {
        uuid: "dev1".into(),
        device_class: "lock".into(),
        driver_name: "driverA".into(),
        identity: identity("acme"),
        endpoints: Vec::new(),
    };
    coordinator.device_found(details, true, None, false, false, false).await.unwrap();

    let original = coordinator.store.get_device_by_uri("/dev1").await.unwrap();
    let original_date_added = original
        .resources
        .iter()
        .find(|r| r.id == common_resource::DATE_ADDED)
        .and_then(|r| r.value.clone())
        .unwrap();

    coordinator.reconfigure.clone().reconfigure_device("dev1".into(), 0, true, None).await.unwrap();

    let mut reconfigured = false;
    for _ in 0..200 {
        if !coordinator.reconfigure.is_active("dev1").await {
            reconfigured = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(reconfigured, "reconfiguration did not complete in time");

    let new_device = coordinator.store.get_device_by_uri("/dev1").await.unwrap();
    let new_date_added = new_device
        .resources
        .iter()
        .find(|r| r.id == common_resource::DATE_ADDED)
        .and_then(|r| r.value.clone());
    assert_eq!(new_date_added.as_deref(), Some(original_date_added.as_str()));

    let reconfig_flag = new_device
        .metadatas
        .iter()
        .find(|m| m.id == gatewayd_core::model::system_property::metadata_key::RECONFIGURATION_REQUIRED)
        .map(|m| m.value.as_str());
    assert_eq!(reconfig_flag, Some("false"));
}

struct OverrideCatalog {
    tag: String,
}
impl DescriptorCatalog for OverrideCatalog {
    fn lookup(&self, identity: &DeviceIdentity) -> Option<DescriptorEntry> {
        if identity.manufacturer == format!("mfg-{}", self.tag) {
            Some(DescriptorEntry { comm_fail_override_seconds: Some(7), ..Default::default() })
        } else {
            None
        }
    }
}

#[tokio::test]
async fn comm_fail_override_wins_over_global_default_for_a_legacy_device() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ObjectStore::new(dir.path(), Arc::new(ReversibleProtector)));
    store.init().await.unwrap();

    let drivers = Arc::new(DriverRegistry::new());
    let driver = MockDriver::new("driverA", &["lock"]).never_reject();
    drivers.register(DriverRegistration::new(driver.clone())).unwrap();

    let subsystems = Arc::new(SubsystemRegistry::new());
    let watchdog = Arc::new(Watchdog::new());
    watchdog.set_global_default_secs(300);
    let events: Arc<dyn EventSink> = Arc::new(ChannelEventSink::new(32));
    let catalog = Arc::new(OverrideCatalog { tag: "legacy".to_owned() });

    let coordinator =
        LifecycleCoordinator::with_catalog(store, drivers, subsystems, watchdog.clone(), events, catalog);

    let details = DeviceFoundDetails {
        uuid: "dev1".into(),
        device_class: "lock".into(),
        driver_name: "driverA".into(),
        identity: identity("legacy"),
        endpoints: Vec::new(),
    };
    coordinator.device_found(details, false, None, false, false, false).await.unwrap();

    assert_eq!(driver.comm_fail_timeout_secs.load(Ordering::SeqCst), 7);
    assert!(watchdog.is_monitored("dev1"));
}

#[tokio::test]
async fn denylist_rejects_at_pair_time_and_removes_an_already_paired_device() {
    let (_dir, coordinator, driver) = harness().await;

    // Already-paired device, later denylisted via a property change.
    let details = DeviceFoundDetails {
        uuid: "dev1".into(),
        device_class: "lock".into(),
        driver_name: "driverA".into(),
        identity: identity("acme"),
        endpoints: Vec::new(),
    };
    coordinator.device_found(details, true, None, false, false, false).await.unwrap();
    assert!(coordinator.store.get_device_by_uri("/dev1").await.is_ok());

    coordinator
        .property_changed(system_property::DENYLISTED_DEVICE_UUIDS, Some(r#"["dev1"]"#))
        .await;

    assert_eq!(
        coordinator.store.get_device_by_uri("/dev1").await,
        Err(gatewayd_core::error::StoreError::NotFound)
    );
    assert_eq!(driver.removed_calls.load(Ordering::SeqCst), 1);

    // A brand-new device already on the denylist must be rejected outright.
    coordinator
        .store
        .set_system_property(system_property::DENYLISTED_DEVICE_UUIDS, r#"["dev2"]"#)
        .await
        .unwrap();

    let details = DeviceFoundDetails {
        uuid: "dev2".into(),
        device_class: "lock".into(),
        driver_name: "driverA".into(),
        identity: identity("acme"),
        endpoints: Vec::new(),
    };
    let result = coordinator.device_found(details, true, None, false, false, false).await;
    assert_eq!(result, Err(LifecycleError::Denylisted));
    assert!(coordinator.store.get_device_by_uri("/dev2").await.is_err());
}
