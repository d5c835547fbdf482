// SPDX-License-Identifier: Apache-2.0

//! Reconfiguration (spec.md §4.2.3): replacing a persisted device's schema
//! in place — new `icDevice` built through the same driver callbacks pairing
//! uses, old device's `dateAdded` resource and metadata yoinked onto it —
//! plus the refcounted wait/signal contexts sleepy-device drivers block on.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::error::LifecycleError;
use crate::events::{EventSink, GatewayEvent};
use crate::lifecycle::pair;
use crate::model::system_property::metadata_key;
use crate::model::{common_resource, Device, Endpoint};
use crate::registry::driver::{Driver, DriverRegistry};
use crate::store::ObjectStore;
use crate::watchdog::Watchdog;

const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30 * 60;
const SHUTDOWN_DRAIN_CYCLES: u32 = 2;
const SHUTDOWN_CYCLE: Duration = Duration::from_secs(60);
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Outcome of `waitForReconfigure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No context is pending for this UUID — the driver isn't blocked.
    NotPending,
    /// Signaled by `sendReconfigurationSignal` before the timeout elapsed.
    Signaled { should_terminate: bool },
    TimedOut,
}

struct ReconfigureContext {
    notify: Notify,
    should_terminate: AtomicBool,
    is_allowed_asap: AtomicBool,
    timeout_secs: AtomicU64,
}

impl ReconfigureContext {
    fn new(allow_asap: bool) -> Self {
        Self {
            notify: Notify::new(),
            should_terminate: AtomicBool::new(false),
            is_allowed_asap: AtomicBool::new(allow_asap),
            timeout_secs: AtomicU64::new(DEFAULT_WAIT_TIMEOUT_SECS),
        }
    }
}

type CompletionFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once a reconfiguration task finishes. `result` is `false` on any
/// step failure; the default completion (when `None` is passed) falls back
/// to `driver.synchronizeDevice`.
pub type OnComplete = Arc<dyn Fn(bool) -> CompletionFuture + Send + Sync>;

/// A device needs reconfiguring iff its class version, any endpoint's
/// profile version, or the `reconfigurationRequired` metadata flag says so
/// (spec.md §4.2.3).
pub fn needs_reconfiguring(device: &Device, driver: &dyn Driver, drivers: &DriverRegistry) -> bool {
    if driver.get_device_class_version(&device.device_class) != device.device_class_version {
        return true;
    }
    for endpoint in &device.endpoints {
        if let Some(expected) =
            drivers.expected_profile_version(&device.managing_device_driver, &endpoint.profile)
        {
            if expected != endpoint.profile_version {
                return true;
            }
        }
    }
    device
        .metadatas
        .iter()
        .any(|m| m.id == metadata_key::RECONFIGURATION_REQUIRED && m.value == "true")
}

fn resource_value(device: &Device, id: &str) -> String {
    device.resources.iter().find(|r| r.id == id).and_then(|r| r.value.clone()).unwrap_or_default()
}

/// One context per UUID at a time (spec.md §4.2.3); held behind lock #1 in
/// the acquisition order (spec.md §5).
pub struct ReconfigureCoordinator {
    store: Arc<ObjectStore>,
    drivers: Arc<DriverRegistry>,
    watchdog: Arc<Watchdog>,
    events: Arc<dyn EventSink>,
    contexts: Mutex<HashMap<String, Arc<ReconfigureContext>>>,
}

impl ReconfigureCoordinator {
    pub fn new(
        store: Arc<ObjectStore>,
        drivers: Arc<DriverRegistry>,
        watchdog: Arc<Watchdog>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { store, drivers, watchdog, events, contexts: Mutex::new(HashMap::new()) }
    }

    pub async fn is_active(&self, uuid: &str) -> bool {
        self.contexts.lock().await.contains_key(uuid)
    }

    /// `reconfigureDevice(uuid, delaySeconds, onComplete, allowAsap)`.
    /// Rejects a second concurrent context for the same UUID.
    pub async fn reconfigure_device(
        self: &Arc<Self>,
        uuid: String,
        delay_secs: u64,
        allow_asap: bool,
        on_complete: Option<OnComplete>,
    ) -> Result<(), LifecycleError> {
        let ctx = Arc::new(ReconfigureContext::new(allow_asap));
        {
            let mut contexts = self.contexts.lock().await;
            if contexts.contains_key(&uuid) {
                return Err(LifecycleError::ReconfigurationInProgress);
            }
            contexts.insert(uuid.clone(), ctx.clone());
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            if delay_secs > 0 && !ctx.is_allowed_asap.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            }
            let result = coordinator.run_reconfigure_task(&uuid).await;
            coordinator.contexts.lock().await.remove(&uuid);

            match on_complete {
                Some(cb) => cb(result.is_ok()).await,
                None => {
                    if result.is_err() {
                        if let Ok(device) = coordinator.store.get_device_by_uri(&format!("/{uuid}")).await {
                            if let Some(driver) = coordinator.drivers.get(&device.managing_device_driver) {
                                driver.synchronize_device(&uuid).await;
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    /// `waitForReconfigure(uuid)`: blocks until `sendReconfigurationSignal`
    /// wakes it or the context's timeout (default 30 min) elapses.
    pub async fn wait_for_reconfigure(&self, uuid: &str) -> WaitOutcome {
        let Some(ctx) = self.contexts.lock().await.get(uuid).cloned() else {
            return WaitOutcome::NotPending;
        };
        let timeout = Duration::from_secs(ctx.timeout_secs.load(Ordering::Acquire));
        match tokio::time::timeout(timeout, ctx.notify.notified()).await {
            Ok(()) => WaitOutcome::Signaled { should_terminate: ctx.should_terminate.load(Ordering::Acquire) },
            Err(_) => WaitOutcome::TimedOut,
        }
    }

    /// `sendReconfigurationSignal(uuid, shouldTerminate)`. Returns whether a
    /// context was actually waiting.
    pub async fn send_reconfiguration_signal(&self, uuid: &str, should_terminate: bool) -> bool {
        let Some(ctx) = self.contexts.lock().await.get(uuid).cloned() else { return false };
        ctx.should_terminate.store(should_terminate, Ordering::Release);
        ctx.notify.notify_waiters();
        true
    }

    /// Cancels every still-waiting task and terminates running ones with
    /// `shouldTerminate=true`, then waits up to two one-minute cycles for
    /// them to drain (spec.md §4.2.3).
    pub async fn shutdown(&self) {
        for ctx in self.contexts.lock().await.values() {
            ctx.should_terminate.store(true, Ordering::Release);
            ctx.notify.notify_waiters();
        }
        let deadline = SHUTDOWN_CYCLE * SHUTDOWN_DRAIN_CYCLES;
        let mut waited = Duration::ZERO;
        while waited < deadline {
            if self.contexts.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
            waited += SHUTDOWN_POLL;
        }
    }

    async fn run_reconfigure_task(&self, uuid: &str) -> Result<(), LifecycleError> {
        let old_device =
            self.store.get_device_by_uri(&format!("/{uuid}")).await.map_err(|_| LifecycleError::Internal)?;

        let reconfig_uri = format!("/{uuid}/m/{}", metadata_key::RECONFIGURATION_REQUIRED);
        self.store
            .save_metadata(&reconfig_uri, "true".to_owned())
            .await
            .map_err(|_| LifecycleError::Internal)?;

        let result = self.build_and_swap(uuid, &old_device).await;
        if result.is_ok() {
            let _ = self.store.save_metadata(&reconfig_uri, "false".to_owned()).await;
        }
        result
    }

    async fn build_and_swap(&self, uuid: &str, old_device: &Device) -> Result<(), LifecycleError> {
        let Some(driver) = self.drivers.get(&old_device.managing_device_driver) else {
            return Err(LifecycleError::NoEligibleDriver);
        };

        let class_version = driver.get_device_class_version(&old_device.device_class);
        let mut new_device =
            Device::new(uuid, &old_device.device_class, class_version, &old_device.managing_device_driver)
                .map_err(|_| LifecycleError::Internal)?;

        if !driver.configure_device(uuid).await {
            return Err(LifecycleError::DriverRejected);
        }

        let now = pair::now_millis();
        for (id, value) in [
            (common_resource::MANUFACTURER, resource_value(old_device, common_resource::MANUFACTURER)),
            (common_resource::MODEL, resource_value(old_device, common_resource::MODEL)),
            (common_resource::HARDWARE_VERSION, resource_value(old_device, common_resource::HARDWARE_VERSION)),
            (common_resource::FIRMWARE_VERSION, resource_value(old_device, common_resource::FIRMWARE_VERSION)),
            (common_resource::FIRMWARE_UPDATE_STATUS, "upToDate".to_owned()),
            (common_resource::DATE_LAST_CONTACTED, now.to_string()),
            (common_resource::COMM_FAIL, "false".to_owned()),
        ] {
            pair::push_string_resource(&mut new_device, uuid, id, value, now);
        }

        // Yoink dateAdded from the old device rather than stamping a fresh one.
        let date_added = old_device
            .resources
            .iter()
            .find(|r| r.id == common_resource::DATE_ADDED)
            .and_then(|r| r.value.clone())
            .unwrap_or_else(|| now.to_string());
        pair::push_string_resource(&mut new_device, uuid, common_resource::DATE_ADDED, date_added, now);

        for (id, value) in driver.fetch_initial_resource_values(uuid).await {
            pair::push_string_resource(&mut new_device, uuid, &id, value, now);
        }

        for old_ep in &old_device.endpoints {
            let expected_version = self
                .drivers
                .expected_profile_version(&old_device.managing_device_driver, &old_ep.profile)
                .unwrap_or(old_ep.profile_version);
            if let Ok(mut endpoint) =
                Endpoint::new(&new_device.uri, uuid, &old_ep.id, &old_ep.profile, expected_version)
            {
                endpoint.metadatas = old_ep.metadatas.clone();
                new_device.endpoints.push(endpoint);
            }
        }

        new_device.metadatas = old_device
            .metadatas
            .iter()
            .filter(|m| m.id != metadata_key::RECONFIGURATION_REQUIRED)
            .cloned()
            .collect();

        if !driver.register_resources(uuid).await {
            return Err(LifecycleError::DriverRejected);
        }

        self.store.remove_device_by_id(uuid).await.map_err(|_| LifecycleError::Internal)?;
        self.events.emit(GatewayEvent::DeviceRemoved { uuid: uuid.to_owned() });

        self.store.add_device(new_device.clone()).await.map_err(|_| LifecycleError::Internal)?;
        self.events.emit(GatewayEvent::DeviceAdded { uuid: uuid.to_owned() });
        for endpoint in &new_device.endpoints {
            self.events
                .emit(GatewayEvent::EndpointAdded { uuid: uuid.to_owned(), endpoint_id: endpoint.id.clone() });
        }

        driver.device_persisted(uuid).await;
        let override_metadata = new_device
            .metadatas
            .iter()
            .find(|m| m.id == metadata_key::COMM_FAIL_OVERRIDE_SECONDS)
            .map(|m| m.value.clone());
        self.watchdog
            .set_timeout(uuid, override_metadata.as_deref(), driver.as_ref(), driver.custom_comm_fail())
            .await;

        Ok(())
    }
}

#[cfg(test)]
#[path = "reconfigure_tests.rs"]
mod tests;
