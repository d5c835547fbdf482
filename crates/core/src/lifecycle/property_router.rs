// SPDX-License-Identifier: Apache-2.0

//! The property/event router (spec.md §4.6): one dispatch table for every
//! `propertyChanged(key, value)` call, deciding which system property keys
//! have gateway-side meaning versus which just get forwarded verbatim.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::descriptor::DescriptorHandler;
use crate::lifecycle::pair;
use crate::model::{common_resource, system_property, CachingPolicy, Resource, ResourceMode};
use crate::registry::driver::DriverRegistry;
use crate::registry::subsystem::SubsystemRegistry;
use crate::store::ObjectStore;
use crate::watchdog::Watchdog;

/// Implementation-chosen override key: when present, shadows
/// `currentDeviceDescriptorUrl`; clearing it restores the regular property
/// (spec.md §4.6's "allow-list URL or its override").
pub const ALLOWLIST_URL_OVERRIDE: &str = "currentDeviceDescriptorUrlOverride";

/// Resolves the effective allow-list URL: the override when set, otherwise
/// the regular property.
pub async fn effective_allowlist_url(store: &ObjectStore) -> Option<String> {
    if let Some(url) = store.get_system_property(ALLOWLIST_URL_OVERRIDE).await {
        if !url.is_empty() {
            return Some(url);
        }
    }
    store.get_system_property(system_property::CURRENT_DEVICE_DESCRIPTOR_URL).await
}

/// Dispatches one property change across the object store's system
/// properties, the descriptor handler, the watchdog, and every registered
/// driver/subsystem (spec.md §4.6).
pub struct PropertyRouter {
    store: Arc<ObjectStore>,
    drivers: Arc<DriverRegistry>,
    subsystems: Arc<SubsystemRegistry>,
    watchdog: Arc<Watchdog>,
    descriptor: Option<Arc<DescriptorHandler>>,
}

impl PropertyRouter {
    /// `descriptor` is `None` for deployments that haven't wired a real
    /// allow/deny-list fetch loop yet — the allow/deny-list and
    /// firmware-base-url keys are then no-ops, but every other key (time
    /// zone, denylisted UUIDs, comm-fail delay, fast-commfail, and the
    /// unconditional driver forward) still dispatches normally.
    pub fn new(
        store: Arc<ObjectStore>,
        drivers: Arc<DriverRegistry>,
        subsystems: Arc<SubsystemRegistry>,
        watchdog: Arc<Watchdog>,
        descriptor: Option<Arc<DescriptorHandler>>,
    ) -> Self {
        Self { store, drivers, subsystems, watchdog, descriptor }
    }

    /// `propertyChanged(key, value)`. `value: None` models deletion.
    pub async fn property_changed(&self, key: &str, value: Option<&str>) {
        if let Some((subsystem_name, rest)) = key.split_once('.') {
            if let Some(subsystem) = self.subsystems.get(subsystem_name) {
                subsystem.property_changed(rest, value.unwrap_or_default()).await;
                return;
            }
        }

        match key {
            system_property::CURRENT_DEVICE_DESCRIPTOR_URL | ALLOWLIST_URL_OVERRIDE => {
                if let Some(descriptor) = &self.descriptor {
                    let url = effective_allowlist_url(&self.store).await;
                    let activated = descriptor.is_ready_for_pairing();
                    descriptor.clone().update_allowlist(url, activated).await;
                }
            }
            system_property::CURRENT_DENYLIST_URL => {
                if let Some(descriptor) = &self.descriptor {
                    descriptor.clone().update_denylist(value.map(str::to_owned)).await;
                }
            }
            system_property::TIME_ZONE => {
                if let Some(tz) = value {
                    self.apply_time_zone(tz).await;
                }
            }
            system_property::FIRMWARE_BASE_URL => {
                self.trigger_reprocess();
            }
            system_property::DENYLISTED_DEVICE_UUIDS => {
                let raw = value.unwrap_or("[]");
                self.remove_denylisted(raw).await;
            }
            system_property::COMM_FAIL_TROUBLE_DELAY_MINUTES => {
                let minutes: u64 = value.and_then(|v| v.parse().ok()).unwrap_or(0);
                self.apply_comm_fail_delay(minutes * 60).await;
            }
            system_property::FAST_COMMFAIL => {
                let enabled = value.map(|v| v == "true").unwrap_or(false);
                self.watchdog.set_fast_commfail(enabled);
            }
            _ => {}
        }

        // Unconditional forward: every driver sees every property change,
        // regardless of whether this router also gave it gateway-side
        // meaning above.
        for name in self.drivers.names() {
            if let Some(driver) = self.drivers.get(&name) {
                driver.property_changed(key, value.unwrap_or_default()).await;
            }
        }
    }

    /// Re-stamps every device's existing `timeZone` resource; a device with
    /// no such resource yet is left alone rather than retroactively given
    /// one.
    async fn apply_time_zone(&self, tz: &str) {
        let now = pair::now_millis();
        for device in self.store.all_devices().await {
            let Ok(mut resource) = Resource::new(
                &device.uri,
                &device.uuid,
                None,
                common_resource::TIME_ZONE,
                "string",
                ResourceMode::READABLE,
                CachingPolicy::Always,
            ) else {
                continue;
            };
            resource.set_value(Some(tz.to_owned()), now);
            let _ = self.store.save_resource(resource, now).await;
        }
    }

    async fn remove_denylisted(&self, raw: &str) {
        for uuid in pair::parse_uuid_array(raw) {
            let Ok(device) = self.store.get_device_by_uri(&format!("/{uuid}")).await else { continue };
            if let Some(driver) = self.drivers.get(&device.managing_device_driver) {
                driver.device_removed(&uuid).await;
            }
            let _ = self.store.remove_device_by_id(&uuid).await;
        }
    }

    async fn apply_comm_fail_delay(&self, delay_secs: u64) {
        self.watchdog.set_global_default_secs(delay_secs);
        for device in self.store.all_devices().await {
            let Some(driver) = self.drivers.get(&device.managing_device_driver) else { continue };
            let override_metadata = device
                .metadatas
                .iter()
                .find(|m| m.id == system_property::metadata_key::COMM_FAIL_OVERRIDE_SECONDS)
                .map(|m| m.value.clone());
            self.watchdog
                .set_timeout(&device.uuid, override_metadata.as_deref(), driver.as_ref(), driver.custom_comm_fail())
                .await;
        }
    }

    fn trigger_reprocess(&self) {
        let Some(descriptor) = self.descriptor.clone() else { return };
        let store = self.store.clone();
        let drivers = self.drivers.clone();
        let on_fire: Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync> =
            Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
                let store = store.clone();
                let drivers = drivers.clone();
                Box::pin(async move {
                    for device in store.all_devices().await {
                        if let Some(driver) = drivers.get(&device.managing_device_driver) {
                            driver.process_device_descriptor(&device.uuid).await;
                        }
                    }
                })
            });
        descriptor.trigger_reprocess(on_fire);
    }
}

#[cfg(test)]
#[path = "property_router_tests.rs"]
mod tests;
