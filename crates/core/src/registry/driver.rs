// SPDX-License-Identifier: Apache-2.0

//! Driver registration (spec.md §4.3): a name-keyed, insertion-ordered
//! table of the callback set a concrete radio/IP stack must implement.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::model::Resource;

/// Everything a driver must answer about devices it manages. Every method
/// has a default no-op/false/None body: a driver implements only the
/// subset it needs, mirroring spec.md §4.3's "any callback may be null
/// unless marked required."
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn supported_device_classes(&self) -> &[String];

    /// Drivers that never reject a discovered device even without a
    /// matching descriptor (spec.md §4.2.1 step 2).
    fn never_reject(&self) -> bool {
        false
    }

    /// Drivers that own their own comm-fail monitoring instead of relying
    /// on the watchdog (spec.md §4.4).
    fn custom_comm_fail(&self) -> bool {
        false
    }

    /// Whether `recover_devices` is a real implementation rather than the
    /// trait default. Discovery in "recover" mode (spec.md §4.2.2) only
    /// considers drivers that answer true here — Rust has no runtime way
    /// to ask "did this driver override the default method", so the
    /// eligibility flag is explicit.
    fn supports_recovery(&self) -> bool {
        false
    }

    async fn startup(&self) {}
    async fn shutdown(&self) {}

    async fn discover_devices(&self, _device_class: &str) -> bool {
        false
    }
    async fn recover_devices(&self, _device_class: &str) -> bool {
        false
    }
    async fn stop_discovering_devices(&self, _device_class: &str) {}

    /// Required to pair a device at all (spec.md §4.2.1 step 5).
    async fn configure_device(&self, _uuid: &str) -> bool {
        false
    }
    async fn fetch_initial_resource_values(&self, _uuid: &str) -> HashMap<String, String> {
        HashMap::new()
    }
    /// Required: creates the driver-specific resources (spec.md §4.2.1
    /// step 8).
    async fn register_resources(&self, _uuid: &str) -> bool {
        false
    }
    async fn device_persisted(&self, _uuid: &str) {}

    async fn read_resource(&self, _resource: &Resource) -> Option<String> {
        None
    }
    async fn write_resource(&self, _resource: &Resource, _value: &str) -> bool {
        false
    }
    async fn execute_resource(&self, _resource: &Resource, _arg: Option<&str>) -> bool {
        false
    }

    async fn process_device_descriptor(&self, _uuid: &str) {}
    async fn synchronize_device(&self, _uuid: &str) {}
    async fn device_removed(&self, _uuid: &str) {}
    async fn endpoint_disabled(&self, _uuid: &str, _endpoint_id: &str) {}

    async fn communication_failed(&self, _uuid: &str) {}
    async fn communication_restored(&self, _uuid: &str) {}
    async fn comm_fail_timeout_secs_changed(&self, _uuid: &str, _secs: u64) {}

    async fn system_power_event(&self, _powering_down: bool) {}
    async fn property_changed(&self, _key: &str, _value: &str) {}
    async fn subsystem_initialized(&self, _subsystem: &str) {}
    async fn service_status_changed(&self, _available: bool) {}
    fn get_device_class_version(&self, _device_class: &str) -> u8 {
        0
    }

    async fn restore_config(&self, _staging_dir: &std::path::Path) -> bool {
        true
    }
    async fn pre_restore_config(&self) {}
    async fn post_restore_config(&self) {}
    async fn fetch_runtime_stats(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Everything the registry knows about a registered driver beyond the
/// trait object itself.
pub struct DriverRegistration {
    pub name: String,
    pub subsystem: Option<String>,
    pub driver: std::sync::Arc<dyn Driver>,
    /// `profile -> expected profileVersion`, used by the reconfiguration
    /// check (spec.md §4.2.3).
    pub endpoint_profile_versions: HashMap<String, u8>,
}

impl DriverRegistration {
    pub fn new(driver: std::sync::Arc<dyn Driver>) -> Self {
        let name = driver.name().to_owned();
        Self { name, subsystem: None, driver, endpoint_profile_versions: HashMap::new() }
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    /// Resolves the `DRIVER_REGISTER_PROFILE_VERSION` open question
    /// (spec.md §9): a builder method scoped to `self`, never a
    /// free-floating macro symbol.
    pub fn with_endpoint_profile_version(mut self, profile: impl Into<String>, version: u8) -> Self {
        self.endpoint_profile_versions.insert(profile.into(), version);
        self
    }

    pub fn expected_profile_version(&self, profile: &str) -> Option<u8> {
        self.endpoint_profile_versions.get(profile).copied()
    }
}

/// One-shot-per-process, name-keyed driver table plus an insertion-ordered
/// index (spec.md §4.3: "registration is one-shot per process"; teardown
/// happens only on process exit, never mid-operation).
#[derive(Default)]
pub struct DriverRegistry {
    by_name: RwLock<IndexMap<String, DriverRegistration>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { by_name: RwLock::new(IndexMap::new()) }
    }

    pub fn register(&self, registration: DriverRegistration) -> Result<(), RegistryError> {
        if registration.name.is_empty() {
            return Err(RegistryError::NullName);
        }
        let mut guard = self.by_name.write();
        if guard.contains_key(&registration.name) {
            return Err(RegistryError::DuplicateName);
        }
        tracing::info!(driver = %registration.name, "driver registered");
        guard.insert(registration.name.clone(), registration);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Driver>> {
        self.by_name.read().get(name).map(|r| r.driver.clone())
    }

    pub fn expected_profile_version(&self, driver_name: &str, profile: &str) -> Option<u8> {
        self.by_name.read().get(driver_name).and_then(|r| r.expected_profile_version(profile))
    }

    /// Drivers eligible for a device class. In "recover" mode only drivers
    /// implementing `recoverDevices` (i.e. answering `true` on a probe) are
    /// eligible (spec.md §4.2.2) — callers pass `recovering` and inspect
    /// the returned names before invoking anything.
    pub fn drivers_for_class(&self, device_class: &str) -> Vec<std::sync::Arc<dyn Driver>> {
        self.by_name
            .read()
            .values()
            .filter(|r| r.driver.supported_device_classes().iter().any(|c| c == device_class))
            .map(|r| r.driver.clone())
            .collect()
    }

    /// Names in insertion order, for log/stats output.
    pub fn names(&self) -> Vec<String> {
        self.by_name.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
