// SPDX-License-Identifier: Apache-2.0

//! Subsystem registration: the long-lived backing services (radio stacks,
//! IP camera clients, …) that drivers dispatch through. The registry here
//! is pure bookkeeping — name table, readiness flags, disabled set; the
//! fan-out to drivers on readiness transitions lives in `lifecycle`, which
//! is the one module that knows about both registries.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::RegistryError;

/// Receives asynchronous ready/unready notifications from a subsystem's own
/// `initialize` call. A subsystem may flip states any number of times over
/// its life (e.g. a radio losing and regaining link).
#[async_trait::async_trait]
pub trait SubsystemReadySink: Send + Sync {
    async fn ready(&self, subsystem: &str);
    async fn unready(&self, subsystem: &str);
}

/// A long-lived backing service a driver dispatches through.
#[async_trait::async_trait]
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &str;

    /// Current schema/protocol version. Compared against the persisted
    /// version at startup to decide whether `migrate` runs.
    fn version(&self) -> u32 {
        1
    }

    /// Runs once when `version() > persisted_version`. Returns whether the
    /// migration succeeded; on success the manager persists the new version.
    async fn migrate(&self, _old_version: u32, _new_version: u32) -> bool {
        true
    }

    /// Kick off hardware/network bring-up. Readiness is reported
    /// asynchronously through `sink`, potentially long after this call
    /// returns — this method itself only reports whether bring-up *started*
    /// successfully.
    async fn initialize(&self, sink: Arc<dyn SubsystemReadySink>) -> bool;

    async fn shutdown(&self) {}
    async fn on_all_drivers_started(&self) {}
    async fn on_all_services_available(&self) {}
    async fn on_restore_config(&self) {}
    async fn on_post_restore_config(&self) {}
    async fn on_lpm_start(&self) {}
    async fn on_lpm_end(&self) {}
    async fn set_ota_upgrade_delay(&self, _delay_secs: u64) {}
    /// Forwarded copy of a subsystem-prefixed property change (spec.md
    /// §4.6: `"<subsystemName>.<key>"` keys route here instead of a
    /// driver's `propertyChanged`).
    async fn property_changed(&self, _key: &str, _value: &str) {}
    fn get_status_json(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

struct SubsystemRegistration {
    subsystem: Arc<dyn Subsystem>,
    disabled: bool,
}

/// One-shot-per-process, name-keyed subsystem table plus per-subsystem
/// readiness flags. "Ready for device operation" is every registered,
/// non-disabled subsystem being ready; see `lifecycle` for the fan-out that
/// drives this state.
#[derive(Default)]
pub struct SubsystemRegistry {
    by_name: RwLock<IndexMap<String, SubsystemRegistration>>,
    ready: RwLock<HashMap<String, bool>>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self { by_name: RwLock::new(IndexMap::new()), ready: RwLock::new(HashMap::new()) }
    }

    pub fn register(
        &self,
        subsystem: Arc<dyn Subsystem>,
        disabled: bool,
    ) -> Result<(), RegistryError> {
        let name = subsystem.name().to_owned();
        if name.is_empty() {
            return Err(RegistryError::NullName);
        }
        let mut guard = self.by_name.write();
        if guard.contains_key(&name) {
            return Err(RegistryError::DuplicateName);
        }
        tracing::info!(subsystem = %name, disabled, "subsystem registered");
        guard.insert(name.clone(), SubsystemRegistration { subsystem, disabled });
        self.ready.write().insert(name, false);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Subsystem>> {
        self.by_name.read().get(name).map(|r| r.subsystem.clone())
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.by_name.read().get(name).is_some_and(|r| r.disabled)
    }

    /// All registered subsystems, in insertion order, paired with whether
    /// each is disabled.
    pub fn all(&self) -> Vec<(Arc<dyn Subsystem>, bool)> {
        self.by_name.read().values().map(|r| (r.subsystem.clone(), r.disabled)).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_name.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.read().is_empty()
    }

    /// Records a readiness transition, returning the previous state (`None`
    /// if the subsystem was never registered).
    pub fn set_ready(&self, name: &str, ready: bool) -> Option<bool> {
        self.ready.write().insert(name.to_owned(), ready)
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.ready.read().get(name).copied().unwrap_or(false)
    }

    /// True iff every registered, non-disabled subsystem is ready.
    pub fn all_ready(&self) -> bool {
        let by_name = self.by_name.read();
        let ready = self.ready.read();
        by_name
            .values()
            .filter(|r| !r.disabled)
            .all(|r| ready.get(r.subsystem.name()).copied().unwrap_or(false))
    }
}

#[cfg(test)]
#[path = "subsystem_tests.rs"]
mod tests;
