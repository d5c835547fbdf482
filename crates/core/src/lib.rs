// SPDX-License-Identifier: Apache-2.0

//! The engine-agnostic device-management core of a smart-home gateway:
//! object store, lifecycle coordinator, driver/subsystem registry,
//! comm-fail watchdog, and descriptor handler. No process entry point, no
//! signal handling — `gatewayd` (the `cli` crate) wires this into a running
//! daemon.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

pub mod descriptor;
pub mod error;
pub mod events;
pub mod model;
pub mod registry;
pub mod store;
pub mod watchdog;

pub mod lifecycle;

use std::path::PathBuf;
use std::sync::Arc;

use store::protect::{ReversibleProtector, SensitiveValueProtector};

/// Process-scoped core: the explicit, non-global singleton spec.md §9
/// calls for. Owns the object store, driver/subsystem registries, the
/// comm-fail watchdog, and an event sink, and wires them together into a
/// [`lifecycle::LifecycleCoordinator`]. Every collaborator is `Arc`-wrapped
/// since the lifecycle coordinator hands clones to spawned background
/// tasks (reconfiguration, discovery, the descriptor handler's fetch loop).
pub struct GatewayCore {
    pub store: Arc<store::ObjectStore>,
    pub drivers: Arc<registry::driver::DriverRegistry>,
    pub subsystems: Arc<registry::subsystem::SubsystemRegistry>,
    pub watchdog: Arc<watchdog::Watchdog>,
    pub events: Arc<dyn events::EventSink>,
    pub lifecycle: lifecycle::LifecycleCoordinator,
}

impl GatewayCore {
    pub fn new(namespace: impl Into<PathBuf>) -> Self {
        Self::with_protector(namespace, Arc::new(ReversibleProtector))
    }

    pub fn with_protector(
        namespace: impl Into<PathBuf>,
        protector: Arc<dyn SensitiveValueProtector>,
    ) -> Self {
        let store = Arc::new(store::ObjectStore::new(namespace, protector));
        let drivers = Arc::new(registry::driver::DriverRegistry::new());
        let subsystems = Arc::new(registry::subsystem::SubsystemRegistry::new());
        let watchdog = Arc::new(watchdog::Watchdog::new());
        let events: Arc<dyn events::EventSink> = Arc::new(events::ChannelEventSink::new(256));
        let lifecycle = lifecycle::LifecycleCoordinator::new(
            store.clone(),
            drivers.clone(),
            subsystems.clone(),
            watchdog.clone(),
            events.clone(),
        );
        Self { store, drivers, subsystems, watchdog, events, lifecycle }
    }

    /// Loads system properties and every device file, returning the file
    /// names that failed to parse so the caller can decide how loudly to
    /// surface a `deviceDatabaseFailure` event.
    pub async fn init(&self) -> Result<Vec<String>, error::StoreError> {
        let failed = self.store.init().await?;
        for file_name in &failed {
            self.events.emit(events::GatewayEvent::DeviceDatabaseFailure {
                file_name: file_name.clone(),
            });
        }
        Ok(failed)
    }
}
