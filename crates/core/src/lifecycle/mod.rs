// SPDX-License-Identifier: Apache-2.0

//! The lifecycle coordinator (spec.md §4.2): the one module that ties the
//! object store, driver/subsystem registries, watchdog, and descriptor
//! handler together into the pairing, discovery, reconfiguration, startup,
//! and property-routing flows. Nothing outside this module calls more than
//! one of those collaborators directly.

pub mod discovery;
pub mod endpoint;
pub mod pair;
pub mod property_router;
pub mod reconfigure;
pub mod startup;

use std::sync::Arc;

use discovery::{DiscoveryCoordinator, DiscoveryFilter};
use pair::{DeviceFoundDetails, PairState};
use property_router::PropertyRouter;
use reconfigure::ReconfigureCoordinator;
use startup::StartupInitializer;

use crate::descriptor::catalog::{DescriptorCatalog, EmptyDescriptorCatalog};
use crate::descriptor::DescriptorHandler;
use crate::error::{LifecycleError, StoreError};
use crate::events::EventSink;
use crate::registry::driver::DriverRegistry;
use crate::registry::subsystem::{SubsystemReadySink, SubsystemRegistry};
use crate::store::ObjectStore;
use crate::watchdog::Watchdog;

/// Fans a subsystem's readiness transition out to every registered driver's
/// `subsystem_initialized` callback, and records it in the registry (spec.md
/// §4.3: "ready for device operation" is every non-disabled subsystem being
/// ready). This is the one collaborator that knows about both registries,
/// so it lives here rather than on either registry itself.
pub struct SubsystemReadyRouter {
    subsystems: Arc<SubsystemRegistry>,
    drivers: Arc<DriverRegistry>,
}

#[async_trait::async_trait]
impl SubsystemReadySink for SubsystemReadyRouter {
    async fn ready(&self, subsystem: &str) {
        self.subsystems.set_ready(subsystem, true);
        for name in self.drivers.names() {
            if let Some(driver) = self.drivers.get(&name) {
                driver.subsystem_initialized(subsystem).await;
            }
        }
    }

    async fn unready(&self, subsystem: &str) {
        self.subsystems.set_ready(subsystem, false);
    }
}

/// Wires the five lifecycle flows over one shared set of collaborators.
/// Holds everything behind `Arc` so `discover_start`/`reconfigure_device`
/// can hand a clone to a spawned background task.
pub struct LifecycleCoordinator {
    pub store: Arc<ObjectStore>,
    pub drivers: Arc<DriverRegistry>,
    pub subsystems: Arc<SubsystemRegistry>,
    pub watchdog: Arc<Watchdog>,
    pub events: Arc<dyn EventSink>,
    pub catalog: Arc<dyn DescriptorCatalog>,
    pub pair_state: Arc<PairState>,
    pub discovery: Arc<DiscoveryCoordinator>,
    pub reconfigure: Arc<ReconfigureCoordinator>,
    pub descriptor: Option<Arc<DescriptorHandler>>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: Arc<ObjectStore>,
        drivers: Arc<DriverRegistry>,
        subsystems: Arc<SubsystemRegistry>,
        watchdog: Arc<Watchdog>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_catalog(store, drivers, subsystems, watchdog, events, Arc::new(EmptyDescriptorCatalog))
    }

    pub fn with_catalog(
        store: Arc<ObjectStore>,
        drivers: Arc<DriverRegistry>,
        subsystems: Arc<SubsystemRegistry>,
        watchdog: Arc<Watchdog>,
        events: Arc<dyn EventSink>,
        catalog: Arc<dyn DescriptorCatalog>,
    ) -> Self {
        let discovery = Arc::new(DiscoveryCoordinator::new(drivers.clone(), events.clone()));
        let reconfigure = Arc::new(ReconfigureCoordinator::new(
            store.clone(),
            drivers.clone(),
            watchdog.clone(),
            events.clone(),
        ));
        Self {
            store,
            drivers,
            subsystems,
            watchdog,
            events,
            catalog,
            pair_state: Arc::new(PairState::new()),
            discovery,
            reconfigure,
            descriptor: None,
        }
    }

    /// Attaches a configured descriptor handler, enabling the allow-list,
    /// deny-list, and firmware-base-url property keys.
    pub fn with_descriptor(mut self, descriptor: Arc<DescriptorHandler>) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Builds the sink a subsystem's `initialize` call should report
    /// readiness transitions to.
    pub fn ready_sink(&self) -> Arc<SubsystemReadyRouter> {
        Arc::new(SubsystemReadyRouter { subsystems: self.subsystems.clone(), drivers: self.drivers.clone() })
    }

    /// `deviceFound` (spec.md §4.2.1), run against this coordinator's
    /// collaborators.
    #[allow(clippy::too_many_arguments)]
    pub async fn device_found(
        &self,
        details: DeviceFoundDetails,
        never_reject: bool,
        filters: Option<&[DiscoveryFilter]>,
        recovery: bool,
        migration_in_progress: bool,
        descriptor_bypass: bool,
    ) -> Result<(), LifecycleError> {
        pair::device_found(
            &self.store,
            &self.drivers,
            &self.watchdog,
            self.events.as_ref(),
            self.catalog.as_ref(),
            &self.pair_state,
            details,
            never_reject,
            filters,
            recovery,
            migration_in_progress,
            descriptor_bypass,
        )
        .await
    }

    /// Disables one endpoint (spec.md §3): destroys the device if this was
    /// its last enabled endpoint and the matched descriptor requests
    /// cascade-delete, otherwise just reports the endpoint removed.
    pub async fn disable_endpoint(&self, uuid: &str, endpoint_id: &str) -> Result<(), StoreError> {
        endpoint::disable_endpoint(
            &self.store,
            &self.drivers,
            self.events.as_ref(),
            self.catalog.as_ref(),
            uuid,
            endpoint_id,
        )
        .await
    }

    /// Startup device initialization (spec.md §4.2.4): walks every
    /// persisted device and either reconfigures or synchronizes it.
    pub async fn run_startup_initialization(&self) {
        StartupInitializer::new(self.store.clone(), self.drivers.clone(), self.reconfigure.clone())
            .run()
            .await;
    }

    /// `propertyChanged(key, value)` (spec.md §4.6).
    pub async fn property_changed(&self, key: &str, value: Option<&str>) {
        PropertyRouter::new(
            self.store.clone(),
            self.drivers.clone(),
            self.subsystems.clone(),
            self.watchdog.clone(),
            self.descriptor.clone(),
        )
        .property_changed(key, value)
        .await;
    }

    /// Shuts down every lifecycle background task: in-flight
    /// reconfigurations (waiting up to two one-minute drain cycles) and the
    /// descriptor handler's list-fetch/reprocess loops.
    pub async fn shutdown(&self) {
        self.reconfigure.shutdown().await;
        if let Some(descriptor) = &self.descriptor {
            descriptor.shutdown();
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
