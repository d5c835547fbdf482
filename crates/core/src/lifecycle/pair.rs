// SPDX-License-Identifier: Apache-2.0

//! The pair pipeline: `deviceFound` (spec.md §4.2.1), the fourteen-step
//! sequence that takes a driver's raw discovery report and turns it into a
//! persisted, fully-resourced device — or rejects/aborts it with enough
//! context for an upstream UI to explain why.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;

use crate::descriptor::catalog::{DescriptorCatalog, DeviceIdentity};
use crate::error::LifecycleError;
use crate::events::{EventSink, GatewayEvent};
use crate::lifecycle::discovery::DiscoveryFilter;
use crate::model::system_property::metadata_key;
use crate::model::{common_resource, CachingPolicy, Device, Endpoint, Metadata, Resource, ResourceMode};
use crate::registry::driver::DriverRegistry;
use crate::store::ObjectStore;
use crate::watchdog::Watchdog;

/// One endpoint a driver reports alongside a discovered device.
#[derive(Debug, Clone)]
pub struct EndpointSpec {
    pub id: String,
    pub profile: String,
    pub profile_version: u8,
}

/// Everything a driver knows about a device the moment it's first seen on
/// the radio, before any configuration has happened.
#[derive(Debug, Clone)]
pub struct DeviceFoundDetails {
    pub uuid: String,
    pub device_class: String,
    pub driver_name: String,
    pub identity: DeviceIdentity,
    pub endpoints: Vec<EndpointSpec>,
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Shared cross-call state the pair pipeline needs beyond the store and
/// registries: the migration-mode flag (spec.md §9 open question resolved
/// as an opaque phase flag, no ZigBee-specific meaning modeled) and the two
/// UUID sets `deviceFound` reads/writes across concurrent pairings.
#[derive(Default)]
pub struct PairState {
    pub marked_for_removal: Mutex<HashSet<String>>,
    pub failed_to_pair: Mutex<HashSet<String>>,
}

impl PairState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_for_removal(&self, uuid: &str) {
        self.marked_for_removal.lock().await.insert(uuid.to_owned());
    }

    async fn is_marked_for_removal(&self, uuid: &str) -> bool {
        self.marked_for_removal.lock().await.contains(uuid)
    }

    async fn clear_marked_for_removal(&self, uuid: &str) {
        self.marked_for_removal.lock().await.remove(uuid);
    }
}

/// Runs the full pair pipeline for one discovered device.
///
/// `recovery` selects orphan-recovery mode (spec.md §4.2.2/§4.2.3): the
/// device already exists in the store and this call bulk-updates its
/// resources/metadata in place instead of calling `addDevice`, and emits
/// `deviceRecovered` instead of `deviceAdded`/`endpointAdded`.
#[allow(clippy::too_many_arguments)]
pub async fn device_found(
    store: &ObjectStore,
    drivers: &DriverRegistry,
    watchdog: &Watchdog,
    events: &dyn EventSink,
    catalog: &dyn DescriptorCatalog,
    state: &PairState,
    details: DeviceFoundDetails,
    never_reject: bool,
    filters: Option<&[DiscoveryFilter]>,
    recovery: bool,
    migration_in_progress: bool,
    descriptor_bypass: bool,
) -> Result<(), LifecycleError> {
    let uuid = details.uuid.clone();

    // Step 1: denylist check.
    if is_denylisted(store, &uuid).await {
        events.emit(GatewayEvent::DeviceRejected { uuid, reason: "denylisted".into() });
        return Err(LifecycleError::Denylisted);
    }

    // Step 2: descriptor lookup.
    let descriptor_entry = catalog.lookup(&details.identity);
    if descriptor_entry.is_none()
        && !never_reject
        && !migration_in_progress
        && !descriptor_bypass
    {
        events.emit(GatewayEvent::DeviceRejected { uuid, reason: "no-matching-descriptor".into() });
        return Err(LifecycleError::DescriptorMissing);
    }

    let Some(driver) = drivers.get(&details.driver_name) else {
        events.emit(GatewayEvent::DeviceRejected { uuid, reason: "unknown-driver".into() });
        return Err(LifecycleError::NoEligibleDriver);
    };

    // Step 3: create the icDevice skeleton.
    let class_version = driver.get_device_class_version(&details.device_class);
    let mut device = Device::new(&uuid, &details.device_class, class_version, &details.driver_name)
        .map_err(|_| LifecycleError::Internal)?;
    if !migration_in_progress {
        events.emit(GatewayEvent::DeviceDiscovered { uuid: uuid.clone(), device_class: details.device_class.clone() });
    }

    // Step 4: configure-started + per-device comm-fail override.
    events.emit(GatewayEvent::DeviceConfigureStarted { uuid: uuid.clone() });
    if let Some(entry) = &descriptor_entry {
        if let Some(secs) = entry.comm_fail_override_seconds {
            if let Ok(metadata) = Metadata::new(
                &device.uri,
                &uuid,
                None,
                metadata_key::COMM_FAIL_OVERRIDE_SECONDS,
                secs.to_string(),
            ) {
                device.metadatas.push(metadata);
            }
        }
    }

    // Step 5: driver configure.
    if !driver.configure_device(&uuid).await {
        events.emit(GatewayEvent::DeviceConfigureFailed { uuid: uuid.clone() });
        return fail(
            driver.as_ref(),
            events,
            state,
            &uuid,
            "configure-failed",
            migration_in_progress,
            LifecycleError::DriverRejected,
        )
        .await;
    }
    events.emit(GatewayEvent::DeviceConfigureCompleted { uuid: uuid.clone() });

    // Step 6: common resources with their initial values.
    let now = now_millis();
    for (id, value) in [
        (common_resource::MANUFACTURER, details.identity.manufacturer.clone()),
        (common_resource::MODEL, details.identity.model.clone()),
        (common_resource::HARDWARE_VERSION, details.identity.hardware_version.clone()),
        (common_resource::FIRMWARE_VERSION, details.identity.firmware_version.clone()),
        (common_resource::FIRMWARE_UPDATE_STATUS, "upToDate".to_owned()),
        (common_resource::DATE_ADDED, now.to_string()),
        (common_resource::DATE_LAST_CONTACTED, now.to_string()),
        (common_resource::COMM_FAIL, "false".to_owned()),
    ] {
        push_string_resource(&mut device, &uuid, id, value, now);
    }

    // Step 7 + 8: fetch everything else, then let the driver register its
    // own resources. Driver-specific resource objects live on the driver's
    // side of the boundary (spec.md §1: concrete radio stacks are external
    // collaborators); here we only have the plain key/value map to build
    // generic resources from, plus the driver's success signal.
    let initial_values = driver.fetch_initial_resource_values(&uuid).await;
    for (id, value) in initial_values {
        push_string_resource(&mut device, &uuid, &id, value, now);
    }
    for spec in &details.endpoints {
        if let Ok(endpoint) =
            Endpoint::new(&device.uri, &uuid, &spec.id, &spec.profile, spec.profile_version)
        {
            device.endpoints.push(endpoint);
        }
    }
    if !driver.register_resources(&uuid).await {
        return fail(
            driver.as_ref(),
            events,
            state,
            &uuid,
            "register-resources-failed",
            migration_in_progress,
            LifecycleError::DriverRejected,
        )
        .await;
    }

    // Step 9: discovery-filter check.
    if let Some(filters) = filters {
        if !filters.is_empty() && !filters.iter().all(|f| device_matches_filter(&device, f)) {
            return fail(
                driver.as_ref(),
                events,
                state,
                &uuid,
                "filter-mismatch",
                migration_in_progress,
                LifecycleError::FilterMismatch,
            )
            .await;
        }
    }

    // Step 10: let the driver process the descriptor (firmware scheduling
    // etc).
    driver.process_device_descriptor(&uuid).await;

    // Step 11: mark-for-removal check.
    if state.is_marked_for_removal(&uuid).await {
        state.clear_marked_for_removal(&uuid).await;
        return fail(
            driver.as_ref(),
            events,
            state,
            &uuid,
            "marked-for-removal",
            migration_in_progress,
            LifecycleError::MarkedForRemoval,
        )
        .await;
    }

    // Step 12: finalize. URIs were assigned bottom-up as each node was
    // constructed; optionally stamp the time-zone resource.
    if let Some(tz) = store.get_system_property(crate::model::system_property::TIME_ZONE).await {
        push_string_resource(&mut device, &uuid, common_resource::TIME_ZONE, tz, now);
    }

    if recovery {
        if let Err(e) = bulk_update_existing(store, &device).await {
            tracing::warn!(uuid = %uuid, err = %e, "recovery bulk-update failed");
            return fail(
                driver.as_ref(),
                events,
                state,
                &uuid,
                "persistence-failed",
                migration_in_progress,
                LifecycleError::Internal,
            )
            .await;
        }
        events.emit(GatewayEvent::DeviceRecovered { uuid: uuid.clone() });
    } else {
        if let Err(e) = store.add_device(device.clone()).await {
            tracing::warn!(uuid = %uuid, err = %e, "add_device failed during pairing");
            return fail(
                driver.as_ref(),
                events,
                state,
                &uuid,
                "persistence-failed",
                migration_in_progress,
                LifecycleError::Internal,
            )
            .await;
        }
        events.emit(GatewayEvent::DeviceAdded { uuid: uuid.clone() });
        for endpoint in &device.endpoints {
            events.emit(GatewayEvent::EndpointAdded {
                uuid: uuid.clone(),
                endpoint_id: endpoint.id.clone(),
            });
        }
    }

    // Step 13: devicePersisted (skipped in recovery) + final comm-fail
    // timeout.
    if !recovery {
        driver.device_persisted(&uuid).await;
    }
    let override_metadata = device
        .metadatas
        .iter()
        .find(|m| m.id == metadata_key::COMM_FAIL_OVERRIDE_SECONDS)
        .map(|m| m.value.clone());
    watchdog
        .set_timeout(&uuid, override_metadata.as_deref(), driver.as_ref(), driver.custom_comm_fail())
        .await;

    Ok(())
}

pub(crate) fn push_string_resource(device: &mut Device, uuid: &str, id: &str, value: String, now: u64) {
    let Ok(mut resource) = Resource::new(
        &device.uri,
        uuid,
        None,
        id,
        "string",
        ResourceMode::READABLE,
        CachingPolicy::Always,
    ) else {
        return;
    };
    resource.set_value(Some(value), now);
    device.resources.push(resource);
}

/// A filter matches a device when at least one resource satisfies *both*
/// its URI pattern and its value pattern (spec.md §4.2.1 step 9).
fn device_matches_filter(device: &Device, filter: &DiscoveryFilter) -> bool {
    let all_resources =
        device.resources.iter().chain(device.endpoints.iter().flat_map(|e| e.resources.iter()));
    all_resources.any(|r| {
        filter.uri.is_match(&r.uri) && r.value.as_deref().is_some_and(|v| filter.value.is_match(v))
    })
}

/// Step 14: the shared failure path for every abort after step 4.
async fn fail(
    driver: &dyn crate::registry::driver::Driver,
    events: &dyn EventSink,
    state: &PairState,
    uuid: &str,
    reason: &str,
    migration_in_progress: bool,
    error: LifecycleError,
) -> Result<(), LifecycleError> {
    if !migration_in_progress {
        driver.device_removed(uuid).await;
    }
    events.emit(GatewayEvent::DeviceDiscoveryFailed { uuid: uuid.to_owned(), reason: reason.to_owned() });
    state.failed_to_pair.lock().await.insert(uuid.to_owned());
    Err(error)
}

async fn is_denylisted(store: &ObjectStore, uuid: &str) -> bool {
    let Some(raw) = store.get_system_property(crate::model::system_property::DENYLISTED_DEVICE_UUIDS).await
    else {
        return false;
    };
    parse_uuid_array(&raw).iter().any(|u| u == uuid)
}

pub fn parse_uuid_array(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

/// Recovery-mode write-back: update resources/metadata on an already
/// persisted device without removing anything absent from the new fetch
/// (spec.md §9's resolved open question — orphan cleanup is not modeled).
/// A resource the store has never seen before (first recovery after a
/// schema addition) is added rather than dropped.
async fn bulk_update_existing(store: &ObjectStore, fresh: &Device) -> Result<(), crate::error::StoreError> {
    for resource in fresh.resources.iter().chain(fresh.endpoints.iter().flat_map(|e| e.resources.iter())) {
        match store.save_resource(resource.clone(), now_millis()).await {
            Ok(()) => {}
            Err(crate::error::StoreError::NotFound) => {
                let owner_uri = owner_uri_of(resource);
                store.add_resource(&owner_uri, resource.clone()).await?;
            }
            Err(e) => return Err(e),
        }
    }
    for metadata in &fresh.metadatas {
        store.save_metadata(&metadata.uri, metadata.value.clone()).await?;
    }
    Ok(())
}

fn owner_uri_of(resource: &Resource) -> String {
    match &resource.endpoint_id {
        Some(ep_id) => format!("/{}{}{ep_id}", resource.device_uuid, crate::model::uri::ENDPOINT_MARKER),
        None => format!("/{}", resource.device_uuid),
    }
}

#[cfg(test)]
#[path = "pair_tests.rs"]
mod tests;
