// SPDX-License-Identifier: Apache-2.0

//! Endpoint disablement (spec.md §3): the one Endpoint-lifecycle transition
//! that isn't folded into `saveEndpoint`'s plain field update, because
//! disabling the last enabled endpoint may destroy the owning device.

use crate::descriptor::catalog::{DescriptorCatalog, DeviceIdentity};
use crate::error::StoreError;
use crate::events::{EventSink, GatewayEvent};
use crate::model::{common_resource, Device};
use crate::registry::driver::DriverRegistry;
use crate::store::ObjectStore;

/// Disables one endpoint, persists it, and notifies the owning driver. If
/// this was the device's last enabled endpoint, consults the descriptor
/// entry matching the device's identity: `cascadeDelete` destroys the
/// device outright (an `endpointRemoved` for every endpoint, in order,
/// followed by `deviceRemoved` — spec.md §5's ordering guarantee); absent
/// that, the endpoint is simply reported removed and the device shell
/// stays.
pub async fn disable_endpoint(
    store: &ObjectStore,
    drivers: &DriverRegistry,
    events: &dyn EventSink,
    catalog: &dyn DescriptorCatalog,
    uuid: &str,
    endpoint_id: &str,
) -> Result<(), StoreError> {
    let mut device = store.get_device_by_uri(&format!("/{uuid}")).await?;
    let endpoint = device.find_endpoint_mut(endpoint_id).ok_or(StoreError::NotFound)?;
    if !endpoint.enabled {
        return Ok(());
    }
    endpoint.enabled = false;
    let updated = endpoint.clone();
    store.save_endpoint(updated).await?;

    if let Some(driver) = drivers.get(&device.managing_device_driver) {
        driver.endpoint_disabled(uuid, endpoint_id).await;
    }

    if !device.all_endpoints_disabled() {
        events.emit(GatewayEvent::EndpointRemoved {
            uuid: uuid.to_owned(),
            endpoint_id: endpoint_id.to_owned(),
        });
        return Ok(());
    }

    let cascade = catalog.lookup(&identity_of(&device)).is_some_and(|entry| entry.cascade_delete);
    if !cascade {
        events.emit(GatewayEvent::EndpointRemoved {
            uuid: uuid.to_owned(),
            endpoint_id: endpoint_id.to_owned(),
        });
        return Ok(());
    }

    for ep in &device.endpoints {
        events.emit(GatewayEvent::EndpointRemoved { uuid: uuid.to_owned(), endpoint_id: ep.id.clone() });
    }
    store.remove_device_by_id(uuid).await?;
    events.emit(GatewayEvent::DeviceRemoved { uuid: uuid.to_owned() });
    Ok(())
}

/// Rebuilds the identity a descriptor entry was originally matched against
/// from the common resources every paired device carries (spec.md §4.2.1
/// step 6) — there is no separate stored copy of the pairing-time identity.
fn identity_of(device: &Device) -> DeviceIdentity {
    let resource_value = |id: &str| {
        device.resources.iter().find(|r| r.id == id).and_then(|r| r.value.clone()).unwrap_or_default()
    };
    DeviceIdentity {
        manufacturer: resource_value(common_resource::MANUFACTURER),
        model: resource_value(common_resource::MODEL),
        hardware_version: resource_value(common_resource::HARDWARE_VERSION),
        firmware_version: resource_value(common_resource::FIRMWARE_VERSION),
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
