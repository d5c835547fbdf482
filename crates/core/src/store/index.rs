// SPDX-License-Identifier: Apache-2.0

//! The secondary URI index: a pure locator table, shared-read/exclusive-write
//! under the store's single mutex (spec.md §4.1, §9 "URI index as secondary
//! view"). It never owns graph nodes — only stable keys resolved back
//! through the primary device map on every read.

use std::collections::HashMap;

use crate::model::uri::{self, Locator, LocatorKind};
use crate::model::{Device, Endpoint};

#[derive(Debug, Default)]
pub struct UriIndex {
    entries: HashMap<String, Locator>,
}

impl UriIndex {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get(&self, uri: &str) -> Option<&Locator> {
        self.entries.get(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.entries.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, uri: String, locator: Locator) {
        self.entries.insert(uri, locator);
    }

    pub fn remove(&mut self, uri: &str) -> Option<Locator> {
        self.entries.remove(uri)
    }

    /// Every index entry currently pointing into the given device's
    /// subgraph (used by tests asserting "no index entry points outside
    /// the device map").
    pub fn entries_for_device(&self, uuid: &str) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(move |(_, loc)| loc.uuid == uuid).map(|(uri, _)| uri.as_str())
    }

    /// Remove every index entry belonging to a device's subgraph (device
    /// URI, every endpoint, every resource, every metadatum). Mirrors
    /// `removeDeviceURIEntries` in the original jsonDatabase.
    pub fn remove_device_subgraph(&mut self, uuid: &str) {
        self.entries.retain(|_, loc| loc.uuid != uuid);
    }

    /// Remove every index entry belonging to one endpoint's subgraph
    /// (its own URI plus its resources/metadata), but not the device.
    pub fn remove_endpoint_subgraph(&mut self, uuid: &str, endpoint_id: &str) {
        self.entries.retain(|_, loc| {
            !(loc.uuid == uuid && loc.endpoint_id.as_deref() == Some(endpoint_id))
        });
    }

    /// Build every locator entry for a device and its descendants. Returns
    /// an error (without mutating `self`) if any derived URI fails to
    /// round-trip, so the caller can undo a partial `addDevice` atomically.
    pub fn build_device_entries(device: &Device) -> Result<Vec<(String, Locator)>, ()> {
        let mut entries = Vec::new();
        push_checked(&mut entries, &device.uri, LocatorKind::Device, &device.uuid, None, None)?;

        for resource in &device.resources {
            push_checked(
                &mut entries,
                &resource.uri,
                LocatorKind::Resource,
                &device.uuid,
                None,
                Some(resource.id.clone()),
            )?;
        }
        for metadata in &device.metadatas {
            push_checked(
                &mut entries,
                &metadata.uri,
                LocatorKind::Metadata,
                &device.uuid,
                None,
                Some(metadata.id.clone()),
            )?;
        }
        for endpoint in &device.endpoints {
            entries.extend(Self::build_endpoint_entries(&device.uuid, endpoint)?);
        }
        Ok(entries)
    }

    pub fn build_endpoint_entries(
        device_uuid: &str,
        endpoint: &Endpoint,
    ) -> Result<Vec<(String, Locator)>, ()> {
        let mut entries = Vec::new();
        push_checked(
            &mut entries,
            &endpoint.uri,
            LocatorKind::Endpoint,
            device_uuid,
            Some(endpoint.id.clone()),
            None,
        )?;
        for resource in &endpoint.resources {
            push_checked(
                &mut entries,
                &resource.uri,
                LocatorKind::Resource,
                device_uuid,
                Some(endpoint.id.clone()),
                Some(resource.id.clone()),
            )?;
        }
        for metadata in &endpoint.metadatas {
            push_checked(
                &mut entries,
                &metadata.uri,
                LocatorKind::Metadata,
                device_uuid,
                Some(endpoint.id.clone()),
                Some(metadata.id.clone()),
            )?;
        }
        Ok(entries)
    }

    pub fn insert_all(&mut self, entries: Vec<(String, Locator)>) {
        for (uri, locator) in entries {
            self.entries.insert(uri, locator);
        }
    }
}

/// Validate a derived URI round-trips to the expected locator shape before
/// it is ever inserted, and append it to `entries` on success.
fn push_checked(
    entries: &mut Vec<(String, Locator)>,
    derived_uri: &str,
    expected_kind: LocatorKind,
    uuid: &str,
    endpoint_id: Option<String>,
    leaf_id: Option<String>,
) -> Result<(), ()> {
    let parsed = uri::parse(derived_uri).map_err(|_| ())?;
    if parsed.kind != expected_kind || parsed.uuid != uuid || parsed.endpoint_id != endpoint_id
        || parsed.leaf_id != leaf_id
    {
        return Err(());
    }
    entries.push((derived_uri.to_owned(), parsed));
    Ok(())
}

#[cfg(test)]
#[path = "index_tests.rs"]
mod tests;
