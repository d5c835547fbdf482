// SPDX-License-Identifier: Apache-2.0

//! The object store: the in-memory device graph, its secondary URI index,
//! and system properties, all behind one process-wide lock (spec.md §4.1,
//! §5 lock #3 in the acquisition order).

pub mod index;
pub mod persist;
pub mod protect;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::system_property;
use crate::model::uri::{self, LocatorKind};
use crate::model::{Device, Endpoint, Locator, Metadata, Resource, ResourceMode};
use index::UriIndex;
use persist::Storage;
use protect::SensitiveValueProtector;

pub use persist::RestoreResult;

/// `fetchRuntimeStats`-style introspection snapshot (spec.md §4.1 expansion).
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub device_count: usize,
    pub endpoint_count: usize,
    pub resource_count: usize,
    pub dirty_device_count: usize,
}

/// Whatever a URI resolves to.
#[derive(Debug, Clone)]
pub enum Found {
    Device(Device),
    Endpoint(Endpoint),
    Resource(Resource),
    Metadata(Metadata),
}

struct State {
    devices: HashMap<String, Device>,
    index: UriIndex,
    system_properties: HashMap<String, String>,
}

/// The single process-wide object store. Every public method either holds
/// the lock for its whole duration or takes no lock at all; there is no
/// partial-lock path.
pub struct ObjectStore {
    state: Mutex<State>,
    storage: Storage,
    protector: Arc<dyn SensitiveValueProtector>,
}

impl ObjectStore {
    pub fn new(namespace: impl Into<PathBuf>, protector: Arc<dyn SensitiveValueProtector>) -> Self {
        Self {
            state: Mutex::new(State {
                devices: HashMap::new(),
                index: UriIndex::new(),
                system_properties: HashMap::new(),
            }),
            storage: Storage::new(namespace),
            protector,
        }
    }

    /// Init-once gate: load system properties (applying legacy-key
    /// migration), then every device file, strict-then-permissive. Returns
    /// the file names that failed both parses so the caller can emit a
    /// `deviceDatabaseFailure`-style event (spec.md §4.1, §7).
    pub async fn init(&self) -> Result<Vec<String>, StoreError> {
        let mut props =
            self.storage.load_system_properties().await.map_err(|_| StoreError::Persistence)?;
        system_property::migrate(&mut props);
        self.storage.save_system_properties(&props).await.map_err(|_| StoreError::Persistence)?;

        let (devices, failed) = self
            .storage
            .load_all_devices(self.protector.as_ref())
            .await
            .map_err(|_| StoreError::Persistence)?;

        let mut state = self.state.lock().await;
        state.system_properties = props;
        for device in devices {
            if let Ok(entries) = UriIndex::build_device_entries(&device) {
                state.index.insert_all(entries);
                state.devices.insert(device.uuid.clone(), device);
            } else {
                tracing::warn!(
                    uuid = %device.uuid,
                    "device file parsed but its own URIs fail to round-trip; treating as corrupt"
                );
            }
        }
        Ok(failed)
    }

    async fn persist_device(&self, device: &Device) -> Result<(), StoreError> {
        self.storage
            .save_device(device, self.protector.as_ref())
            .await
            .map_err(|_| StoreError::Persistence)
    }

    // -- Create --------------------------------------------------------

    pub async fn add_device(&self, device: Device) -> Result<(), StoreError> {
        if device.uuid.is_empty() || uri::device_uri(&device.uuid).is_err() {
            return Err(StoreError::InvalidUuid);
        }
        let entries = UriIndex::build_device_entries(&device).map_err(|_| StoreError::InvalidUri)?;

        let mut state = self.state.lock().await;
        if state.devices.contains_key(&device.uuid) {
            return Err(StoreError::AlreadyExists);
        }
        state.devices.insert(device.uuid.clone(), device.clone());
        state.index.insert_all(entries);

        if let Err(e) = self.persist_device(&device).await {
            tracing::warn!(uuid = %device.uuid, err = %e, "failed to persist new device, rolling back");
            state.devices.remove(&device.uuid);
            state.index.remove_device_subgraph(&device.uuid);
            return Err(e);
        }
        Ok(())
    }

    pub async fn add_endpoint(&self, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.index.contains(&endpoint.uri) {
            return Err(StoreError::AlreadyExists);
        }
        let entries = UriIndex::build_endpoint_entries(&endpoint.device_uuid, &endpoint)
            .map_err(|_| StoreError::InvalidUri)?;

        {
            let device = state.devices.get_mut(&endpoint.device_uuid).ok_or(StoreError::NotFound)?;
            device.endpoints.push(endpoint.clone());
        }
        state.index.insert_all(entries);

        let snapshot = state.devices.get(&endpoint.device_uuid).ok_or(StoreError::NotFound)?.clone();
        if let Err(e) = self.persist_device(&snapshot).await {
            tracing::warn!(uuid = %endpoint.device_uuid, err = %e, "failed to persist endpoint add, rolling back");
            if let Some(device) = state.devices.get_mut(&endpoint.device_uuid) {
                device.endpoints.retain(|e| e.id != endpoint.id);
            }
            state.index.remove_endpoint_subgraph(&endpoint.device_uuid, &endpoint.id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn add_resource(&self, owner_uri: &str, resource: Resource) -> Result<(), StoreError> {
        let loc = uri::parse(owner_uri).map_err(|_| StoreError::InvalidUri)?;
        if !matches!(loc.kind, LocatorKind::Device | LocatorKind::Endpoint) {
            return Err(StoreError::InvalidUri);
        }
        let expected_uri = uri::resource_uri(owner_uri, &resource.id)?;
        if resource.uri != expected_uri {
            return Err(StoreError::InvalidUri);
        }

        let mut state = self.state.lock().await;
        if state.index.contains(&resource.uri) {
            return Err(StoreError::AlreadyExists);
        }

        {
            let device = state.devices.get_mut(&loc.uuid).ok_or(StoreError::NotFound)?;
            match &loc.endpoint_id {
                Some(ep_id) => {
                    let ep = device.find_endpoint_mut(ep_id).ok_or(StoreError::NotFound)?;
                    ep.resources.push(resource.clone());
                }
                None => device.resources.push(resource.clone()),
            }
        }
        state.index.insert(
            resource.uri.clone(),
            Locator {
                kind: LocatorKind::Resource,
                uuid: loc.uuid.clone(),
                endpoint_id: loc.endpoint_id.clone(),
                leaf_id: Some(resource.id.clone()),
            },
        );

        let snapshot = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?.clone();
        if let Err(e) = self.persist_device(&snapshot).await {
            tracing::warn!(uri = %resource.uri, err = %e, "failed to persist resource add, rolling back");
            if let Some(device) = state.devices.get_mut(&loc.uuid) {
                match &loc.endpoint_id {
                    Some(ep_id) => {
                        if let Some(ep) = device.find_endpoint_mut(ep_id) {
                            ep.resources.retain(|r| r.id != resource.id);
                        }
                    }
                    None => device.resources.retain(|r| r.id != resource.id),
                }
            }
            state.index.remove(&resource.uri);
            return Err(e);
        }
        Ok(())
    }

    // -- Update ----------------------------------------------------------

    /// Updates only `enabled` and `profileVersion`. A `profileVersion`
    /// change atomically replaces the endpoint's entire resource set —
    /// the only endpoint-level migration (spec.md §4.1).
    pub async fn save_endpoint(&self, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let (old_resource_uris, profile_changed) = {
            let device = state.devices.get_mut(&endpoint.device_uuid).ok_or(StoreError::NotFound)?;
            let existing = device.find_endpoint_mut(&endpoint.id).ok_or(StoreError::NotFound)?;
            let changed = existing.profile_version != endpoint.profile_version;
            existing.enabled = endpoint.enabled;
            existing.profile_version = endpoint.profile_version;
            let old_uris = if changed {
                let uris: Vec<String> = existing.resources.iter().map(|r| r.uri.clone()).collect();
                existing.resources = endpoint.resources.clone();
                uris
            } else {
                Vec::new()
            };
            (old_uris, changed)
        };

        if profile_changed {
            for old_uri in &old_resource_uris {
                state.index.remove(old_uri);
            }
            for resource in &endpoint.resources {
                if let Ok(loc) = uri::parse(&resource.uri) {
                    state.index.insert(resource.uri.clone(), loc);
                }
            }
        }

        let snapshot = state.devices.get(&endpoint.device_uuid).ok_or(StoreError::NotFound)?.clone();
        self.persist_device(&snapshot).await
    }

    /// Updates `value`, `cachingPolicy`, `mode`, `dateOfLastSyncMillis`.
    /// A `lazySaveNext` mode keeps the in-memory change but skips the disk
    /// write; otherwise the owning device is flushed (spec.md §4.1).
    pub async fn save_resource(&self, updated: Resource, now_millis: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let loc = uri::parse(&updated.uri).map_err(|_| StoreError::InvalidUri)?;

        let lazy = {
            let device = state.devices.get_mut(&loc.uuid).ok_or(StoreError::NotFound)?;
            let existing = match &loc.endpoint_id {
                Some(ep_id) => device
                    .find_endpoint_mut(ep_id)
                    .and_then(|e| e.find_resource_mut(&updated.id)),
                None => device.find_resource_mut(&updated.id),
            }
            .ok_or(StoreError::NotFound)?;

            existing.set_mode(updated.mode);
            existing.caching_policy = updated.caching_policy;
            existing.set_value(updated.value.clone(), now_millis);
            let lazy = existing.mode.contains(ResourceMode::LAZY_SAVE_NEXT);
            device.mark_dirty();
            lazy
        };

        if lazy {
            return Ok(());
        }

        let snapshot = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?.clone();
        let result = self.persist_device(&snapshot).await;
        if result.is_ok() {
            if let Some(device) = state.devices.get_mut(&loc.uuid) {
                device.dirty = false;
            }
        }
        result
    }

    /// Always a lazy update: no disk write (spec.md §4.1).
    pub async fn update_date_of_last_sync_millis(
        &self,
        resource_uri: &str,
        now_millis: u64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let loc = uri::parse(resource_uri).map_err(|_| StoreError::InvalidUri)?;
        let leaf = loc.leaf_id.clone().ok_or(StoreError::InvalidUri)?;
        let device = state.devices.get_mut(&loc.uuid).ok_or(StoreError::NotFound)?;
        let resource = match &loc.endpoint_id {
            Some(ep_id) => device.find_endpoint_mut(ep_id).and_then(|e| e.find_resource_mut(&leaf)),
            None => device.find_resource_mut(&leaf),
        }
        .ok_or(StoreError::NotFound)?;
        resource.date_of_last_sync_millis = now_millis;
        device.mark_dirty();
        Ok(())
    }

    /// Upsert by URI; the create path allocates the record under whichever
    /// owner (device or endpoint) the URI parses to (spec.md §4.1).
    pub async fn save_metadata(&self, uri_str: &str, value: String) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let loc = uri::parse(uri_str).map_err(|_| StoreError::InvalidUri)?;
        if loc.kind != LocatorKind::Metadata {
            return Err(StoreError::InvalidUri);
        }
        let leaf = loc.leaf_id.clone().ok_or(StoreError::InvalidUri)?;
        let canonical = Metadata::canonicalize_value(&value);

        let already_exists = {
            let device = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?;
            match &loc.endpoint_id {
                Some(ep_id) => device
                    .find_endpoint(ep_id)
                    .is_some_and(|e| e.metadatas.iter().any(|m| m.id == leaf)),
                None => device.metadatas.iter().any(|m| m.id == leaf),
            }
        };

        {
            let device = state.devices.get_mut(&loc.uuid).ok_or(StoreError::NotFound)?;
            if already_exists {
                let metadata = match &loc.endpoint_id {
                    Some(ep_id) => {
                        device.find_endpoint_mut(ep_id).and_then(|e| e.find_metadata_mut(&leaf))
                    }
                    None => device.find_metadata_mut(&leaf),
                }
                .ok_or(StoreError::NotFound)?;
                metadata.value = canonical;
            } else {
                let metadata = Metadata {
                    id: leaf.clone(),
                    device_uuid: loc.uuid.clone(),
                    endpoint_id: loc.endpoint_id.clone(),
                    uri: uri_str.to_owned(),
                    value: canonical,
                };
                match &loc.endpoint_id {
                    Some(ep_id) => {
                        let ep = device.find_endpoint_mut(ep_id).ok_or(StoreError::NotFound)?;
                        ep.metadatas.push(metadata);
                    }
                    None => device.metadatas.push(metadata),
                }
            }
        }

        if !state.index.contains(uri_str) {
            state.index.insert(uri_str.to_owned(), loc.clone());
        }

        let snapshot = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?.clone();
        self.persist_device(&snapshot).await
    }

    // -- Delete ------------------------------------------------------------

    /// Deletes the storage file, then removes from maps, destroying the
    /// subgraph and every URI-index entry pointing into it (spec.md §4.1,
    /// §3's ownership rule).
    pub async fn remove_device_by_id(&self, uuid: &str) -> Result<(), StoreError> {
        self.storage.remove_device(uuid).await.map_err(|_| StoreError::Persistence)?;

        let mut state = self.state.lock().await;
        if state.devices.remove(uuid).is_none() {
            return Err(StoreError::NotFound);
        }
        state.index.remove_device_subgraph(uuid);
        Ok(())
    }

    pub async fn remove_metadata_by_uri(&self, uri_str: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let loc = uri::parse(uri_str).map_err(|_| StoreError::InvalidUri)?;
        if loc.kind != LocatorKind::Metadata {
            return Err(StoreError::InvalidUri);
        }
        let leaf = loc.leaf_id.clone().ok_or(StoreError::InvalidUri)?;

        {
            let device = state.devices.get_mut(&loc.uuid).ok_or(StoreError::NotFound)?;
            let removed = match &loc.endpoint_id {
                Some(ep_id) => device.find_endpoint_mut(ep_id).map(|e| {
                    let before = e.metadatas.len();
                    e.metadatas.retain(|m| m.id != leaf);
                    before != e.metadatas.len()
                }),
                None => {
                    let before = device.metadatas.len();
                    device.metadatas.retain(|m| m.id != leaf);
                    Some(before != device.metadatas.len())
                }
            }
            .unwrap_or(false);
            if !removed {
                return Err(StoreError::NotFound);
            }
        }
        state.index.remove(uri_str);

        let snapshot = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?.clone();
        self.persist_device(&snapshot).await
    }

    // -- Read ----------------------------------------------------------

    pub async fn get_by_uri(&self, uri_str: &str) -> Result<Found, StoreError> {
        let state = self.state.lock().await;
        resolve(&state, uri_str)
    }

    pub async fn get_resource_by_uri(&self, uri_str: &str) -> Result<Resource, StoreError> {
        match self.get_by_uri(uri_str).await? {
            Found::Resource(r) => Ok(r),
            _ => Err(StoreError::NotFound),
        }
    }

    pub async fn get_metadata_by_uri(&self, uri_str: &str) -> Result<Metadata, StoreError> {
        match self.get_by_uri(uri_str).await? {
            Found::Metadata(m) => Ok(m),
            _ => Err(StoreError::NotFound),
        }
    }

    pub async fn get_endpoint_by_uri(&self, uri_str: &str) -> Result<Endpoint, StoreError> {
        match self.get_by_uri(uri_str).await? {
            Found::Endpoint(e) => Ok(e),
            _ => Err(StoreError::NotFound),
        }
    }

    /// Accepts any descendant URI and returns the containing device.
    pub async fn get_device_by_uri(&self, uri_str: &str) -> Result<Device, StoreError> {
        let loc = uri::parse(uri_str).map_err(|_| StoreError::InvalidUri)?;
        let state = self.state.lock().await;
        state.devices.get(&loc.uuid).cloned().ok_or(StoreError::NotFound)
    }

    pub async fn get_resources_by_uri_regex(&self, pattern: &Regex) -> Vec<Resource> {
        let state = self.state.lock().await;
        let mut out = Vec::new();
        for device in state.devices.values() {
            out.extend(device.resources.iter().filter(|r| pattern.is_match(&r.uri)).cloned());
            for ep in &device.endpoints {
                out.extend(ep.resources.iter().filter(|r| pattern.is_match(&r.uri)).cloned());
            }
        }
        out
    }

    pub async fn get_metadata_by_uri_regex(&self, pattern: &Regex) -> Vec<Metadata> {
        let state = self.state.lock().await;
        let mut out = Vec::new();
        for device in state.devices.values() {
            out.extend(device.metadatas.iter().filter(|m| pattern.is_match(&m.uri)).cloned());
            for ep in &device.endpoints {
                out.extend(ep.metadatas.iter().filter(|m| pattern.is_match(&m.uri)).cloned());
            }
        }
        out
    }

    pub async fn get_endpoints_by_profile(&self, profile: &str) -> Vec<Endpoint> {
        let state = self.state.lock().await;
        state
            .devices
            .values()
            .flat_map(|d| d.endpoints.iter())
            .filter(|e| e.profile == profile)
            .cloned()
            .collect()
    }

    /// Every persisted device, for the startup worker pool (spec.md
    /// §4.2.4) and the descriptor-reprocessing sweep (spec.md §4.5).
    pub async fn all_devices(&self) -> Vec<Device> {
        let state = self.state.lock().await;
        state.devices.values().cloned().collect()
    }

    pub async fn get_devices_by_device_class(&self, class: &str) -> Vec<Device> {
        let state = self.state.lock().await;
        state.devices.values().filter(|d| d.device_class == class).cloned().collect()
    }

    pub async fn get_devices_by_device_driver(&self, driver: &str) -> Vec<Device> {
        let state = self.state.lock().await;
        state.devices.values().filter(|d| d.managing_device_driver == driver).cloned().collect()
    }

    pub async fn get_devices_by_endpoint_profile(&self, profile: &str) -> Vec<Device> {
        let state = self.state.lock().await;
        state
            .devices
            .values()
            .filter(|d| d.endpoints.iter().any(|e| e.profile == profile))
            .cloned()
            .collect()
    }

    /// True for any device URI; for endpoints/resources/metadata, true
    /// only when the owning endpoint (if any) is enabled. A URI with no
    /// index entry yet (brand-new metadata) is still evaluated by parsing
    /// it and checking the referenced endpoint (spec.md §4.1).
    pub async fn is_uri_accessible(&self, uri_str: &str) -> bool {
        let Ok(loc) = uri::parse(uri_str) else { return false };
        if loc.kind == LocatorKind::Device {
            return true;
        }
        let state = self.state.lock().await;
        let Some(device) = state.devices.get(&loc.uuid) else { return false };
        match &loc.endpoint_id {
            Some(ep_id) => device.find_endpoint(ep_id).is_some_and(|e| e.enabled),
            None => true,
        }
    }

    // -- System properties -----------------------------------------------

    pub async fn get_system_property(&self, key: &str) -> Option<String> {
        let state = self.state.lock().await;
        state.system_properties.get(key).cloned()
    }

    pub async fn set_system_property(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.system_properties.insert(key.into(), value.into());
        let snapshot = state.system_properties.clone();
        self.storage.save_system_properties(&snapshot).await.map_err(|_| StoreError::Persistence)
    }

    pub async fn remove_system_property(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.system_properties.remove(key);
        let snapshot = state.system_properties.clone();
        self.storage.save_system_properties(&snapshot).await.map_err(|_| StoreError::Persistence)
    }

    pub async fn restore(&self, staging_dir: &std::path::Path) -> RestoreResult {
        self.storage.restore(staging_dir).await
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.state.lock().await;
        let mut endpoint_count = 0;
        let mut resource_count = 0;
        let mut dirty_device_count = 0;
        for device in state.devices.values() {
            endpoint_count += device.endpoints.len();
            resource_count +=
                device.resources.len() + device.endpoints.iter().map(|e| e.resources.len()).sum::<usize>();
            if device.dirty {
                dirty_device_count += 1;
            }
        }
        StoreStats {
            device_count: state.devices.len(),
            endpoint_count,
            resource_count,
            dirty_device_count,
        }
    }
}

fn resolve(state: &State, uri_str: &str) -> Result<Found, StoreError> {
    let loc = uri::parse(uri_str).map_err(|_| StoreError::InvalidUri)?;
    let device = state.devices.get(&loc.uuid).ok_or(StoreError::NotFound)?;
    match loc.kind {
        LocatorKind::Device => Ok(Found::Device(device.clone())),
        LocatorKind::Endpoint => {
            let ep_id = loc.endpoint_id.as_deref().ok_or(StoreError::InvalidUri)?;
            device.find_endpoint(ep_id).cloned().map(Found::Endpoint).ok_or(StoreError::NotFound)
        }
        LocatorKind::Resource => {
            let leaf = loc.leaf_id.as_deref().ok_or(StoreError::InvalidUri)?;
            let resource = match &loc.endpoint_id {
                Some(ep_id) => device.find_endpoint(ep_id).and_then(|e| e.find_resource(leaf)),
                None => device.resources.iter().find(|r| r.id == leaf),
            };
            resource.cloned().map(Found::Resource).ok_or(StoreError::NotFound)
        }
        LocatorKind::Metadata => {
            let leaf = loc.leaf_id.as_deref().ok_or(StoreError::InvalidUri)?;
            let metadata = match &loc.endpoint_id {
                Some(ep_id) => device
                    .find_endpoint(ep_id)
                    .and_then(|e| e.metadatas.iter().find(|m| m.id == leaf)),
                None => device.metadatas.iter().find(|m| m.id == leaf),
            };
            metadata.cloned().map(Found::Metadata).ok_or(StoreError::NotFound)
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
