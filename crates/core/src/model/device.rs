// SPDX-License-Identifier: Apache-2.0

//! The device/endpoint/resource/metadata graph (spec.md §3).

use serde::{Deserialize, Serialize};

use crate::model::uri;

bitflags::bitflags! {
    /// Bitmask over a resource's capabilities, grounded in BartonCore's
    /// `RESOURCE_MODE_*` constants (`icDeviceResource.c`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ResourceMode: u16 {
        const READABLE         = 0b0000_0001;
        const WRITABLE         = 0b0000_0010;
        const EXECUTABLE       = 0b0000_0100;
        const DYNAMIC          = 0b0000_1000;
        const DYNAMIC_CAPABLE  = 0b0001_0000;
        const EMIT_EVENTS      = 0b0010_0000;
        const SENSITIVE        = 0b0100_0000;
        const LAZY_SAVE_NEXT   = 0b1000_0000;
    }
}

impl ResourceMode {
    /// Normalize a caller-supplied mode so the two cross-bit invariants in
    /// spec.md §3 hold: `SENSITIVE` is monotonic (never cleared) and
    /// `DYNAMIC` implies `DYNAMIC_CAPABLE`.
    ///
    /// `current` is the resource's existing mode (empty for a brand-new
    /// resource); `requested` is the mode the caller is trying to set.
    pub fn normalize(current: ResourceMode, requested: ResourceMode) -> ResourceMode {
        let mut mode = requested;
        if current.contains(ResourceMode::SENSITIVE) {
            mode |= ResourceMode::SENSITIVE;
        }
        if mode.contains(ResourceMode::DYNAMIC) {
            mode |= ResourceMode::DYNAMIC_CAPABLE;
        }
        mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachingPolicy {
    Never,
    Always,
}

/// A typed, possibly readable/writable/executable attribute of a device or
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub device_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    pub uri: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub value: Option<String>,
    pub mode: ResourceMode,
    pub caching_policy: CachingPolicy,
    #[serde(default)]
    pub date_of_last_sync_millis: u64,
}

impl Resource {
    pub fn new(
        owner_uri: &str,
        device_uuid: impl Into<String>,
        endpoint_id: Option<String>,
        id: impl Into<String>,
        resource_type: impl Into<String>,
        mode: ResourceMode,
        caching_policy: CachingPolicy,
    ) -> Result<Self, crate::error::StoreError> {
        let id = id.into();
        let uri = uri::resource_uri(owner_uri, &id)?;
        Ok(Self {
            id,
            device_uuid: device_uuid.into(),
            endpoint_id,
            uri,
            resource_type: resource_type.into(),
            value: None,
            mode: ResourceMode::normalize(ResourceMode::empty(), mode),
            caching_policy,
            date_of_last_sync_millis: 0,
        })
    }

    /// Apply a new mode, enforcing the sensitive-monotonicity and
    /// dynamic-implies-dynamic-capable invariants.
    pub fn set_mode(&mut self, requested: ResourceMode) {
        self.mode = ResourceMode::normalize(self.mode, requested);
    }

    pub fn set_value(&mut self, value: Option<String>, now_millis: u64) -> bool {
        let changed = self.value != value;
        self.value = value;
        self.date_of_last_sync_millis = now_millis;
        changed
    }
}

/// An out-of-band key-value pair attached to a device or endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    pub device_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    pub uri: String,
    pub value: String,
}

impl Metadata {
    pub fn new(
        owner_uri: &str,
        device_uuid: impl Into<String>,
        endpoint_id: Option<String>,
        id: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, crate::error::StoreError> {
        let id = id.into();
        let uri = uri::metadata_uri(owner_uri, &id)?;
        Ok(Self { id, device_uuid: device_uuid.into(), endpoint_id, uri, value: value.into() })
    }

    /// Render a value on load: if it parses as a JSON object, re-serialize
    /// it canonically; otherwise keep the payload verbatim (spec.md §3).
    pub fn canonicalize_value(raw: &str) -> String {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v @ serde_json::Value::Object(_)) => {
                serde_json::to_string(&v).unwrap_or_else(|_| raw.to_owned())
            }
            _ => raw.to_owned(),
        }
    }
}

/// A logically separable service on a device (a lock on a keypad, a
/// thermostat on a hub).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub device_uuid: String,
    pub profile: String,
    pub profile_version: u8,
    pub enabled: bool,
    pub uri: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub metadatas: Vec<Metadata>,
}

impl Endpoint {
    pub fn new(
        device_uri: &str,
        device_uuid: impl Into<String>,
        id: impl Into<String>,
        profile: impl Into<String>,
        profile_version: u8,
    ) -> Result<Self, crate::error::StoreError> {
        let id = id.into();
        if !uri::is_valid_id(&id) {
            return Err(crate::error::StoreError::InvalidUri);
        }
        let uri = format!("{device_uri}{}{id}", uri::ENDPOINT_MARKER);
        Ok(Self {
            id,
            device_uuid: device_uuid.into(),
            profile: profile.into(),
            profile_version,
            enabled: true,
            uri,
            resources: Vec::new(),
            metadatas: Vec::new(),
        })
    }

    pub fn find_resource(&self, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.id == id)
    }

    pub fn find_resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }

    pub fn find_metadata_mut(&mut self, id: &str) -> Option<&mut Metadata> {
        self.metadatas.iter_mut().find(|m| m.id == id)
    }
}

/// A managed physical endpoint controlled via a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    #[serde(rename = "deviceClass")]
    pub device_class: String,
    #[serde(rename = "deviceClassVersion")]
    pub device_class_version: u8,
    #[serde(rename = "deviceDriver")]
    pub managing_device_driver: String,
    pub uri: String,
    #[serde(rename = "deviceEndpoints", default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(rename = "deviceResources", default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub metadatas: Vec<Metadata>,

    /// Pending-write bit: set by any mutation, cleared on flush. Never
    /// serialized — it is process-local bookkeeping, not device state.
    #[serde(skip)]
    pub dirty: bool,
}

impl Device {
    pub fn new(
        uuid: impl Into<String>,
        device_class: impl Into<String>,
        device_class_version: u8,
        managing_device_driver: impl Into<String>,
    ) -> Result<Self, crate::error::StoreError> {
        let uuid = uuid.into();
        let uri = uri::device_uri(&uuid)?;
        Ok(Self {
            uuid,
            device_class: device_class.into(),
            device_class_version,
            managing_device_driver: managing_device_driver.into(),
            uri,
            endpoints: Vec::new(),
            resources: Vec::new(),
            metadatas: Vec::new(),
            dirty: false,
        })
    }

    pub fn find_endpoint(&self, id: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn find_endpoint_mut(&mut self, id: &str) -> Option<&mut Endpoint> {
        self.endpoints.iter_mut().find(|e| e.id == id)
    }

    pub fn find_resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.iter_mut().find(|r| r.id == id)
    }

    pub fn find_metadata_mut(&mut self, id: &str) -> Option<&mut Metadata> {
        self.metadatas.iter_mut().find(|m| m.id == id)
    }

    /// True iff every endpoint is disabled (spec.md §3: destroying the
    /// device shell when the last enabled endpoint is disabled is a policy
    /// decision made by the caller, not this predicate).
    pub fn all_endpoints_disabled(&self) -> bool {
        !self.endpoints.is_empty() && self.endpoints.iter().all(|e| !e.enabled)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
