// SPDX-License-Identifier: Apache-2.0

//! Descriptor *lookup*, as distinct from the allow/deny-list download
//! machinery in the parent module. Parsing the on-wire descriptor payload
//! is explicitly out of scope (spec.md §1: "XML parsing of the descriptor
//! payload — only the validator interface is specified"), so matching a
//! discovered device against the currently-active allow list is likewise an
//! injected seam: whatever owns the real parser implements
//! [`DescriptorCatalog`] over the bytes `DescriptorHandler` already
//! downloaded and validated.

use serde::{Deserialize, Serialize};

/// The four-tuple a discovered device is matched against (spec.md §4.2.1
/// step 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    pub hardware_version: String,
    pub firmware_version: String,
}

/// Behavioral overrides an allow-list entry may carry alongside the bare
/// admission decision. `None` fields fall back to process-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorEntry {
    /// Per-device `commFailOverrideSeconds`, written as device metadata the
    /// moment a match is found (spec.md §4.2.1 step 4).
    #[serde(default)]
    pub comm_fail_override_seconds: Option<u64>,
    /// Whether disabling this device's last enabled endpoint destroys the
    /// device shell outright rather than leaving it present but emptied
    /// (spec.md §3 Endpoint lifecycle).
    #[serde(default)]
    pub cascade_delete: bool,
    /// Opaque firmware-upgrade instructions, carried but never interpreted
    /// by the core (spec.md §9 resolved open question: `upgradeAction`
    /// stays descriptor-data-carried).
    #[serde(default)]
    pub latest_firmware: Option<serde_json::Value>,
}

/// Looks up admission/behavior data for a discovered device. Implemented by
/// whatever owns the real descriptor-payload parser; the core only ever
/// calls `lookup`.
pub trait DescriptorCatalog: Send + Sync {
    fn lookup(&self, identity: &DeviceIdentity) -> Option<DescriptorEntry>;
}

/// A catalog that never matches anything — the default for deployments that
/// haven't wired a real descriptor parser yet. Combined with a driver's
/// `never_reject`, pairing still works; without it, every `deviceFound`
/// hits `LifecycleError::DescriptorMissing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyDescriptorCatalog;

impl DescriptorCatalog for EmptyDescriptorCatalog {
    fn lookup(&self, _identity: &DeviceIdentity) -> Option<DescriptorEntry> {
        None
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
