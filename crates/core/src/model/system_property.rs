// SPDX-License-Identifier: Apache-2.0

//! Process-wide, versioned key→value system properties (spec.md §3, §6).

use std::collections::HashMap;

pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";
pub const CURRENT_SCHEMA_VERSION: &str = "2";

pub const CURRENT_DEVICE_DESCRIPTOR_URL: &str = "currentDeviceDescriptorUrl";
pub const CURRENT_DEVICE_DESCRIPTOR_MD5: &str = "currentDeviceDescriptorMd5";
pub const CURRENT_DENYLIST_URL: &str = "currentDenylistUrl";
pub const CURRENT_DENYLIST_MD5: &str = "currentDenylistMd5";
pub const DEVICE_DESCRIPTOR_BYPASS: &str = "deviceDescriptorBypass";
pub const DENYLISTED_DEVICE_UUIDS: &str = "denylistedDevices";
pub const TIME_ZONE: &str = "timeZone";
pub const FIRMWARE_BASE_URL: &str = "firmwareBaseUrl";
pub const COMM_FAIL_TROUBLE_DELAY_MINUTES: &str = "commFailTroubleDelayMinutes";
pub const FAST_COMMFAIL: &str = "fastCommfail";

/// Per-device metadata keys of the public device-metadata contract.
pub mod metadata_key {
    pub const COMM_FAIL_OVERRIDE_SECONDS: &str = "commFailOverrideSeconds";
    pub const SHOULD_NOT_PERSIST_AFTER_RMA: &str = "shouldNotPersistAfterRMA";
    pub const RECONFIGURATION_REQUIRED: &str = "reconfigurationRequired";
}

/// Legacy key renames applied on load, oldest-known-name first. Grounded in
/// BartonCore's blacklist→denylist rename in `jsonDatabase.c`.
const LEGACY_RENAMES: &[(&str, &str)] = &[
    ("currentBlacklistUrl", "currentDenylistUrl"),
    ("currentBlacklistMd5", "currentDenylistMd5"),
];

/// Apply known legacy key renames in place and stamp the current schema
/// version. Idempotent: calling this twice on an already-migrated map is a
/// no-op beyond rewriting the schema version key.
pub fn migrate(props: &mut HashMap<String, String>) {
    for (old, new) in LEGACY_RENAMES {
        if let Some(value) = props.remove(*old) {
            props.entry((*new).to_owned()).or_insert(value);
        }
    }
    props.insert(SCHEMA_VERSION_KEY.to_owned(), CURRENT_SCHEMA_VERSION.to_owned());
}

pub fn subsystem_version_key(subsystem_name: &str) -> String {
    format!("{subsystem_name}SubsystemVersion")
}

#[cfg(test)]
#[path = "system_property_tests.rs"]
mod tests;
