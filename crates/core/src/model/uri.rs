// SPDX-License-Identifier: Apache-2.0

//! URI grammar and the `Locator` sum type.
//!
//! ```text
//! device   := "/" UUID
//! endpoint := device "/ep/" ID
//! resource := (device | endpoint) "/r/" ID
//! metadata := (device | endpoint) "/m/" ID
//! ```
//!
//! A [`Locator`] is the stable, owned key used by the secondary URI index
//! (see `store::index`) — never a pointer into the primary device map.

use crate::error::StoreError;

pub const ENDPOINT_MARKER: &str = "/ep/";
pub const RESOURCE_MARKER: &str = "/r/";
pub const METADATA_MARKER: &str = "/m/";

/// Which kind of entity a [`Locator`] points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorKind {
    Device,
    Endpoint,
    Resource,
    Metadata,
}

/// A parsed, stable reference into the device graph: owning device UUID,
/// optional owning endpoint, and — for resources/metadata — the leaf id.
/// Resolved back to a live node through the primary map on every read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub kind: LocatorKind,
    pub uuid: String,
    pub endpoint_id: Option<String>,
    pub leaf_id: Option<String>,
}

/// True for non-empty strings made only of printable, non-'/' characters —
/// the shape BartonCore's `stringIsValid`-style checks require of UUIDs and
/// ids embedded in a URI path segment.
pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) && !s.contains('/')
}

pub fn device_uri(uuid: &str) -> Result<String, StoreError> {
    if !is_valid_id(uuid) {
        return Err(StoreError::InvalidUuid);
    }
    Ok(format!("/{uuid}"))
}

pub fn endpoint_uri(uuid: &str, endpoint_id: &str) -> Result<String, StoreError> {
    if !is_valid_id(endpoint_id) {
        return Err(StoreError::InvalidUri);
    }
    Ok(format!("{}{ENDPOINT_MARKER}{endpoint_id}", device_uri(uuid)?))
}

pub fn resource_uri(owner_uri: &str, resource_id: &str) -> Result<String, StoreError> {
    if !is_valid_id(resource_id) {
        return Err(StoreError::InvalidUri);
    }
    Ok(format!("{owner_uri}{RESOURCE_MARKER}{resource_id}"))
}

pub fn metadata_uri(owner_uri: &str, metadata_id: &str) -> Result<String, StoreError> {
    if !is_valid_id(metadata_id) {
        return Err(StoreError::InvalidUri);
    }
    Ok(format!("{owner_uri}{METADATA_MARKER}{metadata_id}"))
}

/// Parse any of the four URI shapes into a [`Locator`]. Round-trips with
/// `device_uri`/`endpoint_uri`/`resource_uri`/`metadata_uri`: for all valid
/// inputs, `parse(build(...)).unwrap() == (uuid, endpoint_id, leaf_id, kind)`.
pub fn parse(uri: &str) -> Result<Locator, StoreError> {
    let rest = uri.strip_prefix('/').ok_or(StoreError::InvalidUri)?;
    let segments: Vec<&str> = rest.split('/').collect();

    match segments.as_slice() {
        [uuid] if is_valid_id(uuid) => Ok(Locator {
            kind: LocatorKind::Device,
            uuid: (*uuid).to_owned(),
            endpoint_id: None,
            leaf_id: None,
        }),
        [uuid, "ep", epid] if is_valid_id(uuid) && is_valid_id(epid) => Ok(Locator {
            kind: LocatorKind::Endpoint,
            uuid: (*uuid).to_owned(),
            endpoint_id: Some((*epid).to_owned()),
            leaf_id: None,
        }),
        [uuid, "r", rid] if is_valid_id(uuid) && is_valid_id(rid) => Ok(Locator {
            kind: LocatorKind::Resource,
            uuid: (*uuid).to_owned(),
            endpoint_id: None,
            leaf_id: Some((*rid).to_owned()),
        }),
        [uuid, "m", mid] if is_valid_id(uuid) && is_valid_id(mid) => Ok(Locator {
            kind: LocatorKind::Metadata,
            uuid: (*uuid).to_owned(),
            endpoint_id: None,
            leaf_id: Some((*mid).to_owned()),
        }),
        [uuid, "ep", epid, "r", rid]
            if is_valid_id(uuid) && is_valid_id(epid) && is_valid_id(rid) =>
        {
            Ok(Locator {
                kind: LocatorKind::Resource,
                uuid: (*uuid).to_owned(),
                endpoint_id: Some((*epid).to_owned()),
                leaf_id: Some((*rid).to_owned()),
            })
        }
        [uuid, "ep", epid, "m", mid]
            if is_valid_id(uuid) && is_valid_id(epid) && is_valid_id(mid) =>
        {
            Ok(Locator {
                kind: LocatorKind::Metadata,
                uuid: (*uuid).to_owned(),
                endpoint_id: Some((*epid).to_owned()),
                leaf_id: Some((*mid).to_owned()),
            })
        }
        _ => Err(StoreError::InvalidUri),
    }
}

#[cfg(test)]
#[path = "uri_tests.rs"]
mod tests;
