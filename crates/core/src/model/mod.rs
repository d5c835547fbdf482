// SPDX-License-Identifier: Apache-2.0

//! The object model: devices, endpoints, resources, metadata, system
//! properties, and the URI grammar that addresses all of them.

pub mod common_resource;
pub mod device;
pub mod system_property;
pub mod uri;

pub use device::{CachingPolicy, Device, Endpoint, Metadata, Resource, ResourceMode};
pub use uri::{Locator, LocatorKind};
