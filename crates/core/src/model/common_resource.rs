// SPDX-License-Identifier: Apache-2.0

//! Resource ids every paired device carries regardless of driver, populated
//! by the pair pipeline before any driver-specific resource is created.

pub const MANUFACTURER: &str = "manufacturer";
pub const MODEL: &str = "model";
pub const HARDWARE_VERSION: &str = "hardwareVersion";
pub const FIRMWARE_VERSION: &str = "firmwareVersion";
pub const FIRMWARE_UPDATE_STATUS: &str = "firmwareUpdateStatus";
pub const DATE_ADDED: &str = "dateAdded";
pub const DATE_LAST_CONTACTED: &str = "dateLastContacted";
pub const COMM_FAIL: &str = "commFail";
pub const TIME_ZONE: &str = "timeZone";
