// SPDX-License-Identifier: Apache-2.0

//! Closed, `Copy` error enums for each subsystem, one per component rather
//! than a single catch-all — matching spec.md §7's error-kind taxonomy.
//! Context (which UUID, which URI) is logged at the raise site via
//! `tracing::warn!`, not carried on the error value itself.

use std::fmt;

/// Errors from the object store (`store` module).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    InvalidUuid,
    InvalidUri,
    NotFound,
    AlreadyExists,
    Persistence,
    RollbackFailed,
}

impl StoreError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUuid => "INVALID_UUID",
            Self::InvalidUri => "INVALID_URI",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Persistence => "PERSISTENCE",
            Self::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for StoreError {}

/// Errors from the lifecycle coordinator's pair/discovery/reconfigure flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    Denylisted,
    DescriptorMissing,
    DriverRejected,
    FilterMismatch,
    MarkedForRemoval,
    NoEligibleDriver,
    AlreadyDiscovering,
    ReconfigurationInProgress,
    Internal,
}

impl LifecycleError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denylisted => "DENYLISTED",
            Self::DescriptorMissing => "DESCRIPTOR_MISSING",
            Self::DriverRejected => "DRIVER_REJECTED",
            Self::FilterMismatch => "FILTER_MISMATCH",
            Self::MarkedForRemoval => "MARKED_FOR_REMOVAL",
            Self::NoEligibleDriver => "NO_ELIGIBLE_DRIVER",
            Self::AlreadyDiscovering => "ALREADY_DISCOVERING",
            Self::ReconfigurationInProgress => "RECONFIGURATION_IN_PROGRESS",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for LifecycleError {}

/// Errors from the descriptor (allow/deny list) handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    InvalidUrl,
    Download,
    Validation,
    Io,
}

impl DescriptorError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "INVALID_URL",
            Self::Download => "DOWNLOAD",
            Self::Validation => "VALIDATION",
            Self::Io => "IO",
        }
    }
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for DescriptorError {}

/// Errors from driver/subsystem registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    NullName,
    DuplicateName,
}

impl RegistryError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NullName => "NULL_NAME",
            Self::DuplicateName => "DUPLICATE_NAME",
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for RegistryError {}
