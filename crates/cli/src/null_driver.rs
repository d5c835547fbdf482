// SPDX-License-Identifier: Apache-2.0

//! `NullDriver`/`NullSubsystem`: the smoke-test pair shipped alongside the
//! daemon shell so `--smoke-test` can prove the wiring (registries, object
//! store, watchdog, lifecycle coordinator) works end to end without a real
//! radio stack. Concrete drivers are out of scope for this crate (spec.md
//! §1) — a deployment links its own against `gatewayd-core` instead.

use std::sync::Arc;

use gatewayd_core::registry::driver::Driver;
use gatewayd_core::registry::subsystem::{Subsystem, SubsystemReadySink};

/// Answers every callback with the trait defaults except the ones required
/// to complete pairing, which always succeed immediately.
pub struct NullDriver {
    device_classes: Vec<String>,
}

impl NullDriver {
    pub fn new() -> Self {
        Self { device_classes: vec!["nullDevice".to_owned()] }
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Driver for NullDriver {
    fn name(&self) -> &str {
        "nullDriver"
    }

    fn supported_device_classes(&self) -> &[String] {
        &self.device_classes
    }

    fn never_reject(&self) -> bool {
        true
    }

    async fn configure_device(&self, uuid: &str) -> bool {
        tracing::debug!(uuid, "nullDriver: configure_device");
        true
    }

    async fn register_resources(&self, uuid: &str) -> bool {
        tracing::debug!(uuid, "nullDriver: register_resources");
        true
    }
}

/// A backing service with nothing to bring up; reports ready synchronously.
pub struct NullSubsystem;

#[async_trait::async_trait]
impl Subsystem for NullSubsystem {
    fn name(&self) -> &str {
        "nullSubsystem"
    }

    async fn initialize(&self, sink: Arc<dyn SubsystemReadySink>) -> bool {
        sink.ready("nullSubsystem").await;
        true
    }
}

#[cfg(test)]
#[path = "null_driver_tests.rs"]
mod tests;
