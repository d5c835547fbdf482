// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for exercising `gatewayd-core` directly.
//!
//! This core has no network surface and no binary of its own (spec.md §1),
//! so there is nothing to spawn as a subprocess: these tests drive
//! `GatewayCore`/`LifecycleCoordinator`/`DiscoveryCoordinator` in-process
//! against a configurable mock driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatewayd_core::descriptor::catalog::DeviceIdentity;
use gatewayd_core::registry::driver::Driver;

/// A driver whose rejection/recovery/custom-monitoring posture is set up
/// front by each test and whose call counts each test asserts on after the
/// fact. Every counter is an atomic rather than behind a lock since `Driver`
/// methods take `&self`.
pub struct MockDriver {
    pub name: String,
    pub classes: Vec<String>,
    pub never_reject: AtomicBool,
    pub supports_recovery: AtomicBool,
    pub custom_comm_fail: AtomicBool,
    pub class_version: AtomicUsize,
    pub configure_result: AtomicBool,
    pub register_result: AtomicBool,
    pub discover_result: AtomicBool,
    pub recover_result: AtomicBool,

    pub discover_calls: AtomicUsize,
    pub recover_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub configure_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub removed_calls: AtomicUsize,
    pub synchronize_calls: AtomicUsize,
    pub comm_fail_calls: AtomicUsize,
    pub comm_fail_timeout_secs: AtomicUsize,
}

impl MockDriver {
    pub fn new(name: impl Into<String>, classes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            never_reject: AtomicBool::new(false),
            supports_recovery: AtomicBool::new(false),
            custom_comm_fail: AtomicBool::new(false),
            class_version: AtomicUsize::new(0),
            configure_result: AtomicBool::new(true),
            register_result: AtomicBool::new(true),
            discover_result: AtomicBool::new(true),
            recover_result: AtomicBool::new(true),
            discover_calls: AtomicUsize::new(0),
            recover_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            configure_calls: AtomicUsize::new(0),
            register_calls: AtomicUsize::new(0),
            removed_calls: AtomicUsize::new(0),
            synchronize_calls: AtomicUsize::new(0),
            comm_fail_calls: AtomicUsize::new(0),
            comm_fail_timeout_secs: AtomicUsize::new(0),
        })
    }

    pub fn never_reject(self: &Arc<Self>) -> Arc<Self> {
        self.never_reject.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn supports_recovery(self: &Arc<Self>) -> Arc<Self> {
        self.supports_recovery.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn failing_discovery(self: &Arc<Self>) -> Arc<Self> {
        self.discover_result.store(false, Ordering::SeqCst);
        self.clone()
    }

    pub fn with_class_version(self: &Arc<Self>, version: u8) -> Arc<Self> {
        self.class_version.store(version as usize, Ordering::SeqCst);
        self.clone()
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_device_classes(&self) -> &[String] {
        &self.classes
    }

    fn never_reject(&self) -> bool {
        self.never_reject.load(Ordering::SeqCst)
    }

    fn custom_comm_fail(&self) -> bool {
        self.custom_comm_fail.load(Ordering::SeqCst)
    }

    fn supports_recovery(&self) -> bool {
        self.supports_recovery.load(Ordering::SeqCst)
    }

    async fn discover_devices(&self, _device_class: &str) -> bool {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.discover_result.load(Ordering::SeqCst)
    }

    async fn recover_devices(&self, _device_class: &str) -> bool {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        self.recover_result.load(Ordering::SeqCst)
    }

    async fn stop_discovering_devices(&self, _device_class: &str) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn configure_device(&self, _uuid: &str) -> bool {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        self.configure_result.load(Ordering::SeqCst)
    }

    async fn register_resources(&self, _uuid: &str) -> bool {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        self.register_result.load(Ordering::SeqCst)
    }

    async fn fetch_initial_resource_values(&self, _uuid: &str) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn device_removed(&self, _uuid: &str) {
        self.removed_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn synchronize_device(&self, _uuid: &str) {
        self.synchronize_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn communication_failed(&self, _uuid: &str) {
        self.comm_fail_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn comm_fail_timeout_secs_changed(&self, _uuid: &str, secs: u64) {
        self.comm_fail_timeout_secs.store(secs as usize, Ordering::SeqCst);
    }

    fn get_device_class_version(&self, _device_class: &str) -> u8 {
        self.class_version.load(Ordering::SeqCst) as u8
    }
}

/// A stand-in `DeviceIdentity` distinguished only by a tag, for tests that
/// don't care about the manufacturer/model/version fields themselves.
pub fn identity(tag: &str) -> DeviceIdentity {
    DeviceIdentity {
        manufacturer: format!("mfg-{tag}"),
        model: format!("model-{tag}"),
        hardware_version: "1".to_owned(),
        firmware_version: "1".to_owned(),
    }
}

/// Polls `predicate` until it's true or `timeout` elapses, for asserting on
/// state a background task mutates asynchronously (discovery stop events,
/// descriptor-ready flips). Mirrors the teacher's `wait_healthy` polling
/// pattern, just against in-process state instead of an HTTP health check.
pub async fn wait_until<F: Fn() -> bool>(timeout: Duration, predicate: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
