// SPDX-License-Identifier: Apache-2.0

//! Discovery and recovery state machine: one task per active device class,
//! each driving every eligible driver's `discoverDevices`/`recoverDevices`
//! until an explicit stop or its timeout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Notify;

use crate::error::LifecycleError;
use crate::events::{EventSink, GatewayEvent};
use crate::registry::driver::DriverRegistry;

/// A caller-supplied discovery filter: a resource URI/value pair must both
/// match for at least one resource on the paired device (spec.md §4.2.1
/// step 9).
#[derive(Debug, Clone)]
pub struct DiscoveryFilter {
    pub uri: Regex,
    pub value: Regex,
}

struct ActiveClass {
    stop: Arc<Notify>,
}

/// Per-class discovery/recovery control state. Guarded by a plain
/// `tokio::sync::Mutex` (lock #2 in the acquisition order) since starting
/// and stopping a class briefly holds it across awaiting driver calls.
pub struct DiscoveryCoordinator {
    drivers: Arc<DriverRegistry>,
    events: Arc<dyn EventSink>,
    active: tokio::sync::Mutex<HashMap<String, ActiveClass>>,
}

impl DiscoveryCoordinator {
    pub fn new(drivers: Arc<DriverRegistry>, events: Arc<dyn EventSink>) -> Self {
        Self { drivers, events, active: tokio::sync::Mutex::new(HashMap::new()) }
    }

    pub async fn is_active(&self, class: &str) -> bool {
        self.active.lock().await.contains_key(class)
    }

    /// `discoverStart(classes, filters, timeoutSecs, findOrphans)`. Returns
    /// `Ok(())` once every eligible class has a task spawned; a class with
    /// zero eligible drivers is simply skipped (spec.md §8 scenario 3: a
    /// `neverReject=false` driver alone when descriptors aren't ready still
    /// yields "discovery started", just with nothing eligible for it).
    pub async fn discover_start(
        self: Arc<Self>,
        classes: &[String],
        timeout_secs: u64,
        find_orphans: bool,
        descriptors_ready: bool,
    ) -> Result<(), LifecycleError> {
        let mut active = self.active.lock().await;
        let to_start: Vec<String> =
            classes.iter().filter(|c| !active.contains_key(c.as_str())).cloned().collect();

        self.events.emit(GatewayEvent::DiscoveryStarted {
            classes: classes.to_vec(),
            timeout_secs,
            find_orphans,
        });

        for class in to_start {
            let eligible: Vec<_> = self
                .drivers
                .drivers_for_class(&class)
                .into_iter()
                .filter(|d| {
                    if find_orphans && !d.supports_recovery() {
                        return false;
                    }
                    descriptors_ready || d.never_reject()
                })
                .collect();
            if eligible.is_empty() {
                continue;
            }

            let stop = Arc::new(Notify::new());
            active.insert(class.clone(), ActiveClass { stop: stop.clone() });

            let coordinator = self.clone();
            tokio::spawn(coordinator.run_class(class, eligible, timeout_secs, find_orphans, stop));
        }
        Ok(())
    }

    async fn run_class(
        self: Arc<Self>,
        class: String,
        eligible: Vec<Arc<dyn crate::registry::driver::Driver>>,
        timeout_secs: u64,
        find_orphans: bool,
        stop: Arc<Notify>,
    ) {
        let mut started = Vec::new();
        for driver in &eligible {
            let ok = if find_orphans {
                driver.recover_devices(&class).await
            } else {
                driver.discover_devices(&class).await
            };
            if ok {
                started.push(driver.clone());
            }
        }

        if timeout_secs > 0 {
            tokio::select! {
                _ = stop.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {}
            }
        } else {
            stop.notified().await;
        }

        for driver in &started {
            driver.stop_discovering_devices(&class).await;
        }

        self.active.lock().await.remove(&class);

        // spec.md §8 scenarios 2/3: false iff some eligible driver's
        // discover/recover call failed.
        let all_started = started.len() == eligible.len() && !eligible.is_empty();
        if find_orphans {
            self.events.emit(GatewayEvent::RecoveryStopped { device_class: class, all_started });
        } else {
            self.events.emit(GatewayEvent::DiscoveryStopped { device_class: class, all_started });
        }
    }

    /// `discoverStop(classes)`. `None` stops every active class.
    pub async fn discover_stop(&self, classes: Option<&[String]>) {
        let active = self.active.lock().await;
        match classes {
            Some(classes) => {
                for class in classes {
                    if let Some(entry) = active.get(class) {
                        entry.stop.notify_one();
                    }
                }
            }
            None => {
                for entry in active.values() {
                    entry.stop.notify_one();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
