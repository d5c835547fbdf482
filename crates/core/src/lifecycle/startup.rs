// SPDX-License-Identifier: Apache-2.0

//! Startup device initialization (spec.md §4.2.4): every persisted device
//! gets either `reconfigureDevice` or `driver.synchronizeDevice`, fanned out
//! over a bounded worker pool so a slow driver can't serialize the whole
//! device population behind it.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::lifecycle::reconfigure::{needs_reconfiguring, ReconfigureCoordinator};
use crate::registry::driver::DriverRegistry;
use crate::store::ObjectStore;

const DEFAULT_WORKER_COUNT: usize = 8;

/// Walks every persisted device once, deciding per-device whether it needs
/// a full reconfiguration or just a `synchronizeDevice` nudge.
pub struct StartupInitializer {
    store: Arc<ObjectStore>,
    drivers: Arc<DriverRegistry>,
    reconfigure: Arc<ReconfigureCoordinator>,
    worker_count: usize,
}

impl StartupInitializer {
    pub fn new(
        store: Arc<ObjectStore>,
        drivers: Arc<DriverRegistry>,
        reconfigure: Arc<ReconfigureCoordinator>,
    ) -> Self {
        Self { store, drivers, reconfigure, worker_count: DEFAULT_WORKER_COUNT }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Runs initialization for every persisted device and waits for every
    /// worker to finish before returning.
    pub async fn run(&self) {
        let devices = self.store.all_devices().await;
        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut handles = Vec::with_capacity(devices.len());

        for device in devices {
            let semaphore = semaphore.clone();
            let drivers = self.drivers.clone();
            let reconfigure = self.reconfigure.clone();
            handles.push(tokio::spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else { return };
                process_one(&drivers, &reconfigure, device).await;
                drop(permit);
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn process_one(
    drivers: &DriverRegistry,
    reconfigure: &Arc<ReconfigureCoordinator>,
    device: crate::model::Device,
) {
    let Some(driver) = drivers.get(&device.managing_device_driver) else {
        tracing::warn!(uuid = %device.uuid, driver = %device.managing_device_driver, "no driver registered for persisted device at startup");
        return;
    };

    if needs_reconfiguring(&device, driver.as_ref(), drivers) {
        if let Err(e) = reconfigure.reconfigure_device(device.uuid.clone(), 0, true, None).await {
            tracing::warn!(uuid = %device.uuid, err = %e, "startup reconfigure rejected");
        }
    } else {
        driver.synchronize_device(&device.uuid).await;
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
