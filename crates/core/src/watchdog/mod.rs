// SPDX-License-Identifier: Apache-2.0

//! The communication-fail watchdog: a process-wide table of per-device
//! timers. Read-mostly, so the table lock is `parking_lot` (lock #6 in the
//! acquisition order) rather than an async mutex — no critical section here
//! ever crosses an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::registry::driver::Driver;

/// `fastCommfail` is documented only as "propagation to the watchdog", left
/// open by spec.md §9. Resolved here as an opaque rate multiplier that
/// proportionally compresses every device's remaining countdown.
const FAST_COMMFAIL_MULTIPLIER: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct Entry {
    timeout_secs: u64,
    last_pet: Instant,
    in_comm_fail: bool,
}

/// Result of petting a device's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PetOutcome {
    /// The device was not monitored (no entry, or timeout is 0/disabled).
    NotMonitored,
    /// Timer reset; device was not in comm-fail.
    Unchanged,
    /// Timer reset and the device transitioned out of comm-fail. The caller
    /// is responsible for invoking `communicationRestored` and updating the
    /// `commFail` resource plus `dateLastContacted` — driver calls never
    /// happen with the watchdog's own lock held.
    Restored,
}

/// Resolve the effective per-device timeout: the device's parsed
/// `commFailOverrideSeconds` metadata if present and a valid nonnegative
/// integer, else the current global default.
pub fn effective_timeout_secs(override_metadata: Option<&str>, default_secs: u64) -> u64 {
    match override_metadata.and_then(|v| v.parse::<i64>().ok()) {
        Some(v) if v >= 0 => v as u64,
        _ => default_secs,
    }
}

/// The process-wide comm-fail table.
pub struct Watchdog {
    entries: Mutex<HashMap<String, Entry>>,
    global_default_secs: AtomicU64,
    fast_commfail: AtomicBool,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            global_default_secs: AtomicU64::new(0),
            fast_commfail: AtomicBool::new(false),
        }
    }

    pub fn global_default_secs(&self) -> u64 {
        self.global_default_secs.load(Ordering::Relaxed)
    }

    /// `set global timeout(secs)`: atomically updates the default. Callers
    /// must still re-apply `set_timeout` to every known device — the
    /// watchdog alone doesn't know which devices exist or who their driver
    /// is, so that fan-out belongs to the lifecycle coordinator.
    pub fn set_global_default_secs(&self, secs: u64) {
        self.global_default_secs.store(secs, Ordering::Relaxed);
    }

    /// `set timeout(device, defaultSecs)`. Computes the effective timeout,
    /// notifies the driver, and — unless the driver owns its own
    /// monitoring — starts or stops the internal timer accordingly.
    pub async fn set_timeout(
        &self,
        uuid: &str,
        override_metadata: Option<&str>,
        driver: &dyn Driver,
        custom_comm_fail: bool,
    ) -> u64 {
        let effective = effective_timeout_secs(override_metadata, self.global_default_secs());
        driver.comm_fail_timeout_secs_changed(uuid, effective).await;

        if custom_comm_fail {
            self.entries.lock().remove(uuid);
            return effective;
        }

        let mut entries = self.entries.lock();
        if effective == 0 {
            entries.remove(uuid);
        } else {
            let now = Instant::now();
            entries
                .entry(uuid.to_owned())
                .and_modify(|e| e.timeout_secs = effective)
                .or_insert(Entry { timeout_secs: effective, last_pet: now, in_comm_fail: false });
        }
        effective
    }

    /// `hintDeviceTimeoutSecs`: notifies the driver only, never touches
    /// monitoring state.
    pub async fn hint_timeout_secs(
        &self,
        uuid: &str,
        override_metadata: Option<&str>,
        driver: &dyn Driver,
    ) -> u64 {
        let effective = effective_timeout_secs(override_metadata, self.global_default_secs());
        driver.comm_fail_timeout_secs_changed(uuid, effective).await;
        effective
    }

    pub fn stop_monitoring(&self, uuid: &str) {
        self.entries.lock().remove(uuid);
    }

    pub fn is_monitored(&self, uuid: &str) -> bool {
        self.entries.lock().contains_key(uuid)
    }

    pub fn is_in_comm_fail(&self, uuid: &str) -> bool {
        self.entries.lock().get(uuid).is_some_and(|e| e.in_comm_fail)
    }

    /// A "pet" resets the timer; if the device was in comm-fail, it
    /// transitions to restored.
    pub fn pet(&self, uuid: &str) -> PetOutcome {
        let mut entries = self.entries.lock();
        match entries.get_mut(uuid) {
            Some(entry) => {
                entry.last_pet = Instant::now();
                if entry.in_comm_fail {
                    entry.in_comm_fail = false;
                    PetOutcome::Restored
                } else {
                    PetOutcome::Unchanged
                }
            }
            None => PetOutcome::NotMonitored,
        }
    }

    /// `force-commfail`: immediately transitions a single device,
    /// regardless of its timer. Returns whether this was a real
    /// transition (false if already in comm-fail or not monitored).
    pub fn force_commfail(&self, uuid: &str) -> bool {
        match self.entries.lock().get_mut(uuid) {
            Some(entry) => {
                let changed = !entry.in_comm_fail;
                entry.in_comm_fail = true;
                changed
            }
            None => false,
        }
    }

    pub fn set_fast_commfail(&self, enabled: bool) {
        self.fast_commfail.store(enabled, Ordering::Relaxed);
    }

    pub fn fast_commfail(&self) -> bool {
        self.fast_commfail.load(Ordering::Relaxed)
    }

    fn scaled_timeout(timeout_secs: u64, fast: bool) -> Duration {
        let multiplier = if fast { FAST_COMMFAIL_MULTIPLIER } else { 1.0 };
        Duration::from_secs_f64(timeout_secs as f64 * multiplier)
    }

    /// Exports the remaining countdown for LPM suspend.
    pub fn export_remaining(&self, uuid: &str) -> Option<Duration> {
        let entries = self.entries.lock();
        let entry = entries.get(uuid)?;
        let deadline = Self::scaled_timeout(entry.timeout_secs, self.fast_commfail());
        Some(deadline.saturating_sub(entry.last_pet.elapsed()))
    }

    /// Reimports a remaining countdown across an LPM suspend, backdating
    /// `last_pet` so the next tick sees the same remaining time.
    pub fn import_remaining(&self, uuid: &str, remaining: Duration) {
        let fast = self.fast_commfail();
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(uuid) {
            let deadline = Self::scaled_timeout(entry.timeout_secs, fast);
            let elapsed_equivalent = deadline.saturating_sub(remaining);
            entry.last_pet = Instant::now()
                .checked_sub(elapsed_equivalent)
                .unwrap_or_else(Instant::now);
        }
    }

    /// One monitor tick: returns the UUIDs that just crossed their
    /// deadline. Marks them in comm-fail as a side effect so a later tick
    /// doesn't re-report the same device.
    pub fn tick(&self) -> Vec<String> {
        let fast = self.fast_commfail();
        let mut entries = self.entries.lock();
        let mut failed = Vec::new();
        for (uuid, entry) in entries.iter_mut() {
            if entry.in_comm_fail {
                continue;
            }
            let deadline = Self::scaled_timeout(entry.timeout_secs, fast);
            if entry.last_pet.elapsed() >= deadline {
                entry.in_comm_fail = true;
                failed.push(uuid.clone());
            }
        }
        failed
    }

    /// Spawns the background monitor loop. `on_timeout` is invoked (with no
    /// watchdog lock held) for every device a tick finds overdue; the
    /// caller is expected to update the `commFail` resource and invoke
    /// `communicationFailed` on the owning driver.
    pub fn spawn_monitor<F, Fut>(
        self: Arc<Self>,
        interval: Duration,
        token: CancellationToken,
        on_timeout: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = timer.tick() => {}
                }
                for uuid in self.tick() {
                    on_timeout(uuid).await;
                }
            }
        })
    }

    /// Terminates the monitor loop and waits for it to finish; after this
    /// returns, no `on_timeout` callback is pending.
    pub async fn shutdown(token: CancellationToken, handle: tokio::task::JoinHandle<()>) {
        token.cancel();
        let _ = handle.await;
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
