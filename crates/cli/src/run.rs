// SPDX-License-Identifier: Apache-2.0

//! Top-level daemon runner: wires a [`gatewayd_core::GatewayCore`], brings
//! the smoke-test harness up when asked, runs startup device
//! initialization, and blocks until a shutdown signal arrives.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatewayd_core::GatewayCore;

use crate::config::Config;
use crate::error::CliError;
use crate::null_driver::{NullDriver, NullSubsystem};

/// Initialize tracing from config. Uses `try_init` so it's safe to call
/// more than once (tests, repeated `prepare` calls).
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match config.log_format.as_str() {
        "json" => tracing_subscriber::fmt().with_env_filter(filter).json().try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Brings a core up, runs it until shutdown is requested, and tears it back
/// down in the reverse order of bring-up.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    let core = GatewayCore::new(config.namespace.clone());
    let failed = core.init().await.map_err(|e| {
        warn!(err = %e, "object store init failed");
        anyhow::Error::new(CliError::StoreInitFailed)
    })?;
    if !failed.is_empty() {
        warn!(count = failed.len(), "some device files failed to load at startup");
    }

    core.watchdog.set_global_default_secs(config.comm_fail_default_secs);

    if config.smoke_test {
        bring_up_smoke_test(&core).await?;
    }

    core.lifecycle.run_startup_initialization().await;

    let shutdown = CancellationToken::new();
    let watchdog_handle = core.watchdog.clone().spawn_monitor(
        Duration::from_secs(config.watchdog_interval_secs),
        shutdown.clone(),
        {
            let store = core.store.clone();
            let drivers = core.drivers.clone();
            move |uuid| on_comm_fail_timeout(store.clone(), drivers.clone(), uuid)
        },
    );

    info!("gatewayd running; waiting for shutdown signal");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");

    gatewayd_core::watchdog::Watchdog::shutdown(shutdown, watchdog_handle).await;
    core.lifecycle.shutdown().await;

    info!("gatewayd shutdown complete");
    Ok(())
}

/// Marks a device's `commFail` resource and invokes its driver's
/// `communicationFailed` callback, with no watchdog lock held (spec.md §4.4
/// / §5: driver callbacks never run under an internal lock).
async fn on_comm_fail_timeout(
    store: std::sync::Arc<gatewayd_core::store::ObjectStore>,
    drivers: std::sync::Arc<gatewayd_core::registry::driver::DriverRegistry>,
    uuid: String,
) {
    let Ok(device) = store.get_device_by_uri(&format!("/{uuid}")).await else { return };
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    if let Some(mut resource) =
        device.resources.iter().find(|r| r.id == gatewayd_core::model::common_resource::COMM_FAIL).cloned()
    {
        resource.set_value(Some("true".to_owned()), now);
        let _ = store.save_resource(resource, now).await;
    }
    if let Some(driver) = drivers.get(&device.managing_device_driver) {
        driver.communication_failed(&uuid).await;
    }
}

async fn bring_up_smoke_test(core: &GatewayCore) -> anyhow::Result<()> {
    use gatewayd_core::registry::driver::DriverRegistration;

    core.drivers.register(DriverRegistration::new(std::sync::Arc::new(NullDriver::new())))?;
    core.subsystems.register(std::sync::Arc::new(NullSubsystem), false)?;

    let sink = core.lifecycle.ready_sink();
    for (subsystem, disabled) in core.subsystems.all() {
        if disabled {
            continue;
        }
        subsystem.initialize(sink.clone()).await;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return,
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
