// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::Parser;

/// Device-management core daemon for a smart-home gateway.
#[derive(Debug, Parser)]
#[command(name = "gatewayd", version, about)]
pub struct Config {
    /// Directory backing the on-disk device/system-property store.
    #[arg(long, env = "GATEWAYD_NAMESPACE", default_value = "/opt/gatewayd/data")]
    pub namespace: PathBuf,

    /// Log format (json or text).
    #[arg(long, env = "GATEWAYD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GATEWAYD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Default comm-fail timeout in seconds, applied when neither a driver
    /// nor a per-device override supplies one.
    #[arg(long, env = "GATEWAYD_COMM_FAIL_DEFAULT_SECS", default_value = "14400")]
    pub comm_fail_default_secs: u64,

    /// How often the comm-fail watchdog scans for overdue devices.
    #[arg(long, env = "GATEWAYD_WATCHDOG_INTERVAL_SECS", default_value = "60")]
    pub watchdog_interval_secs: u64,

    /// Run the smoke-test harness (`NullDriver`/`NullSubsystem`) instead of
    /// waiting for a real deployment to register drivers.
    #[arg(long, env = "GATEWAYD_SMOKE_TEST")]
    pub smoke_test: bool,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.as_os_str().is_empty() {
            anyhow::bail!("--namespace must not be empty");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
