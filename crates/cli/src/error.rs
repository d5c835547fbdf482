// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Process exit-code classification for the handful of ways `gatewayd` can
/// fail to start or run. Everything past this boundary is `anyhow::Error`;
/// this enum only exists to pick a stable exit code in `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliError {
    InvalidConfig,
    StoreInitFailed,
    Fatal,
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig => 2,
            Self::StoreInitFailed => 3,
            Self::Fatal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::StoreInitFailed => "STORE_INIT_FAILED",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for CliError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
