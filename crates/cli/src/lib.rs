// SPDX-License-Identifier: Apache-2.0

//! The `gatewayd` process shell: argument parsing, structured logging
//! setup, signal-driven shutdown, and wiring of whatever drivers/subsystems
//! a deployment provides on top of `gatewayd-core`. Concrete radio-stack
//! drivers are out of scope here; this crate ships the harness plus a
//! `NullDriver`/`NullSubsystem` pair for smoke-testing the wiring itself.

pub mod config;
pub mod error;
pub mod null_driver;
pub mod run;
