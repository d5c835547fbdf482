// SPDX-License-Identifier: Apache-2.0

//! The driver and subsystem registries: polymorphic dispatch to concrete
//! radio/IP stacks and the long-lived services they sit on top of.

pub mod driver;
pub mod subsystem;
