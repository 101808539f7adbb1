// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

// #![cfg_attr(not(debug_assertions), deny(warnings))]

//! Lifecycle interface shared by the server's subsystems.

pub mod subsystem;

pub use subsystem::{HealthStatus, Subsystem, SubsystemError};
