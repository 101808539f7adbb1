// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

// #![cfg_attr(not(debug_assertions), deny(warnings))]

//! Installs the process wide `tracing` subscriber.
//!
//! ```ignore
//! TracingBuilder::new().level("info").directive("livegraph_subscription=debug").try_init()?;
//! ```

pub mod builder;
pub mod subsystem;

pub use builder::{LogFormat, TracingBuilder, TracingError};
pub use subsystem::TracingSubsystem;
