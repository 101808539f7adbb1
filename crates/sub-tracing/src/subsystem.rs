// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{
	any::Any,
	sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use livegraph_sub_api::{HealthStatus, Subsystem, SubsystemError};

use crate::builder::TracingBuilder;

/// Installs the configured subscriber when started.
///
/// A subscriber installed earlier by someone else is left in place; the
/// subsystem then reports a warning instead of failing the start.
pub struct TracingSubsystem {
	builder: TracingBuilder,
	running: AtomicBool,
	conflict: Option<String>,
}

impl TracingSubsystem {
	pub fn new(builder: TracingBuilder) -> Self {
		Self {
			builder,
			running: AtomicBool::new(false),
			conflict: None,
		}
	}
}

#[async_trait]
impl Subsystem for TracingSubsystem {
	fn name(&self) -> &'static str {
		"Tracing"
	}

	async fn start(&mut self) -> Result<(), SubsystemError> {
		if self.running.load(Ordering::SeqCst) {
			return Ok(());
		}

		self.builder.filter().map_err(|err| SubsystemError::Config(err.to_string()))?;

		if let Err(err) = self.builder.try_init() {
			self.conflict = Some(err.to_string());
		}
		self.running.store(true, Ordering::SeqCst);
		tracing::debug!("tracing subsystem started");
		Ok(())
	}

	async fn shutdown(&mut self) -> Result<(), SubsystemError> {
		// a global subscriber cannot be uninstalled
		self.running.store(false, Ordering::SeqCst);
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	fn health_status(&self) -> HealthStatus {
		match (&self.conflict, self.is_running()) {
			(_, false) => HealthStatus::Failed {
				description: "Not running".to_string(),
			},
			(Some(conflict), true) => HealthStatus::Warning {
				description: conflict.clone(),
			},
			(None, true) => HealthStatus::Healthy,
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}
