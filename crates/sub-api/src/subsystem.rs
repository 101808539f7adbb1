// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{any::Any, io};

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
	Healthy,
	Warning {
		description: String,
	},
	Failed {
		description: String,
	},
}

impl HealthStatus {
	pub fn is_healthy(&self) -> bool {
		matches!(self, HealthStatus::Healthy)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
	#[error("failed to bind `{addr}`: {source}")]
	BindFailed {
		addr: String,
		#[source]
		source: io::Error,
	},

	#[error("bound address unavailable: {0}")]
	AddressUnavailable(#[source] io::Error),

	#[error("invalid configuration: {0}")]
	Config(String),
}

/// A long running component with an explicit start and shutdown.
///
/// `start` is idempotent. `shutdown` stops accepting new work and waits, up to
/// a subsystem specific deadline, for in-flight work to drain.
#[async_trait]
pub trait Subsystem: Send + Sync + Any {
	fn name(&self) -> &'static str;

	async fn start(&mut self) -> Result<(), SubsystemError>;

	async fn shutdown(&mut self) -> Result<(), SubsystemError>;

	fn is_running(&self) -> bool;

	fn health_status(&self) -> HealthStatus;

	fn as_any(&self) -> &dyn Any;

	fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_health_status() {
		assert!(HealthStatus::Healthy.is_healthy());
		assert!(
			!HealthStatus::Warning {
				description: "High connection count: 95/100".to_string()
			}
			.is_healthy()
		);
	}

	#[test]
	fn test_bind_error_message() {
		let err = SubsystemError::BindFailed {
			addr: "0.0.0.0:8091".to_string(),
			source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
		};
		assert_eq!(err.to_string(), "failed to bind `0.0.0.0:8091`: address in use");
	}
}
