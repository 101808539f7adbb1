// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::Duration;

/// Configuration shared by every subscription served by one process.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
	/// Time between two executions of the same subscription.
	///
	/// Default: 1s
	pub poll_interval: Duration,
	/// Upper bound for a single execution. A timed out execution is a
	/// transient failure for that tick.
	///
	/// Default: 5s
	pub execution_timeout: Duration,
	/// Maximum number of live subscriptions on one connection.
	///
	/// Default: 100
	pub max_subscriptions: usize,
	/// Maximum number of executions running at once across all connections.
	///
	/// Default: 64
	pub max_concurrent_executions: usize,
	/// Capacity of a connection's outbound frame queue.
	///
	/// Default: 256
	pub outbound_capacity: usize,
}

impl Default for SubscriptionConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(1),
			execution_timeout: Duration::from_secs(5),
			max_subscriptions: 100,
			max_concurrent_executions: 64,
			outbound_capacity: 256,
		}
	}
}

impl SubscriptionConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = interval;
		self
	}

	pub fn execution_timeout(mut self, timeout: Duration) -> Self {
		self.execution_timeout = timeout;
		self
	}

	pub fn max_subscriptions(mut self, max: usize) -> Self {
		self.max_subscriptions = max;
		self
	}

	pub fn max_concurrent_executions(mut self, max: usize) -> Self {
		self.max_concurrent_executions = max.max(1);
		self
	}

	pub fn outbound_capacity(mut self, capacity: usize) -> Self {
		self.outbound_capacity = capacity.max(1);
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_overrides_defaults() {
		let config = SubscriptionConfig::new()
			.poll_interval(Duration::from_millis(20))
			.max_subscriptions(3)
			.outbound_capacity(0);

		assert_eq!(config.poll_interval, Duration::from_millis(20));
		assert_eq!(config.execution_timeout, Duration::from_secs(5));
		assert_eq!(config.max_subscriptions, 3);
		// mpsc channels reject a zero capacity
		assert_eq!(config.outbound_capacity, 1);
	}
}
