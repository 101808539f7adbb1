// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::Duration;

use livegraph_subscription::{AuthConfig, SubscriptionConfig};

#[derive(Debug, Clone)]
pub struct WsConfig {
	/// Address to bind the listener to.
	///
	/// Default: `0.0.0.0:8091`
	pub bind_addr: String,
	/// Connections accepted at once. Further connections are dropped on accept.
	///
	/// Default: 1024
	pub max_connections: usize,
	/// How long a peer may take to complete the WebSocket upgrade.
	///
	/// Default: 10s
	pub handshake_timeout: Duration,
	/// Period of `ka` frames after `connection_ack`. `None` disables them.
	///
	/// Default: 10s
	pub keep_alive_interval: Option<Duration>,
	/// How long shutdown waits for connections to drain.
	///
	/// Default: 30s
	pub shutdown_timeout: Duration,
	pub subscription: SubscriptionConfig,
	/// Token verification; without it only queries without auth rules are accepted.
	pub auth: Option<AuthConfig>,
}

impl Default for WsConfig {
	fn default() -> Self {
		Self {
			bind_addr: "0.0.0.0:8091".to_string(),
			max_connections: 1024,
			handshake_timeout: Duration::from_secs(10),
			keep_alive_interval: Some(Duration::from_secs(10)),
			shutdown_timeout: Duration::from_secs(30),
			subscription: SubscriptionConfig::default(),
			auth: None,
		}
	}
}

impl WsConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
		self.bind_addr = addr.into();
		self
	}

	pub fn max_connections(mut self, max: usize) -> Self {
		self.max_connections = max;
		self
	}

	pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
		self.handshake_timeout = timeout;
		self
	}

	pub fn keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
		self.keep_alive_interval = interval;
		self
	}

	pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
		self.shutdown_timeout = timeout;
		self
	}

	pub fn subscription(mut self, config: SubscriptionConfig) -> Self {
		self.subscription = config;
		self
	}

	pub fn auth(mut self, config: AuthConfig) -> Self {
		self.auth = Some(config);
		self
	}
}
