// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::time::Duration;

use livegraph_subscription::{QueryEngine, SubscriptionContext};

/// What every connection handler needs, cloned into each connection task.
pub struct WsState<E: QueryEngine> {
	context: SubscriptionContext<E>,
	handshake_timeout: Duration,
	keep_alive_interval: Option<Duration>,
}

impl<E: QueryEngine> WsState<E> {
	pub fn new(
		context: SubscriptionContext<E>,
		handshake_timeout: Duration,
		keep_alive_interval: Option<Duration>,
	) -> Self {
		Self {
			context,
			handshake_timeout,
			keep_alive_interval,
		}
	}

	pub fn context(&self) -> &SubscriptionContext<E> {
		&self.context
	}

	pub fn handshake_timeout(&self) -> Duration {
		self.handshake_timeout
	}

	pub fn keep_alive_interval(&self) -> Option<Duration> {
		self.keep_alive_interval
	}
}

impl<E: QueryEngine> Clone for WsState<E> {
	fn clone(&self) -> Self {
		Self {
			context: self.context.clone(),
			handshake_timeout: self.handshake_timeout,
			keep_alive_interval: self.keep_alive_interval,
		}
	}
}
