// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::{QueryEngine, SchemaWatcher, SubscriptionConfig, auth::AuthEvaluator};

/// Process wide collaborators shared by every connection's dispatcher.
pub struct SubscriptionContext<E: QueryEngine> {
	engine: Arc<E>,
	schema: Arc<dyn SchemaWatcher>,
	auth: Arc<AuthEvaluator>,
	config: SubscriptionConfig,
	executions: Arc<Semaphore>,
}

impl<E: QueryEngine> SubscriptionContext<E> {
	pub fn new(
		engine: Arc<E>,
		schema: Arc<dyn SchemaWatcher>,
		auth: AuthEvaluator,
		mut config: SubscriptionConfig,
	) -> Self {
		// zero would panic the outbound channel and starve every poll
		config.max_concurrent_executions = config.max_concurrent_executions.max(1);
		config.outbound_capacity = config.outbound_capacity.max(1);
		let executions = Arc::new(Semaphore::new(config.max_concurrent_executions));
		Self {
			engine,
			schema,
			auth: Arc::new(auth),
			config,
			executions,
		}
	}

	pub fn engine(&self) -> &Arc<E> {
		&self.engine
	}

	pub fn schema(&self) -> &Arc<dyn SchemaWatcher> {
		&self.schema
	}

	pub fn auth(&self) -> &AuthEvaluator {
		&self.auth
	}

	pub fn config(&self) -> &SubscriptionConfig {
		&self.config
	}

	/// Permits bounding the number of executions running at once.
	pub fn executions(&self) -> &Arc<Semaphore> {
		&self.executions
	}
}

impl<E: QueryEngine> Clone for SubscriptionContext<E> {
	fn clone(&self) -> Self {
		Self {
			engine: self.engine.clone(),
			schema: self.schema.clone(),
			auth: self.auth.clone(),
			config: self.config.clone(),
			executions: self.executions.clone(),
		}
	}
}
