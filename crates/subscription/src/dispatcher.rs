// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Per-connection subscription registry and lifecycle control.
//!
//! The registry maps a client chosen id to the control handle of its poll
//! task. An entry is removed exactly once, and whoever removes it emits the
//! terminal frames for that registration:
//!
//! - `stop` removes and emits `complete`;
//! - the schema monitor removes stale entries and emits `complete`;
//! - a poll task that exits on its own (schema change seen first, fatal error)
//!   removes its entry and emits `error`/`complete` as appropriate;
//! - `shutdown` clears everything and emits nothing.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
	SubscriptionId,
	auth::ConnectionPayload,
	context::SubscriptionContext,
	engine::{OperationKind, PreparedQuery, QueryEngine, SubscriptionRequest},
	error::RegistrationError,
	outbound::{Outbound, RegistrationSeq},
	schema::SchemaGeneration,
	subscription::{PollExit, PollTask, Subscription},
};

/// Control handle of a live subscription.
struct Registration {
	seq: RegistrationSeq,
	generation: SchemaGeneration,
	cancel: CancellationToken,
}

struct Inner<E: QueryEngine> {
	context: SubscriptionContext<E>,
	connection_id: Uuid,
	registry: DashMap<SubscriptionId, Registration>,
	outbound: mpsc::Sender<Outbound>,
	connection: CancellationToken,
}

/// Owns all subscriptions of one connection.
///
/// Registration is driven by the connection's reader only, hence `&mut self`;
/// terminations may come from any task.
pub struct Dispatcher<E: QueryEngine> {
	inner: Arc<Inner<E>>,
	next_seq: u64,
}

impl<E: QueryEngine> Dispatcher<E> {
	/// Creates the dispatcher and starts its schema monitor.
	///
	/// `connection` is the connection level token; every subscription token is
	/// a child of it.
	pub fn new(
		context: SubscriptionContext<E>,
		outbound: mpsc::Sender<Outbound>,
		connection: CancellationToken,
	) -> Self {
		let inner = Arc::new(Inner {
			context,
			connection_id: Uuid::now_v7(),
			registry: DashMap::new(),
			outbound,
			connection,
		});

		tokio::spawn(monitor_schema(inner.clone()));

		Self {
			inner,
			next_seq: 0,
		}
	}

	pub fn connection_id(&self) -> Uuid {
		self.inner.connection_id
	}

	/// Number of live subscriptions.
	pub fn len(&self) -> usize {
		self.inner.registry.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.registry.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.inner.registry.contains_key(id)
	}

	/// Validates and starts a subscription.
	///
	/// Nothing is registered when an error is returned.
	#[instrument(name = "subscription::register", level = "debug", skip_all, fields(
		connection_id = %self.inner.connection_id,
		subscription_id = %id
	))]
	pub async fn register(
		&mut self,
		id: SubscriptionId,
		request: SubscriptionRequest,
		payload: Option<&ConnectionPayload>,
	) -> Result<RegistrationSeq, RegistrationError> {
		let inner = &self.inner;

		if inner.connection.is_cancelled() {
			return Err(RegistrationError::ConnectionClosed);
		}
		if inner.registry.contains_key(&id) {
			return Err(RegistrationError::DuplicateId(id));
		}

		let limit = inner.context.config().max_subscriptions;
		if inner.registry.len() >= limit {
			return Err(RegistrationError::TooManySubscriptions(limit));
		}

		// snapshot before prepare so a reload during planning is caught on the first tick
		let generation = inner.context.schema().generation();

		let prepared = inner.context.engine().prepare(&request)?;
		let root = validate(&prepared)?;
		let bound = inner.context.auth().bind(payload, prepared.auth_rule.as_ref())?;

		self.next_seq += 1;
		let seq = RegistrationSeq(self.next_seq);

		// the gate must know the sequence before any frame for it can be queued
		inner.outbound.send(Outbound::Open {
			seq,
		})
		.await
		.map_err(|_| RegistrationError::ConnectionClosed)?;

		let cancel = inner.connection.child_token();
		inner.registry.insert(
			id.clone(),
			Registration {
				seq,
				generation,
				cancel: cancel.clone(),
			},
		);

		info!(%root, %generation, %seq, bound = bound.len(), "subscription registered");

		let config = inner.context.config();
		let subscription = Subscription::new(
			id.clone(),
			seq,
			Arc::new(prepared),
			request.variables.unwrap_or_default(),
			bound,
			generation,
			config.poll_interval,
		);
		let task = PollTask::new(subscription, inner.context.clone(), inner.outbound.clone(), cancel);

		let inner = inner.clone();
		tokio::spawn(async move {
			let exit = task.run().await;
			inner.finish(&id, seq, exit).await;
		});

		Ok(seq)
	}

	/// Terminates a subscription at the client's request and emits `complete`.
	///
	/// Returns `false` for an unknown id.
	pub async fn stop(&self, id: &str) -> bool {
		let Some((id, registration)) = self.inner.registry.remove(id) else {
			debug!(connection_id = %self.inner.connection_id, subscription_id = id, "stop for unknown subscription ignored");
			return false;
		};

		registration.cancel.cancel();
		debug!(connection_id = %self.inner.connection_id, subscription_id = %id, "subscription stopped");
		self.inner
			.emit(Outbound::Complete {
				seq: registration.seq,
				id,
			})
			.await;
		true
	}

	/// Terminates every subscription prepared against a generation other than
	/// `current`, emitting one `complete` each. Returns how many were terminated.
	pub async fn terminate_all(&self, current: SchemaGeneration) -> usize {
		self.inner.terminate_stale(current).await
	}

	/// Tears the connection down. Cancels every subscription and emits nothing.
	pub fn shutdown(&self) {
		self.inner.connection.cancel();
		let dropped = self.inner.registry.len();
		self.inner.registry.clear();
		debug!(connection_id = %self.inner.connection_id, dropped, "dispatcher shut down");
	}
}

impl<E: QueryEngine> Drop for Dispatcher<E> {
	fn drop(&mut self) {
		self.inner.connection.cancel();
	}
}

impl<E: QueryEngine> Inner<E> {
	/// Pushes a frame unless the connection is already gone.
	async fn emit(&self, frame: Outbound) {
		select! {
			biased;
			_ = self.connection.cancelled() => {}
			sent = self.outbound.send(frame) => {
				if sent.is_err() {
					debug!(connection_id = %self.connection_id, "outbound closed, frame dropped");
				}
			}
		}
	}

	/// Removes the entry for `id` if it still belongs to registration `seq`.
	fn remove(&self, id: &str, seq: RegistrationSeq) -> Option<Registration> {
		let (_, registration) = self.registry.remove_if(id, |_, registration| registration.seq == seq)?;
		registration.cancel.cancel();
		Some(registration)
	}

	async fn finish(&self, id: &str, seq: RegistrationSeq, exit: PollExit) {
		match exit {
			// the canceller owns the terminal frames
			PollExit::Cancelled => {}
			PollExit::TransportClosed => {
				self.remove(id, seq);
			}
			PollExit::SchemaChanged(current) => {
				if self.remove(id, seq).is_some() {
					info!(connection_id = %self.connection_id, subscription_id = id, generation = %current, "subscription terminated by schema change");
					self.emit(Outbound::Complete {
						seq,
						id: id.to_string(),
					})
					.await;
				}
			}
			PollExit::Fatal(err) => {
				if self.remove(id, seq).is_some() {
					warn!(connection_id = %self.connection_id, subscription_id = id, error = %err, "subscription failed");
					self.emit(Outbound::Error {
						seq,
						id: id.to_string(),
						error: err.diagnostic(),
					})
					.await;
					self.emit(Outbound::Complete {
						seq,
						id: id.to_string(),
					})
					.await;
				}
			}
		}
	}

	async fn terminate_stale(&self, current: SchemaGeneration) -> usize {
		// collect first, never hold a shard guard across an await
		let stale: Vec<SubscriptionId> = self
			.registry
			.iter()
			.filter(|entry| entry.generation != current)
			.map(|entry| entry.key().clone())
			.collect();

		let mut terminated = 0;
		for id in stale {
			let Some((id, registration)) =
				self.registry.remove_if(&id, |_, registration| registration.generation != current)
			else {
				continue;
			};
			registration.cancel.cancel();
			terminated += 1;
			self.emit(Outbound::Complete {
				seq: registration.seq,
				id,
			})
			.await;
		}
		terminated
	}
}

async fn monitor_schema<E: QueryEngine>(inner: Arc<Inner<E>>) {
	let mut generations = inner.context.schema().watch();

	loop {
		select! {
			biased;
			_ = inner.connection.cancelled() => break,
			changed = generations.changed() => {
				if changed.is_err() {
					break;
				}
				let current = *generations.borrow_and_update();
				let terminated = inner.terminate_stale(current).await;
				if terminated > 0 {
					info!(connection_id = %inner.connection_id, generation = %current, terminated, "schema changed, subscriptions terminated");
				}
			}
		}
	}
}

fn validate<P>(prepared: &PreparedQuery<P>) -> Result<&str, RegistrationError> {
	if prepared.operation != OperationKind::Subscription {
		return Err(RegistrationError::NotSubscription);
	}
	let root = prepared.root().ok_or(RegistrationError::MultipleRoots(prepared.roots.len()))?;
	if !root.subscribable {
		return Err(RegistrationError::NotSubscribable(root.field.clone()));
	}
	Ok(&root.field)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::RootSelection;

	fn prepared(operation: OperationKind, roots: &[(&str, bool)]) -> PreparedQuery<()> {
		PreparedQuery {
			operation,
			roots: roots
				.iter()
				.map(|(field, subscribable)| RootSelection {
					field: field.to_string(),
					type_name: "Product".to_string(),
					subscribable: *subscribable,
				})
				.collect(),
			auth_rule: None,
			plan: (),
		}
	}

	#[test]
	fn test_validate_accepts_single_subscribable_root() {
		let query = prepared(OperationKind::Subscription, &[("getProduct", true)]);
		assert_eq!(validate(&query), Ok("getProduct"));
	}

	#[test]
	fn test_validate_rejects_queries_and_mutations() {
		for operation in [OperationKind::Query, OperationKind::Mutation] {
			let query = prepared(operation, &[("getProduct", true)]);
			assert_eq!(validate(&query), Err(RegistrationError::NotSubscription));
		}
	}

	#[test]
	fn test_validate_rejects_root_count() {
		let none = prepared(OperationKind::Subscription, &[]);
		assert_eq!(validate(&none), Err(RegistrationError::MultipleRoots(0)));

		let two = prepared(OperationKind::Subscription, &[("getProduct", true), ("queryTodo", true)]);
		assert_eq!(validate(&two), Err(RegistrationError::MultipleRoots(2)));
	}

	#[test]
	fn test_validate_rejects_unsubscribable_root() {
		let query = prepared(OperationKind::Subscription, &[("getReview", false)]);
		assert_eq!(validate(&query), Err(RegistrationError::NotSubscribable("getReview".to_string())));
	}
}
