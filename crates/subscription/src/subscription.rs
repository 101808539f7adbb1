// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Subscription state machine and its poll loop.
//!
//! ```text
//!            first success            result changed
//!   Pending ───────────────▶ Active ◀────────────────┐
//!     │  ▲                     │  └───────────────────┘
//!     │  └ transient           │
//!     ▼                        ▼
//!   Terminated ◀───────────────┘  stop, close, schema change, fatal error
//! ```
//!
//! Each subscription runs on its own task and owns its [`Subscription`]
//! exclusively. The task suspends only while idle between ticks, while waiting
//! for an execution permit, and while its execution is running.

use std::{sync::Arc, time::Duration};

use tokio::{
	select,
	sync::{mpsc, watch},
	time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::{
	SubscriptionId,
	auth::BoundVariables,
	context::SubscriptionContext,
	engine::{Execution, ExecutionOutput, PreparedQuery, QueryDocument, QueryEngine, Variables},
	error::ExecuteError,
	fingerprint::{Fingerprint, fingerprint},
	outbound::{Outbound, RegistrationSeq},
	schema::SchemaGeneration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
	/// Registered, no successful execution yet.
	Pending,
	/// At least one result delivered.
	Active,
	/// Absorbing.
	Terminated,
}

/// One client's registered live query plus its diff state.
pub struct Subscription<P> {
	id: SubscriptionId,
	seq: RegistrationSeq,
	query: Arc<PreparedQuery<P>>,
	variables: Arc<Variables>,
	bound: Arc<BoundVariables>,
	generation_at_start: SchemaGeneration,
	last_fingerprint: Option<Fingerprint>,
	state: SubscriptionState,
	poll_interval: Duration,
}

impl<P> Subscription<P> {
	pub fn new(
		id: SubscriptionId,
		seq: RegistrationSeq,
		query: Arc<PreparedQuery<P>>,
		variables: Variables,
		bound: BoundVariables,
		generation_at_start: SchemaGeneration,
		poll_interval: Duration,
	) -> Self {
		Self {
			id,
			seq,
			query,
			variables: Arc::new(variables),
			bound: Arc::new(bound),
			generation_at_start,
			last_fingerprint: None,
			state: SubscriptionState::Pending,
			poll_interval,
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn seq(&self) -> RegistrationSeq {
		self.seq
	}

	pub fn state(&self) -> SubscriptionState {
		self.state
	}

	pub fn generation_at_start(&self) -> SchemaGeneration {
		self.generation_at_start
	}

	pub fn last_fingerprint(&self) -> Option<Fingerprint> {
		self.last_fingerprint
	}

	pub fn poll_interval(&self) -> Duration {
		self.poll_interval
	}

	pub fn bound(&self) -> &BoundVariables {
		&self.bound
	}

	/// Whether the compiled query still matches the schema at `generation`.
	pub fn is_current(&self, generation: SchemaGeneration) -> bool {
		self.generation_at_start == generation
	}

	/// Records a successful execution and decides whether it must be delivered.
	///
	/// The first result is always delivered; later ones only when their
	/// fingerprint differs from the last delivered one.
	pub fn observe(&mut self, document: &QueryDocument) -> bool {
		let current = fingerprint(document);
		let deliver = match self.state {
			SubscriptionState::Pending => true,
			SubscriptionState::Active => self.last_fingerprint != Some(current),
			SubscriptionState::Terminated => return false,
		};

		if deliver {
			self.last_fingerprint = Some(current);
			self.state = SubscriptionState::Active;
		}
		deliver
	}

	pub fn terminate(&mut self) {
		self.state = SubscriptionState::Terminated;
	}

	fn execution(&self) -> Execution<P> {
		Execution {
			query: self.query.clone(),
			variables: self.variables.clone(),
			bound: self.bound.clone(),
			generation: self.generation_at_start,
		}
	}
}

/// Why a poll loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollExit {
	/// The subscription's token was cancelled by a stop, a teardown or a
	/// termination initiated elsewhere.
	Cancelled,
	/// The schema generation moved away from the one the query was prepared for.
	SchemaChanged(SchemaGeneration),
	Fatal(ExecuteError),
	/// The connection's outbound queue is gone.
	TransportClosed,
}

enum Outcome {
	Completed(ExecutionOutput),
	Transient(String),
	Fatal(ExecuteError),
	Cancelled,
}

/// The task body driving one [`Subscription`].
pub struct PollTask<E: QueryEngine> {
	subscription: Subscription<E::Plan>,
	context: SubscriptionContext<E>,
	schema_rx: watch::Receiver<SchemaGeneration>,
	schema_open: bool,
	outbound: mpsc::Sender<Outbound>,
	cancel: CancellationToken,
}

impl<E: QueryEngine> PollTask<E> {
	pub fn new(
		subscription: Subscription<E::Plan>,
		context: SubscriptionContext<E>,
		outbound: mpsc::Sender<Outbound>,
		cancel: CancellationToken,
	) -> Self {
		let schema_rx = context.schema().watch();
		Self {
			subscription,
			context,
			schema_rx,
			schema_open: true,
			outbound,
			cancel,
		}
	}

	#[instrument(name = "subscription::poll", level = "debug", skip_all, fields(
		subscription_id = %self.subscription.id,
		seq = self.subscription.seq.0,
		generation = self.subscription.generation_at_start.0
	))]
	pub async fn run(mut self) -> PollExit {
		let exit = loop {
			if self.cancel.is_cancelled() {
				break PollExit::Cancelled;
			}
			if let Some(current) = self.schema_moved() {
				break PollExit::SchemaChanged(current);
			}

			let outcome = self.execute().await;

			// a schema change observed together with a result wins over the result
			if self.cancel.is_cancelled() {
				break PollExit::Cancelled;
			}
			if let Some(current) = self.schema_moved() {
				break PollExit::SchemaChanged(current);
			}

			match outcome {
				Outcome::Cancelled => break PollExit::Cancelled,
				Outcome::Fatal(err) => break PollExit::Fatal(err),
				Outcome::Transient(reason) => {
					warn!(state = ?self.subscription.state, %reason, "transient execution failure, retrying next tick");
				}
				Outcome::Completed(output) => {
					if self.subscription.observe(&output.document) {
						let touched = output.touched;
						if let Err(exit) = self.deliver(output).await {
							break exit;
						}
						debug!(touched, fingerprint = ?self.subscription.last_fingerprint, "result delivered");
					} else {
						trace!(touched = output.touched, "result unchanged, delivery suppressed");
					}
				}
			}

			if let Some(exit) = self.idle().await {
				break exit;
			}
		};

		self.subscription.terminate();
		debug!(?exit, "poll loop stopped");
		exit
	}

	fn schema_moved(&self) -> Option<SchemaGeneration> {
		let current = self.context.schema().generation();
		(!self.subscription.is_current(current)).then_some(current)
	}

	async fn execute(&self) -> Outcome {
		let permit = select! {
			biased;
			_ = self.cancel.cancelled() => return Outcome::Cancelled,
			permit = self.context.executions().clone().acquire_owned() => match permit {
				Ok(permit) => permit,
				Err(_) => return Outcome::Transient("execution pool closed".to_string()),
			},
		};

		let engine = self.context.engine().clone();
		let execution = self.subscription.execution();
		// a panicking engine only fails this tick
		let mut handle = tokio::spawn(async move {
			let _permit = permit;
			engine.execute(execution).await
		});

		let limit = self.context.config().execution_timeout;
		select! {
			biased;
			_ = self.cancel.cancelled() => {
				handle.abort();
				Outcome::Cancelled
			}
			joined = timeout(limit, &mut handle) => match joined {
				Err(_) => {
					handle.abort();
					// an engine blocked outside an await point ignores the abort;
					// the next tick must not start until it has returned
					select! {
						biased;
						_ = self.cancel.cancelled() => return Outcome::Cancelled,
						_ = &mut handle => {}
					}
					Outcome::Transient(format!("execution timed out after {limit:?}"))
				}
				Ok(Err(err)) => Outcome::Transient(format!("execution task failed: {err}")),
				Ok(Ok(Err(ExecuteError::Transient(reason)))) => Outcome::Transient(reason),
				Ok(Ok(Err(err))) => Outcome::Fatal(err),
				Ok(Ok(Ok(output))) => Outcome::Completed(output),
			}
		}
	}

	async fn deliver(&self, output: ExecutionOutput) -> Result<(), PollExit> {
		let frame = Outbound::Data {
			seq: self.subscription.seq,
			id: self.subscription.id.clone(),
			payload: output.into(),
		};

		select! {
			biased;
			_ = self.cancel.cancelled() => Err(PollExit::Cancelled),
			sent = self.outbound.send(frame) => sent.map_err(|_| PollExit::TransportClosed),
		}
	}

	/// Sleeps until the next tick. Returns early when the subscription must stop.
	async fn idle(&mut self) -> Option<PollExit> {
		let tick = sleep(self.subscription.poll_interval);
		tokio::pin!(tick);

		loop {
			select! {
				biased;
				_ = self.cancel.cancelled() => return Some(PollExit::Cancelled),
				changed = self.schema_rx.changed(), if self.schema_open => {
					if changed.is_err() {
						// the schema store is gone; keep relying on the per-tick check
						self.schema_open = false;
						continue;
					}
					let current = *self.schema_rx.borrow_and_update();
					if !self.subscription.is_current(current) {
						return Some(PollExit::SchemaChanged(current));
					}
				}
				_ = &mut tick => return None,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{collections::VecDeque, sync::Mutex};

	use async_trait::async_trait;
	use serde_json::{Value, json};

	use super::*;
	use crate::{
		AuthEvaluator, SchemaGenerationCell, SchemaWatcher, SubscriptionConfig,
		engine::{OperationKind, RootSelection, SubscriptionRequest},
		error::RegistrationError,
	};

	enum Step {
		Output(Value),
		Transient,
		Fatal,
		Hang,
		Panic,
		AdvanceSchemaThen(Value),
	}

	struct ScriptedEngine {
		steps: Mutex<VecDeque<Step>>,
		schema: Arc<SchemaGenerationCell>,
		exhausted: CancellationToken,
	}

	#[async_trait]
	impl QueryEngine for ScriptedEngine {
		type Plan = ();

		fn prepare(&self, _request: &SubscriptionRequest) -> Result<PreparedQuery<()>, RegistrationError> {
			unreachable!("poll tests build subscriptions directly")
		}

		async fn execute(&self, _execution: Execution<()>) -> Result<ExecutionOutput, ExecuteError> {
			let step = self.steps.lock().unwrap().pop_front();
			let data = match step {
				Some(Step::Output(data)) => data,
				Some(Step::Transient) => return Err(ExecuteError::transient("storage unavailable")),
				Some(Step::Fatal) => return Err(ExecuteError::fatal("query no longer valid")),
				Some(Step::Hang) => std::future::pending().await,
				Some(Step::Panic) => panic!("engine bug"),
				Some(Step::AdvanceSchemaThen(data)) => {
					self.schema.advance();
					data
				}
				None => {
					self.exhausted.cancel();
					return Err(ExecuteError::transient("script exhausted"));
				}
			};
			Ok(ExecutionOutput {
				document: QueryDocument::new(data),
				touched: 1,
			})
		}
	}

	struct Harness {
		task: PollTask<ScriptedEngine>,
		frames: mpsc::Receiver<Outbound>,
		cancel: CancellationToken,
	}

	fn harness(steps: Vec<Step>) -> Harness {
		let schema = Arc::new(SchemaGenerationCell::default());
		let cancel = CancellationToken::new();
		let engine = Arc::new(ScriptedEngine {
			steps: Mutex::new(steps.into()),
			schema: schema.clone(),
			exhausted: cancel.clone(),
		});
		let config = SubscriptionConfig::new()
			.poll_interval(Duration::from_millis(100))
			.execution_timeout(Duration::from_secs(1));
		let generation = schema.generation();
		let context = SubscriptionContext::new(engine, schema, AuthEvaluator::disabled(), config);

		let query = Arc::new(PreparedQuery {
			operation: OperationKind::Subscription,
			roots: vec![RootSelection {
				field: "getProduct".to_string(),
				type_name: "Product".to_string(),
				subscribable: true,
			}],
			auth_rule: None,
			plan: (),
		});
		let subscription = Subscription::new(
			"1".to_string(),
			RegistrationSeq(1),
			query,
			Variables::new(),
			BoundVariables::empty(),
			generation,
			Duration::from_millis(100),
		);

		let (tx, rx) = mpsc::channel(16);
		Harness {
			task: PollTask::new(subscription, context, tx, cancel.clone()),
			frames: rx,
			cancel,
		}
	}

	fn delivered(frames: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
		let mut delivered = Vec::new();
		while let Ok(frame) = frames.try_recv() {
			match frame {
				Outbound::Data {
					payload,
					..
				} => delivered.push(payload.data),
				other => panic!("unexpected frame {other:?}"),
			}
		}
		delivered
	}

	fn subscription() -> Subscription<()> {
		let query = Arc::new(PreparedQuery {
			operation: OperationKind::Subscription,
			roots: vec![],
			auth_rule: None,
			plan: (),
		});
		Subscription::new(
			"1".to_string(),
			RegistrationSeq(1),
			query,
			Variables::new(),
			BoundVariables::empty(),
			SchemaGeneration(1),
			Duration::from_secs(1),
		)
	}

	#[test]
	fn test_first_result_is_always_delivered() {
		let mut subscription = subscription();
		assert_eq!(subscription.state(), SubscriptionState::Pending);

		assert!(subscription.observe(&QueryDocument::new(Value::Null)));
		assert_eq!(subscription.state(), SubscriptionState::Active);
		assert!(subscription.last_fingerprint().is_some());
	}

	#[test]
	fn test_unchanged_result_is_suppressed() {
		let mut subscription = subscription();
		let document = QueryDocument::new(json!({"getProduct": {"name": "sanitizer"}}));

		assert!(subscription.observe(&document));
		assert!(!subscription.observe(&document));
		assert!(!subscription.observe(&document.clone()));
		assert!(subscription.observe(&QueryDocument::new(json!({"getProduct": {"name": "mask"}}))));
	}

	#[test]
	fn test_terminated_is_absorbing() {
		let mut subscription = subscription();
		subscription.terminate();
		assert!(!subscription.observe(&QueryDocument::new(json!(1))));
		assert_eq!(subscription.state(), SubscriptionState::Terminated);
	}

	#[test]
	fn test_generation_check() {
		let subscription = subscription();
		assert!(subscription.is_current(SchemaGeneration(1)));
		assert!(!subscription.is_current(SchemaGeneration(2)));
	}

	#[tokio::test(start_paused = true)]
	async fn test_poll_delivers_only_changes() {
		let sanitizer = json!({"getProduct": {"name": "sanitizer"}});
		let mask = json!({"getProduct": {"name": "mask"}});
		let Harness {
			task,
			mut frames,
			..
		} = harness(vec![
			Step::Output(sanitizer.clone()),
			Step::Output(sanitizer.clone()),
			Step::Output(mask.clone()),
			Step::Output(mask.clone()),
		]);

		assert_eq!(task.run().await, PollExit::Cancelled);
		assert_eq!(delivered(&mut frames), vec![sanitizer, mask]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_transient_failures_keep_the_subscription_alive() {
		let Harness {
			task,
			mut frames,
			..
		} = harness(vec![Step::Transient, Step::Panic, Step::Hang, Step::Output(json!({"getProduct": null}))]);

		assert_eq!(task.run().await, PollExit::Cancelled);
		assert_eq!(delivered(&mut frames), vec![json!({"getProduct": null})]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_fatal_error_ends_the_loop() {
		let Harness {
			task,
			mut frames,
			..
		} = harness(vec![Step::Output(json!(1)), Step::Fatal, Step::Output(json!(2))]);

		assert_eq!(task.run().await, PollExit::Fatal(ExecuteError::fatal("query no longer valid")));
		assert_eq!(delivered(&mut frames), vec![json!(1)]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_schema_change_wins_over_content_change() {
		let Harness {
			task,
			mut frames,
			..
		} = harness(vec![Step::Output(json!({"name": "sanitizer"})), Step::AdvanceSchemaThen(json!({"name": "mask"}))]);

		assert_eq!(task.run().await, PollExit::SchemaChanged(SchemaGeneration(2)));
		assert_eq!(delivered(&mut frames), vec![json!({"name": "sanitizer"})]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_abandons_in_flight_execution() {
		let Harness {
			task,
			mut frames,
			cancel,
		} = harness(vec![Step::Hang]);

		let running = tokio::spawn(task.run());
		sleep(Duration::from_millis(10)).await;
		cancel.cancel();

		assert_eq!(running.await.unwrap(), PollExit::Cancelled);
		assert!(delivered(&mut frames).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_closed_outbound_stops_the_loop() {
		let Harness {
			task,
			frames,
			..
		} = harness(vec![Step::Output(json!(1))]);
		drop(frames);

		assert_eq!(task.run().await, PollExit::TransportClosed);
	}
}
