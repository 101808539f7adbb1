// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! A [`QueryEngine`] over [`MemoryGraph`].
//!
//! Root fields follow the generated GraphQL API shape: `get<Type>(<idField>: ..)`
//! returns one record or `null`, `query<Type>(filter: {field: {eq: ..}}, first: n)`
//! returns a list. Types with an owner rule only expose records whose owner
//! equals the bound claim. Every projected record counts as touched.
//!
//! Besides executing queries the engine can inject failures and latency and
//! records how many executions of the same prepared query overlapped.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Arc,
		atomic::{AtomicU64, AtomicUsize, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use livegraph_subscription::{
	BoundVariables, ExecuteError, Execution, ExecutionOutput, PreparedQuery, QueryDocument, QueryEngine,
	RegistrationError, RootSelection, SchemaGeneration, SchemaGenerationCell, SubscriptionRequest, Variables,
};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::time::sleep;

use crate::{
	graph::{MemoryGraph, Record, edge_target},
	parser::{Field, Operation, parse},
	schema::{MemorySchema, RootKind, TypeDef},
};

/// Parsed operation plus the schema it was planned against.
#[derive(Debug)]
pub struct MemoryPlan {
	pub operation: Operation,
	pub schema: Arc<MemorySchema>,
}

pub struct MemoryEngine {
	graph: Arc<MemoryGraph>,
	schema: RwLock<Arc<MemorySchema>>,
	generation: Arc<SchemaGenerationCell>,
	failures: Mutex<VecDeque<ExecuteError>>,
	latency: Mutex<Duration>,
	blocking: Mutex<Duration>,
	executions: AtomicU64,
	in_flight: AtomicUsize,
	per_query: Mutex<HashMap<usize, usize>>,
	max_overlap: AtomicUsize,
}

impl MemoryEngine {
	pub fn new(graph: Arc<MemoryGraph>, schema: MemorySchema) -> Self {
		Self {
			graph,
			schema: RwLock::new(Arc::new(schema)),
			generation: Arc::new(SchemaGenerationCell::default()),
			failures: Mutex::new(VecDeque::new()),
			latency: Mutex::new(Duration::ZERO),
			blocking: Mutex::new(Duration::ZERO),
			executions: AtomicU64::new(0),
			in_flight: AtomicUsize::new(0),
			per_query: Mutex::new(HashMap::new()),
			max_overlap: AtomicUsize::new(0),
		}
	}

	pub fn graph(&self) -> &Arc<MemoryGraph> {
		&self.graph
	}

	/// The generation cell advanced by [`MemoryEngine::replace_schema`].
	pub fn schema_watcher(&self) -> Arc<SchemaGenerationCell> {
		self.generation.clone()
	}

	/// Swaps the schema and advances the generation.
	pub fn replace_schema(&self, schema: MemorySchema) -> SchemaGeneration {
		*self.schema.write() = Arc::new(schema);
		self.generation.advance()
	}

	/// Makes an upcoming execution fail with `error`. Failures queue up in order.
	pub fn fail_next(&self, error: ExecuteError) {
		self.failures.lock().push_back(error);
	}

	/// Delay applied to every execution before it reads the graph.
	pub fn set_latency(&self, latency: Duration) {
		*self.latency.lock() = latency;
	}

	/// Blocks the executing thread for `duration` without yielding, the way a
	/// synchronous storage call would. Aborting such an execution has no effect
	/// until it returns.
	pub fn set_blocking(&self, duration: Duration) {
		*self.blocking.lock() = duration;
	}

	/// Executions started so far.
	pub fn executions(&self) -> u64 {
		self.executions.load(Ordering::SeqCst)
	}

	/// Executions currently running, across all queries.
	pub fn in_flight(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}

	/// Highest number of executions of one prepared query ever running at once.
	pub fn max_overlap(&self) -> usize {
		self.max_overlap.load(Ordering::SeqCst)
	}

	fn track<P>(&self, query: &Arc<PreparedQuery<P>>) -> InFlight<'_> {
		let key = Arc::as_ptr(query) as usize;
		self.in_flight.fetch_add(1, Ordering::SeqCst);

		let mut per_query = self.per_query.lock();
		let running = per_query.entry(key).or_insert(0);
		*running += 1;
		self.max_overlap.fetch_max(*running, Ordering::SeqCst);

		InFlight {
			engine: self,
			key,
		}
	}
}

/// Decrements the overlap counters when an execution finishes or is aborted.
struct InFlight<'a> {
	engine: &'a MemoryEngine,
	key: usize,
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);

		let mut per_query = self.engine.per_query.lock();
		if let Some(running) = per_query.get_mut(&self.key) {
			*running -= 1;
			if *running == 0 {
				per_query.remove(&self.key);
			}
		}
	}
}

#[async_trait]
impl QueryEngine for MemoryEngine {
	type Plan = MemoryPlan;

	fn prepare(&self, request: &SubscriptionRequest) -> Result<PreparedQuery<MemoryPlan>, RegistrationError> {
		let operation = parse(&request.query).map_err(|err| RegistrationError::Malformed(err.to_string()))?;
		let schema = self.schema.read().clone();

		let mut roots = Vec::with_capacity(operation.selections.len());
		for field in &operation.selections {
			let (_, def) = schema
				.root(&field.name)
				.ok_or_else(|| RegistrationError::Malformed(format!("unknown root field `{}`", field.name)))?;
			roots.push(RootSelection {
				field: field.name.clone(),
				type_name: def.name.clone(),
				subscribable: def.subscribable,
			});
		}

		let auth_rule = roots.first().and_then(|root| schema.get(&root.type_name)).and_then(TypeDef::auth_rule);

		Ok(PreparedQuery {
			operation: operation.kind,
			roots,
			auth_rule,
			plan: MemoryPlan {
				operation,
				schema,
			},
		})
	}

	async fn execute(&self, execution: Execution<MemoryPlan>) -> Result<ExecutionOutput, ExecuteError> {
		let _in_flight = self.track(&execution.query);
		self.executions.fetch_add(1, Ordering::SeqCst);

		let failure = self.failures.lock().pop_front();
		let latency = *self.latency.lock();
		if !latency.is_zero() {
			sleep(latency).await;
		}
		let blocking = *self.blocking.lock();
		if !blocking.is_zero() {
			std::thread::sleep(blocking);
		}
		if let Some(failure) = failure {
			return Err(failure);
		}

		let plan = &execution.query.plan;
		let mut resolver = Resolver {
			graph: &self.graph,
			schema: &plan.schema,
			variables: &execution.variables,
			bound: &execution.bound,
			touched: 0,
		};

		let mut data = Map::new();
		for field in &plan.operation.selections {
			let value = resolver.root(field)?;
			data.insert(field.key().to_string(), value);
		}

		Ok(ExecutionOutput {
			document: QueryDocument::new(Value::Object(data)),
			touched: resolver.touched,
		})
	}
}

struct Resolver<'a> {
	graph: &'a MemoryGraph,
	schema: &'a MemorySchema,
	variables: &'a Variables,
	bound: &'a BoundVariables,
	touched: u64,
}

impl Resolver<'_> {
	fn root(&mut self, field: &Field) -> Result<Value, ExecuteError> {
		let (kind, def) = self
			.schema
			.root(&field.name)
			.ok_or_else(|| ExecuteError::fatal(format!("root field `{}` is not part of the schema", field.name)))?;

		match kind {
			RootKind::Get => {
				let id = field
					.argument(&def.id_field)
					.or_else(|| field.argument("id"))
					.map(|argument| argument.resolve(self.variables));
				let Some(Value::String(uid)) = id else {
					return Ok(Value::Null);
				};

				match self.graph.get(&uid) {
					Some(record) if record.type_name == def.name && self.visible(&record) => {
						Ok(self.project(&record, &field.selections))
					}
					_ => Ok(Value::Null),
				}
			}
			RootKind::Query => {
				let filter = field.argument("filter").map(|argument| argument.resolve(self.variables));
				let first = field.argument("first").and_then(|argument| argument.resolve(self.variables).as_u64());

				let mut items = Vec::new();
				for record in self.graph.of_type(&def.name) {
					if first.is_some_and(|first| items.len() as u64 >= first) {
						break;
					}
					if self.visible(&record) && matches_filter(def, &record, filter.as_ref()) {
						items.push(self.project(&record, &field.selections));
					}
				}
				Ok(Value::Array(items))
			}
		}
	}

	/// Owner rule check against the bound claims.
	fn visible(&self, record: &Record) -> bool {
		let Some(owner) = self.schema.get(&record.type_name).and_then(|def| def.owner.as_ref()) else {
			return true;
		};
		match self.bound.get(&owner.claim) {
			Some(claim) => record.fields.get(&owner.field) == Some(claim),
			None => false,
		}
	}

	fn project(&mut self, record: &Record, selections: &[Field]) -> Value {
		self.touched += 1;
		let id_field = self.schema.get(&record.type_name).map(|def| def.id_field.as_str());

		let mut projected = Map::new();
		for field in selections {
			let value = if field.name == "__typename" {
				Value::String(record.type_name.clone())
			} else if id_field == Some(field.name.as_str()) {
				Value::String(record.uid.clone())
			} else {
				let raw = record.fields.get(&field.name).cloned().unwrap_or(Value::Null);
				self.nested(raw, &field.selections)
			};
			projected.insert(field.key().to_string(), value);
		}
		Value::Object(projected)
	}

	fn nested(&mut self, value: Value, selections: &[Field]) -> Value {
		if let Value::Array(items) = value {
			// dangling and hidden edges disappear from lists
			return Value::Array(
				items.into_iter().map(|item| self.nested(item, selections)).filter(|item| !item.is_null()).collect(),
			);
		}

		if let Some(uid) = edge_target(&value) {
			return match self.graph.get(uid) {
				Some(target) if self.visible(&target) => {
					if selections.is_empty() {
						Value::String(target.uid)
					} else {
						self.project(&target, selections)
					}
				}
				_ => Value::Null,
			};
		}

		match value {
			Value::Object(members) if !selections.is_empty() => {
				let mut projected = Map::new();
				for field in selections {
					let member = members.get(&field.name).cloned().unwrap_or(Value::Null);
					projected.insert(field.key().to_string(), self.nested(member, &field.selections));
				}
				Value::Object(projected)
			}
			value => value,
		}
	}
}

fn matches_filter(def: &TypeDef, record: &Record, filter: Option<&Value>) -> bool {
	let Some(Value::Object(conditions)) = filter else {
		return true;
	};

	conditions.iter().all(|(field, condition)| {
		let actual = if *field == def.id_field {
			Some(Value::String(record.uid.clone()))
		} else {
			record.fields.get(field).cloned()
		};
		match condition.get("eq") {
			Some(expected) => actual.as_ref() == Some(expected),
			None => true,
		}
	})
}

#[cfg(test)]
mod tests {
	use livegraph_subscription::{AuthRule, OperationKind, SchemaWatcher};
	use serde_json::json;

	use super::*;
	use crate::fixtures::sample_graph;

	fn engine() -> MemoryEngine {
		MemoryEngine::new(Arc::new(sample_graph()), MemorySchema::sample())
	}

	async fn run(engine: &MemoryEngine, query: &str, bound: BoundVariables) -> Result<ExecutionOutput, ExecuteError> {
		let prepared = engine.prepare(&SubscriptionRequest::new(query)).unwrap();
		engine
			.execute(Execution {
				query: Arc::new(prepared),
				variables: Arc::new(Variables::new()),
				bound: Arc::new(bound),
				generation: SchemaGeneration(1),
			})
			.await
	}

	#[test]
	fn test_prepare_reports_roots_and_rules() {
		let engine = engine();

		let prepared =
			engine.prepare(&SubscriptionRequest::new(r#"subscription { getProduct(productID: "0x2") { name } }"#)).unwrap();
		assert_eq!(prepared.operation, OperationKind::Subscription);
		assert_eq!(prepared.root().unwrap().type_name, "Product");
		assert!(prepared.root().unwrap().subscribable);
		assert_eq!(prepared.auth_rule, None);

		let prepared = engine.prepare(&SubscriptionRequest::new("subscription { queryTodo { text } }")).unwrap();
		assert_eq!(prepared.auth_rule.map(|rule: AuthRule| rule.variables), Some(vec!["USER".to_string()]));

		let prepared = engine.prepare(&SubscriptionRequest::new("subscription { getReview(id: \"0x4\") { body } }")).unwrap();
		assert!(!prepared.root().unwrap().subscribable);
	}

	#[test]
	fn test_prepare_rejects_unknown_roots_and_syntax() {
		let engine = engine();
		assert!(matches!(
			engine.prepare(&SubscriptionRequest::new("subscription { getPlanet { name } }")),
			Err(RegistrationError::Malformed(_))
		));
		assert!(matches!(
			engine.prepare(&SubscriptionRequest::new("subscription { getProduct")),
			Err(RegistrationError::Malformed(_))
		));
	}

	#[tokio::test]
	async fn test_get_projects_nested_edges() {
		let engine = engine();
		let output = run(
			&engine,
			r#"subscription { getProduct(productID: "0x2") { productID name reviews { body by { username } } } }"#,
			BoundVariables::empty(),
		)
		.await
		.unwrap();

		assert_eq!(
			output.document.data,
			json!({"getProduct": {
				"productID": "0x2",
				"name": "Sanitizer",
				"reviews": [{"body": "Fits perfectly", "by": {"username": "jatin"}}]
			}})
		);
		// product, review, customer
		assert_eq!(output.touched, 3);
	}

	#[tokio::test]
	async fn test_get_unknown_record_is_null() {
		let engine = engine();
		let output =
			run(&engine, r#"subscription { getProduct(productID: "0x99") { name } }"#, BoundVariables::empty())
				.await
				.unwrap();
		assert_eq!(output.document.data, json!({"getProduct": null}));
		assert_eq!(output.touched, 0);
	}

	#[tokio::test]
	async fn test_owner_rule_filters_by_bound_claim() {
		let engine = engine();
		let mut claims = Map::new();
		claims.insert("USER".to_string(), json!("jatin"));

		let output = run(&engine, "subscription { queryTodo { text owner } }", BoundVariables::from(claims))
			.await
			.unwrap();
		assert_eq!(output.document.data, json!({"queryTodo": [{"text": "Buy milk", "owner": "jatin"}]}));

		let output = run(&engine, "subscription { queryTodo { text } }", BoundVariables::empty()).await.unwrap();
		assert_eq!(output.document.data, json!({"queryTodo": []}));
	}

	#[tokio::test]
	async fn test_filter_and_first() {
		let engine = engine();
		engine.graph().insert("Product", json!({"name": "Mask"}));
		engine.graph().insert("Product", json!({"name": "Mask"}));

		let output = run(
			&engine,
			r#"subscription { queryProduct(filter: {name: {eq: "Mask"}}, first: 1) { __typename name } }"#,
			BoundVariables::empty(),
		)
		.await
		.unwrap();
		assert_eq!(output.document.data, json!({"queryProduct": [{"__typename": "Product", "name": "Mask"}]}));
	}

	#[tokio::test]
	async fn test_injected_failures_are_consumed_in_order() {
		let engine = engine();
		engine.fail_next(ExecuteError::transient("storage unavailable"));
		engine.fail_next(ExecuteError::fatal("predicate dropped"));

		let query = r#"subscription { getProduct(productID: "0x2") { name } }"#;
		assert_eq!(run(&engine, query, BoundVariables::empty()).await, Err(ExecuteError::transient("storage unavailable")));
		assert_eq!(run(&engine, query, BoundVariables::empty()).await, Err(ExecuteError::fatal("predicate dropped")));
		assert!(run(&engine, query, BoundVariables::empty()).await.is_ok());
		assert_eq!(engine.executions(), 3);
		assert_eq!(engine.in_flight(), 0);
	}

	#[tokio::test]
	async fn test_replace_schema_advances_generation() {
		let engine = engine();
		let watcher = engine.schema_watcher();
		assert_eq!(watcher.generation(), SchemaGeneration(1));

		assert_eq!(engine.replace_schema(MemorySchema::new()), SchemaGeneration(2));
		assert_eq!(watcher.generation(), SchemaGeneration(2));
		assert!(engine.prepare(&SubscriptionRequest::new("subscription { getProduct { name } }")).is_err());
	}
}
