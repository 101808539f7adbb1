// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Contract with the external query engine.
//!
//! The engine turns a client request into a plan once, at registration, and
//! executes that plan on every tick. Executions for different subscriptions run
//! concurrently and must not mutate the shared plan or variables.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
	auth::{AuthRule, BoundVariables},
	error::{ExecuteError, RegistrationError},
	schema::SchemaGeneration,
};

/// Client supplied variables, immutable for the lifetime of a subscription.
pub type Variables = Map<String, Value>;

/// The `payload` of a `start` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
	pub query: String,
	#[serde(default)]
	pub variables: Option<Variables>,
	#[serde(default, rename = "operationName")]
	pub operation_name: Option<String>,
}

impl SubscriptionRequest {
	pub fn new(query: impl Into<String>) -> Self {
		Self {
			query: query.into(),
			variables: None,
			operation_name: None,
		}
	}

	pub fn with_variables(mut self, variables: Variables) -> Self {
		self.variables = Some(variables);
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
	Query,
	Mutation,
	Subscription,
}

/// One top level field selected by the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSelection {
	pub field: String,
	pub type_name: String,
	/// Whether the root type accepts subscriptions.
	pub subscribable: bool,
}

/// Output of [`QueryEngine::prepare`].
#[derive(Debug)]
pub struct PreparedQuery<P> {
	pub operation: OperationKind,
	pub roots: Vec<RootSelection>,
	/// Auth rule declared on the root type, if any.
	pub auth_rule: Option<AuthRule>,
	pub plan: P,
}

impl<P> PreparedQuery<P> {
	/// The single root field of a valid subscription.
	pub fn root(&self) -> Option<&RootSelection> {
		match self.roots.as_slice() {
			[root] => Some(root),
			_ => None,
		}
	}
}

/// A GraphQL error entry reported alongside partial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
	pub message: String,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub path: Vec<Value>,
}

impl QueryError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			path: Vec::new(),
		}
	}
}

/// The result document of one execution.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryDocument {
	pub data: Value,
	pub errors: Vec<QueryError>,
}

impl QueryDocument {
	pub fn new(data: Value) -> Self {
		Self {
			data,
			errors: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
	pub document: QueryDocument,
	/// Number of graph records visited. Reported to the client, never diffed.
	pub touched: u64,
}

/// Everything an engine needs to run one tick of a subscription.
///
/// All parts are shared handles so the execution can be moved onto its own task.
pub struct Execution<P> {
	pub query: Arc<PreparedQuery<P>>,
	pub variables: Arc<Variables>,
	pub bound: Arc<BoundVariables>,
	pub generation: SchemaGeneration,
}

impl<P> Clone for Execution<P> {
	fn clone(&self) -> Self {
		Self {
			query: self.query.clone(),
			variables: self.variables.clone(),
			bound: self.bound.clone(),
			generation: self.generation,
		}
	}
}

#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
	type Plan: Send + Sync + 'static;

	/// Parses and plans a request against the current schema.
	fn prepare(&self, request: &SubscriptionRequest) -> Result<PreparedQuery<Self::Plan>, RegistrationError>;

	/// Executes a prepared plan against the current data.
	async fn execute(&self, execution: Execution<Self::Plan>) -> Result<ExecutionOutput, ExecuteError>;
}
