// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

// #![cfg_attr(not(debug_assertions), deny(warnings))]

//! Live query engine.
//!
//! A client registers a GraphQL subscription on a long-lived connection. The
//! [`Dispatcher`] validates it, binds its authorization claims once and spawns
//! a poll task that re-executes the prepared query on a fixed interval. A new
//! result is pushed only when its [`Fingerprint`] differs from the last one
//! delivered. Subscriptions end on client stop, connection close, fatal
//! execution errors, or as soon as the schema generation moves.

pub mod auth;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod outbound;
pub mod schema;
pub mod subscription;

/// Client chosen identifier of a subscription, unique per connection among live subscriptions.
pub type SubscriptionId = String;

pub use auth::{AuthConfig, AuthEvaluator, AuthRule, BoundVariables, ConnectionPayload};
pub use config::SubscriptionConfig;
pub use context::SubscriptionContext;
pub use dispatcher::Dispatcher;
pub use engine::{
	Execution, ExecutionOutput, OperationKind, PreparedQuery, QueryDocument, QueryEngine, QueryError,
	RootSelection, SubscriptionRequest, Variables,
};
pub use error::{AuthError, Diagnostic, ExecuteError, RegistrationError};
pub use fingerprint::{Fingerprint, fingerprint};
pub use outbound::{DataPayload, Outbound, OutboundGate, RegistrationSeq};
pub use schema::{SchemaGeneration, SchemaGenerationCell, SchemaWatcher};
pub use subscription::{PollExit, Subscription, SubscriptionState};
