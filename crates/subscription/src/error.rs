// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Error taxonomy for subscription registration and execution.
//!
//! Registration failures never create a subscription. Execution failures are
//! classified by the query engine as transient (retried on the next tick) or
//! fatal (the subscription terminates). Schema generation changes and transport
//! failures are not errors from the client's point of view and are modelled as
//! termination reasons instead.

use serde::{Deserialize, Serialize};

/// Machine readable error payload carried by `error` and `connection_error` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
	pub code: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub help: Option<String>,
}

impl Diagnostic {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			help: None,
		}
	}

	pub fn with_help(mut self, help: impl Into<String>) -> Self {
		self.help = Some(help.into());
		self
	}
}

/// Failure to bind a connection's authorization payload to an auth rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
	#[error("authorization token missing from connection payload (expected `{header}`)")]
	MissingToken {
		header: String,
	},

	#[error("invalid authorization token: {0}")]
	InvalidToken(String),

	#[error("authorization token has expired")]
	Expired,

	#[error("token carries no claims under namespace `{0}`")]
	MissingNamespace(String),

	#[error("claim `{0}` required by the auth rule is missing")]
	MissingClaim(String),

	#[error("auth rule declared but no verification key is configured")]
	NotConfigured,

	#[error("invalid verification key: {0}")]
	InvalidKey(String),
}

impl AuthError {
	pub fn diagnostic(&self) -> Diagnostic {
		let code = match self {
			AuthError::MissingToken {
				..
			} => "AUTH_001",
			AuthError::InvalidToken(_) => "AUTH_002",
			AuthError::Expired => "AUTH_003",
			AuthError::MissingNamespace(_) => "AUTH_004",
			AuthError::MissingClaim(_) => "AUTH_005",
			AuthError::NotConfigured => "AUTH_006",
			AuthError::InvalidKey(_) => "AUTH_007",
		};
		Diagnostic::new(code, self.to_string())
	}
}

/// Rejection of a `start` request. The subscription never reaches `Active`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
	#[error("malformed subscription request: {0}")]
	Malformed(String),

	#[error("operation is not a subscription")]
	NotSubscription,

	#[error("subscription must select exactly one root field, found {0}")]
	MultipleRoots(usize),

	#[error("root field `{0}` does not support subscriptions")]
	NotSubscribable(String),

	#[error("subscription id `{0}` is already in use on this connection")]
	DuplicateId(String),

	#[error("subscription limit of {0} per connection reached")]
	TooManySubscriptions(usize),

	#[error("connection_init must be sent before start")]
	NotInitialised,

	#[error("connection is closing")]
	ConnectionClosed,

	#[error(transparent)]
	Auth(#[from] AuthError),
}

impl RegistrationError {
	pub fn diagnostic(&self) -> Diagnostic {
		match self {
			RegistrationError::Malformed(_) => Diagnostic::new("SUB_001", self.to_string()),
			RegistrationError::NotSubscription => Diagnostic::new("SUB_002", self.to_string())
				.with_help("use a `subscription { ... }` operation"),
			RegistrationError::MultipleRoots(_) => Diagnostic::new("SUB_003", self.to_string()),
			RegistrationError::NotSubscribable(_) => Diagnostic::new("SUB_004", self.to_string())
				.with_help("the root type must be declared with @withSubscription"),
			RegistrationError::DuplicateId(_) => Diagnostic::new("SUB_005", self.to_string())
				.with_help("stop the existing subscription or choose a new id"),
			RegistrationError::TooManySubscriptions(_) => Diagnostic::new("SUB_006", self.to_string()),
			RegistrationError::NotInitialised => Diagnostic::new("SUB_007", self.to_string()),
			RegistrationError::ConnectionClosed => Diagnostic::new("SUB_008", self.to_string()),
			RegistrationError::Auth(err) => err.diagnostic(),
		}
	}
}

/// Execution failure as classified by the query engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecuteError {
	/// Timeouts, unavailable storage, resource exhaustion. Retried on the next tick.
	#[error("transient execution failure: {0}")]
	Transient(String),

	/// Schema-incompatible query or otherwise permanently invalid state.
	#[error("fatal execution failure: {0}")]
	Fatal(String),
}

impl ExecuteError {
	pub fn transient(reason: impl Into<String>) -> Self {
		ExecuteError::Transient(reason.into())
	}

	pub fn fatal(reason: impl Into<String>) -> Self {
		ExecuteError::Fatal(reason.into())
	}

	pub fn is_fatal(&self) -> bool {
		matches!(self, ExecuteError::Fatal(_))
	}

	pub fn diagnostic(&self) -> Diagnostic {
		match self {
			ExecuteError::Transient(_) => Diagnostic::new("EXEC_001", self.to_string()),
			ExecuteError::Fatal(_) => Diagnostic::new("EXEC_002", self.to_string()),
		}
	}
}
