// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Binding of a connection's authorization payload to a query's auth rule.
//!
//! A rule is bound exactly once, when the subscription is registered. The
//! resulting variables are reused unchanged by every later poll and are never
//! re-verified, so a subscription keeps running after its token has expired.
//! This is a known limitation: revoking access requires closing the connection.

use std::collections::HashSet;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AuthError;

/// The `payload` of a `connection_init` frame, e.g. `{"Authorization": "<token>"}`.
pub type ConnectionPayload = Map<String, Value>;

/// Auth rule declared on a root type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRule {
	/// The rule's embedded query, e.g. `query ($USER: String!) { ... }`.
	pub query: String,
	/// Claim names the rule references as `$NAME` placeholders.
	#[serde(default)]
	pub variables: Vec<String>,
}

impl AuthRule {
	pub fn new(query: impl Into<String>, variables: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			query: query.into(),
			variables: variables.into_iter().map(Into::into).collect(),
		}
	}
}

/// Verified claims made available to a subscription's auth rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundVariables(Map<String, Value>);

impl BoundVariables {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
		self.0.iter()
	}
}

impl From<Map<String, Value>> for BoundVariables {
	fn from(claims: Map<String, Value>) -> Self {
		Self(claims)
	}
}

fn default_header() -> String {
	"Authorization".to_string()
}

/// Token verification settings, in the shape of the schema's
/// `# Dgraph.Authorization {...}` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthConfig {
	/// Shared secret for HMAC algorithms, PEM encoded public key otherwise.
	pub verification_key: String,
	/// Key of the token inside the `connection_init` payload.
	#[serde(default = "default_header")]
	pub header: String,
	/// Claim holding the object whose entries become bound variables.
	pub namespace: String,
	#[serde(rename = "Algo", default)]
	pub algorithm: Algorithm,
}

impl AuthConfig {
	pub fn new(verification_key: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			verification_key: verification_key.into(),
			header: default_header(),
			namespace: namespace.into(),
			algorithm: Algorithm::HS256,
		}
	}

	pub fn header(mut self, header: impl Into<String>) -> Self {
		self.header = header.into();
		self
	}

	pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
		self.algorithm = algorithm;
		self
	}
}

struct Verifier {
	header: String,
	namespace: String,
	key: DecodingKey,
	validation: Validation,
}

/// Verifies tokens and produces [`BoundVariables`] for auth rules.
pub struct AuthEvaluator {
	verifier: Option<Verifier>,
}

impl AuthEvaluator {
	/// An evaluator without verification settings. Rule-less queries still bind;
	/// queries that declare a rule are rejected with [`AuthError::NotConfigured`].
	pub fn disabled() -> Self {
		Self {
			verifier: None,
		}
	}

	pub fn new(config: AuthConfig) -> Result<Self, AuthError> {
		let key = decoding_key(&config)?;

		let mut validation = Validation::new(config.algorithm);
		// exp and nbf are checked only when the token carries them
		validation.required_spec_claims = HashSet::new();
		validation.validate_exp = true;
		validation.validate_nbf = true;
		validation.validate_aud = false;

		Ok(Self {
			verifier: Some(Verifier {
				header: config.header,
				namespace: config.namespace,
				key,
				validation,
			}),
		})
	}

	pub fn from_config(config: Option<AuthConfig>) -> Result<Self, AuthError> {
		match config {
			Some(config) => Self::new(config),
			None => Ok(Self::disabled()),
		}
	}

	/// Binds the connection payload to `rule`.
	///
	/// Without a rule the result is empty and the payload is not inspected.
	pub fn bind(
		&self,
		payload: Option<&ConnectionPayload>,
		rule: Option<&AuthRule>,
	) -> Result<BoundVariables, AuthError> {
		let Some(rule) = rule else {
			return Ok(BoundVariables::empty());
		};

		let verifier = self.verifier.as_ref().ok_or(AuthError::NotConfigured)?;

		let token = payload.and_then(|payload| extract_token(payload, &verifier.header)).ok_or_else(|| {
			AuthError::MissingToken {
				header: verifier.header.clone(),
			}
		})?;

		let data = decode::<Map<String, Value>>(token, &verifier.key, &verifier.validation).map_err(|err| {
			match err.kind() {
				ErrorKind::ExpiredSignature => AuthError::Expired,
				_ => AuthError::InvalidToken(err.to_string()),
			}
		})?;

		let claims = match data.claims.get(&verifier.namespace) {
			Some(Value::Object(claims)) => claims.clone(),
			_ => return Err(AuthError::MissingNamespace(verifier.namespace.clone())),
		};

		if let Some(missing) = rule.variables.iter().find(|name| !claims.contains_key(name.as_str())) {
			return Err(AuthError::MissingClaim(missing.clone()));
		}

		tracing::debug!(claims = claims.len(), "auth rule bound");
		Ok(BoundVariables::from(claims))
	}
}

fn decoding_key(config: &AuthConfig) -> Result<DecodingKey, AuthError> {
	let key = config.verification_key.as_bytes();
	let decoded = match config.algorithm {
		Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => return Ok(DecodingKey::from_secret(key)),
		Algorithm::RS256
		| Algorithm::RS384
		| Algorithm::RS512
		| Algorithm::PS256
		| Algorithm::PS384
		| Algorithm::PS512 => DecodingKey::from_rsa_pem(key),
		Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(key),
		Algorithm::EdDSA => DecodingKey::from_ed_pem(key),
	};
	decoded.map_err(|err| AuthError::InvalidKey(err.to_string()))
}

fn extract_token<'a>(payload: &'a ConnectionPayload, header: &str) -> Option<&'a str> {
	let value = payload.iter().find(|(key, _)| key.eq_ignore_ascii_case(header)).map(|(_, value)| value)?;
	let token = value.as_str()?.trim();
	let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
	if token.is_empty() {
		None
	} else {
		Some(token)
	}
}
