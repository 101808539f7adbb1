// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

use crate::fixtures::{NAMESPACE, SECRET};

/// Signs `claims` with HS256 and `secret`.
pub fn sign_token(secret: &str, claims: &Value) -> String {
	encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes()))
		.expect("failed to sign test token")
}

/// Token for `user` under the sample namespace, signed with the sample secret.
pub fn user_token(user: &str) -> String {
	sign_token(SECRET, &json!({ NAMESPACE: { "USER": user, "ROLE": "USER" } }))
}

/// Like [`user_token`] but already expired.
pub fn expired_user_token(user: &str) -> String {
	sign_token(SECRET, &json!({ "exp": 1_000, NAMESPACE: { "USER": user } }))
}
