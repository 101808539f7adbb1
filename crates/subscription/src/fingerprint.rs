// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Result fingerprints for change detection.
//!
//! A fingerprint is an xxHash3 128-bit digest over a canonical encoding of the
//! result document. Object members are visited in key order, so documents that
//! differ only in member order fingerprint identically; array order is
//! significant. Every value is prefixed with a type tag and every string with
//! its length, which keeps `1`, `"1"` and `true` apart.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xxhash_rust::xxh3::Xxh3;

use crate::engine::QueryDocument;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u128);

impl Display for Fingerprint {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{:032x}", self.0)
	}
}

impl From<Fingerprint> for u128 {
	fn from(fingerprint: Fingerprint) -> Self {
		fingerprint.0
	}
}

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_OBJECT: u8 = 6;
const TAG_ERRORS: u8 = 7;

/// Fingerprint of a full result document, data and errors.
pub fn fingerprint(document: &QueryDocument) -> Fingerprint {
	let mut hasher = Xxh3::new();
	write_value(&mut hasher, &document.data);

	hasher.update(&[TAG_ERRORS]);
	write_len(&mut hasher, document.errors.len());
	for error in &document.errors {
		write_str(&mut hasher, &error.message);
		write_len(&mut hasher, error.path.len());
		for segment in &error.path {
			write_value(&mut hasher, segment);
		}
	}

	Fingerprint(hasher.digest128())
}

/// Fingerprint of a single JSON value.
pub fn fingerprint_value(value: &Value) -> Fingerprint {
	let mut hasher = Xxh3::new();
	write_value(&mut hasher, value);
	Fingerprint(hasher.digest128())
}

fn write_value(hasher: &mut Xxh3, value: &Value) {
	match value {
		Value::Null => hasher.update(&[TAG_NULL]),
		Value::Bool(false) => hasher.update(&[TAG_FALSE]),
		Value::Bool(true) => hasher.update(&[TAG_TRUE]),
		Value::Number(number) => {
			hasher.update(&[TAG_NUMBER]);
			write_str(hasher, &number.to_string());
		}
		Value::String(string) => {
			hasher.update(&[TAG_STRING]);
			write_str(hasher, string);
		}
		Value::Array(items) => {
			hasher.update(&[TAG_ARRAY]);
			write_len(hasher, items.len());
			for item in items {
				write_value(hasher, item);
			}
		}
		Value::Object(members) => {
			hasher.update(&[TAG_OBJECT]);
			write_len(hasher, members.len());

			let mut sorted: Vec<_> = members.iter().collect();
			sorted.sort_unstable_by(|(left, _), (right, _)| left.as_bytes().cmp(right.as_bytes()));

			for (key, member) in sorted {
				write_str(hasher, key);
				write_value(hasher, member);
			}
		}
	}
}

fn write_str(hasher: &mut Xxh3, value: &str) {
	write_len(hasher, value.len());
	hasher.update(value.as_bytes());
}

fn write_len(hasher: &mut Xxh3, len: usize) {
	hasher.update(&(len as u64).to_le_bytes());
}

#[cfg(test)]
mod tests {
	use serde_json::{Map, json};

	use super::*;
	use crate::engine::QueryError;

	#[test]
	fn test_member_order_is_irrelevant() {
		let mut forward = Map::new();
		forward.insert("name".to_string(), json!("sanitizer"));
		forward.insert("price".to_string(), json!(3));

		let mut backward = Map::new();
		backward.insert("price".to_string(), json!(3));
		backward.insert("name".to_string(), json!("sanitizer"));

		assert_eq!(fingerprint_value(&Value::Object(forward)), fingerprint_value(&Value::Object(backward)));
	}

	#[test]
	fn test_array_order_matters() {
		assert_ne!(fingerprint_value(&json!([1, 2])), fingerprint_value(&json!([2, 1])));
	}

	#[test]
	fn test_scalars_do_not_collide() {
		let values = [json!(null), json!(1), json!("1"), json!(true), json!([]), json!({}), json!("")];
		for (i, left) in values.iter().enumerate() {
			for right in &values[i + 1..] {
				assert_ne!(fingerprint_value(left), fingerprint_value(right), "{left} vs {right}");
			}
		}
	}

	#[test]
	fn test_string_boundaries_are_encoded() {
		assert_ne!(fingerprint_value(&json!(["ab", "c"])), fingerprint_value(&json!(["a", "bc"])));
	}

	#[test]
	fn test_null_document_is_deterministic() {
		let empty = QueryDocument::new(Value::Null);
		assert_eq!(fingerprint(&empty), fingerprint(&QueryDocument::default()));
		assert_ne!(fingerprint(&empty), fingerprint(&QueryDocument::new(json!({"getProduct": null}))));
	}

	#[test]
	fn test_errors_take_part_in_the_fingerprint() {
		let data = json!({"getProduct": {"name": "mask"}});
		let clean = QueryDocument::new(data.clone());
		let partial = QueryDocument {
			data,
			errors: vec![QueryError::new("price could not be resolved")],
		};
		assert_ne!(fingerprint(&clean), fingerprint(&partial));
	}
}
