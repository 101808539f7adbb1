// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! In-memory graph of typed records.
//!
//! Records are addressed by a hex uid (`0x2`, `0x3`, ...). A field whose value
//! is `{"uid": "0x.."}`, or an array of those, is an edge to another record.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::{Map, Value, json};

pub type Uid = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
	pub uid: Uid,
	pub type_name: String,
	pub fields: Map<String, Value>,
}

struct Records {
	next: u64,
	by_uid: BTreeMap<u64, Record>,
}

pub struct MemoryGraph {
	records: RwLock<Records>,
}

impl Default for MemoryGraph {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryGraph {
	pub fn new() -> Self {
		Self {
			records: RwLock::new(Records {
				// 0x1 is reserved, the first record is 0x2
				next: 2,
				by_uid: BTreeMap::new(),
			}),
		}
	}

	/// Inserts a record and returns its uid. Non-object `fields` yield an empty record.
	pub fn insert(&self, type_name: &str, fields: Value) -> Uid {
		let fields = match fields {
			Value::Object(fields) => fields,
			_ => Map::new(),
		};

		let mut records = self.records.write();
		let raw = records.next;
		records.next += 1;

		let uid = format_uid(raw);
		records.by_uid.insert(
			raw,
			Record {
				uid: uid.clone(),
				type_name: type_name.to_string(),
				fields,
			},
		);
		uid
	}

	/// Sets one field of an existing record. Returns `false` for an unknown uid.
	pub fn set(&self, uid: &str, field: &str, value: Value) -> bool {
		let Some(raw) = parse_uid(uid) else {
			return false;
		};
		match self.records.write().by_uid.get_mut(&raw) {
			Some(record) => {
				record.fields.insert(field.to_string(), value);
				true
			}
			None => false,
		}
	}

	pub fn delete(&self, uid: &str) -> bool {
		parse_uid(uid).is_some_and(|raw| self.records.write().by_uid.remove(&raw).is_some())
	}

	pub fn get(&self, uid: &str) -> Option<Record> {
		let raw = parse_uid(uid)?;
		self.records.read().by_uid.get(&raw).cloned()
	}

	/// All records of `type_name` in uid order.
	pub fn of_type(&self, type_name: &str) -> Vec<Record> {
		self.records.read().by_uid.values().filter(|record| record.type_name == type_name).cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.records.read().by_uid.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Edge value pointing at `uid`.
pub fn edge(uid: &str) -> Value {
	json!({ "uid": uid })
}

/// The uid an edge value points at.
pub fn edge_target(value: &Value) -> Option<&str> {
	match value {
		Value::Object(members) if members.len() == 1 => members.get("uid")?.as_str(),
		_ => None,
	}
}

pub fn format_uid(raw: u64) -> Uid {
	format!("{raw:#x}")
}

pub fn parse_uid(uid: &str) -> Option<u64> {
	let digits = uid.strip_prefix("0x").or_else(|| uid.strip_prefix("0X"))?;
	u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_uids_start_at_two() {
		let graph = MemoryGraph::new();
		assert_eq!(graph.insert("Product", json!({"name": "sanitizer"})), "0x2");
		assert_eq!(graph.insert("Product", json!({"name": "mask"})), "0x3");
		assert_eq!(graph.len(), 2);
	}

	#[test]
	fn test_set_and_delete() {
		let graph = MemoryGraph::new();
		let uid = graph.insert("Product", json!({"name": "sanitizer"}));

		assert!(graph.set(&uid, "name", json!("mask")));
		assert_eq!(graph.get(&uid).unwrap().fields["name"], json!("mask"));
		assert!(!graph.set("0x99", "name", json!("x")));

		assert!(graph.delete(&uid));
		assert!(graph.get(&uid).is_none());
		assert!(!graph.delete(&uid));
	}

	#[test]
	fn test_of_type_filters_and_orders() {
		let graph = MemoryGraph::new();
		let first = graph.insert("Todo", json!({"text": "a"}));
		graph.insert("Product", json!({}));
		let second = graph.insert("Todo", json!({"text": "b"}));

		let todos: Vec<_> = graph.of_type("Todo").into_iter().map(|record| record.uid).collect();
		assert_eq!(todos, vec![first, second]);
	}

	#[test]
	fn test_edges() {
		assert_eq!(edge_target(&edge("0x4")), Some("0x4"));
		assert_eq!(edge_target(&json!({"uid": "0x4", "name": "x"})), None);
		assert_eq!(parse_uid("0x1f"), Some(31));
		assert_eq!(parse_uid("31"), None);
	}
}
