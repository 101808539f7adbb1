// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use serde_json::json;

use crate::graph::{MemoryGraph, edge};

pub const SECRET: &str = "secret";
pub const NAMESPACE: &str = "https://dgraph.io";

/// Graph matching [`crate::MemorySchema::sample`].
///
/// | uid | type | content |
/// |-----|------|---------|
/// | 0x2 | Product | Sanitizer, reviewed by 0x4 |
/// | 0x3 | Customer | jatin |
/// | 0x4 | Review | by 0x3 about 0x2 |
/// | 0x5 | Todo | owned by jatin |
/// | 0x6 | Todo | owned by pawan |
pub fn sample_graph() -> MemoryGraph {
	let graph = MemoryGraph::new();

	let product = graph.insert("Product", json!({"name": "Sanitizer", "price": 10}));
	let customer = graph.insert("Customer", json!({"username": "jatin"}));
	let review = graph.insert(
		"Review",
		json!({"body": "Fits perfectly", "by": edge(&customer), "about": edge(&product)}),
	);
	graph.set(&product, "reviews", json!([edge(&review)]));

	graph.insert("Todo", json!({"text": "Buy milk", "owner": "jatin"}));
	graph.insert("Todo", json!({"text": "Ship release", "owner": "pawan"}));

	graph
}
