// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::collections::BTreeMap;

use livegraph_subscription::AuthRule;

/// Restricts a type to records whose `field` equals the bound claim `claim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRule {
	pub field: String,
	pub claim: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
	pub name: String,
	/// Field that exposes the record uid, e.g. `productID`.
	pub id_field: String,
	/// Declared with `@withSubscription`.
	pub subscribable: bool,
	pub owner: Option<OwnerRule>,
}

impl TypeDef {
	pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			id_field: id_field.into(),
			subscribable: false,
			owner: None,
		}
	}

	pub fn subscribable(mut self) -> Self {
		self.subscribable = true;
		self
	}

	pub fn owned_by(mut self, field: impl Into<String>, claim: impl Into<String>) -> Self {
		self.owner = Some(OwnerRule {
			field: field.into(),
			claim: claim.into(),
		});
		self
	}

	/// The rule in the shape a schema's `@auth(query: ...)` directive carries it.
	pub fn auth_rule(&self) -> Option<AuthRule> {
		let owner = self.owner.as_ref()?;
		Some(AuthRule::new(
			format!(
				"query (${claim}: String!) {{ query{name}(filter: {{ {field}: {{ eq: ${claim} }} }}) {{ __typename }} }}",
				claim = owner.claim,
				name = self.name,
				field = owner.field,
			),
			[owner.claim.clone()],
		))
	}
}

/// The set of types the in-memory engine serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySchema {
	types: BTreeMap<String, TypeDef>,
}

impl MemorySchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_type(mut self, def: TypeDef) -> Self {
		self.types.insert(def.name.clone(), def);
		self
	}

	pub fn get(&self, name: &str) -> Option<&TypeDef> {
		self.types.get(name)
	}

	/// Resolves a root field (`get<Type>` or `query<Type>`) to its type.
	pub fn root(&self, field: &str) -> Option<(RootKind, &TypeDef)> {
		if let Some(def) = field.strip_prefix("get").and_then(|name| self.types.get(name)) {
			return Some((RootKind::Get, def));
		}
		field.strip_prefix("query").and_then(|name| self.types.get(name)).map(|def| (RootKind::Query, def))
	}

	/// Products with reviews and customers plus owner restricted todos.
	pub fn sample() -> Self {
		Self::new()
			.with_type(TypeDef::new("Product", "productID").subscribable())
			.with_type(TypeDef::new("Customer", "id").subscribable())
			.with_type(TypeDef::new("Review", "id"))
			.with_type(TypeDef::new("Todo", "id").subscribable().owned_by("owner", "USER"))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
	/// Single record by id.
	Get,
	/// All matching records.
	Query,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_root_resolution() {
		let schema = MemorySchema::sample();

		let (kind, def) = schema.root("getProduct").unwrap();
		assert_eq!(kind, RootKind::Get);
		assert_eq!(def.id_field, "productID");

		let (kind, def) = schema.root("queryTodo").unwrap();
		assert_eq!(kind, RootKind::Query);
		assert!(def.owner.is_some());

		assert!(schema.root("getNothing").is_none());
		assert!(schema.root("Product").is_none());
	}

	#[test]
	fn test_auth_rule_references_claim() {
		let schema = MemorySchema::sample();
		let rule = schema.get("Todo").unwrap().auth_rule().unwrap();
		assert_eq!(rule.variables, vec!["USER".to_string()]);
		assert!(rule.query.contains("queryTodo(filter: { owner: { eq: $USER } })"));
		assert!(schema.get("Product").unwrap().auth_rule().is_none());
	}
}
