// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Just enough GraphQL to drive the in-memory engine: one operation, nested
//! selection sets, aliases and arguments. Fragments are rejected; variable
//! definitions and directives are skipped.

use livegraph_subscription::{OperationKind, Variables};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
	pub message: String,
	pub offset: usize,
}

impl ParseError {
	fn new(message: impl Into<String>, offset: usize) -> Self {
		Self {
			message: message.into(),
			offset,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
	Literal(Value),
	Variable(String),
	List(Vec<Argument>),
	Object(Vec<(String, Argument)>),
}

impl Argument {
	/// Substitutes variables. Unknown variables resolve to `null`.
	pub fn resolve(&self, variables: &Variables) -> Value {
		match self {
			Argument::Literal(value) => value.clone(),
			Argument::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
			Argument::List(items) => Value::Array(items.iter().map(|item| item.resolve(variables)).collect()),
			Argument::Object(members) => Value::Object(
				members.iter().map(|(name, member)| (name.clone(), member.resolve(variables))).collect(),
			),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub alias: Option<String>,
	pub name: String,
	pub arguments: Vec<(String, Argument)>,
	pub selections: Vec<Field>,
}

impl Field {
	/// Response key: the alias if present, the field name otherwise.
	pub fn key(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.name)
	}

	pub fn argument(&self, name: &str) -> Option<&Argument> {
		self.arguments.iter().find(|(candidate, _)| candidate == name).map(|(_, argument)| argument)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
	pub kind: OperationKind,
	pub name: Option<String>,
	pub selections: Vec<Field>,
}

pub fn parse(source: &str) -> Result<Operation, ParseError> {
	let mut parser = Parser {
		tokens: tokenize(source)?,
		pos: 0,
		end: source.len(),
	};

	let operation = parser.operation()?;
	if parser.peek().is_some() {
		return Err(ParseError::new("only a single operation is supported", parser.offset()));
	}
	Ok(operation)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
	Punct(char),
	Name(String),
	Variable(String),
	Str(String),
	Number(Value),
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, ParseError> {
	let mut tokens = Vec::new();
	let mut chars = source.char_indices().peekable();

	while let Some(&(offset, c)) = chars.peek() {
		match c {
			c if c.is_whitespace() || c == ',' => {
				chars.next();
			}
			'#' => {
				for (_, c) in chars.by_ref() {
					if c == '\n' {
						break;
					}
				}
			}
			'{' | '}' | '(' | ')' | '[' | ']' | ':' | '!' | '=' | '@' => {
				chars.next();
				tokens.push((offset, Token::Punct(c)));
			}
			'.' => return Err(ParseError::new("fragments are not supported", offset)),
			'$' => {
				chars.next();
				let name = take_name(&mut chars);
				if name.is_empty() {
					return Err(ParseError::new("expected a variable name after `$`", offset));
				}
				tokens.push((offset, Token::Variable(name)));
			}
			'"' => {
				chars.next();
				let mut text = String::new();
				loop {
					match chars.next() {
						Some((_, '"')) => break,
						Some((_, '\\')) => match chars.next() {
							Some((_, 'n')) => text.push('\n'),
							Some((_, 't')) => text.push('\t'),
							Some((_, escaped)) => text.push(escaped),
							None => return Err(ParseError::new("unterminated string", offset)),
						},
						Some((_, c)) => text.push(c),
						None => return Err(ParseError::new("unterminated string", offset)),
					}
				}
				tokens.push((offset, Token::Str(text)));
			}
			c if c == '-' || c.is_ascii_digit() => {
				let mut text = String::new();
				while let Some(&(_, c)) = chars.peek() {
					if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E') {
						text.push(c);
						chars.next();
					} else {
						break;
					}
				}
				match serde_json::from_str::<Value>(&text) {
					Ok(number @ Value::Number(_)) => tokens.push((offset, Token::Number(number))),
					_ => return Err(ParseError::new(format!("invalid number `{text}`"), offset)),
				}
			}
			c if c == '_' || c.is_ascii_alphabetic() => {
				tokens.push((offset, Token::Name(take_name(&mut chars))));
			}
			other => return Err(ParseError::new(format!("unexpected character `{other}`"), offset)),
		}
	}

	Ok(tokens)
}

fn take_name(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>) -> String {
	let mut name = String::new();
	while let Some(&(_, c)) = chars.peek() {
		if c == '_' || c.is_ascii_alphanumeric() {
			name.push(c);
			chars.next();
		} else {
			break;
		}
	}
	name
}

struct Parser {
	tokens: Vec<(usize, Token)>,
	pos: usize,
	end: usize,
}

impl Parser {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos).map(|(_, token)| token)
	}

	fn offset(&self) -> usize {
		self.tokens.get(self.pos).map_or(self.end, |(offset, _)| *offset)
	}

	fn next(&mut self) -> Option<Token> {
		let token = self.tokens.get(self.pos).map(|(_, token)| token.clone());
		self.pos += 1;
		token
	}

	fn peek_punct(&self, punct: char) -> bool {
		matches!(self.peek(), Some(Token::Punct(c)) if *c == punct)
	}

	fn eat_punct(&mut self, punct: char) -> bool {
		let matched = self.peek_punct(punct);
		if matched {
			self.pos += 1;
		}
		matched
	}

	fn expect_punct(&mut self, punct: char) -> Result<(), ParseError> {
		if self.eat_punct(punct) {
			Ok(())
		} else {
			Err(ParseError::new(format!("expected `{punct}`"), self.offset()))
		}
	}

	fn name(&mut self) -> Result<String, ParseError> {
		let offset = self.offset();
		match self.next() {
			Some(Token::Name(name)) => Ok(name),
			_ => Err(ParseError::new("expected a name", offset)),
		}
	}

	fn operation(&mut self) -> Result<Operation, ParseError> {
		let offset = self.offset();
		let (kind, name) = match self.peek() {
			Some(Token::Punct('{')) => (OperationKind::Query, None),
			Some(Token::Name(keyword)) => {
				let kind = match keyword.as_str() {
					"query" => OperationKind::Query,
					"mutation" => OperationKind::Mutation,
					"subscription" => OperationKind::Subscription,
					other => {
						return Err(ParseError::new(format!("unknown operation type `{other}`"), offset));
					}
				};
				self.pos += 1;

				let name = match self.peek() {
					Some(Token::Name(_)) => Some(self.name()?),
					_ => None,
				};
				if self.peek_punct('(') {
					self.skip_variable_definitions()?;
				}
				self.skip_directives()?;
				(kind, name)
			}
			_ => return Err(ParseError::new("expected an operation", offset)),
		};

		Ok(Operation {
			kind,
			name,
			selections: self.selection_set()?,
		})
	}

	fn selection_set(&mut self) -> Result<Vec<Field>, ParseError> {
		let offset = self.offset();
		self.expect_punct('{')?;

		let mut fields = Vec::new();
		while !self.eat_punct('}') {
			if self.peek().is_none() {
				return Err(ParseError::new("unterminated selection set", offset));
			}
			fields.push(self.field()?);
		}

		if fields.is_empty() {
			return Err(ParseError::new("empty selection set", offset));
		}
		Ok(fields)
	}

	fn field(&mut self) -> Result<Field, ParseError> {
		let first = self.name()?;
		let (alias, name) = if self.eat_punct(':') {
			(Some(first), self.name()?)
		} else {
			(None, first)
		};

		let arguments = if self.eat_punct('(') {
			self.arguments()?
		} else {
			Vec::new()
		};
		self.skip_directives()?;

		let selections = if self.peek_punct('{') {
			self.selection_set()?
		} else {
			Vec::new()
		};

		Ok(Field {
			alias,
			name,
			arguments,
			selections,
		})
	}

	/// Arguments after the opening parenthesis.
	fn arguments(&mut self) -> Result<Vec<(String, Argument)>, ParseError> {
		let mut arguments = Vec::new();
		while !self.eat_punct(')') {
			let name = self.name()?;
			self.expect_punct(':')?;
			arguments.push((name, self.value()?));
		}
		Ok(arguments)
	}

	fn value(&mut self) -> Result<Argument, ParseError> {
		let offset = self.offset();
		match self.next() {
			Some(Token::Variable(name)) => Ok(Argument::Variable(name)),
			Some(Token::Str(text)) => Ok(Argument::Literal(Value::String(text))),
			Some(Token::Number(number)) => Ok(Argument::Literal(number)),
			Some(Token::Name(name)) => Ok(Argument::Literal(match name.as_str() {
				"true" => Value::Bool(true),
				"false" => Value::Bool(false),
				"null" => Value::Null,
				// enum values travel as strings
				_ => Value::String(name),
			})),
			Some(Token::Punct('[')) => {
				let mut items = Vec::new();
				while !self.eat_punct(']') {
					items.push(self.value()?);
				}
				Ok(Argument::List(items))
			}
			Some(Token::Punct('{')) => {
				let mut members = Vec::new();
				while !self.eat_punct('}') {
					let name = self.name()?;
					self.expect_punct(':')?;
					members.push((name, self.value()?));
				}
				Ok(Argument::Object(members))
			}
			_ => Err(ParseError::new("expected a value", offset)),
		}
	}

	fn skip_directives(&mut self) -> Result<(), ParseError> {
		while self.eat_punct('@') {
			self.name()?;
			if self.eat_punct('(') {
				self.arguments()?;
			}
		}
		Ok(())
	}

	fn skip_variable_definitions(&mut self) -> Result<(), ParseError> {
		let offset = self.offset();
		let mut depth = 0usize;
		loop {
			match self.next() {
				Some(Token::Punct('(')) => depth += 1,
				Some(Token::Punct(')')) => {
					depth -= 1;
					if depth == 0 {
						return Ok(());
					}
				}
				Some(_) => {}
				None => return Err(ParseError::new("unterminated variable definitions", offset)),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_subscription_with_nested_selection() {
		let operation = parse(
			r#"subscription {
				getProduct(productID: "0x2") {
					productID
					name
					reviews { body }
				}
			}"#,
		)
		.unwrap();

		assert_eq!(operation.kind, OperationKind::Subscription);
		assert_eq!(operation.selections.len(), 1);

		let root = &operation.selections[0];
		assert_eq!(root.name, "getProduct");
		assert_eq!(root.argument("productID"), Some(&Argument::Literal(json!("0x2"))));
		assert_eq!(root.selections.len(), 3);
		assert_eq!(root.selections[2].selections[0].name, "body");
	}

	#[test]
	fn test_variables_and_definitions() {
		let operation =
			parse("subscription Watch($id: ID!, $n: Int = 3) { getProduct(productID: $id) { name } }").unwrap();
		assert_eq!(operation.name.as_deref(), Some("Watch"));

		let mut variables = Variables::new();
		variables.insert("id".to_string(), json!("0x5"));
		let argument = operation.selections[0].argument("productID").unwrap();
		assert_eq!(argument.resolve(&variables), json!("0x5"));
		assert_eq!(Argument::Variable("missing".to_string()).resolve(&variables), Value::Null);
	}

	#[test]
	fn test_alias_and_object_arguments() {
		let operation =
			parse(r#"{ mine: queryTodo(filter: {owner: {eq: "jatin"}}, first: 10) @cascade { text } }"#).unwrap();
		assert_eq!(operation.kind, OperationKind::Query);

		let root = &operation.selections[0];
		assert_eq!(root.key(), "mine");
		assert_eq!(root.argument("filter").unwrap().resolve(&Variables::new()), json!({"owner": {"eq": "jatin"}}));
		assert_eq!(root.argument("first"), Some(&Argument::Literal(json!(10))));
	}

	#[test]
	fn test_multiple_roots_are_kept() {
		let operation = parse("subscription { a { b } c { d } }").unwrap();
		assert_eq!(operation.selections.len(), 2);
	}

	#[test]
	fn test_errors() {
		assert!(parse("").is_err());
		assert!(parse("subscription { }").is_err());
		assert!(parse("subscription { a { b }").is_err());
		assert!(parse("fragment F on Product { name }").is_err());
		assert!(parse("subscription { a(x: \"open) { b } }").is_err());
		assert!(parse("{ a } { b }").is_err());
		assert!(parse("{ ...F }").is_err());
	}
}
