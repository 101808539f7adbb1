// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Test support for the live query engine: an in-memory graph and query
//! engine, token helpers and a WebSocket protocol client.

pub mod client;
pub mod engine;
pub mod fixtures;
pub mod graph;
pub mod parser;
pub mod schema;
pub mod token;
pub mod wait;

pub use client::WsTestClient;
pub use engine::{MemoryEngine, MemoryPlan};
pub use fixtures::{NAMESPACE, SECRET, sample_graph};
pub use graph::{MemoryGraph, Record, Uid, edge};
pub use schema::{MemorySchema, OwnerRule, RootKind, TypeDef};
pub use token::{expired_user_token, sign_token, user_token};
pub use wait::wait_for;
