// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Serves GraphQL subscriptions over the in-memory sample graph.
//!
//! Environment:
//!
//! - `LIVEGRAPH_BIND`: listen address, default `0.0.0.0:8091`
//! - `LIVEGRAPH_LOG`: level or filter directives, default `info`
//! - `LIVEGRAPH_LOG_FORMAT`: `compact` or `json`
//! - `LIVEGRAPH_POLL_MS`: poll interval in milliseconds
//! - `LIVEGRAPH_AUTH`: verification settings as JSON, e.g.
//!   `{"VerificationKey": "secret", "Namespace": "https://dgraph.io"}`

use std::{env, error::Error, sync::Arc, time::Duration};

use livegraph_sub_api::Subsystem;
use livegraph_sub_server_ws::{WsConfig, WsSubsystem};
use livegraph_sub_tracing::{LogFormat, TracingBuilder};
use livegraph_subscription::{AuthConfig, SubscriptionConfig};
use livegraph_testing::{MemoryEngine, MemorySchema, sample_graph};
use tracing::info;

fn tracing_configuration() -> Result<TracingBuilder, Box<dyn Error>> {
	let mut builder = TracingBuilder::new().level(env::var("LIVEGRAPH_LOG").unwrap_or_else(|_| "info".to_string()));
	if let Ok(format) = env::var("LIVEGRAPH_LOG_FORMAT") {
		builder = builder.format(format.parse::<LogFormat>()?);
	}
	Ok(builder)
}

fn server_configuration() -> Result<WsConfig, Box<dyn Error>> {
	let mut subscription = SubscriptionConfig::default();
	if let Ok(millis) = env::var("LIVEGRAPH_POLL_MS") {
		subscription = subscription.poll_interval(Duration::from_millis(millis.parse()?));
	}

	let mut config = WsConfig::default().subscription(subscription);
	if let Ok(addr) = env::var("LIVEGRAPH_BIND") {
		config = config.bind_addr(addr);
	}
	if let Ok(auth) = env::var("LIVEGRAPH_AUTH") {
		config = config.auth(serde_json::from_str::<AuthConfig>(&auth)?);
	}
	Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let mut logging = tracing_configuration()?.build();
	logging.start().await?;

	let engine = Arc::new(MemoryEngine::new(Arc::new(sample_graph()), MemorySchema::sample()));
	let mut ws = WsSubsystem::new(server_configuration()?, engine.clone(), engine.schema_watcher())?;
	ws.start().await?;
	info!(addr = ?ws.local_addr(), records = engine.graph().len(), "server started");

	tokio::signal::ctrl_c().await?;

	info!("shutting down");
	ws.shutdown().await?;
	logging.shutdown().await?;
	Ok(())
}
