// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::{net::SocketAddr, sync::Arc, time::Duration};

use livegraph_sub_api::Subsystem;
use livegraph_sub_server_ws::{WsConfig, WsSubsystem};
use livegraph_subscription::{AuthConfig, SubscriptionConfig};
use livegraph_testing::{MemoryEngine, MemorySchema, NAMESPACE, SECRET, WsTestClient, sample_graph};

#[allow(dead_code)]
pub const POLL: Duration = Duration::from_millis(50);

pub struct TestServer {
	pub ws: WsSubsystem<MemoryEngine>,
	pub engine: Arc<MemoryEngine>,
}

impl TestServer {
	pub fn addr(&self) -> SocketAddr {
		self.ws.local_addr().expect("server not started")
	}

	/// A connected client that has completed `connection_init`.
	#[allow(dead_code)]
	pub async fn client(&self) -> WsTestClient {
		let mut client = WsTestClient::connect(self.addr()).await;
		client.init(None).await;
		client
	}

	#[allow(dead_code)]
	pub async fn client_as(&self, user: &str) -> WsTestClient {
		let mut client = WsTestClient::connect(self.addr()).await;
		client.init_with_token(&livegraph_testing::user_token(user)).await;
		client
	}
}

/// Serves the sample graph on an ephemeral port with keep-alive disabled.
pub async fn start_server() -> TestServer {
	start_server_with(WsConfig::new().keep_alive_interval(None)).await
}

#[allow(dead_code)]
pub async fn start_server_with(config: WsConfig) -> TestServer {
	let engine = Arc::new(MemoryEngine::new(Arc::new(sample_graph()), MemorySchema::sample()));
	let config = config
		.bind_addr("127.0.0.1:0")
		.shutdown_timeout(Duration::from_secs(5))
		.subscription(SubscriptionConfig::new().poll_interval(POLL))
		.auth(AuthConfig::new(SECRET, NAMESPACE));

	let mut ws = WsSubsystem::new(config, engine.clone(), engine.schema_watcher()).expect("invalid server config");
	ws.start().await.expect("failed to start websocket server");

	TestServer {
		ws,
		engine,
	}
}
