// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! WebSocket client speaking the `graphql-ws` protocol, for end to end tests.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
	MaybeTlsStream, WebSocketStream, connect_async,
	tungstenite::{
		Message,
		client::IntoClientRequest,
		http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
	},
};

pub const SUBPROTOCOL: &str = "graphql-ws";

pub struct WsTestClient {
	stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
	protocol: Option<String>,
	timeout: Duration,
}

impl WsTestClient {
	/// Connects to `addr` offering the `graphql-ws` subprotocol.
	pub async fn connect(addr: SocketAddr) -> Self {
		let mut request = format!("ws://{addr}/graphql").into_client_request().expect("invalid websocket url");
		request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

		let (stream, response) = connect_async(request).await.expect("failed to connect websocket");
		let protocol = response
			.headers()
			.get(SEC_WEBSOCKET_PROTOCOL)
			.and_then(|value| value.to_str().ok())
			.map(str::to_string);

		Self {
			stream,
			protocol,
			timeout: Duration::from_secs(5),
		}
	}

	/// Subprotocol selected by the server.
	pub fn protocol(&self) -> Option<&str> {
		self.protocol.as_deref()
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub async fn send_json(&mut self, frame: Value) {
		self.send_raw(&frame.to_string()).await;
	}

	pub async fn send_raw(&mut self, text: &str) {
		self.stream.send(Message::Text(text.to_string().into())).await.expect("failed to send frame");
	}

	/// Sends `connection_init` and expects `connection_ack`.
	pub async fn init(&mut self, payload: Option<Value>) {
		let frame = match payload {
			Some(payload) => json!({"type": "connection_init", "payload": payload}),
			None => json!({"type": "connection_init"}),
		};
		self.send_json(frame).await;

		let ack = self.recv().await;
		assert_eq!(ack["type"], "connection_ack", "unexpected reply to connection_init: {ack}");
	}

	/// Initialises with `{"Authorization": token}`.
	pub async fn init_with_token(&mut self, token: &str) {
		self.init(Some(json!({"Authorization": token}))).await;
	}

	pub async fn start(&mut self, id: &str, query: &str) {
		self.start_with_variables(id, query, Value::Null).await;
	}

	pub async fn start_with_variables(&mut self, id: &str, query: &str, variables: Value) {
		self.send_json(json!({
			"type": "start",
			"id": id,
			"payload": {"query": query, "variables": variables}
		}))
		.await;
	}

	pub async fn stop(&mut self, id: &str) {
		self.send_json(json!({"type": "stop", "id": id})).await;
	}

	pub async fn terminate(&mut self) {
		self.send_json(json!({"type": "connection_terminate"})).await;
	}

	/// Next frame other than `ka`.
	///
	/// # Panics
	/// Panics if nothing arrives within the client timeout or the socket closes.
	pub async fn recv(&mut self) -> Value {
		loop {
			let frame = self.recv_any().await;
			if frame["type"] != "ka" {
				return frame;
			}
		}
	}

	/// Next frame including `ka`.
	pub async fn recv_any(&mut self) -> Value {
		match self.next_frame(self.timeout).await {
			Some(frame) => frame,
			None => panic!("connection closed while waiting for a frame"),
		}
	}

	/// Next frame other than `ka` that arrives within `wait`, if any.
	pub async fn try_recv(&mut self, wait: Duration) -> Option<Value> {
		let deadline = tokio::time::Instant::now() + wait;
		loop {
			let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
			match timeout(remaining, self.stream.next()).await.ok()?? {
				Ok(Message::Close(_)) | Err(_) => return None,
				Ok(message) => match decode(message) {
					Some(frame) if frame["type"] != "ka" => return Some(frame),
					_ => {}
				},
			}
		}
	}

	/// Waits for the server to close the socket, skipping any frames still queued.
	pub async fn expect_closed(&mut self) {
		let limit = self.timeout;
		let stream = &mut self.stream;
		let closed = timeout(limit, async {
			while let Some(message) = stream.next().await {
				match message {
					Ok(Message::Close(_)) | Err(_) => return,
					Ok(_) => {}
				}
			}
		})
		.await;
		assert!(closed.is_ok(), "connection still open after {limit:?}");
	}

	pub async fn close(mut self) {
		let _ = self.stream.close(None).await;
	}

	async fn next_frame(&mut self, wait: Duration) -> Option<Value> {
		loop {
			let read = timeout(wait, self.stream.next())
				.await
				.unwrap_or_else(|_| panic!("no frame received within {wait:?}"))?;
			match read {
				Ok(Message::Close(_)) | Err(_) => return None,
				Ok(message) => {
					if let Some(frame) = decode(message) {
						return Some(frame);
					}
				}
			}
		}
	}
}

fn decode(message: Message) -> Option<Value> {
	match message {
		Message::Text(text) => Some(serde_json::from_str(&text).expect("server sent invalid json")),
		_ => None,
	}
}
