// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Per-connection session.
//!
//! A connection is served by two tasks. The reader (this task) parses client
//! frames and drives the [`Dispatcher`]. The writer owns the socket's sink and
//! is the only task that writes to it; everything else reaches the client by
//! queueing an [`Outbound`] value. Both stop when the connection token is
//! cancelled, which happens on `connection_terminate`, a close frame, a read
//! or write error, or server shutdown.

use std::{future::pending, time::Duration};

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use livegraph_subscription::{
	ConnectionPayload, Diagnostic, Dispatcher, Outbound, OutboundGate, QueryEngine, RegistrationError,
	SubscriptionRequest,
};
use tokio::{
	net::TcpStream,
	select,
	sync::{mpsc, watch},
	time::{Instant, Interval, MissedTickBehavior, interval_at, timeout},
};
use tokio_tungstenite::{
	WebSocketStream, accept_hdr_async,
	tungstenite::{
		Message,
		handshake::server::{ErrorResponse, Request, Response},
		http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
	},
};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, field, info, instrument, warn};

use crate::{
	protocol::{ClientMessage, ServerMessage},
	state::WsState,
};

pub const SUBPROTOCOL: &str = "graphql-ws";

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Sink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Performs the WebSocket handshake and serves the connection until it ends.
///
/// A peer that does not complete the upgrade within the handshake timeout, or
/// before shutdown, is dropped.
pub async fn handle_connection<E: QueryEngine>(
	stream: TcpStream,
	state: WsState<E>,
	mut shutdown: watch::Receiver<bool>,
) {
	let peer = stream.peer_addr().ok();
	let limit = state.handshake_timeout();

	let socket = select! {
		biased;
		_ = shutdown.wait_for(|stopping| *stopping) => {
			debug!(?peer, "server shutting down, handshake abandoned");
			return;
		}
		accepted = timeout(limit, accept_hdr_async(stream, negotiate)) => match accepted {
			Ok(Ok(socket)) => socket,
			Ok(Err(err)) => {
				warn!(?peer, error = %err, "websocket handshake failed");
				return;
			}
			Err(_) => {
				warn!(?peer, ?limit, "websocket handshake timed out");
				return;
			}
		},
	};

	run_session(socket, state, shutdown).await;
}

/// Selects `graphql-ws` when the client offers it.
fn negotiate(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
	let offered = request
		.headers()
		.get_all(SEC_WEBSOCKET_PROTOCOL)
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(|value| value.split(','))
		.any(|protocol| protocol.trim() == SUBPROTOCOL);

	if offered {
		response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
	}
	Ok(response)
}

#[derive(Debug, Default)]
struct Session {
	initialised: bool,
	payload: Option<ConnectionPayload>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
	Continue,
	Terminate,
}

#[instrument(name = "ws::session", level = "debug", skip_all, fields(connection_id = field::Empty))]
async fn run_session<E: QueryEngine>(
	socket: WebSocketStream<TcpStream>,
	state: WsState<E>,
	mut shutdown: watch::Receiver<bool>,
) {
	let (sink, mut source) = socket.split();

	let connection = CancellationToken::new();
	let (outbound, frames) = mpsc::channel(state.context().config().outbound_capacity);
	let mut dispatcher = Dispatcher::new(state.context().clone(), outbound.clone(), connection.clone());
	Span::current().record("connection_id", field::display(dispatcher.connection_id()));
	info!("connection opened");

	let writer = tokio::spawn(write_loop(sink, frames, connection.clone(), state.keep_alive_interval()));

	let mut session = Session::default();
	loop {
		select! {
			biased;
			_ = connection.cancelled() => break,
			changed = shutdown.changed() => {
				if changed.is_err() || *shutdown.borrow() {
					debug!("server shutting down");
					break;
				}
			}
			message = source.next() => {
				let flow = read_frame(message, &mut session, &mut dispatcher, &outbound).await;
				if flow == Flow::Terminate {
					break;
				}
			}
		}
	}

	let live = dispatcher.len();
	dispatcher.shutdown();
	drop(dispatcher);
	drop(source);

	if writer.await.is_err() {
		warn!("writer task failed");
	}
	info!(live, "connection closed");
}

async fn read_frame<E: QueryEngine>(
	message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
	session: &mut Session,
	dispatcher: &mut Dispatcher<E>,
	outbound: &mpsc::Sender<Outbound>,
) -> Flow {
	match message {
		Some(Ok(Message::Text(text))) => on_text(&text, session, dispatcher, outbound).await,
		Some(Ok(Message::Binary(_))) => {
			send(outbound, Outbound::ConnectionError(Diagnostic::new("WS_001", "binary frames are not supported")))
				.await;
			Flow::Continue
		}
		Some(Ok(Message::Close(_))) | None => Flow::Terminate,
		// ping and pong are answered by tungstenite
		Some(Ok(_)) => Flow::Continue,
		Some(Err(err)) => {
			debug!(error = %err, "read failed");
			Flow::Terminate
		}
	}
}

async fn on_text<E: QueryEngine>(
	text: &str,
	session: &mut Session,
	dispatcher: &mut Dispatcher<E>,
	outbound: &mpsc::Sender<Outbound>,
) -> Flow {
	let message = match serde_json::from_str::<ClientMessage>(text) {
		Ok(message) => message,
		Err(err) => {
			debug!(error = %err, "invalid client frame");
			send(outbound, Outbound::ConnectionError(Diagnostic::new("WS_001", format!("invalid message: {err}"))))
				.await;
			return Flow::Continue;
		}
	};

	match message {
		ClientMessage::ConnectionInit {
			payload,
		} => {
			if session.initialised {
				send(
					outbound,
					Outbound::ConnectionError(Diagnostic::new("WS_002", "connection already initialised")),
				)
				.await;
				return Flow::Continue;
			}
			session.initialised = true;
			session.payload = payload;
			send(outbound, Outbound::Ack).await;
		}
		ClientMessage::Start {
			id,
			payload,
		} => {
			if let Err(err) = start(id.clone(), payload, session, dispatcher).await {
				warn!(subscription_id = %id, error = %err, "subscription rejected");
				send(
					outbound,
					Outbound::Rejected {
						id,
						error: err.diagnostic(),
					},
				)
				.await;
			}
		}
		ClientMessage::Stop {
			id,
		} => {
			dispatcher.stop(&id).await;
		}
		ClientMessage::ConnectionTerminate => return Flow::Terminate,
	}

	Flow::Continue
}

async fn start<E: QueryEngine>(
	id: String,
	payload: serde_json::Value,
	session: &Session,
	dispatcher: &mut Dispatcher<E>,
) -> Result<(), RegistrationError> {
	if !session.initialised {
		return Err(RegistrationError::NotInitialised);
	}
	let request: SubscriptionRequest =
		serde_json::from_value(payload).map_err(|err| RegistrationError::Malformed(err.to_string()))?;
	dispatcher.register(id, request, session.payload.as_ref()).await?;
	Ok(())
}

async fn send(outbound: &mpsc::Sender<Outbound>, frame: Outbound) {
	// a closed queue means the writer is gone and the session is ending
	let _ = outbound.send(frame).await;
}

async fn write_loop(
	mut sink: Sink,
	mut frames: mpsc::Receiver<Outbound>,
	connection: CancellationToken,
	keep_alive_interval: Option<Duration>,
) {
	let mut gate = OutboundGate::new();
	let mut keep_alive: Option<Interval> = None;

	loop {
		let outbound = select! {
			biased;
			_ = connection.cancelled() => break,
			frame = frames.recv() => match frame {
				Some(frame) => frame,
				None => break,
			},
			_ = tick(&mut keep_alive) => Outbound::KeepAlive,
		};

		let acknowledged = outbound == Outbound::Ack;
		let Some(message) = gate.admit(outbound).and_then(ServerMessage::from_outbound) else {
			continue;
		};
		let text = match serde_json::to_string(&message) {
			Ok(text) => text,
			Err(err) => {
				warn!(error = %err, "failed to encode frame");
				continue;
			}
		};

		let sent = select! {
			biased;
			_ = connection.cancelled() => break,
			sent = sink.send(Message::Text(text.into())) => sent,
		};
		if let Err(err) = sent {
			debug!(error = %err, "write failed, closing connection");
			connection.cancel();
			return;
		}

		if acknowledged {
			// the first tick fires immediately, so `ka` follows the ack
			keep_alive = keep_alive_interval.map(|period| {
				let mut interval = interval_at(Instant::now(), period);
				interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
				interval
			});
		}
	}

	let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
}

async fn tick(keep_alive: &mut Option<Interval>) {
	match keep_alive {
		Some(interval) => {
			interval.tick().await;
		}
		None => pending().await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(protocols: Option<&str>) -> Request {
		let mut builder = Request::builder().uri("ws://localhost/graphql");
		if let Some(protocols) = protocols {
			builder = builder.header(SEC_WEBSOCKET_PROTOCOL, protocols);
		}
		builder.body(()).unwrap()
	}

	#[test]
	fn test_negotiate_selects_graphql_ws() {
		let response = negotiate(&request(Some("graphql-transport-ws, graphql-ws")), Response::new(())).unwrap();
		assert_eq!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(), "graphql-ws");
	}

	#[test]
	fn test_negotiate_without_offer() {
		let response = negotiate(&request(None), Response::new(())).unwrap();
		assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());

		let response = negotiate(&request(Some("graphql-transport-ws")), Response::new(())).unwrap();
		assert!(response.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
	}
}
