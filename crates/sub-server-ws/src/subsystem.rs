// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Lifecycle of the WebSocket listener.

use std::{
	any::Any,
	net::SocketAddr,
	sync::{
		Arc,
		atomic::{AtomicBool, AtomicUsize, Ordering},
	},
	time::Duration,
};

use async_trait::async_trait;
use livegraph_sub_api::{HealthStatus, Subsystem, SubsystemError};
use livegraph_subscription::{AuthEvaluator, QueryEngine, SchemaWatcher, SubscriptionContext};
use parking_lot::RwLock;
use tokio::{
	net::TcpListener,
	spawn,
	sync::{Semaphore, watch},
	time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{config::WsConfig, handler::handle_connection, state::WsState};

/// GraphQL subscription server over WebSocket.
///
/// Connections beyond `max_connections` are dropped right after accept.
/// Shutdown stops the accept loop, signals every session to close and waits
/// up to `shutdown_timeout` for them to drain.
///
/// # Example
///
/// ```ignore
/// let mut ws = WsSubsystem::new(WsConfig::default(), engine, schema)?;
/// ws.start().await?;
/// // serving
/// ws.shutdown().await?;
/// ```
pub struct WsSubsystem<E: QueryEngine> {
	config: WsConfig,
	/// Bound address, available after start.
	actual_addr: RwLock<Option<SocketAddr>>,
	state: WsState<E>,
	running: Arc<AtomicBool>,
	active_connections: Arc<AtomicUsize>,
	shutdown_tx: Option<watch::Sender<bool>>,
	connection_semaphore: Arc<Semaphore>,
}

impl<E: QueryEngine> WsSubsystem<E> {
	pub fn new(config: WsConfig, engine: Arc<E>, schema: Arc<dyn SchemaWatcher>) -> Result<Self, SubsystemError> {
		let auth =
			AuthEvaluator::from_config(config.auth.clone()).map_err(|err| SubsystemError::Config(err.to_string()))?;
		let context = SubscriptionContext::new(engine, schema, auth, config.subscription.clone());
		let state = WsState::new(context, config.handshake_timeout, config.keep_alive_interval);
		let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

		Ok(Self {
			config,
			actual_addr: RwLock::new(None),
			state,
			running: Arc::new(AtomicBool::new(false)),
			active_connections: Arc::new(AtomicUsize::new(0)),
			shutdown_tx: None,
			connection_semaphore,
		})
	}

	pub fn bind_addr(&self) -> &str {
		&self.config.bind_addr
	}

	/// Bound address, available after start.
	pub fn local_addr(&self) -> Option<SocketAddr> {
		*self.actual_addr.read()
	}

	pub fn port(&self) -> Option<u16> {
		self.local_addr().map(|addr| addr.port())
	}

	pub fn active_connections(&self) -> usize {
		self.active_connections.load(Ordering::SeqCst)
	}

	pub fn context(&self) -> &SubscriptionContext<E> {
		self.state.context()
	}
}

#[async_trait]
impl<E: QueryEngine> Subsystem for WsSubsystem<E> {
	fn name(&self) -> &'static str {
		"WebSocket"
	}

	async fn start(&mut self) -> Result<(), SubsystemError> {
		if self.running.load(Ordering::SeqCst) {
			return Ok(());
		}

		let addr = self.config.bind_addr.clone();
		let listener = TcpListener::bind(&addr).await.map_err(|source| SubsystemError::BindFailed {
			addr: addr.clone(),
			source,
		})?;
		let actual_addr = listener.local_addr().map_err(SubsystemError::AddressUnavailable)?;
		*self.actual_addr.write() = Some(actual_addr);
		info!(%actual_addr, "websocket server bound");

		let (tx, mut rx) = watch::channel(false);
		let state = self.state.clone();
		let running = self.running.clone();
		let active_connections = self.active_connections.clone();
		let semaphore = self.connection_semaphore.clone();

		// visible to a shutdown issued right after start
		running.store(true, Ordering::SeqCst);

		spawn(async move {
			loop {
				tokio::select! {
					biased;

					changed = rx.changed() => {
						if changed.is_err() || *rx.borrow() {
							info!("websocket server shutting down");
							break;
						}
					}

					accept = listener.accept() => {
						match accept {
							Ok((stream, peer)) => {
								let Ok(permit) = semaphore.clone().try_acquire_owned() else {
									warn!(%peer, "connection limit reached, rejecting");
									continue;
								};

								let state = state.clone();
								let shutdown = rx.clone();
								let active = active_connections.clone();

								active.fetch_add(1, Ordering::SeqCst);
								debug!(%peer, "accepted connection");

								spawn(async move {
									handle_connection(stream, state, shutdown).await;
									active.fetch_sub(1, Ordering::SeqCst);
									drop(permit);
								});
							}
							Err(err) => {
								warn!(error = %err, "accept failed");
							}
						}
					}
				}
			}

			running.store(false, Ordering::SeqCst);
			info!("websocket server stopped");
		});

		self.shutdown_tx = Some(tx);
		Ok(())
	}

	async fn shutdown(&mut self) -> Result<(), SubsystemError> {
		let Some(tx) = self.shutdown_tx.take() else {
			return Ok(());
		};
		let _ = tx.send(true);

		let deadline = Instant::now() + self.config.shutdown_timeout;
		while self.active_connections.load(Ordering::SeqCst) > 0 {
			if Instant::now() > deadline {
				warn!(
					active = self.active_connections.load(Ordering::SeqCst),
					"websocket shutdown timed out with connections still active"
				);
				break;
			}
			sleep(Duration::from_millis(100)).await;
		}

		self.running.store(false, Ordering::SeqCst);
		debug!("websocket server shutdown completed");
		Ok(())
	}

	fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}

	fn health_status(&self) -> HealthStatus {
		if !self.running.load(Ordering::SeqCst) {
			return HealthStatus::Failed {
				description: "Not running".to_string(),
			};
		}

		let active = self.active_connections.load(Ordering::SeqCst);
		let max = self.config.max_connections;
		if active > max * 90 / 100 {
			HealthStatus::Warning {
				description: format!("High connection count: {active}/{max}"),
			}
		} else {
			HealthStatus::Healthy
		}
	}

	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}
