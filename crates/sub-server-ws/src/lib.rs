// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! GraphQL subscriptions over WebSocket.
//!
//! Speaks the `graphql-ws` subprotocol: a client sends `connection_init`,
//! receives `connection_ack` and then opens any number of subscriptions with
//! `start`. Each subscription streams `data` frames whenever its result
//! changes and ends with `complete`, either on `stop` or when the schema it
//! was registered against is replaced.
//!
//! # Example
//!
//! ```ignore
//! use livegraph_sub_server_ws::{WsConfig, WsSubsystem};
//!
//! let config = WsConfig::default().bind_addr("127.0.0.1:8091");
//! let mut ws = WsSubsystem::new(config, engine, schema)?;
//! ws.start().await?;
//! ```

pub mod config;
pub mod handler;
pub mod protocol;
pub mod state;
pub mod subsystem;

pub use config::WsConfig;
pub use handler::{SUBPROTOCOL, handle_connection};
pub use protocol::{ClientMessage, ExecutionPayload, Extensions, ServerMessage};
pub use state::WsState;
pub use subsystem::WsSubsystem;
