// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! `graphql-ws` wire messages.
//!
//! Every frame is a JSON text message `{"type": ..., "id"?: ..., "payload"?: ...}`.
//!
//! | direction | type | |
//! |---|---|---|
//! | client | `connection_init` | optional auth payload |
//! | client | `start` | `{query, variables, operationName}` |
//! | client | `stop` | |
//! | client | `connection_terminate` | |
//! | server | `connection_ack` | |
//! | server | `connection_error` | diagnostic |
//! | server | `ka` | keep-alive |
//! | server | `data` | `{data, errors?, extensions: {touched_uids}}` |
//! | server | `error` | diagnostic |
//! | server | `complete` | |

use livegraph_subscription::{ConnectionPayload, DataPayload, Diagnostic, Outbound, QueryError, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client to server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	ConnectionInit {
		#[serde(default)]
		payload: Option<ConnectionPayload>,
	},
	/// The payload stays raw so a bad request can still be answered with an
	/// `error` frame for its id.
	Start {
		id: SubscriptionId,
		#[serde(default)]
		payload: Value,
	},
	Stop {
		id: SubscriptionId,
	},
	ConnectionTerminate,
}

/// A server to client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	ConnectionAck,
	ConnectionError {
		payload: Diagnostic,
	},
	#[serde(rename = "ka")]
	KeepAlive,
	Data {
		id: SubscriptionId,
		payload: ExecutionPayload,
	},
	Error {
		id: SubscriptionId,
		payload: Diagnostic,
	},
	Complete {
		id: SubscriptionId,
	},
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPayload {
	pub data: Value,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub errors: Vec<QueryError>,
	pub extensions: Extensions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
	/// Number of graph records the execution visited.
	pub touched_uids: u64,
}

impl From<DataPayload> for ExecutionPayload {
	fn from(payload: DataPayload) -> Self {
		Self {
			data: payload.data,
			errors: payload.errors,
			extensions: Extensions {
				touched_uids: payload.touched,
			},
		}
	}
}

impl ServerMessage {
	/// The wire frame for an outbound value. Gate bookkeeping has none.
	pub fn from_outbound(outbound: Outbound) -> Option<Self> {
		Some(match outbound {
			Outbound::Ack => ServerMessage::ConnectionAck,
			Outbound::KeepAlive => ServerMessage::KeepAlive,
			Outbound::ConnectionError(payload) => ServerMessage::ConnectionError {
				payload,
			},
			Outbound::Rejected {
				id,
				error,
			}
			| Outbound::Error {
				id,
				error,
				..
			} => ServerMessage::Error {
				id,
				payload: error,
			},
			Outbound::Data {
				id,
				payload,
				..
			} => ServerMessage::Data {
				id,
				payload: payload.into(),
			},
			Outbound::Complete {
				id,
				..
			} => ServerMessage::Complete {
				id,
			},
			Outbound::Open {
				..
			} => return None,
		})
	}
}

#[cfg(test)]
mod tests {
	use livegraph_subscription::RegistrationSeq;
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_client_messages() {
		let init: ClientMessage =
			serde_json::from_value(json!({"type": "connection_init", "payload": {"Authorization": "t"}})).unwrap();
		match init {
			ClientMessage::ConnectionInit {
				payload: Some(payload),
			} => assert_eq!(payload["Authorization"], json!("t")),
			other => panic!("unexpected {other:?}"),
		}

		let bare: ClientMessage = serde_json::from_value(json!({"type": "connection_init"})).unwrap();
		assert_eq!(
			bare,
			ClientMessage::ConnectionInit {
				payload: None
			}
		);

		let start: ClientMessage = serde_json::from_value(json!({
			"type": "start",
			"id": "1",
			"payload": {"query": "subscription { getProduct(productID: \"0x2\") { name } }"}
		}))
		.unwrap();
		assert!(matches!(start, ClientMessage::Start { ref id, .. } if id == "1"));

		let terminate: ClientMessage = serde_json::from_value(json!({"type": "connection_terminate"})).unwrap();
		assert_eq!(terminate, ClientMessage::ConnectionTerminate);
	}

	#[test]
	fn test_unknown_type_is_rejected() {
		assert!(serde_json::from_value::<ClientMessage>(json!({"type": "subscribe", "id": "1"})).is_err());
		assert!(serde_json::from_value::<ClientMessage>(json!({"type": "stop"})).is_err());
	}

	#[test]
	fn test_data_frame_shape() {
		let message = ServerMessage::from_outbound(Outbound::Data {
			seq: RegistrationSeq(1),
			id: "1".to_string(),
			payload: DataPayload {
				data: json!({"getProduct": {"name": "Sanitizer"}}),
				errors: vec![],
				touched: 1,
			},
		})
		.unwrap();

		assert_eq!(
			serde_json::to_value(&message).unwrap(),
			json!({
				"type": "data",
				"id": "1",
				"payload": {
					"data": {"getProduct": {"name": "Sanitizer"}},
					"extensions": {"touched_uids": 1}
				}
			})
		);
	}

	#[test]
	fn test_control_frames() {
		assert_eq!(serde_json::to_value(ServerMessage::KeepAlive).unwrap(), json!({"type": "ka"}));
		assert_eq!(serde_json::to_value(ServerMessage::ConnectionAck).unwrap(), json!({"type": "connection_ack"}));
		assert_eq!(
			serde_json::to_value(ServerMessage::Complete {
				id: "7".to_string()
			})
			.unwrap(),
			json!({"type": "complete", "id": "7"})
		);
		assert_eq!(
			ServerMessage::from_outbound(Outbound::Open {
				seq: RegistrationSeq(1)
			}),
			None
		);
	}

	#[test]
	fn test_rejection_becomes_error_frame() {
		let message = ServerMessage::from_outbound(Outbound::Rejected {
			id: "3".to_string(),
			error: Diagnostic::new("SUB_002", "operation is not a subscription"),
		})
		.unwrap();
		assert_eq!(
			serde_json::to_value(&message).unwrap(),
			json!({"type": "error", "id": "3", "payload": {"code": "SUB_002", "message": "operation is not a subscription"}})
		);
	}
}
