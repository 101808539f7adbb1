// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Outbound frame queue shared by everything that writes to one connection.
//!
//! Every producer (the session reader, poll tasks, the dispatcher) pushes
//! [`Outbound`] values into a single bounded channel. The connection's writer
//! task drains it and passes each value through an [`OutboundGate`] before it
//! touches the transport.

use std::{
	collections::HashSet,
	fmt::{self, Display, Formatter},
};

use serde_json::Value;

use crate::{
	SubscriptionId,
	engine::{ExecutionOutput, QueryError},
	error::Diagnostic,
};

/// Connection-unique number of an accepted registration.
///
/// Client ids may be reused after a `stop`; sequence numbers never are.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistrationSeq(pub u64);

impl Display for RegistrationSeq {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

/// A delivered result.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPayload {
	pub data: Value,
	pub errors: Vec<QueryError>,
	pub touched: u64,
}

impl From<ExecutionOutput> for DataPayload {
	fn from(output: ExecutionOutput) -> Self {
		Self {
			data: output.document.data,
			errors: output.document.errors,
			touched: output.touched,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
	/// `connection_init` accepted.
	Ack,
	KeepAlive,
	/// Connection level protocol violation.
	ConnectionError(Diagnostic),
	/// A `start` that never became a subscription.
	Rejected {
		id: SubscriptionId,
		error: Diagnostic,
	},
	/// Opens the gate for a registration. Never written to the transport.
	Open {
		seq: RegistrationSeq,
	},
	Data {
		seq: RegistrationSeq,
		id: SubscriptionId,
		payload: DataPayload,
	},
	Error {
		seq: RegistrationSeq,
		id: SubscriptionId,
		error: Diagnostic,
	},
	/// Last frame of a registration; closes the gate behind it.
	Complete {
		seq: RegistrationSeq,
		id: SubscriptionId,
	},
}

/// Drops frames that belong to registrations which are already complete.
///
/// A poll task may still be finishing an execution when its subscription is
/// stopped; its late `data` frame arrives after `complete` and is discarded
/// here. Only live registrations are tracked.
#[derive(Debug, Default)]
pub struct OutboundGate {
	live: HashSet<RegistrationSeq>,
}

impl OutboundGate {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the frame to write, or `None` when it must be dropped.
	pub fn admit(&mut self, outbound: Outbound) -> Option<Outbound> {
		match outbound {
			Outbound::Open {
				seq,
			} => {
				self.live.insert(seq);
				None
			}
			Outbound::Data {
				seq,
				..
			}
			| Outbound::Error {
				seq,
				..
			} => self.live.contains(&seq).then_some(outbound),
			Outbound::Complete {
				seq,
				..
			} => self.live.remove(&seq).then_some(outbound),
			Outbound::Ack
			| Outbound::KeepAlive
			| Outbound::ConnectionError(_)
			| Outbound::Rejected {
				..
			} => Some(outbound),
		}
	}

	/// Number of registrations whose frames are still admitted.
	pub fn live(&self) -> usize {
		self.live.len()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn data(seq: u64) -> Outbound {
		Outbound::Data {
			seq: RegistrationSeq(seq),
			id: "1".to_string(),
			payload: DataPayload {
				data: json!({"getProduct": {"name": "mask"}}),
				errors: vec![],
				touched: 1,
			},
		}
	}

	fn complete(seq: u64) -> Outbound {
		Outbound::Complete {
			seq: RegistrationSeq(seq),
			id: "1".to_string(),
		}
	}

	#[test]
	fn test_frames_pass_while_open() {
		let mut gate = OutboundGate::new();
		assert_eq!(
			gate.admit(Outbound::Open {
				seq: RegistrationSeq(1)
			}),
			None
		);
		assert_eq!(gate.admit(data(1)), Some(data(1)));
		assert_eq!(gate.admit(complete(1)), Some(complete(1)));
		assert_eq!(gate.live(), 0);
	}

	#[test]
	fn test_late_data_after_complete_is_dropped() {
		let mut gate = OutboundGate::new();
		gate.admit(Outbound::Open {
			seq: RegistrationSeq(1),
		});
		gate.admit(complete(1));

		assert_eq!(gate.admit(data(1)), None);
		assert_eq!(gate.admit(complete(1)), None);
	}

	#[test]
	fn test_reused_id_is_tracked_by_sequence() {
		let mut gate = OutboundGate::new();
		gate.admit(Outbound::Open {
			seq: RegistrationSeq(1),
		});
		gate.admit(complete(1));
		gate.admit(Outbound::Open {
			seq: RegistrationSeq(2),
		});

		assert_eq!(gate.admit(data(1)), None);
		assert_eq!(gate.admit(data(2)), Some(data(2)));
	}

	#[test]
	fn test_connection_frames_are_never_gated() {
		let mut gate = OutboundGate::new();
		assert_eq!(gate.admit(Outbound::Ack), Some(Outbound::Ack));
		assert_eq!(gate.admit(Outbound::KeepAlive), Some(Outbound::KeepAlive));
		let rejected = Outbound::Rejected {
			id: "7".to_string(),
			error: Diagnostic::new("SUB_007", "connection_init must be sent before start"),
		};
		assert_eq!(gate.admit(rejected.clone()), Some(rejected));
	}
}
