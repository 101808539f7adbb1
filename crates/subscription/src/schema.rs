// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Schema generation tracking.
//!
//! The schema store owns a process wide, monotonically increasing generation
//! number that moves whenever the compiled schema is replaced. Subscriptions
//! snapshot it at registration and terminate once it moves.

use std::{
	fmt::{self, Display, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaGeneration(pub u64);

impl Display for SchemaGeneration {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		Display::fmt(&self.0, f)
	}
}

impl From<u64> for SchemaGeneration {
	fn from(value: u64) -> Self {
		SchemaGeneration(value)
	}
}

/// Read-only view of the schema generation.
///
/// `generation` must be cheap and lock free; it is called before and after
/// every execution. `watch` hands out a receiver that is notified whenever the
/// generation moves.
pub trait SchemaWatcher: Send + Sync + 'static {
	fn generation(&self) -> SchemaGeneration;

	fn watch(&self) -> watch::Receiver<SchemaGeneration>;
}

/// Generation counter for a schema store living in the same process.
pub struct SchemaGenerationCell {
	current: AtomicU64,
	notify: watch::Sender<SchemaGeneration>,
}

impl SchemaGenerationCell {
	pub fn new(initial: SchemaGeneration) -> Self {
		let (notify, _) = watch::channel(initial);
		Self {
			current: AtomicU64::new(initial.0),
			notify,
		}
	}

	/// Moves the generation forward after a schema replacement and returns the new value.
	pub fn advance(&self) -> SchemaGeneration {
		let mut next = SchemaGeneration::default();
		// send_modify serializes concurrent writers, so watchers never observe a step backwards
		self.notify.send_modify(|generation| {
			generation.0 += 1;
			next = *generation;
			self.current.store(generation.0, Ordering::Release);
		});
		tracing::info!(generation = next.0, "schema generation advanced");
		next
	}
}

impl Default for SchemaGenerationCell {
	fn default() -> Self {
		Self::new(SchemaGeneration(1))
	}
}

impl SchemaWatcher for SchemaGenerationCell {
	fn generation(&self) -> SchemaGeneration {
		SchemaGeneration(self.current.load(Ordering::Acquire))
	}

	fn watch(&self) -> watch::Receiver<SchemaGeneration> {
		self.notify.subscribe()
	}
}
