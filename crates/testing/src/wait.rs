// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

//! Waiting on asynchronous state in tests without fixed sleeps.

use std::time::{Duration, Instant};

use tokio::time::sleep;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls `condition` every `poll_interval` until it holds.
///
/// # Panics
/// Panics with `message` if the condition is still false after `timeout`.
pub async fn wait_for_condition<F>(condition: F, timeout: Duration, poll_interval: Duration, message: &str)
where
	F: Fn() -> bool,
{
	let start = Instant::now();
	while !condition() {
		if start.elapsed() > timeout {
			panic!("timeout after {timeout:?}: {message}");
		}
		sleep(poll_interval).await;
	}
}

/// [`wait_for_condition`] with [`DEFAULT_TIMEOUT`] and [`DEFAULT_POLL_INTERVAL`].
pub async fn wait_for<F>(condition: F, message: &str)
where
	F: Fn() -> bool,
{
	wait_for_condition(condition, DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL, message).await;
}

#[cfg(test)]
mod tests {
	use std::sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	};

	use super::*;

	#[tokio::test]
	async fn test_wait_for_immediate() {
		wait_for(|| true, "already true").await;
	}

	#[tokio::test]
	async fn test_wait_for_becomes_true() {
		let flag = Arc::new(AtomicBool::new(false));
		let setter = flag.clone();
		tokio::spawn(async move {
			sleep(Duration::from_millis(20)).await;
			setter.store(true, Ordering::SeqCst);
		});

		wait_for(|| flag.load(Ordering::SeqCst), "flag should be set").await;
	}

	#[tokio::test]
	#[should_panic(expected = "timeout after")]
	async fn test_wait_for_timeout() {
		wait_for_condition(|| false, Duration::from_millis(10), Duration::from_millis(1), "never true").await;
	}
}
