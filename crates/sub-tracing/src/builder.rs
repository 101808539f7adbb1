// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 ReifyDB

use std::str::FromStr;

use tracing_subscriber::{
	EnvFilter,
	fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
	layer::SubscriberExt,
	util::SubscriberInitExt,
};

use crate::subsystem::TracingSubsystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
	/// Human readable single line output.
	#[default]
	Compact,
	/// One JSON object per event, including the current span's fields.
	Json,
}

impl FromStr for LogFormat {
	type Err = TracingError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.to_ascii_lowercase().as_str() {
			"compact" | "text" => Ok(LogFormat::Compact),
			"json" | "jsonl" => Ok(LogFormat::Json),
			other => Err(TracingError::UnknownFormat(other.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TracingError {
	#[error("invalid tracing filter `{filter}`: {reason}")]
	InvalidFilter {
		filter: String,
		reason: String,
	},

	#[error("unknown log format `{0}`")]
	UnknownFormat(String),

	#[error("a global tracing subscriber is already installed: {0}")]
	AlreadyInstalled(String),
}

#[derive(Debug, Clone)]
pub struct TracingBuilder {
	level: String,
	directives: Vec<String>,
	format: LogFormat,
	respect_env: bool,
	span_events: bool,
	test_writer: bool,
}

impl Default for TracingBuilder {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			directives: vec!["tokio_tungstenite=warn".to_string(), "tungstenite=warn".to_string()],
			format: LogFormat::Compact,
			respect_env: true,
			span_events: false,
			test_writer: false,
		}
	}
}

impl TracingBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Default level for every target without a directive.
	pub fn level(mut self, level: impl Into<String>) -> Self {
		self.level = level.into();
		self
	}

	/// Adds a `target=level` directive.
	pub fn directive(mut self, directive: impl Into<String>) -> Self {
		self.directives.push(directive.into());
		self
	}

	pub fn format(mut self, format: LogFormat) -> Self {
		self.format = format;
		self
	}

	/// Whether a set `RUST_LOG` replaces the configured filter. Default: true
	pub fn respect_env(mut self, respect: bool) -> Self {
		self.respect_env = respect;
		self
	}

	/// Logs span close events with their busy and idle time.
	pub fn span_events(mut self, enabled: bool) -> Self {
		self.span_events = enabled;
		self
	}

	/// Writes through the test harness so output is captured per test.
	pub fn test_writer(mut self) -> Self {
		self.test_writer = true;
		self
	}

	pub fn filter(&self) -> Result<EnvFilter, TracingError> {
		if self.respect_env {
			if let Ok(filter) = EnvFilter::try_from_default_env() {
				return Ok(filter);
			}
		}

		let mut directives = Vec::with_capacity(self.directives.len() + 1);
		directives.push(self.level.clone());
		directives.extend(self.directives.iter().cloned());
		let filter = directives.join(",");

		EnvFilter::try_new(&filter).map_err(|err| TracingError::InvalidFilter {
			reason: err.to_string(),
			filter,
		})
	}

	/// Installs the subscriber globally. Fails if one is already installed.
	pub fn try_init(&self) -> Result<(), TracingError> {
		let filter = self.filter()?;
		let span_events = if self.span_events {
			FmtSpan::CLOSE
		} else {
			FmtSpan::NONE
		};
		let writer = if self.test_writer {
			BoxMakeWriter::new(fmt::TestWriter::new())
		} else {
			BoxMakeWriter::new(std::io::stdout)
		};

		let registry = tracing_subscriber::registry().with(filter);
		let installed = match self.format {
			LogFormat::Compact => registry
				.with(fmt::layer().compact().with_target(true).with_span_events(span_events).with_writer(writer))
				.try_init(),
			LogFormat::Json => registry
				.with(fmt::layer()
					.json()
					.with_current_span(true)
					.with_span_list(false)
					.with_span_events(span_events)
					.with_writer(writer))
				.try_init(),
		};

		installed.map_err(|err| TracingError::AlreadyInstalled(err.to_string()))
	}

	/// Wraps the configuration in a subsystem that installs it on start.
	pub fn build(self) -> TracingSubsystem {
		TracingSubsystem::new(self)
	}
}
