//! Pool configuration.
//!
//! Durations are (de)serialized as integer milliseconds; every field has a
//! default so partial documents are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use wamp_runtime::TlsOptions;

/// Default connect watchdog.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifecycle broadcast buffer.
pub const DEFAULT_LIFECYCLE_CAPACITY: usize = 16;

/// Settings shared by every session manager in a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
	/// How long an attempt may stay in `Connecting` before it is abandoned.
	#[serde(with = "duration_ms")]
	pub connect_timeout: Duration,
	pub backoff: BackoffPolicy,
	/// Buffered lifecycle notifications per observer.
	pub lifecycle_capacity: usize,
	/// Certificate handling for `wss://` routers and their login endpoint.
	pub tls: TlsOptions,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			backoff: BackoffPolicy::default(),
			lifecycle_capacity: DEFAULT_LIFECYCLE_CAPACITY,
			tls: TlsOptions::default(),
		}
	}
}

impl PoolConfig {
	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
		self.backoff = backoff;
		self
	}

	pub fn with_lifecycle_capacity(mut self, capacity: usize) -> Self {
		self.lifecycle_capacity = capacity.max(1);
		self
	}

	pub fn with_tls(mut self, tls: TlsOptions) -> Self {
		self.tls = tls;
		self
	}
}

/// Exponential reconnect delay: `min(cap, base * factor^attempt)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
	#[serde(with = "duration_ms")]
	pub base: Duration,
	pub factor: f64,
	#[serde(with = "duration_ms")]
	pub cap: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(1500),
			factor: 1.5,
			cap: Duration::from_secs(10),
		}
	}
}

impl BackoffPolicy {
	/// Delay before retry number `attempt` (0-based), truncated to whole
	/// milliseconds.
	pub fn delay(&self, attempt: u32) -> Duration {
		let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
		let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
		match Duration::try_from_secs_f64(secs.min(self.cap.as_secs_f64())) {
			Ok(delay) => Duration::from_millis(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)),
			Err(_) => self.cap,
		}
	}
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
