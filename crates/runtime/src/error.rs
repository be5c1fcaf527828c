//! Error types for the WAMP runtime.

use std::time::Duration;

use thiserror::Error;
use wamp_protocol::{Arguments, DecodeError};

use crate::auth::AuthError;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while connecting to or talking with a WAMP router.
#[derive(Debug, Error)]
pub enum Error {
	/// Invalid endpoint address.
	#[error("Invalid endpoint '{endpoint}': {reason}")]
	InvalidEndpoint { endpoint: String, reason: String },

	/// Transport-level error (WebSocket).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol violation by the peer.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Frame that does not decode as a WAMP message.
	#[error("Malformed message: {0}")]
	Decode(#[from] DecodeError),

	/// Router aborted the session during the opening handshake.
	#[error("Session aborted by router: {reason}{}", message.as_ref().map(|m| format!(" ({m})")).unwrap_or_default())]
	Aborted {
		reason: String,
		message: Option<String>,
		retry_delay: Option<Duration>,
	},

	/// TLS options that cannot be turned into a client configuration.
	#[error("TLS configuration error: {0}")]
	Tls(String),

	/// Ticket could not be obtained for a challenge.
	#[error("Authentication failed: {0}")]
	Auth(#[from] AuthError),

	/// Remote error returned for a request.
	#[error("{error}{}", first_message(arguments).map(|m| format!(": {m}")).unwrap_or_default())]
	Remote { error: String, arguments: Arguments },

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Connection closed before the operation completed.
	#[error("Connection closed")]
	ConnectionClosed,
}

impl Error {
	/// Returns the error URI if this is a Remote error.
	pub fn error_uri(&self) -> Option<&str> {
		match self {
			Error::Remote { error, .. } => Some(error),
			_ => None,
		}
	}

	/// Returns the human-readable message carried by a Remote error.
	pub fn remote_message(&self) -> Option<&str> {
		match self {
			Error::Remote { arguments, .. } => first_message(arguments),
			_ => None,
		}
	}

	/// Returns the token provider failure, if this attempt failed on auth.
	pub fn auth_error(&self) -> Option<&AuthError> {
		match self {
			Error::Auth(err) => Some(err),
			_ => None,
		}
	}

	/// Returns the delay the router suggested before retrying, if any.
	pub fn retry_delay(&self) -> Option<Duration> {
		match self {
			Error::Aborted { retry_delay, .. } => *retry_delay,
			_ => None,
		}
	}

	pub fn is_closed(&self) -> bool {
		matches!(self, Error::ConnectionClosed)
	}
}

/// Routers conventionally put a human-readable message in the first
/// positional argument of ERROR and ABORT.
fn first_message(arguments: &Arguments) -> Option<&str> {
	arguments.positional().first().and_then(|v| v.as_str())
}
