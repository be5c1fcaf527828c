//! Error types surfaced by the pool.

use serde_json::Value;
use thiserror::Error;
use wamp_protocol::Dict;

/// Failure reported by a local subscriber handler. Logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Why a procedure call did not produce a result.
#[derive(Debug, Error)]
pub enum CallError {
	/// No session is established; the call was not sent.
	#[error("call failed, not connected")]
	NotConnected,

	/// The callee or router answered with an error.
	#[error("{error}{}", message.as_ref().map(|m| format!(": {m}")).unwrap_or_default())]
	Remote {
		/// Error URI.
		error: String,
		/// First positional argument, when it is a string.
		message: Option<String>,
		args: Vec<Value>,
		kwargs: Dict,
	},

	/// The session ended before the result arrived.
	#[error("session closed before the call completed")]
	Closed,

	/// Any other runtime failure.
	#[error("call failed: {0}")]
	Failed(#[source] wamp_runtime::Error),
}

impl CallError {
	/// Error URI of a remote failure.
	pub fn error_uri(&self) -> Option<&str> {
		match self {
			CallError::Remote { error, .. } => Some(error),
			_ => None,
		}
	}

	pub fn is_not_connected(&self) -> bool {
		matches!(self, CallError::NotConnected)
	}
}

impl From<wamp_runtime::Error> for CallError {
	fn from(err: wamp_runtime::Error) -> Self {
		match err {
			wamp_runtime::Error::Remote { error, arguments } => {
				let (args, kwargs) = arguments.into_parts();
				let message = args.first().and_then(Value::as_str).map(str::to_owned);
				CallError::Remote {
					error,
					message,
					args,
					kwargs,
				}
			}
			wamp_runtime::Error::ConnectionClosed => CallError::Closed,
			other => CallError::Failed(other),
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use wamp_protocol::Arguments;

	use super::*;

	#[test]
	fn remote_runtime_error_keeps_payload() {
		let err = CallError::from(wamp_runtime::Error::Remote {
			error: "com.example.error.busy".into(),
			arguments: Arguments::Positional(vec![json!("line busy"), json!(3)]),
		});
		assert_eq!(err.error_uri(), Some("com.example.error.busy"));
		assert_eq!(err.to_string(), "com.example.error.busy: line busy");
		let CallError::Remote { args, kwargs, .. } = err else {
			panic!("expected remote error");
		};
		assert_eq!(args, vec![json!("line busy"), json!(3)]);
		assert!(kwargs.is_empty());
	}

	#[test]
	fn closed_connection_maps_to_closed() {
		assert!(matches!(
			CallError::from(wamp_runtime::Error::ConnectionClosed),
			CallError::Closed
		));
		assert!(matches!(
			CallError::from(wamp_runtime::Error::ProtocolError("unexpected reply".into())),
			CallError::Failed(_)
		));
	}
}
