//! Session seam between the pool and a concrete WAMP client.
//!
//! The pool never touches sockets directly: it asks a [`Connector`] to open a
//! session for a [`Target`] and then drives the returned [`Session`] while
//! draining its [`SessionEvent`]s. [`WebSocketConnector`] is the production
//! implementation; tests substitute scripted connectors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;
use wamp_protocol::{Arguments, Dict, Id, uri};

use crate::auth::Authenticator;
use crate::connection::Connection;
use crate::error::Result;
use crate::tls::TlsOptions;
use crate::transport::WebSocketTransport;

/// Where to connect and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
	pub endpoint: String,
	pub realm: String,
	pub authid: String,
}

/// Operations the pool needs from an established session.
///
/// Futures are `'static` so callers can hold them without borrowing the
/// session.
pub trait Session: Send + Sync {
	fn subscribe(&self, topic: &str) -> BoxFuture<'static, Result<Id>>;

	fn unsubscribe(&self, subscription: Id) -> BoxFuture<'static, Result<()>>;

	fn register(&self, procedure: &str) -> BoxFuture<'static, Result<Id>>;

	fn call(&self, procedure: &str, arguments: Arguments) -> BoxFuture<'static, Result<Arguments>>;

	/// Fire-and-forget publish.
	fn publish(&self, topic: &str, arguments: Arguments) -> Result<()>;

	/// Ends the session. Idempotent.
	fn close(&self) -> BoxFuture<'_, ()>;
}

/// A freshly opened session and the receiver for its inbound events.
pub struct OpenedSession {
	pub session: Arc<dyn Session>,
	pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl fmt::Debug for OpenedSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpenedSession").finish_non_exhaustive()
	}
}

/// Opens sessions.
pub trait Connector: Send + Sync {
	/// Connects to `target`, answering any challenge with `authenticator`.
	fn connect(&self, target: &Target, authenticator: Arc<dyn Authenticator>) -> BoxFuture<'static, Result<OpenedSession>>;
}

/// Inbound traffic of an established session.
#[derive(Debug)]
pub enum SessionEvent {
	/// Publication on one of our subscriptions.
	Event {
		subscription: Id,
		details: Dict,
		arguments: Arguments,
	},
	/// Call routed to one of our registrations.
	Invocation {
		registration: Id,
		details: Dict,
		arguments: Arguments,
		responder: InvocationResponder,
	},
	/// The session ended. Sent once, as the last event.
	Closed(CloseDetails),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub struct CloseDetails {
	pub reason: String,
	pub message: Option<String>,
	/// Router-suggested delay before reconnecting.
	pub retry_delay: Option<Duration>,
}

impl CloseDetails {
	/// Builds close details from an ABORT or GOODBYE.
	///
	/// `retry_delay` is read in seconds and ignored unless it is a finite,
	/// non-negative number.
	pub fn from_details(reason: String, details: &Dict) -> Self {
		let message = details.get("message").and_then(Value::as_str).map(str::to_owned);
		let retry_delay = details
			.get("retry_delay")
			.and_then(Value::as_f64)
			.and_then(|secs| Duration::try_from_secs_f64(secs).ok());
		Self {
			reason,
			message,
			retry_delay,
		}
	}

	/// The transport went away without a closing handshake.
	pub fn transport_lost() -> Self {
		Self {
			reason: "transport.lost".to_string(),
			message: None,
			retry_delay: None,
		}
	}
}

/// How an invocation was answered.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationReply {
	Yield(Arguments),
	Error { error: String, arguments: Arguments },
}

type ReplyFn = Box<dyn FnOnce(InvocationReply) + Send>;

/// Single-use handle for answering an INVOCATION.
///
/// `respond` and `reject` consume the responder. Dropping it unanswered
/// replies with `wamp.error.canceled`.
pub struct InvocationResponder {
	request: Id,
	reply: Option<ReplyFn>,
}

impl InvocationResponder {
	pub fn new(request: Id, reply: impl FnOnce(InvocationReply) + Send + 'static) -> Self {
		Self {
			request,
			reply: Some(Box::new(reply)),
		}
	}

	/// Invocation request id this responder answers.
	pub fn request(&self) -> Id {
		self.request
	}

	pub fn respond(mut self, arguments: Arguments) {
		self.resolve(InvocationReply::Yield(arguments));
	}

	pub fn reject(mut self, error: impl Into<String>, arguments: Arguments) {
		self.resolve(InvocationReply::Error {
			error: error.into(),
			arguments,
		});
	}

	fn resolve(&mut self, reply: InvocationReply) {
		if let Some(reply_fn) = self.reply.take() {
			reply_fn(reply);
		}
	}
}

impl Drop for InvocationResponder {
	fn drop(&mut self) {
		if self.reply.is_some() {
			tracing::debug!(target = "wamp.session", request = self.request, "invocation dropped unanswered");
			self.resolve(InvocationReply::Error {
				error: uri::ERROR_CANCELED.to_string(),
				arguments: Arguments::Positional(vec![Value::from("invocation was not answered")]),
			});
		}
	}
}

impl fmt::Debug for InvocationResponder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InvocationResponder")
			.field("request", &self.request)
			.field("resolved", &self.reply.is_none())
			.finish()
	}
}

impl Session for Connection {
	fn subscribe(&self, topic: &str) -> BoxFuture<'static, Result<Id>> {
		Connection::subscribe(self, topic)
	}

	fn unsubscribe(&self, subscription: Id) -> BoxFuture<'static, Result<()>> {
		Connection::unsubscribe(self, subscription)
	}

	fn register(&self, procedure: &str) -> BoxFuture<'static, Result<Id>> {
		Connection::register(self, procedure)
	}

	fn call(&self, procedure: &str, arguments: Arguments) -> BoxFuture<'static, Result<Arguments>> {
		Connection::call(self, procedure, arguments)
	}

	fn publish(&self, topic: &str, arguments: Arguments) -> Result<()> {
		Connection::publish(self, topic, arguments)
	}

	fn close(&self) -> BoxFuture<'_, ()> {
		Box::pin(Connection::close(self))
	}
}

/// Opens WAMP sessions over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
	tls: Option<Arc<rustls::ClientConfig>>,
}

impl WebSocketConnector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Connector whose `wss://` handshakes follow `tls`.
	pub fn with_tls(tls: &TlsOptions) -> Result<Self> {
		Ok(Self {
			tls: tls.client_config()?,
		})
	}

	pub fn has_custom_tls(&self) -> bool {
		self.tls.is_some()
	}
}

impl Connector for WebSocketConnector {
	fn connect(&self, target: &Target, authenticator: Arc<dyn Authenticator>) -> BoxFuture<'static, Result<OpenedSession>> {
		let target = target.clone();
		let tls = self.tls.clone();
		Box::pin(async move {
			let parts = WebSocketTransport::connect_with_tls(&target.endpoint, tls).await?;
			let (connection, events) = Connection::open(parts, &target, authenticator.as_ref()).await?;
			Ok(OpenedSession {
				session: connection,
				events,
			})
		})
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;
	use serde_json::json;

	use super::*;

	fn recording() -> (InvocationResponder, Arc<Mutex<Vec<InvocationReply>>>) {
		let replies = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&replies);
		let responder = InvocationResponder::new(7, move |reply| sink.lock().push(reply));
		(responder, replies)
	}

	#[test]
	fn respond_sends_one_yield() {
		let (responder, replies) = recording();
		assert_eq!(responder.request(), 7);
		responder.respond(Arguments::Positional(vec![json!("ok")]));
		assert_eq!(
			*replies.lock(),
			vec![InvocationReply::Yield(Arguments::Positional(vec![json!("ok")]))]
		);
	}

	#[test]
	fn reject_sends_error_uri() {
		let (responder, replies) = recording();
		responder.reject("com.example.denied", Arguments::Empty);
		assert_eq!(
			*replies.lock(),
			vec![InvocationReply::Error {
				error: "com.example.denied".into(),
				arguments: Arguments::Empty,
			}]
		);
	}

	#[test]
	fn dropped_responder_cancels() {
		let (responder, replies) = recording();
		drop(responder);
		let replies = replies.lock();
		assert_eq!(replies.len(), 1);
		assert!(matches!(&replies[0], InvocationReply::Error { error, .. } if error == uri::ERROR_CANCELED));
	}

	#[test]
	fn close_details_read_retry_delay_in_seconds() {
		let details = match json!({"message": "maintenance", "retry_delay": 2.5}) {
			Value::Object(map) => map,
			_ => unreachable!(),
		};
		let close = CloseDetails::from_details("wamp.close.system_shutdown".into(), &details);
		assert_eq!(close.message.as_deref(), Some("maintenance"));
		assert_eq!(close.retry_delay, Some(Duration::from_millis(2500)));
	}

	#[test]
	fn close_details_ignore_invalid_retry_delay() {
		for bad in [json!(-1), json!("soon"), json!(null)] {
			let mut details = Dict::new();
			details.insert("retry_delay".into(), bad);
			assert_eq!(CloseDetails::from_details("r".into(), &details).retry_delay, None);
		}
	}

	#[test]
	fn websocket_connector_carries_tls_config() {
		assert!(!WebSocketConnector::new().has_custom_tls());
		assert!(
			!WebSocketConnector::with_tls(&TlsOptions::default())
				.unwrap()
				.has_custom_tls()
		);
		assert!(
			WebSocketConnector::with_tls(&TlsOptions::accept_invalid_certs())
				.unwrap()
				.has_custom_tls()
		);
		assert!(WebSocketConnector::with_tls(&TlsOptions::trust_ca_file("/nonexistent/ca.pem")).is_err());
	}
}
