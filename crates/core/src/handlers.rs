//! Local handler infrastructure.
//!
//! Subscriber handlers live in a per-topic [`HandlerMap`] keyed by
//! [`HandlerId`] ([`IndexMap`] for O(1) removal with stable insertion order,
//! which is also dispatch order). Procedures have exactly one handler each.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;
use wamp_protocol::{Arguments, Dict};
use wamp_runtime::InvocationResponder;

use crate::error::HandlerError;

/// Unique identifier for local handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// One publication, as seen by every handler of its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct EventArgs {
	pub topic: String,
	pub arguments: Arguments,
	/// Event details, always including `topic`.
	pub details: Dict,
}

impl EventArgs {
	pub fn new(topic: impl Into<String>, arguments: Arguments, mut details: Dict) -> Self {
		let topic = topic.into();
		details
			.entry("topic")
			.or_insert_with(|| Value::String(topic.clone()));
		Self {
			topic,
			arguments,
			details,
		}
	}

	pub fn args(&self) -> &[Value] {
		self.arguments.positional()
	}

	/// Named arguments; empty when the publication carried none.
	pub fn kwargs(&self) -> Dict {
		self.arguments.named().cloned().unwrap_or_default()
	}
}

/// Subscriber callback. Errors and panics are logged by the dispatcher.
pub type EventHandler = Arc<dyn Fn(&EventArgs) -> Result<(), HandlerError> + Send + Sync>;

/// Handlers of one topic in registration order.
pub type HandlerMap = IndexMap<HandlerId, EventHandler>;

/// Invokes every handler with the same event.
///
/// A handler that fails or panics is logged and skipped; the remaining
/// handlers still run. Returns how many handlers completed successfully.
pub fn fan_out(handlers: &HandlerMap, event: &EventArgs) -> usize {
	let mut delivered = 0;
	for (id, handler) in handlers {
		match catch_unwind(AssertUnwindSafe(|| handler(event))) {
			Ok(Ok(())) => delivered += 1,
			Ok(Err(err)) => {
				warn!(target = "wamp.fanout", topic = %event.topic, handler = id, error = %err, "subscriber handler failed");
			}
			Err(panic) => {
				let reason = panic
					.downcast_ref::<&str>()
					.map(|s| (*s).to_string())
					.or_else(|| panic.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "non-string panic payload".to_string());
				warn!(target = "wamp.fanout", topic = %event.topic, handler = id, %reason, "subscriber handler panicked");
			}
		}
	}
	delivered
}

/// Handle to one local subscriber.
///
/// Dropping the handle keeps the handler subscribed; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct SubscriptionHandle {
	topic: String,
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(&str, HandlerId) + Send + Sync>>,
}

impl SubscriptionHandle {
	pub(crate) fn new(topic: String, id: HandlerId, dropper: Arc<dyn Fn(&str, HandlerId) + Send + Sync>) -> Self {
		Self {
			topic,
			id,
			dropper: Some(dropper),
		}
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Removes this handler. The remote subscription goes once the topic has
	/// no handlers left.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(&self.topic, self.id);
		}
	}
}

impl std::fmt::Debug for SubscriptionHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SubscriptionHandle")
			.field("topic", &self.topic)
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

/// Call routed to a locally registered procedure.
///
/// Resolve it with [`respond`](Self::respond) or [`reject`](Self::reject);
/// dropping it unresolved answers the caller with `wamp.error.canceled`.
#[derive(Debug)]
pub struct Invocation {
	pub procedure: String,
	pub arguments: Arguments,
	pub details: Dict,
	responder: InvocationResponder,
}

impl Invocation {
	pub(crate) fn new(procedure: String, arguments: Arguments, details: Dict, responder: InvocationResponder) -> Self {
		Self {
			procedure,
			arguments,
			details,
			responder,
		}
	}

	pub fn args(&self) -> &[Value] {
		self.arguments.positional()
	}

	pub fn kwargs(&self) -> Dict {
		self.arguments.named().cloned().unwrap_or_default()
	}

	pub fn respond(self, result: Arguments) {
		self.responder.respond(result);
	}

	pub fn reject(self, error: impl Into<String>, arguments: Arguments) {
		self.responder.reject(error, arguments);
	}
}

/// Procedure callback. Owns the invocation and must resolve it.
pub type ProcedureHandler = Arc<dyn Fn(Invocation) + Send + Sync>;

/// Successful call outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallResult {
	pub args: Vec<Value>,
	pub kwargs: Dict,
}

impl From<Arguments> for CallResult {
	fn from(arguments: Arguments) -> Self {
		let (args, kwargs) = arguments.into_parts();
		Self { args, kwargs }
	}
}
