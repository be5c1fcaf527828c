//! Session manager: one auto-reconnecting WAMP session shared by many local
//! consumers.
//!
//! A [`SessionManager`] is a cheap handle to an actor task that owns all
//! connection state. Handle methods enqueue commands; the actor applies them
//! in order, one at a time, so a handler that calls back into the manager is
//! queued behind the dispatch that invoked it.

mod actor;
mod bindings;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;
use wamp_protocol::Arguments;
use wamp_runtime::{Connector, TokenProvider};

pub use self::bindings::{BindingState, BindingsSnapshot, TopicState};
use self::actor::Actor;
use crate::config::PoolConfig;
use crate::error::{CallError, HandlerError};
use crate::handlers::{
	CallResult, EventArgs, EventHandler, HandlerId, Invocation, ProcedureHandler, SubscriptionHandle, next_handler_id,
};
use crate::key::PoolKey;
use crate::lifecycle::{ConnectionState, Lifecycle, LifecycleNotifier};

pub(crate) enum Command {
	Subscribe {
		topic: String,
		id: HandlerId,
		handler: EventHandler,
	},
	Unsubscribe {
		topic: String,
		id: HandlerId,
	},
	Register {
		procedure: String,
		handler: ProcedureHandler,
	},
	Call {
		procedure: String,
		arguments: Arguments,
		reply: oneshot::Sender<Result<CallResult, CallError>>,
	},
	Publish {
		topic: String,
		arguments: Arguments,
	},
	Bindings {
		reply: oneshot::Sender<BindingsSnapshot>,
	},
	Close {
		done: oneshot::Sender<()>,
	},
}

struct Shared {
	key: PoolKey,
	commands: mpsc::UnboundedSender<Command>,
	events: broadcast::Sender<Lifecycle>,
	state: watch::Receiver<ConnectionState>,
}

/// Handle to a pooled session.
///
/// Clones share one actor. The actor shuts down on an explicit close (by its
/// pool) or once every handle is gone.
#[derive(Clone)]
pub struct SessionManager {
	inner: Arc<Shared>,
}

impl SessionManager {
	/// Starts the actor and its first connection attempt. Must be called
	/// within a tokio runtime.
	pub(crate) fn spawn(
		key: PoolKey,
		config: &PoolConfig,
		connector: Arc<dyn Connector>,
		tokens: Arc<dyn TokenProvider>,
	) -> Self {
		let (commands, command_rx) = mpsc::unbounded_channel();
		let lifecycle = LifecycleNotifier::new(config.lifecycle_capacity);
		let shared = Shared {
			key: key.clone(),
			commands,
			events: lifecycle.event_sender(),
			state: lifecycle.state_receiver(),
		};
		let actor = Actor::new(key, config.clone(), connector, tokens, lifecycle, command_rx);
		tokio::spawn(actor.run());
		Self {
			inner: Arc::new(shared),
		}
	}

	pub fn key(&self) -> &PoolKey {
		&self.inner.key
	}

	pub fn state(&self) -> ConnectionState {
		*self.inner.state.borrow()
	}

	/// Watch channel tracking [`state`](Self::state).
	pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
		self.inner.state.clone()
	}

	/// Subscribes to `Ready`/`Closed` notifications emitted from now on.
	pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
		self.inner.events.subscribe()
	}

	pub fn is_connected(&self) -> bool {
		self.state() == ConnectionState::Connected
	}

	pub fn is_auth_failed(&self) -> bool {
		self.state() == ConnectionState::AuthFailed
	}

	/// Adds a local handler for `topic`.
	///
	/// All handlers of a topic share one remote subscription, established now
	/// if connected and otherwise on the next session.
	pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
	where
		F: Fn(&EventArgs) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		let topic = topic.into();
		let id = next_handler_id();
		self.send(Command::Subscribe {
			topic: topic.clone(),
			id,
			handler: Arc::new(handler),
		});

		let commands = self.inner.commands.downgrade();
		let dropper = Arc::new(move |topic: &str, id: HandlerId| {
			if let Some(commands) = commands.upgrade() {
				let _ = commands.send(Command::Unsubscribe {
					topic: topic.to_string(),
					id,
				});
			}
		});
		SubscriptionHandle::new(topic, id, dropper)
	}

	/// Installs the handler for `procedure`, replacing any previous one.
	pub fn register_procedure<F>(&self, procedure: impl Into<String>, handler: F)
	where
		F: Fn(Invocation) + Send + Sync + 'static,
	{
		self.send(Command::Register {
			procedure: procedure.into(),
			handler: Arc::new(handler),
		});
	}

	/// Calls a remote procedure.
	///
	/// Fails immediately with [`CallError::NotConnected`] unless a session is
	/// established; nothing is queued for later.
	pub async fn call_procedure(&self, procedure: &str, payload: Option<Value>) -> Result<CallResult, CallError> {
		if !self.is_connected() {
			warn!(target = "wamp.session", key = %self.inner.key, procedure, "call while not connected");
			return Err(CallError::NotConnected);
		}
		let (reply, rx) = oneshot::channel();
		let command = Command::Call {
			procedure: procedure.to_string(),
			arguments: Arguments::for_call(payload),
			reply,
		};
		if self.inner.commands.send(command).is_err() {
			return Err(CallError::NotConnected);
		}
		rx.await.unwrap_or(Err(CallError::Closed))
	}

	/// Publishes without acknowledgement. Dropped with a warning when not
	/// connected.
	pub fn publish(&self, topic: &str, message: Value) {
		if !self.is_connected() {
			warn!(target = "wamp.session", key = %self.inner.key, topic, "publish while not connected; dropped");
			return;
		}
		self.send(Command::Publish {
			topic: topic.to_string(),
			arguments: Arguments::for_publish(message),
		});
	}

	/// Current requested and active bindings.
	pub async fn bindings(&self) -> BindingsSnapshot {
		let (reply, rx) = oneshot::channel();
		self.send(Command::Bindings { reply });
		rx.await.unwrap_or_default()
	}

	/// Tears the session down and waits for the actor to finish.
	pub(crate) async fn close(&self) {
		let (done, rx) = oneshot::channel();
		if self.inner.commands.send(Command::Close { done }).is_ok() {
			let _ = rx.await;
		}
	}

	/// Starts teardown without waiting for it.
	pub(crate) fn request_close(&self) {
		let (done, _) = oneshot::channel();
		self.send(Command::Close { done });
	}

	/// Whether the pool should replace this manager.
	pub(crate) fn is_stale(&self) -> bool {
		self.is_auth_failed() || self.inner.commands.is_closed()
	}

	/// Whether both handles refer to the same manager.
	pub fn ptr_eq(&self, other: &SessionManager) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	fn send(&self, command: Command) {
		// A closed channel means the actor is gone; nothing left to apply to.
		let _ = self.inner.commands.send(command);
	}
}

impl fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionManager")
			.field("key", &self.inner.key)
			.field("state", &self.state())
			.finish()
	}
}
