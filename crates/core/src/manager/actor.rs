use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wamp_protocol::{Arguments, Dict, Id, uri};
use wamp_runtime::{
	AuthError, Authenticator, CloseDetails, Connector, InvocationResponder, OpenedSession, Session, SessionEvent,
	Target, TicketAuthenticator, TokenProvider,
};

use super::Command;
use super::bindings::Bindings;
use crate::config::PoolConfig;
use crate::error::CallError;
use crate::handlers::{CallResult, EventArgs, Invocation, fan_out};
use crate::key::PoolKey;
use crate::lifecycle::{ConnectionState, LifecycleNotifier};
use crate::timer::Timer;

type Attempt = BoxFuture<'static, wamp_runtime::Result<OpenedSession>>;

/// Outcome of a subscribe or register request, tagged with the session it
/// was sent on.
enum Established {
	Subscription {
		epoch: u64,
		topic: String,
		result: wamp_runtime::Result<Id>,
	},
	Registration {
		epoch: u64,
		procedure: String,
		result: wamp_runtime::Result<Id>,
	},
}

struct RetryState {
	/// Retries scheduled since the last successful open.
	attempt: u32,
	reconnect: Timer,
	watchdog: Timer,
	closing: bool,
	auth_failed: bool,
}

pub(super) struct Actor {
	key: PoolKey,
	target: Target,
	config: PoolConfig,
	connector: Arc<dyn Connector>,
	authenticator: Arc<dyn Authenticator>,
	lifecycle: LifecycleNotifier,
	commands: mpsc::UnboundedReceiver<Command>,
	bindings: Bindings,
	session: Option<Arc<dyn Session>>,
	events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
	attempt: Option<Attempt>,
	establishing: FuturesUnordered<BoxFuture<'static, Established>>,
	/// Bumped on every successful open.
	epoch: u64,
	retry: RetryState,
}

impl Actor {
	pub(super) fn new(
		key: PoolKey,
		config: PoolConfig,
		connector: Arc<dyn Connector>,
		tokens: Arc<dyn TokenProvider>,
		lifecycle: LifecycleNotifier,
		commands: mpsc::UnboundedReceiver<Command>,
	) -> Self {
		let authenticator = Arc::new(TicketAuthenticator::new(
			tokens,
			key.authid(),
			key.secret(),
			key.endpoint(),
		));
		Self {
			target: key.target(),
			key,
			config,
			connector,
			authenticator,
			lifecycle,
			commands,
			bindings: Bindings::default(),
			session: None,
			events: None,
			attempt: None,
			establishing: FuturesUnordered::new(),
			epoch: 0,
			retry: RetryState {
				attempt: 0,
				reconnect: Timer::new("reconnect"),
				watchdog: Timer::new("connect-watchdog"),
				closing: false,
				auth_failed: false,
			},
		}
	}

	pub(super) async fn run(mut self) {
		self.connect();
		loop {
			// The connection settles a SUBSCRIBED or REGISTERED reply before it
			// forwards any later frame, so establishments must be polled
			// ahead of events for the first EVENT/INVOCATION to be routable.
			tokio::select! {
				biased;

				command = self.commands.recv() => match command {
					Some(Command::Close { done }) => {
						self.shutdown().await;
						let _ = done.send(());
						break;
					}
					Some(command) => self.on_command(command),
					None => {
						self.shutdown().await;
						break;
					}
				},
				Some(established) = self.establishing.next() => self.on_established(established),
				event = next_event(&mut self.events) => self.on_session_event(event),
				result = next_attempt(&mut self.attempt) => self.on_attempt(result),
				() = self.retry.reconnect.expired() => {
					self.retry.reconnect.cancel();
					self.connect();
				}
				() = self.retry.watchdog.expired() => {
					self.retry.watchdog.cancel();
					self.on_watchdog();
				}
			}
		}
	}

	fn connect(&mut self) {
		if self.retry.closing || self.retry.auth_failed {
			return;
		}
		info!(target = "wamp.session", key = %self.key, attempt = self.retry.attempt, "connecting");
		self.lifecycle.set_state(ConnectionState::Connecting);
		self.retry.watchdog.arm(self.config.connect_timeout);
		self.attempt = Some(
			self.connector
				.connect(&self.target, Arc::clone(&self.authenticator)),
		);
	}

	fn on_attempt(&mut self, result: wamp_runtime::Result<OpenedSession>) {
		self.attempt = None;
		self.retry.watchdog.cancel();
		match result {
			Ok(opened) => {
				self.retry.attempt = 0;
				self.epoch += 1;
				self.session = Some(opened.session);
				self.events = Some(opened.events);
				info!(target = "wamp.session", key = %self.key, "session established");
				self.lifecycle.set_state(ConnectionState::Connected);
				self.lifecycle.ready();
				self.reconcile();
			}
			Err(err) => {
				if err.auth_error().is_some_and(AuthError::is_permanent) {
					warn!(target = "wamp.session", key = %self.key, error = %err, "credentials rejected; not retrying");
					self.retry.auth_failed = true;
					self.lifecycle.set_state(ConnectionState::AuthFailed);
				} else {
					warn!(target = "wamp.session", key = %self.key, error = %err, "connect attempt failed");
					self.lifecycle.set_state(ConnectionState::Disconnected);
				}
				self.lifecycle.closed();
				self.schedule_reconnect(err.retry_delay());
			}
		}
	}

	fn on_watchdog(&mut self) {
		if self.attempt.take().is_none() {
			return;
		}
		warn!(
			target = "wamp.session",
			key = %self.key,
			timeout_ms = self.config.connect_timeout.as_millis(),
			"connect attempt timed out"
		);
		self.lifecycle.set_state(ConnectionState::Disconnected);
		self.lifecycle.closed();
		self.schedule_reconnect(None);
	}

	fn on_session_event(&mut self, event: Option<SessionEvent>) {
		match event {
			Some(SessionEvent::Event {
				subscription,
				details,
				arguments,
			}) => self.dispatch_event(subscription, details, arguments),
			Some(SessionEvent::Invocation {
				registration,
				details,
				arguments,
				responder,
			}) => self.dispatch_invocation(registration, details, arguments, responder),
			Some(SessionEvent::Closed(details)) => self.on_session_lost(details),
			None => self.on_session_lost(CloseDetails::transport_lost()),
		}
	}

	fn on_session_lost(&mut self, details: CloseDetails) {
		self.session = None;
		self.events = None;
		self.bindings.clear_active();
		info!(
			target = "wamp.session",
			key = %self.key,
			reason = %details.reason,
			message = details.message.as_deref().unwrap_or(""),
			"session closed"
		);
		self.lifecycle.set_state(ConnectionState::Disconnected);
		self.lifecycle.closed();
		self.schedule_reconnect(details.retry_delay);
	}

	/// Arms the reconnect timer unless closing or auth-failed. A delay
	/// suggested by the router takes precedence over backoff.
	fn schedule_reconnect(&mut self, suggested: Option<Duration>) {
		if self.retry.closing || self.retry.auth_failed {
			return;
		}
		let delay = suggested.unwrap_or_else(|| self.config.backoff.delay(self.retry.attempt));
		self.retry.attempt = self.retry.attempt.saturating_add(1);
		self.retry.reconnect.arm(delay);
		debug!(
			target = "wamp.session",
			key = %self.key,
			attempt = self.retry.attempt,
			delay_ms = delay.as_millis(),
			suggested = suggested.is_some(),
			"reconnect scheduled"
		);
	}

	fn reconcile(&mut self) {
		let Some(session) = self.session.clone() else {
			return;
		};
		for topic in self.bindings.claim_unbound_topics() {
			self.request_subscription(&session, topic);
		}
		for procedure in self.bindings.claim_unbound_procedures() {
			self.request_registration(&session, procedure);
		}
	}

	fn request_subscription(&mut self, session: &Arc<dyn Session>, topic: String) {
		let epoch = self.epoch;
		let request = session.subscribe(&topic);
		self.establishing.push(Box::pin(async move {
			Established::Subscription {
				epoch,
				topic,
				result: request.await,
			}
		}));
	}

	fn request_registration(&mut self, session: &Arc<dyn Session>, procedure: String) {
		let epoch = self.epoch;
		let request = session.register(&procedure);
		self.establishing.push(Box::pin(async move {
			Established::Registration {
				epoch,
				procedure,
				result: request.await,
			}
		}));
	}

	fn on_established(&mut self, established: Established) {
		match established {
			Established::Subscription { epoch, topic, result } => {
				if epoch != self.epoch || self.session.is_none() {
					debug!(target = "wamp.session", key = %self.key, %topic, "discarding subscribe result from previous session");
					return;
				}
				match result {
					Ok(subscription) => {
						if self.bindings.subscription_established(&topic, subscription) {
							debug!(target = "wamp.session", key = %self.key, %topic, subscription, "subscribed");
						} else {
							debug!(target = "wamp.session", key = %self.key, %topic, "subscription no longer wanted");
							self.drop_subscription(subscription);
						}
					}
					Err(err) => {
						warn!(target = "wamp.session", key = %self.key, %topic, error = %err, "subscribe failed");
						self.bindings.subscription_rejected(&topic);
					}
				}
			}
			Established::Registration {
				epoch,
				procedure,
				result,
			} => {
				if epoch != self.epoch || self.session.is_none() {
					debug!(target = "wamp.session", key = %self.key, %procedure, "discarding register result from previous session");
					return;
				}
				match result {
					Ok(registration) => {
						debug!(target = "wamp.session", key = %self.key, %procedure, registration, "registered");
						self.bindings.registration_established(&procedure, registration);
					}
					Err(err) => {
						warn!(target = "wamp.session", key = %self.key, %procedure, error = %err, "register failed");
						self.bindings.registration_rejected(&procedure);
					}
				}
			}
		}
	}

	fn drop_subscription(&self, subscription: Id) {
		let Some(session) = &self.session else {
			return;
		};
		let request = session.unsubscribe(subscription);
		let key = self.key.clone();
		tokio::spawn(async move {
			if let Err(err) = request.await {
				debug!(target = "wamp.session", key = %key, subscription, error = %err, "unsubscribe failed");
			}
		});
	}

	fn dispatch_event(&self, subscription: Id, details: Dict, arguments: Arguments) {
		let Some((topic, handlers)) = self.bindings.route_event(subscription) else {
			debug!(target = "wamp.fanout", key = %self.key, subscription, "event for unknown subscription");
			return;
		};
		let event = EventArgs::new(topic, arguments, details);
		fan_out(handlers, &event);
	}

	fn dispatch_invocation(&self, registration: Id, details: Dict, arguments: Arguments, responder: InvocationResponder) {
		let Some((procedure, handler)) = self.bindings.route_invocation(registration) else {
			debug!(target = "wamp.session", key = %self.key, registration, "invocation for unknown registration");
			responder.reject(uri::ERROR_NO_SUCH_PROCEDURE, Arguments::Empty);
			return;
		};
		let invocation = Invocation::new(procedure.to_string(), arguments, details, responder);
		// An unwinding handler drops the invocation, which cancels it.
		if catch_unwind(AssertUnwindSafe(|| handler(invocation))).is_err() {
			warn!(target = "wamp.session", key = %self.key, procedure, "procedure handler panicked");
		}
	}

	fn on_command(&mut self, command: Command) {
		match command {
			Command::Subscribe { topic, id, handler } => {
				self.bindings.add_handler(topic.clone(), id, handler);
				if let Some(session) = self.session.clone() {
					if self.bindings.claim_topic(&topic) {
						self.request_subscription(&session, topic);
					}
				}
			}
			Command::Unsubscribe { topic, id } => {
				if let Some(subscription) = self.bindings.remove_handler(&topic, id) {
					debug!(target = "wamp.session", key = %self.key, %topic, "last handler gone; unsubscribing");
					self.drop_subscription(subscription);
				}
			}
			Command::Register { procedure, handler } => {
				self.bindings.set_procedure(procedure.clone(), handler);
				if let Some(session) = self.session.clone() {
					if self.bindings.claim_procedure(&procedure) {
						self.request_registration(&session, procedure);
					}
				}
			}
			Command::Call {
				procedure,
				arguments,
				reply,
			} => {
				let Some(session) = &self.session else {
					let _ = reply.send(Err(CallError::NotConnected));
					return;
				};
				let request = session.call(&procedure, arguments);
				tokio::spawn(async move {
					let result = request.await.map(CallResult::from).map_err(CallError::from);
					let _ = reply.send(result);
				});
			}
			Command::Publish { topic, arguments } => match &self.session {
				Some(session) => {
					if let Err(err) = session.publish(&topic, arguments) {
						warn!(target = "wamp.session", key = %self.key, %topic, error = %err, "publish failed");
					}
				}
				None => {
					warn!(target = "wamp.session", key = %self.key, %topic, "publish while not connected; dropped");
				}
			},
			Command::Bindings { reply } => {
				let _ = reply.send(self.bindings.snapshot());
			}
			// Handled by the run loop.
			Command::Close { done } => {
				let _ = done.send(());
			}
		}
	}

	/// Final teardown. No timer fires and no notification is sent afterwards.
	async fn shutdown(&mut self) {
		self.retry.closing = true;
		self.retry.reconnect.cancel();
		self.retry.watchdog.cancel();
		self.attempt = None;
		self.establishing.clear();
		self.events = None;
		self.lifecycle.set_state(ConnectionState::Closing);
		if let Some(session) = self.session.take() {
			session.close().await;
		}
		self.bindings.clear_active();
		self.lifecycle.seal();
		info!(target = "wamp.session", key = %self.key, "session manager closed");
	}
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> wamp_runtime::Result<OpenedSession> {
	match attempt {
		Some(attempt) => attempt.await,
		None => std::future::pending().await,
	}
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>) -> Option<SessionEvent> {
	match events {
		Some(events) => events.recv().await,
		None => std::future::pending().await,
	}
}
