//! WAMP client connection layer.
//!
//! Implements the opening handshake (HELLO, optional CHALLENGE/AUTHENTICATE,
//! WELCOME or ABORT) and, once the session is established, request/response
//! correlation on top of a [`TransportParts`]:
//!
//! 1. A request takes the next request id and parks a oneshot sender in the
//!    pending map
//! 2. The writer task serializes outbound messages onto the transport
//! 3. The dispatch task correlates replies (including ERROR) by request id
//! 4. EVENT and INVOCATION frames are forwarded as [`SessionEvent`]s; the
//!    session's end is forwarded as a single [`SessionEvent::Closed`]
//!
//! INVOCATIONs awaiting a reply are tracked in a table keyed by request id.
//! The [`InvocationResponder`] handed to the application removes its entry
//! when it resolves, so each invocation is answered at most once and
//! responders outliving the session become no-ops.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use wamp_protocol::{Arguments, Dict, Id, Message, MessageType, uri};

use crate::auth::Authenticator;
use crate::error::{Error, Result};
use crate::session::{CloseDetails, InvocationReply, InvocationResponder, SessionEvent, Target};
use crate::transport::TransportParts;

/// How long [`Connection::close`] waits for the router's GOODBYE reply.
pub const GOODBYE_TIMEOUT: Duration = Duration::from_secs(2);

const CLIENT_ROLES: [&str; 4] = ["caller", "callee", "publisher", "subscriber"];

/// Pending requests keyed by request id.
type PendingMap = Arc<Mutex<HashMap<Id, oneshot::Sender<Result<Message>>>>>;

/// INVOCATION request ids that still owe the router a YIELD or ERROR.
type InvocationTable = Arc<Mutex<HashSet<Id>>>;

/// Removes the pending entry when a request future is dropped unanswered.
struct CancelGuard {
	id: Id,
	pending: PendingMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: Id, pending: PendingMap) -> Self {
		Self {
			id,
			pending,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.pending.lock().remove(&self.id).is_some() {
			tracing::debug!(target = "wamp.connection", id = self.id, "dropped orphaned request");
		}
	}
}

/// Reply future for a correlated request.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Message>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Message>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ConnectionClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Established WAMP session over a transport.
pub struct Connection {
	session_id: Id,
	realm: String,
	last_id: AtomicU64,
	pending: PendingMap,
	outbound_tx: mpsc::UnboundedSender<Message>,
	/// Set once the dispatch loop has stopped; no reply can arrive after it.
	ended: Arc<AtomicBool>,
	/// Set once this side sent GOODBYE.
	closing: Arc<AtomicBool>,
	dispatch: Mutex<Option<JoinHandle<()>>>,
	_reader: AbortOnDrop,
	writer: AbortOnDrop,
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("session_id", &self.session_id)
			.field("realm", &self.realm)
			.field("ended", &self.ended.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}

impl Connection {
	/// Performs the opening handshake and starts the dispatch loop.
	///
	/// Returns the connection and the receiver for its inbound events. If a
	/// CHALLENGE cannot be answered the session is aborted and the
	/// authenticator's failure is returned as [`Error::Auth`].
	pub async fn open(
		parts: TransportParts,
		target: &Target,
		authenticator: &dyn Authenticator,
	) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let reader = AbortOnDrop(tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::debug!(target = "wamp.connection", error = %e, "transport read ended with error");
			}
		}));

		sender.send(hello(target).to_value()).await?;

		let session_id = loop {
			let value = message_rx.recv().await.ok_or(Error::ConnectionClosed)?;
			match Message::from_value(value)? {
				Message::Welcome { session, .. } => break session,
				Message::Challenge { auth_method, extra } => {
					tracing::debug!(target = "wamp.connection", method = %auth_method, "answering challenge");
					match authenticator.authenticate(&auth_method, &extra).await {
						Ok(signature) => {
							let reply = Message::Authenticate {
								signature,
								extra: Dict::new(),
							};
							sender.send(reply.to_value()).await?;
						}
						Err(err) => {
							let abort = Message::Abort {
								details: Dict::new(),
								reason: uri::ERROR_AUTHENTICATION_FAILED.to_string(),
							};
							let _ = sender.send(abort.to_value()).await;
							let _ = sender.close().await;
							return Err(Error::Auth(err));
						}
					}
				}
				Message::Abort { details, reason } => {
					let close = CloseDetails::from_details(reason, &details);
					return Err(Error::Aborted {
						reason: close.reason,
						message: close.message,
						retry_delay: close.retry_delay,
					});
				}
				other => {
					return Err(Error::ProtocolError(format!(
						"unexpected {:?} during handshake",
						other.message_type()
					)));
				}
			}
		};

		tracing::info!(target = "wamp.connection", session = session_id, realm = %target.realm, "session established");

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
		let writer = AbortOnDrop(tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message.to_value()).await {
					tracing::warn!(target = "wamp.connection", error = %e, "transport write failed");
					break;
				}
			}
			let _ = sender.close().await;
		}));

		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let pending: PendingMap = Arc::default();
		let ended = Arc::new(AtomicBool::new(false));
		let closing = Arc::new(AtomicBool::new(false));

		let dispatcher = Dispatcher {
			pending: Arc::clone(&pending),
			invocations: Arc::default(),
			outbound_tx: outbound_tx.clone(),
			events_tx,
			ended: Arc::clone(&ended),
			closing: Arc::clone(&closing),
		};
		let dispatch = tokio::spawn(dispatcher.run(message_rx));

		let connection = Arc::new(Self {
			session_id,
			realm: target.realm.clone(),
			last_id: AtomicU64::new(0),
			pending,
			outbound_tx,
			ended,
			closing,
			dispatch: Mutex::new(Some(dispatch)),
			_reader: reader,
			writer,
		});
		Ok((connection, events_rx))
	}

	pub fn session_id(&self) -> Id {
		self.session_id
	}

	pub fn realm(&self) -> &str {
		&self.realm
	}

	/// True once the router ended the session or the transport dropped.
	pub fn is_closed(&self) -> bool {
		self.ended.load(Ordering::SeqCst)
	}

	fn next_request_id(&self) -> Id {
		self.last_id.fetch_add(1, Ordering::SeqCst) + 1
	}

	/// Sends a request built around a fresh request id and returns its reply
	/// future.
	fn request(&self, build: impl FnOnce(Id) -> Message) -> Result<ResponseFuture> {
		let id = self.next_request_id();
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.pending));

		// The dispatcher sets `ended` before draining the pending map, so an
		// entry inserted after the drain is caught here.
		if self.ended.load(Ordering::SeqCst) || self.outbound_tx.send(build(id)).is_err() {
			return Err(Error::ConnectionClosed);
		}
		Ok(ResponseFuture { rx, guard })
	}

	pub fn subscribe(&self, topic: &str) -> BoxFuture<'static, Result<Id>> {
		let response = self.request(|request| Message::Subscribe {
			request,
			options: Dict::new(),
			topic: topic.to_string(),
		});
		Box::pin(async move {
			match response?.await? {
				Message::Subscribed { subscription, .. } => Ok(subscription),
				other => Err(unexpected_reply(&other)),
			}
		})
	}

	pub fn unsubscribe(&self, subscription: Id) -> BoxFuture<'static, Result<()>> {
		let response = self.request(|request| Message::Unsubscribe { request, subscription });
		Box::pin(async move {
			match response?.await? {
				Message::Unsubscribed { .. } => Ok(()),
				other => Err(unexpected_reply(&other)),
			}
		})
	}

	pub fn register(&self, procedure: &str) -> BoxFuture<'static, Result<Id>> {
		let response = self.request(|request| Message::Register {
			request,
			options: Dict::new(),
			procedure: procedure.to_string(),
		});
		Box::pin(async move {
			match response?.await? {
				Message::Registered { registration, .. } => Ok(registration),
				other => Err(unexpected_reply(&other)),
			}
		})
	}

	/// Calls a remote procedure and resolves with the RESULT arguments.
	pub fn call(
		&self,
		procedure: &str,
		arguments: Arguments,
	) -> BoxFuture<'static, Result<Arguments>> {
		tracing::debug!(target = "wamp.connection", procedure, "call");
		let response = self.request(|request| Message::Call {
			request,
			options: Dict::new(),
			procedure: procedure.to_string(),
			arguments,
		});
		Box::pin(async move {
			match response?.await? {
				Message::Result { arguments, .. } => Ok(arguments),
				other => Err(unexpected_reply(&other)),
			}
		})
	}

	/// Publishes without requesting an acknowledgement.
	pub fn publish(&self, topic: &str, arguments: Arguments) -> Result<()> {
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}
		let message = Message::Publish {
			request: self.next_request_id(),
			options: Dict::new(),
			topic: topic.to_string(),
			arguments,
		};
		self.outbound_tx.send(message).map_err(|_| Error::ConnectionClosed)
	}

	/// Says GOODBYE and waits (bounded by [`GOODBYE_TIMEOUT`]) for the router
	/// to answer, then stops all connection tasks. Idempotent.
	pub async fn close(&self) {
		if self.closing.swap(true, Ordering::SeqCst) {
			return;
		}
		let dispatch = self.dispatch.lock().take();
		let goodbye = Message::Goodbye {
			details: Dict::new(),
			reason: uri::CLOSE_SYSTEM_SHUTDOWN.to_string(),
		};
		let said_goodbye = !self.is_closed() && self.outbound_tx.send(goodbye).is_ok();
		if let Some(mut handle) = dispatch {
			if !said_goodbye {
				handle.abort();
			} else if tokio::time::timeout(GOODBYE_TIMEOUT, &mut handle).await.is_err() {
				tracing::debug!(target = "wamp.connection", session = self.session_id, "no GOODBYE reply; dropping session");
				handle.abort();
			}
		}
		self.writer.0.abort();
		tracing::info!(target = "wamp.connection", session = self.session_id, "session closed");
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		if let Some(handle) = self.dispatch.get_mut().take() {
			handle.abort();
		}
	}
}

/// Inbound side of an established session.
struct Dispatcher {
	pending: PendingMap,
	invocations: InvocationTable,
	outbound_tx: mpsc::UnboundedSender<Message>,
	events_tx: mpsc::UnboundedSender<SessionEvent>,
	ended: Arc<AtomicBool>,
	closing: Arc<AtomicBool>,
}

impl Dispatcher {
	async fn run(self, mut message_rx: mpsc::UnboundedReceiver<Value>) {
		let close = loop {
			let Some(value) = message_rx.recv().await else {
				break CloseDetails::transport_lost();
			};
			match Message::from_value(value) {
				Ok(message) => {
					if let Some(close) = self.dispatch(message) {
						break close;
					}
				}
				Err(e) => tracing::warn!(target = "wamp.connection", error = %e, "ignoring malformed frame"),
			}
		};

		self.ended.store(true, Ordering::SeqCst);
		let orphaned: Vec<_> = self.pending.lock().drain().collect();
		for (_, tx) in orphaned {
			let _ = tx.send(Err(Error::ConnectionClosed));
		}
		self.invocations.lock().clear();

		tracing::debug!(target = "wamp.connection", reason = %close.reason, "session ended");
		let _ = self.events_tx.send(SessionEvent::Closed(close));
	}

	/// Handles one inbound message; returns the close details if it ended
	/// the session.
	fn dispatch(&self, message: Message) -> Option<CloseDetails> {
		match message {
			Message::Event {
				subscription,
				details,
				arguments,
				..
			} => {
				let _ = self.events_tx.send(SessionEvent::Event {
					subscription,
					details,
					arguments,
				});
			}
			Message::Invocation {
				request,
				registration,
				details,
				arguments,
			} => {
				self.invocations.lock().insert(request);
				let responder = self.responder(request);
				let _ = self.events_tx.send(SessionEvent::Invocation {
					registration,
					details,
					arguments,
					responder,
				});
			}
			Message::Goodbye { details, reason } => {
				if !self.closing.load(Ordering::SeqCst) {
					let _ = self.outbound_tx.send(Message::Goodbye {
						details: Dict::new(),
						reason: uri::CLOSE_GOODBYE_AND_OUT.to_string(),
					});
				}
				return Some(CloseDetails::from_details(reason, &details));
			}
			Message::Abort { details, reason } => return Some(CloseDetails::from_details(reason, &details)),
			reply @ (Message::Subscribed { .. }
			| Message::Unsubscribed { .. }
			| Message::Registered { .. }
			| Message::Unregistered { .. }
			| Message::Published { .. }
			| Message::Result { .. }
			| Message::Error { .. }) => self.complete(reply),
			other => {
				tracing::warn!(target = "wamp.connection", kind = ?other.message_type(), "unexpected message after WELCOME");
			}
		}
		None
	}

	fn complete(&self, reply: Message) {
		let Some(request) = reply.request_id() else {
			return;
		};
		let Some(tx) = self.pending.lock().remove(&request) else {
			tracing::debug!(target = "wamp.connection", request, "reply for unknown request");
			return;
		};
		let result = match reply {
			Message::Error { error, arguments, .. } => Err(Error::Remote { error, arguments }),
			other => Ok(other),
		};
		let _ = tx.send(result);
	}

	fn responder(&self, request: Id) -> InvocationResponder {
		let invocations = Arc::clone(&self.invocations);
		let outbound_tx = self.outbound_tx.clone();
		InvocationResponder::new(request, move |reply| {
			if !invocations.lock().remove(&request) {
				return;
			}
			let message = match reply {
				InvocationReply::Yield(arguments) => Message::Yield {
					request,
					options: Dict::new(),
					arguments,
				},
				InvocationReply::Error { error, arguments } => Message::Error {
					request_type: MessageType::Invocation.code(),
					request,
					details: Dict::new(),
					error,
					arguments,
				},
			};
			let _ = outbound_tx.send(message);
		})
	}
}

fn hello(target: &Target) -> Message {
	let roles: Dict = CLIENT_ROLES
		.iter()
		.map(|role| (role.to_string(), Value::Object(Dict::new())))
		.collect();

	let mut details = Dict::new();
	details.insert("roles".into(), Value::Object(roles));
	details.insert("authmethods".into(), json!([uri::AUTH_METHOD_TICKET]));
	details.insert("authid".into(), Value::String(target.authid.clone()));

	Message::Hello {
		realm: target.realm.clone(),
		details,
	}
}

fn unexpected_reply(message: &Message) -> Error {
	Error::ProtocolError(format!("unexpected reply {:?}", message.message_type()))
}

#[cfg(test)]
mod tests;
