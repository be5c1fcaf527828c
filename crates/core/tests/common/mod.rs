//! Scripted in-memory router, session, and token provider.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use wamp_pool::{Lifecycle, PoolConfig, PoolKey, SessionPool};
use wamp_protocol::{Arguments, Dict, Id};
use wamp_runtime::{
	AuthError, Authenticator, CloseDetails, Connector, Error, InvocationReply, InvocationResponder, OpenedSession,
	Result, Session, SessionEvent, Target, TokenProvider,
};

/// What the router does with the next connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
	/// Challenge with `ticket`, then welcome.
	Open,
	/// Fail at the transport level.
	Refused,
	/// Never answer.
	Hang,
	/// Abort the handshake.
	Abort { retry_delay: Option<Duration> },
}

type CallReply = std::result::Result<Arguments, (String, Arguments)>;

#[derive(Default)]
struct RouterState {
	outcomes: VecDeque<ConnectOutcome>,
	connects: Vec<Instant>,
	targets: Vec<Target>,
	sessions: Vec<Arc<MockSession>>,
	call_replies: HashMap<String, CallReply>,
	rejected_topics: HashSet<String>,
}

/// Connector double. Unscripted attempts open successfully.
#[derive(Default)]
pub struct MockRouter {
	state: Arc<Mutex<RouterState>>,
}

impl MockRouter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn scripted(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Arc<Self> {
		let router = Self::new();
		router.state.lock().outcomes.extend(outcomes);
		router
	}

	pub fn push_outcome(&self, outcome: ConnectOutcome) {
		self.state.lock().outcomes.push_back(outcome);
	}

	/// Scripted answer for every call of `procedure`.
	pub fn reply(&self, procedure: &str, reply: CallReply) {
		self.state.lock().call_replies.insert(procedure.to_string(), reply);
	}

	/// Refuse SUBSCRIBE requests for `topic`.
	pub fn reject_topic(&self, topic: &str) {
		self.state.lock().rejected_topics.insert(topic.to_string());
	}

	pub fn allow_topic(&self, topic: &str) {
		self.state.lock().rejected_topics.remove(topic);
	}

	pub fn connects(&self) -> usize {
		self.state.lock().connects.len()
	}

	pub fn connect_times(&self) -> Vec<Instant> {
		self.state.lock().connects.clone()
	}

	/// Gaps between consecutive connect attempts.
	pub fn connect_gaps(&self) -> Vec<Duration> {
		let times = self.connect_times();
		times.windows(2).map(|pair| pair[1] - pair[0]).collect()
	}

	pub fn targets(&self) -> Vec<Target> {
		self.state.lock().targets.clone()
	}

	pub fn sessions(&self) -> Vec<Arc<MockSession>> {
		self.state.lock().sessions.clone()
	}

	pub fn session(&self, index: usize) -> Arc<MockSession> {
		Arc::clone(&self.state.lock().sessions[index])
	}

	pub fn latest(&self) -> Arc<MockSession> {
		let state = self.state.lock();
		Arc::clone(state.sessions.last().expect("no session opened"))
	}
}

impl Connector for MockRouter {
	fn connect(&self, target: &Target, authenticator: Arc<dyn Authenticator>) -> BoxFuture<'static, Result<OpenedSession>> {
		let outcome = {
			let mut state = self.state.lock();
			state.connects.push(Instant::now());
			state.targets.push(target.clone());
			state.outcomes.pop_front().unwrap_or(ConnectOutcome::Open)
		};
		let state = Arc::clone(&self.state);
		Box::pin(async move {
			match outcome {
				ConnectOutcome::Refused => Err(Error::TransportError("connection refused".into())),
				ConnectOutcome::Hang => std::future::pending::<Result<OpenedSession>>().await,
				ConnectOutcome::Abort { retry_delay } => Err(Error::Aborted {
					reason: "wamp.close.system_shutdown".into(),
					message: None,
					retry_delay,
				}),
				ConnectOutcome::Open => {
					let ticket = match authenticator.authenticate("ticket", &Dict::new()).await {
						Ok(ticket) => ticket,
						Err(err) => return Err(Error::Auth(err)),
					};
					let (events, rx) = mpsc::unbounded_channel();
					let session = Arc::new(MockSession::new(ticket, events, Arc::clone(&state)));
					state.lock().sessions.push(Arc::clone(&session));
					Ok(OpenedSession { session, events: rx })
				}
			}
		})
	}
}

/// Operation a session was asked to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
	Subscribe(String),
	Unsubscribe(Id),
	Register(String),
	Call(String, Arguments),
	Publish(String, Arguments),
	Close,
}

/// Established session double recording every operation.
pub struct MockSession {
	pub ticket: String,
	router: Arc<Mutex<RouterState>>,
	events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
	ops: Mutex<Vec<Op>>,
	next_id: AtomicU64,
	subscriptions: Mutex<HashMap<String, Id>>,
	registrations: Mutex<HashMap<String, Id>>,
}

impl MockSession {
	fn new(ticket: String, events: mpsc::UnboundedSender<SessionEvent>, router: Arc<Mutex<RouterState>>) -> Self {
		Self {
			ticket,
			router,
			events: Mutex::new(Some(events)),
			ops: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(100),
			subscriptions: Mutex::new(HashMap::new()),
			registrations: Mutex::new(HashMap::new()),
		}
	}

	pub fn ops(&self) -> Vec<Op> {
		self.ops.lock().clone()
	}

	/// Occurrences of `op`.
	pub fn count(&self, op: &Op) -> usize {
		self.ops.lock().iter().filter(|seen| *seen == op).count()
	}

	pub fn subscription_id(&self, topic: &str) -> Id {
		self.subscriptions.lock()[topic]
	}

	pub fn registration_id(&self, procedure: &str) -> Id {
		self.registrations.lock()[procedure]
	}

	/// Delivers a publication on `topic`'s subscription.
	pub fn emit(&self, topic: &str, arguments: Arguments) {
		let subscription = self.subscription_id(topic);
		self.send(SessionEvent::Event {
			subscription,
			details: Dict::new(),
			arguments,
		});
	}

	/// Routes a call to a registration and returns the eventual reply.
	pub fn invoke(&self, registration: Id, arguments: Arguments) -> oneshot::Receiver<InvocationReply> {
		let (tx, rx) = oneshot::channel();
		let request = self.next_id.fetch_add(1, Ordering::SeqCst);
		let responder = InvocationResponder::new(request, move |reply| {
			let _ = tx.send(reply);
		});
		self.send(SessionEvent::Invocation {
			registration,
			details: Dict::new(),
			arguments,
			responder,
		});
		rx
	}

	/// Ends the session from the router side.
	pub fn drop_connection(&self, details: CloseDetails) {
		if let Some(events) = self.events.lock().take() {
			let _ = events.send(SessionEvent::Closed(details));
		}
	}

	pub fn is_closed(&self) -> bool {
		self.events.lock().is_none()
	}

	fn send(&self, event: SessionEvent) {
		if let Some(events) = self.events.lock().as_ref() {
			let _ = events.send(event);
		}
	}

	fn record(&self, op: Op) {
		self.ops.lock().push(op);
	}
}

impl Session for MockSession {
	fn subscribe(&self, topic: &str) -> BoxFuture<'static, Result<Id>> {
		self.record(Op::Subscribe(topic.to_string()));
		let result = if self.router.lock().rejected_topics.contains(topic) {
			Err(Error::Remote {
				error: "wamp.error.not_authorized".into(),
				arguments: Arguments::Empty,
			})
		} else {
			let id = self.next_id.fetch_add(1, Ordering::SeqCst);
			self.subscriptions.lock().insert(topic.to_string(), id);
			Ok(id)
		};
		Box::pin(async move { result })
	}

	fn unsubscribe(&self, subscription: Id) -> BoxFuture<'static, Result<()>> {
		self.record(Op::Unsubscribe(subscription));
		Box::pin(async { Ok(()) })
	}

	fn register(&self, procedure: &str) -> BoxFuture<'static, Result<Id>> {
		self.record(Op::Register(procedure.to_string()));
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		self.registrations.lock().insert(procedure.to_string(), id);
		Box::pin(async move { Ok(id) })
	}

	fn call(&self, procedure: &str, arguments: Arguments) -> BoxFuture<'static, Result<Arguments>> {
		self.record(Op::Call(procedure.to_string(), arguments.clone()));
		let scripted = self.router.lock().call_replies.get(procedure).cloned();
		let result = match scripted {
			Some(Ok(result)) => Ok(result),
			Some(Err((error, arguments))) => Err(Error::Remote { error, arguments }),
			// Echo.
			None => Ok(arguments),
		};
		Box::pin(async move { result })
	}

	fn publish(&self, topic: &str, arguments: Arguments) -> Result<()> {
		self.record(Op::Publish(topic.to_string(), arguments));
		Ok(())
	}

	fn close(&self) -> BoxFuture<'_, ()> {
		self.record(Op::Close);
		self.events.lock().take();
		Box::pin(async {})
	}
}

/// Token provider double. Unscripted requests get `"token"`.
#[derive(Default)]
pub struct StaticTokens {
	results: Mutex<VecDeque<std::result::Result<String, AuthError>>>,
	requests: Mutex<Vec<(String, String, String)>>,
}

impl StaticTokens {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn scripted(results: impl IntoIterator<Item = std::result::Result<String, AuthError>>) -> Arc<Self> {
		let tokens = Self::new();
		tokens.results.lock().extend(results);
		tokens
	}

	/// `(identity, secret, endpoint)` of every request.
	pub fn requests(&self) -> Vec<(String, String, String)> {
		self.requests.lock().clone()
	}
}

impl TokenProvider for StaticTokens {
	fn fetch_token(
		&self,
		identity: &str,
		secret: &str,
		endpoint: &str,
	) -> BoxFuture<'static, std::result::Result<String, AuthError>> {
		self.requests
			.lock()
			.push((identity.to_string(), secret.to_string(), endpoint.to_string()));
		let result = self
			.results
			.lock()
			.pop_front()
			.unwrap_or_else(|| Ok("token".to_string()));
		Box::pin(async move { result })
	}
}

pub fn key() -> PoolKey {
	PoolKey::new("ws://router.test:8087", "realm1", "admin", "secret")
}

pub fn pool(router: &Arc<MockRouter>, tokens: &Arc<StaticTokens>) -> SessionPool {
	SessionPool::new(PoolConfig::default(), router.clone(), tokens.clone())
}

/// Lets spawned tasks run until idle. Advances paused time by 1ms.
pub async fn settle() {
	tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn drain(rx: &mut broadcast::Receiver<Lifecycle>) -> Vec<Lifecycle> {
	let mut events = Vec::new();
	while let Ok(event) = rx.try_recv() {
		events.push(event);
	}
	events
}

pub fn goodbye(retry_delay: Option<Duration>) -> CloseDetails {
	CloseDetails {
		reason: "wamp.close.system_shutdown".into(),
		message: None,
		retry_delay,
	}
}
