use serde_json::json;

use super::*;
use crate::auth::AuthError;
use crate::transport::{ChannelPeer, ChannelTransport};

struct StaticAuth(std::result::Result<String, AuthError>);

impl Authenticator for StaticAuth {
	fn authenticate(&self, _method: &str, _extra: &Dict) -> BoxFuture<'static, std::result::Result<String, AuthError>> {
		let result = self.0.clone();
		Box::pin(async move { result })
	}
}

fn target() -> Target {
	Target {
		endpoint: "ws://router.test:8087".into(),
		realm: "realm1".into(),
		authid: "operator".into(),
	}
}

fn dict(value: Value) -> Dict {
	match value {
		Value::Object(map) => map,
		other => panic!("expected object, got {other}"),
	}
}

type Opening = JoinHandle<Result<(Arc<Connection>, mpsc::UnboundedReceiver<SessionEvent>)>>;

fn start_open(auth: StaticAuth) -> (Opening, ChannelPeer) {
	let (parts, peer) = ChannelTransport::pair();
	let open = tokio::spawn(async move { Connection::open(parts, &target(), &auth).await });
	(open, peer)
}

async fn establish() -> (Arc<Connection>, mpsc::UnboundedReceiver<SessionEvent>, ChannelPeer) {
	let (open, mut peer) = start_open(StaticAuth(Ok("token".into())));
	assert!(matches!(peer.recv().await, Some(Message::Hello { .. })));
	peer.send(Message::Welcome {
		session: 42,
		details: Dict::new(),
	});
	let (connection, events) = open.await.unwrap().unwrap();
	(connection, events, peer)
}

#[tokio::test]
async fn test_hello_announces_ticket_auth() {
	let (_open, mut peer) = start_open(StaticAuth(Ok("token".into())));

	let Some(Message::Hello { realm, details }) = peer.recv().await else {
		panic!("expected HELLO");
	};
	assert_eq!(realm, "realm1");
	assert_eq!(details["authid"], "operator");
	assert_eq!(details["authmethods"], json!(["ticket"]));
	let roles = details["roles"].as_object().unwrap();
	for role in ["caller", "callee", "publisher", "subscriber"] {
		assert!(roles.contains_key(role), "missing role {role}");
	}
}

#[tokio::test]
async fn test_challenge_answered_with_token() {
	let (open, mut peer) = start_open(StaticAuth(Ok("bearer-123".into())));
	peer.recv().await.unwrap();

	peer.send(Message::Challenge {
		auth_method: "ticket".into(),
		extra: Dict::new(),
	});
	assert_eq!(
		peer.recv().await,
		Some(Message::Authenticate {
			signature: "bearer-123".into(),
			extra: Dict::new(),
		})
	);

	peer.send(Message::Welcome {
		session: 9129137332,
		details: Dict::new(),
	});
	let (connection, _events) = open.await.unwrap().unwrap();
	assert_eq!(connection.session_id(), 9129137332);
	assert_eq!(connection.realm(), "realm1");
}

#[tokio::test]
async fn test_rejected_ticket_aborts_handshake() {
	let (open, mut peer) = start_open(StaticAuth(Err(AuthError::with_status(401, "unauthorized"))));
	peer.recv().await.unwrap();

	peer.send(Message::Challenge {
		auth_method: "ticket".into(),
		extra: Dict::new(),
	});
	assert_eq!(
		peer.recv().await,
		Some(Message::Abort {
			details: Dict::new(),
			reason: uri::ERROR_AUTHENTICATION_FAILED.into(),
		})
	);

	let err = open.await.unwrap().unwrap_err();
	let auth = err.auth_error().expect("auth error");
	assert!(auth.is_permanent());
}

#[tokio::test]
async fn test_router_abort_carries_retry_delay() {
	let (open, mut peer) = start_open(StaticAuth(Ok("token".into())));
	peer.recv().await.unwrap();

	peer.send(Message::Abort {
		details: dict(json!({"message": "busy", "retry_delay": 3})),
		reason: "wamp.error.system_shutdown".into(),
	});

	let err = open.await.unwrap().unwrap_err();
	assert_eq!(err.retry_delay(), Some(Duration::from_secs(3)));
	assert!(err.to_string().contains("busy"));
}

#[tokio::test]
async fn test_transport_closed_during_handshake() {
	let (open, mut peer) = start_open(StaticAuth(Ok("token".into())));
	peer.recv().await.unwrap();
	peer.disconnect();

	let err = open.await.unwrap().unwrap_err();
	assert!(err.is_closed(), "got {err:?}");
}

#[tokio::test]
async fn test_subscribe_correlates_reply() {
	let (connection, _events, mut peer) = establish().await;

	let subscribed = connection.subscribe("a.b.c");
	let Some(Message::Subscribe { request, topic, .. }) = peer.recv().await else {
		panic!("expected SUBSCRIBE");
	};
	assert_eq!(topic, "a.b.c");

	peer.send(Message::Subscribed {
		request,
		subscription: 77,
	});
	assert_eq!(subscribed.await.unwrap(), 77);
}

#[tokio::test]
async fn test_request_ids_increase() {
	let (connection, _events, mut peer) = establish().await;

	let _first = connection.register("com.example.one");
	let _second = connection.register("com.example.two");
	let first = peer.recv().await.unwrap().request_id().unwrap();
	let second = peer.recv().await.unwrap().request_id().unwrap();
	assert_eq!(first, 1);
	assert_eq!(second, 2);
}

#[tokio::test]
async fn test_call_result_and_error() {
	let (connection, _events, mut peer) = establish().await;

	let ok = connection.call("com.example.add", Arguments::Positional(vec![json!(1), json!(2)]));
	let Some(Message::Call {
		request, arguments, ..
	}) = peer.recv().await
	else {
		panic!("expected CALL");
	};
	assert_eq!(arguments.positional(), &[json!(1), json!(2)]);
	peer.send(Message::Result {
		request,
		details: Dict::new(),
		arguments: Arguments::Positional(vec![json!(3)]),
	});
	assert_eq!(ok.await.unwrap(), Arguments::Positional(vec![json!(3)]));

	let failing = connection.call("com.example.busy", Arguments::Empty);
	let request = peer.recv().await.unwrap().request_id().unwrap();
	peer.send(Message::Error {
		request_type: MessageType::Call.code(),
		request,
		details: Dict::new(),
		error: "com.example.error.busy".into(),
		arguments: Arguments::Positional(vec![json!("line busy")]),
	});
	let err = failing.await.unwrap_err();
	assert_eq!(err.error_uri(), Some("com.example.error.busy"));
	assert_eq!(err.remote_message(), Some("line busy"));
}

#[tokio::test]
async fn test_dropped_request_is_forgotten() {
	let (connection, _events, mut peer) = establish().await;

	drop(connection.subscribe("a.b.c"));
	let request = peer.recv().await.unwrap().request_id().unwrap();
	assert!(connection.pending.lock().is_empty());

	// A late reply for the abandoned request is ignored.
	peer.send(Message::Subscribed {
		request,
		subscription: 1,
	});
	let again = connection.subscribe("a.b.c");
	let request = peer.recv().await.unwrap().request_id().unwrap();
	peer.send(Message::Subscribed {
		request,
		subscription: 2,
	});
	assert_eq!(again.await.unwrap(), 2);
}

#[tokio::test]
async fn test_publish_is_fire_and_forget() {
	let (connection, _events, mut peer) = establish().await;

	connection
		.publish("a.b.c", Arguments::Named(dict(json!({"x": 1}))))
		.unwrap();
	let Some(Message::Publish {
		topic,
		options,
		arguments,
		..
	}) = peer.recv().await
	else {
		panic!("expected PUBLISH");
	};
	assert_eq!(topic, "a.b.c");
	assert!(options.is_empty());
	assert_eq!(arguments.named().unwrap()["x"], 1);
}

#[tokio::test]
async fn test_event_is_forwarded() {
	let (_connection, mut events, peer) = establish().await;

	peer.send(Message::Event {
		subscription: 77,
		publication: 1,
		details: dict(json!({"topic": "a.b.c"})),
		arguments: Arguments::Named(dict(json!({"x": 1}))),
	});
	let Some(SessionEvent::Event {
		subscription,
		details,
		arguments,
	}) = events.recv().await
	else {
		panic!("expected event");
	};
	assert_eq!(subscription, 77);
	assert_eq!(details["topic"], "a.b.c");
	assert_eq!(arguments.named().unwrap()["x"], 1);
}

#[tokio::test]
async fn test_invocation_answered_once() {
	let (_connection, mut events, mut peer) = establish().await;

	peer.send(Message::Invocation {
		request: 9,
		registration: 5,
		details: Dict::new(),
		arguments: Arguments::Positional(vec![json!("ping")]),
	});
	let Some(SessionEvent::Invocation {
		registration,
		responder,
		..
	}) = events.recv().await
	else {
		panic!("expected invocation");
	};
	assert_eq!(registration, 5);
	responder.respond(Arguments::Positional(vec![json!("pong")]));

	assert_eq!(
		peer.recv().await,
		Some(Message::Yield {
			request: 9,
			options: Dict::new(),
			arguments: Arguments::Positional(vec![json!("pong")]),
		})
	);
}

#[tokio::test]
async fn test_unanswered_invocation_replies_with_error() {
	let (_connection, mut events, mut peer) = establish().await;

	peer.send(Message::Invocation {
		request: 11,
		registration: 5,
		details: Dict::new(),
		arguments: Arguments::Empty,
	});
	let event = events.recv().await.unwrap();
	drop(event);

	let Some(Message::Error {
		request_type,
		request,
		error,
		..
	}) = peer.recv().await
	else {
		panic!("expected ERROR");
	};
	assert_eq!(request_type, MessageType::Invocation.code());
	assert_eq!(request, 11);
	assert_eq!(error, uri::ERROR_CANCELED);
}

#[tokio::test]
async fn test_router_goodbye_is_answered() {
	let (connection, mut events, mut peer) = establish().await;
	let pending = connection.call("com.example.slow", Arguments::Empty);
	peer.recv().await.unwrap();

	peer.send(Message::Goodbye {
		details: dict(json!({"retry_delay": 1})),
		reason: uri::CLOSE_SYSTEM_SHUTDOWN.into(),
	});

	assert_eq!(
		peer.recv().await,
		Some(Message::Goodbye {
			details: Dict::new(),
			reason: uri::CLOSE_GOODBYE_AND_OUT.into(),
		})
	);
	let Some(SessionEvent::Closed(close)) = events.recv().await else {
		panic!("expected close");
	};
	assert_eq!(close.reason, uri::CLOSE_SYSTEM_SHUTDOWN);
	assert_eq!(close.retry_delay, Some(Duration::from_secs(1)));
	assert!(pending.await.unwrap_err().is_closed());
	assert!(connection.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_transport_loss_fails_everything() {
	let (connection, mut events, mut peer) = establish().await;

	peer.send(Message::Invocation {
		request: 3,
		registration: 5,
		details: Dict::new(),
		arguments: Arguments::Empty,
	});
	let Some(SessionEvent::Invocation { responder, .. }) = events.recv().await else {
		panic!("expected invocation");
	};

	let pending = connection.subscribe("a.b.c");
	peer.recv().await.unwrap();
	peer.disconnect();

	assert!(pending.await.unwrap_err().is_closed());
	assert!(matches!(events.recv().await, Some(SessionEvent::Closed(close)) if close == CloseDetails::transport_lost()));
	assert!(connection.subscribe("x").await.unwrap_err().is_closed());
	assert!(connection.publish("x", Arguments::Empty).unwrap_err().is_closed());

	// Answering after the session ended sends nothing.
	responder.respond(Arguments::Empty);
	assert!(tokio::time::timeout(Duration::from_millis(100), peer.recv_value()).await.is_err());
}

#[tokio::test]
async fn test_close_says_goodbye() {
	let (connection, mut events, mut peer) = establish().await;

	let closing = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.close().await }
	});
	assert_eq!(
		peer.recv().await,
		Some(Message::Goodbye {
			details: Dict::new(),
			reason: uri::CLOSE_SYSTEM_SHUTDOWN.into(),
		})
	);
	peer.send(Message::Goodbye {
		details: Dict::new(),
		reason: uri::CLOSE_GOODBYE_AND_OUT.into(),
	});
	closing.await.unwrap();

	assert!(matches!(events.recv().await, Some(SessionEvent::Closed(_))));
	// No reply to the router's GOODBYE when we initiated; the transport is closed.
	assert!(peer.recv_value().await.is_none());

	// Second close is a no-op.
	connection.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_close_without_reply_times_out() {
	let (connection, _events, mut peer) = establish().await;

	let started = tokio::time::Instant::now();
	let closing = tokio::spawn({
		let connection = Arc::clone(&connection);
		async move { connection.close().await }
	});
	assert!(matches!(peer.recv().await, Some(Message::Goodbye { .. })));
	closing.await.unwrap();
	assert!(started.elapsed() >= GOODBYE_TIMEOUT);
}
