//! Transports that carry WAMP frames as JSON values.
//!
//! A transport is split into a sending half ([`Transport`]) and a receiving
//! half ([`TransportReceiver`]) whose `run` loop pushes every decoded frame
//! into an unbounded channel. The connection layer owns both halves through
//! [`TransportParts`]; when the receive loop ends the channel closes, which is
//! how the connection learns that the peer went away.
//!
//! - [`WebSocketTransport`] speaks `wamp.2.json` over a WebSocket
//! - [`ChannelTransport`] is an in-process pair used to drive a connection
//!   from a scripted peer

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{Connector, WebSocketStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use wamp_protocol::{Message, uri};

use crate::error::{Error, Result};

/// Sending half of a transport.
pub trait Transport: Send {
	/// Serializes and sends one frame.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;

	/// Closes the outbound direction.
	fn close(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the peer closes or an error occurs.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Both halves of a transport plus the channel its receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// WebSocket transport negotiating the JSON WAMP subprotocol.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Opens a WebSocket to `endpoint` (`ws://` or `wss://`).
	pub async fn connect(endpoint: &str) -> Result<TransportParts> {
		Self::connect_with_tls(endpoint, None).await
	}

	/// Like [`connect`](Self::connect), with a custom rustls configuration
	/// for `wss://` endpoints.
	pub async fn connect_with_tls(endpoint: &str, tls: Option<Arc<rustls::ClientConfig>>) -> Result<TransportParts> {
		let mut request = endpoint.into_client_request().map_err(|e| Error::InvalidEndpoint {
			endpoint: endpoint.to_string(),
			reason: e.to_string(),
		})?;
		request
			.headers_mut()
			.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(uri::SUBPROTOCOL_JSON));

		tracing::debug!(target = "wamp.transport", endpoint, "opening websocket");
		let connector = tls.map(Connector::Rustls);
		let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
			.await
			.map_err(|e| Error::TransportError(format!("WebSocket connect to {endpoint} failed: {e}")))?;

		Ok(Self::from_stream(stream))
	}

	/// Wraps an already established WebSocket.
	pub fn from_stream<S>(stream: WebSocketStream<S>) -> TransportParts
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { stream, message_tx }),
			message_rx,
		}
	}
}

/// Sending half of [`WebSocketTransport`].
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> Transport for WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text.into()))
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { self.sink.close().await.map_err(|e| Error::TransportError(e.to_string())) })
	}
}

/// Receiving half of [`WebSocketTransport`].
pub struct WebSocketTransportReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let Self { mut stream, message_tx } = *self;
		Box::pin(async move {
			while let Some(frame) = stream.next().await {
				match frame.map_err(|e| Error::TransportError(e.to_string()))? {
					WsMessage::Text(text) => match serde_json::from_str::<Value>(&text) {
						Ok(value) => {
							if message_tx.send(value).is_err() {
								break;
							}
						}
						Err(e) => tracing::warn!(target = "wamp.transport", error = %e, "dropping non-JSON frame"),
					},
					WsMessage::Binary(_) => {
						tracing::warn!(target = "wamp.transport", "ignoring binary frame on JSON subprotocol")
					}
					WsMessage::Close(frame) => {
						tracing::debug!(target = "wamp.transport", ?frame, "websocket closed by peer");
						break;
					}
					_ => {}
				}
			}
			Ok(())
		})
	}
}

/// In-process transport backed by channels.
///
/// [`ChannelTransport::pair`] returns the client-side [`TransportParts`] and a
/// [`ChannelPeer`] that plays the router: it sees every frame the client sends
/// and can inject frames of its own.
pub struct ChannelTransport;

impl ChannelTransport {
	pub fn pair() -> (TransportParts, ChannelPeer) {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(ChannelTransportSender { tx: Some(outbound_tx) }),
			receiver: Box::new(ChannelTransportReceiver {
				rx: inbound_rx,
				message_tx,
			}),
			message_rx,
		};
		let peer = ChannelPeer {
			sent: outbound_rx,
			inbound: Some(inbound_tx),
		};
		(parts, peer)
	}
}

struct ChannelTransportSender {
	tx: Option<mpsc::UnboundedSender<Value>>,
}

impl Transport for ChannelTransportSender {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		let result = match &self.tx {
			Some(tx) => tx.send(message).map_err(|_| Error::ConnectionClosed),
			None => Err(Error::ConnectionClosed),
		};
		Box::pin(async move { result })
	}

	fn close(&mut self) -> BoxFuture<'_, Result<()>> {
		self.tx = None;
		Box::pin(async { Ok(()) })
	}
}

struct ChannelTransportReceiver {
	rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for ChannelTransportReceiver {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let Self { mut rx, message_tx } = *self;
		Box::pin(async move {
			while let Some(value) = rx.recv().await {
				if message_tx.send(value).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// Router side of a [`ChannelTransport`].
pub struct ChannelPeer {
	sent: mpsc::UnboundedReceiver<Value>,
	inbound: Option<mpsc::UnboundedSender<Value>>,
}

impl ChannelPeer {
	/// Next raw frame sent by the client, or `None` once it closed.
	pub async fn recv_value(&mut self) -> Option<Value> {
		self.sent.recv().await
	}

	/// Next frame sent by the client, decoded.
	pub async fn recv(&mut self) -> Option<Message> {
		let value = self.sent.recv().await?;
		Message::from_value(value).ok()
	}

	/// Delivers a frame to the client.
	pub fn send(&self, message: Message) {
		self.send_value(message.to_value());
	}

	pub fn send_value(&self, value: Value) {
		if let Some(tx) = &self.inbound {
			let _ = tx.send(value);
		}
	}

	/// Simulates the connection dropping from the router side.
	pub fn disconnect(&mut self) {
		self.inbound = None;
	}
}
