//! WAMP runtime - transport, client connection, and authentication
//!
//! This crate provides the low-level runtime infrastructure for talking to a
//! WAMP v2 router:
//!
//! - **Transport**: JSON frames over WebSocket (`wamp.2.json`) or an
//!   in-process channel pair
//! - **Connection**: opening handshake, request/response correlation, and
//!   inbound EVENT/INVOCATION dispatch
//! - **Session seam**: the [`Connector`] and [`Session`] traits the pool
//!   drives, with [`WebSocketConnector`] as the production implementation
//! - **Authentication**: ticket challenges answered by a [`TokenProvider`]
//! - **TLS**: [`TlsOptions`] for routers with private or self-signed
//!   certificates
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │  wamp-pool   │  Session managers, fan-out, reconnect
//! └──────┬───────┘
//!        │ Connector / Session
//! ┌──────▼───────┐
//! │ wamp-runtime │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  Handshake + request correlation
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  WebSocket / channel transport
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Auth   │  │  Ticket via HTTP login
//! │  └────────┘  │
//! └──────────────┘
//! ```

pub mod auth;
pub mod connection;
pub mod error;
pub mod session;
pub mod tls;
pub mod transport;

pub use auth::{AuthError, Authenticator, HttpTokenProvider, TicketAuthenticator, TokenProvider, login_url};
pub use connection::Connection;
pub use error::{Error, Result};
pub use session::{
	CloseDetails, Connector, InvocationReply, InvocationResponder, OpenedSession, Session, SessionEvent, Target,
	WebSocketConnector,
};
pub use tls::TlsOptions;
pub use transport::{
	ChannelPeer, ChannelTransport, Transport, TransportParts, TransportReceiver, WebSocketTransport,
	WebSocketTransportReceiver, WebSocketTransportSender,
};
