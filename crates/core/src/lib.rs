//! wamp-pool: pooled, auto-reconnecting WAMP sessions
//!
//! Many local consumers share one authenticated session per
//! (endpoint, realm, authid, secret) key. Each session is owned by a
//! [`SessionManager`] that reconnects with backoff, re-authenticates through a
//! ticket challenge, and restores every requested subscription and
//! registration after a reconnect.
//!
//! # Example
//!
//! ```ignore
//! use wamp_pool::{PoolConfig, PoolKey, SessionPool};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = SessionPool::websocket(PoolConfig::default())?;
//!     let key = PoolKey::new("wss://10.0.0.5:8086", "realm1", "admin", "secret");
//!
//!     let session = pool.acquire(&key);
//!     let _events = session.subscribe("com.example.call", |event| {
//!         println!("{:?} {:?}", event.args(), event.kwargs());
//!         Ok(())
//!     });
//!
//!     match session.call_procedure("com.example.system.device_accounts", None).await {
//!         Ok(result) => println!("{:?}", result.args),
//!         Err(err) => eprintln!("{err}"),
//!     }
//!
//!     session.release().await;
//!     Ok(())
//! }
//! ```
//!
//! # Sharing
//!
//! Two consumers with equal [`PoolKey`]s get the same manager. Handlers on one
//! topic share one remote subscription and run in registration order. A
//! [`SessionLease`] counts its holder; the manager goes when the last lease
//! is released or when [`SessionPool::close`] force-closes it.

pub mod config;
pub mod error;
pub mod handlers;
pub mod key;
pub mod lifecycle;
pub mod manager;
pub mod pool;
pub mod timer;

pub use config::{BackoffPolicy, PoolConfig};
pub use error::{CallError, HandlerError};
pub use handlers::{CallResult, EventArgs, HandlerId, Invocation, SubscriptionHandle};
pub use key::PoolKey;
pub use lifecycle::{ConnectionState, Lifecycle};
pub use manager::{BindingState, BindingsSnapshot, SessionManager, TopicState};
pub use pool::{SessionLease, SessionPool};
pub use wamp_protocol::{Arguments, Dict};
pub use wamp_runtime::{AuthError, Connector, HttpTokenProvider, TlsOptions, TokenProvider, WebSocketConnector};
