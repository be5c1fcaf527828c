//! Wire types for the WAMP v2 protocol (JSON serialization).
//!
//! This crate holds everything the client must produce or consume on the wire
//! and nothing else:
//!
//! - [`Message`] - the client-relevant WAMP message set with array codec
//! - [`Arguments`] - positional/named argument payloads as a tagged variant
//! - [`uri`] - well-known close reasons and error URIs

pub mod arguments;
pub mod message;
pub mod uri;

pub use arguments::{Arguments, Dict};
pub use message::{DecodeError, Id, Message, MessageType};
