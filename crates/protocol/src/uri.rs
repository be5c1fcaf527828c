//! Well-known WAMP URIs used by the client.

/// Reply to a router-initiated GOODBYE.
pub const CLOSE_GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
/// Client-side shutdown of a session.
pub const CLOSE_SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";

/// Authentication was rejected (by the router or while fetching a ticket).
pub const ERROR_AUTHENTICATION_FAILED: &str = "wamp.error.authentication_failed";
/// Invocation for a registration the callee no longer serves.
pub const ERROR_NO_SUCH_PROCEDURE: &str = "wamp.error.no_such_procedure";
/// Invocation was dropped without a response.
pub const ERROR_CANCELED: &str = "wamp.error.canceled";

/// Authentication method used for bearer-token challenges.
pub const AUTH_METHOD_TICKET: &str = "ticket";

/// WebSocket subprotocol for JSON-serialized WAMP v2.
pub const SUBPROTOCOL_JSON: &str = "wamp.2.json";
