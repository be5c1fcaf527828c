//! Ticket authentication.
//!
//! WAMP routers challenge a client with the `ticket` method; the ticket is a
//! bearer token obtained out of band from an HTTP login endpoint.
//! [`TokenProvider`] is that out-of-band exchange and [`TicketAuthenticator`]
//! binds one to a principal so the connection can answer challenges.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use futures_util::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use wamp_protocol::{Dict, uri};

use crate::tls::TlsOptions;

/// Default timeout of a login request.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

const LOGIN_PATH: &str = "/api/auth/login";

/// Failure to obtain a ticket.
///
/// Carries the HTTP status when the login endpoint answered; network errors,
/// timeouts and malformed responses have none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AuthError {
	pub status: Option<u16>,
	pub message: String,
}

impl AuthError {
	pub fn with_status(status: u16, message: impl Into<String>) -> Self {
		Self {
			status: Some(status),
			message: message.into(),
		}
	}

	pub fn transient(message: impl Into<String>) -> Self {
		Self {
			status: None,
			message: message.into(),
		}
	}

	/// Credentials were rejected (HTTP 401 or 403); retrying cannot help.
	pub fn is_permanent(&self) -> bool {
		matches!(self.status, Some(401 | 403))
	}
}

/// Obtains bearer tokens.
pub trait TokenProvider: Send + Sync {
	fn fetch_token(&self, identity: &str, secret: &str, endpoint: &str) -> BoxFuture<'static, Result<String, AuthError>>;
}

/// Answers CHALLENGE messages.
pub trait Authenticator: Send + Sync {
	/// Produces the AUTHENTICATE signature for a challenge.
	fn authenticate(&self, method: &str, extra: &Dict) -> BoxFuture<'static, Result<String, AuthError>>;
}

/// Answers `ticket` challenges with a token from a [`TokenProvider`].
pub struct TicketAuthenticator {
	provider: Arc<dyn TokenProvider>,
	identity: String,
	secret: String,
	endpoint: String,
}

impl TicketAuthenticator {
	pub fn new(
		provider: Arc<dyn TokenProvider>,
		identity: impl Into<String>,
		secret: impl Into<String>,
		endpoint: impl Into<String>,
	) -> Self {
		Self {
			provider,
			identity: identity.into(),
			secret: secret.into(),
			endpoint: endpoint.into(),
		}
	}
}

impl fmt::Debug for TicketAuthenticator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TicketAuthenticator")
			.field("identity", &self.identity)
			.field("secret", &"<redacted>")
			.field("endpoint", &self.endpoint)
			.finish_non_exhaustive()
	}
}

impl Authenticator for TicketAuthenticator {
	fn authenticate(&self, method: &str, _extra: &Dict) -> BoxFuture<'static, Result<String, AuthError>> {
		if method != uri::AUTH_METHOD_TICKET {
			let err = AuthError::transient(format!("unsupported authentication method '{method}'"));
			return Box::pin(async move { Err(err) });
		}
		self.provider.fetch_token(&self.identity, &self.secret, &self.endpoint)
	}
}

/// Derives the login endpoint for a router address.
///
/// `wss://host[:port]/...` maps to `https://host:443/api/auth/login` and
/// `ws://host[:port]/...` to `http://host:80/api/auth/login`; the router's
/// own port and path are not used.
pub fn login_url(endpoint: &str) -> Result<Url, AuthError> {
	let parsed = Url::parse(endpoint.trim())
		.map_err(|e| AuthError::transient(format!("invalid endpoint '{endpoint}': {e}")))?;
	let (scheme, port) = match parsed.scheme() {
		"wss" => ("https", 443),
		"ws" => ("http", 80),
		other => return Err(AuthError::transient(format!("unsupported endpoint scheme '{other}'"))),
	};
	let host = parsed
		.host_str()
		.ok_or_else(|| AuthError::transient(format!("endpoint '{endpoint}' has no host")))?;
	Url::parse(&format!("{scheme}://{host}:{port}{LOGIN_PATH}"))
		.map_err(|e| AuthError::transient(format!("cannot build login URL: {e}")))
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
	access_token: Option<String>,
}

/// Token provider that logs in over HTTP with Basic credentials.
#[derive(Debug, Clone)]
pub struct HttpTokenProvider {
	client: reqwest::Client,
	login_url: Option<Url>,
	timeout: Duration,
}

impl Default for HttpTokenProvider {
	fn default() -> Self {
		Self::new()
	}
}

impl HttpTokenProvider {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::new(),
			login_url: None,
			timeout: DEFAULT_LOGIN_TIMEOUT,
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Uses a fixed login URL instead of deriving one from the endpoint.
	pub fn with_login_url(mut self, url: Url) -> Self {
		self.login_url = Some(url);
		self
	}

	/// Rebuilds the HTTP client to trust the same certificates as the
	/// WebSocket.
	pub fn with_tls(mut self, tls: &TlsOptions) -> crate::Result<Self> {
		if tls.is_default() {
			return Ok(self);
		}
		let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(tls.accept_invalid_certs);
		if !tls.accept_invalid_certs {
			for cert in tls.extra_roots()? {
				let cert = reqwest::Certificate::from_der(cert.as_ref())
					.map_err(|e| crate::Error::Tls(format!("unusable CA certificate: {e}")))?;
				builder = builder.add_root_certificate(cert);
			}
		}
		self.client = builder
			.build()
			.map_err(|e| crate::Error::Tls(format!("cannot build login client: {e}")))?;
		Ok(self)
	}
}

impl TokenProvider for HttpTokenProvider {
	fn fetch_token(&self, identity: &str, secret: &str, endpoint: &str) -> BoxFuture<'static, Result<String, AuthError>> {
		let url = match &self.login_url {
			Some(url) => Ok(url.clone()),
			None => login_url(endpoint),
		};
		let credentials = BASE64_STANDARD.encode(format!("{identity}:{secret}"));
		let client = self.client.clone();
		let timeout = self.timeout;

		Box::pin(async move {
			let url = url?;
			tracing::info!(target = "wamp.auth", %url, "requesting access token");

			let response = client
				.post(url)
				.header(AUTHORIZATION, format!("Basic {credentials}"))
				.header(ACCEPT, "application/json")
				.header(CONTENT_TYPE, "application/json")
				.timeout(timeout)
				.send()
				.await
				.map_err(|e| AuthError::transient(format!("login request failed: {e}")))?;

			let status = response.status();
			if !status.is_success() {
				return Err(AuthError::with_status(
					status.as_u16(),
					format!("login failed with HTTP status {}", status.as_u16()),
				));
			}

			let body: LoginResponse = response
				.json()
				.await
				.map_err(|e| AuthError::transient(format!("invalid login response: {e}")))?;
			match body.access_token {
				Some(token) if !token.is_empty() => {
					tracing::debug!(target = "wamp.auth", "access token received");
					Ok(token)
				}
				_ => Err(AuthError::transient("login response did not include access_token")),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn login_client_follows_tls_options() {
		assert!(HttpTokenProvider::new().with_tls(&TlsOptions::default()).is_ok());
		assert!(
			HttpTokenProvider::new()
				.with_tls(&TlsOptions::accept_invalid_certs())
				.is_ok()
		);
		let err = HttpTokenProvider::new()
			.with_tls(&TlsOptions::trust_ca_file("/nonexistent/device-ca.pem"))
			.unwrap_err();
		assert!(matches!(err, crate::Error::Tls(_)), "got {err:?}");
	}

	#[test]
	fn permanent_only_for_401_and_403() {
		assert!(AuthError::with_status(401, "x").is_permanent());
		assert!(AuthError::with_status(403, "x").is_permanent());
		assert!(!AuthError::with_status(500, "x").is_permanent());
		assert!(!AuthError::with_status(404, "x").is_permanent());
		assert!(!AuthError::transient("network down").is_permanent());
	}

	#[test]
	fn secure_endpoint_logs_in_over_https() {
		let url = login_url("wss://10.0.0.5:8086/wamp").unwrap();
		assert_eq!(url.scheme(), "https");
		assert_eq!(url.host_str(), Some("10.0.0.5"));
		assert_eq!(url.port_or_known_default(), Some(443));
		assert_eq!(url.path(), "/api/auth/login");
	}

	#[test]
	fn plain_endpoint_logs_in_over_http() {
		let url = login_url(" ws://router.local:8087 ").unwrap();
		assert_eq!(url.scheme(), "http");
		assert_eq!(url.host_str(), Some("router.local"));
		assert_eq!(url.port_or_known_default(), Some(80));
		assert_eq!(url.path(), "/api/auth/login");
	}

	#[test]
	fn rejects_non_websocket_endpoints() {
		assert!(login_url("http://router.local").is_err());
		assert!(login_url("not a url").is_err());
	}

	#[test]
	fn basic_credentials_encoding() {
		assert_eq!(BASE64_STANDARD.encode("admin:secret"), "YWRtaW46c2VjcmV0");
	}

	#[test]
	fn debug_redacts_secret() {
		let auth = TicketAuthenticator::new(Arc::new(HttpTokenProvider::new()), "admin", "hunter2", "ws://x");
		let rendered = format!("{auth:?}");
		assert!(rendered.contains("admin"));
		assert!(!rendered.contains("hunter2"));
	}

	#[tokio::test]
	async fn unsupported_challenge_method_is_transient() {
		let auth = TicketAuthenticator::new(Arc::new(HttpTokenProvider::new()), "admin", "s3cret", "ws://x");
		let err = auth.authenticate("wampcra", &Dict::new()).await.unwrap_err();
		assert_eq!(err.status, None);
	}
}
