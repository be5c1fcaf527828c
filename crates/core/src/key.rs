use std::fmt;

use wamp_runtime::Target;

/// Identity of a pooled session: endpoint, realm, principal, and secret.
///
/// Two consumers with equal keys share one session manager. The secret takes
/// part in equality but is never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
	endpoint: String,
	realm: String,
	authid: String,
	secret: String,
}

impl PoolKey {
	pub fn new(
		endpoint: impl Into<String>,
		realm: impl Into<String>,
		authid: impl Into<String>,
		secret: impl Into<String>,
	) -> Self {
		Self {
			endpoint: endpoint.into(),
			realm: realm.into(),
			authid: authid.into(),
			secret: secret.into(),
		}
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	pub fn realm(&self) -> &str {
		&self.realm
	}

	pub fn authid(&self) -> &str {
		&self.authid
	}

	pub fn secret(&self) -> &str {
		&self.secret
	}

	/// Connection target for this key (everything but the secret).
	pub fn target(&self) -> Target {
		Target {
			endpoint: self.endpoint.clone(),
			realm: self.realm.clone(),
			authid: self.authid.clone(),
		}
	}
}

impl fmt::Debug for PoolKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PoolKey")
			.field("endpoint", &self.endpoint)
			.field("realm", &self.realm)
			.field("authid", &self.authid)
			.field("secret", &"<redacted>")
			.finish()
	}
}

impl fmt::Display for PoolKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{} [{}]", self.authid, self.endpoint, self.realm)
	}
}
