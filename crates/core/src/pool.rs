//! Registry of session managers keyed by [`PoolKey`].
//!
//! At most one manager exists per key. Consumers either hold a plain
//! [`SessionManager`] from [`SessionPool::get`] or a counted
//! [`SessionLease`] from [`SessionPool::acquire`]; the manager is torn down
//! when the last lease is released or when anyone calls
//! [`SessionPool::close`].

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info};
use wamp_runtime::{Connector, HttpTokenProvider, TokenProvider, WebSocketConnector};

use crate::config::PoolConfig;
use crate::key::PoolKey;
use crate::manager::SessionManager;

struct Entry {
	manager: SessionManager,
	holders: usize,
	/// Identifies the entry across manager replacement; leases from a
	/// removed entry must not touch a newer one.
	lineage: u64,
}

struct PoolInner {
	config: PoolConfig,
	connector: Arc<dyn Connector>,
	tokens: Arc<dyn TokenProvider>,
	next_lineage: AtomicU64,
	entries: Mutex<HashMap<PoolKey, Entry>>,
}

/// Shared registry of pooled sessions. Clones share the same registry.
#[derive(Clone)]
pub struct SessionPool {
	inner: Arc<PoolInner>,
}

impl SessionPool {
	pub fn new(config: PoolConfig, connector: Arc<dyn Connector>, tokens: Arc<dyn TokenProvider>) -> Self {
		Self {
			inner: Arc::new(PoolInner {
				config,
				connector,
				tokens,
				next_lineage: AtomicU64::new(1),
				entries: Mutex::new(HashMap::new()),
			}),
		}
	}

	/// Pool over real WebSocket sessions with tickets from the HTTP login.
	///
	/// Fails only when `config.tls` names a CA file that cannot be loaded.
	pub fn websocket(config: PoolConfig) -> wamp_runtime::Result<Self> {
		let connector = WebSocketConnector::with_tls(&config.tls)?;
		let tokens = HttpTokenProvider::new().with_tls(&config.tls)?;
		Ok(Self::new(config, Arc::new(connector), Arc::new(tokens)))
	}

	pub fn config(&self) -> &PoolConfig {
		&self.inner.config
	}

	/// Returns the manager for `key`, creating it (and starting its first
	/// connection attempt) if absent.
	///
	/// A manager whose credentials were rejected is replaced by a fresh one,
	/// which is how auth-failed keys get another chance.
	pub fn get(&self, key: &PoolKey) -> SessionManager {
		self.checkout(key, false).0
	}

	/// Like [`get`](Self::get), but counts the caller as a holder until the
	/// returned lease is released.
	pub fn acquire(&self, key: &PoolKey) -> SessionLease {
		let (manager, lineage) = self.checkout(key, true);
		SessionLease {
			pool: self.clone(),
			key: key.clone(),
			lineage,
			manager,
			released: false,
		}
	}

	fn checkout(&self, key: &PoolKey, hold: bool) -> (SessionManager, u64) {
		let mut stale = None;
		let checked_out = {
			let mut entries = self.inner.entries.lock();
			let entry = entries.entry(key.clone()).or_insert_with(|| {
				debug!(target = "wamp.pool", %key, "creating session manager");
				Entry {
					manager: self.spawn(key),
					holders: 0,
					lineage: self.inner.next_lineage.fetch_add(1, Ordering::Relaxed),
				}
			});
			if entry.manager.is_stale() {
				info!(target = "wamp.pool", %key, "replacing stale session manager");
				let fresh = self.spawn(key);
				stale = Some(std::mem::replace(&mut entry.manager, fresh));
			}
			if hold {
				entry.holders += 1;
			}
			(entry.manager.clone(), entry.lineage)
		};
		if let Some(stale) = stale {
			stale.request_close();
		}
		checked_out
	}

	fn spawn(&self, key: &PoolKey) -> SessionManager {
		SessionManager::spawn(
			key.clone(),
			&self.inner.config,
			Arc::clone(&self.inner.connector),
			Arc::clone(&self.inner.tokens),
		)
	}

	/// Force-closes the manager for `key` regardless of other holders and
	/// waits for teardown. Resolves immediately when `key` is absent.
	pub async fn close(&self, key: &PoolKey) {
		let removed = self.inner.entries.lock().remove(key);
		if let Some(entry) = removed {
			info!(target = "wamp.pool", %key, holders = entry.holders, "closing session manager");
			entry.manager.close().await;
		}
	}

	/// Closes every manager and empties the pool.
	pub async fn shutdown(&self) {
		let managers: Vec<SessionManager> = self
			.inner
			.entries
			.lock()
			.drain()
			.map(|(_, entry)| entry.manager)
			.collect();
		info!(target = "wamp.pool", count = managers.len(), "shutting down");
		join_all(managers.iter().map(SessionManager::close)).await;
	}

	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.entries.lock().is_empty()
	}

	pub fn contains(&self, key: &PoolKey) -> bool {
		self.inner.entries.lock().contains_key(key)
	}

	/// Outstanding leases for `key`.
	pub fn holders(&self, key: &PoolKey) -> usize {
		self.inner
			.entries
			.lock()
			.get(key)
			.map_or(0, |entry| entry.holders)
	}

	/// Drops one hold; returns the manager to tear down when it was the last.
	fn release(&self, key: &PoolKey, lineage: u64) -> Option<SessionManager> {
		let mut entries = self.inner.entries.lock();
		let entry = entries.get_mut(key)?;
		if entry.lineage != lineage {
			return None;
		}
		entry.holders = entry.holders.saturating_sub(1);
		if entry.holders > 0 {
			return None;
		}
		debug!(target = "wamp.pool", %key, "last lease released");
		entries.remove(key).map(|entry| entry.manager)
	}
}

impl fmt::Debug for SessionPool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionPool")
			.field("config", &self.inner.config)
			.field("sessions", &self.len())
			.finish_non_exhaustive()
	}
}

/// Counted hold on a pooled session manager.
///
/// Dereferences to the [`SessionManager`]. Dropping the lease releases it;
/// use [`release`](Self::release) to also wait for any resulting teardown.
pub struct SessionLease {
	pool: SessionPool,
	key: PoolKey,
	lineage: u64,
	manager: SessionManager,
	released: bool,
}

impl SessionLease {
	pub fn manager(&self) -> &SessionManager {
		&self.manager
	}

	/// Releases the hold, closing the manager if this was the last one.
	pub async fn release(mut self) {
		self.released = true;
		if let Some(manager) = self.pool.release(&self.key, self.lineage) {
			manager.close().await;
		}
	}
}

impl Deref for SessionLease {
	type Target = SessionManager;

	fn deref(&self) -> &SessionManager {
		&self.manager
	}
}

impl Drop for SessionLease {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		if let Some(manager) = self.pool.release(&self.key, self.lineage) {
			manager.request_close();
		}
	}
}

impl fmt::Debug for SessionLease {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionLease")
			.field("key", &self.key)
			.field("released", &self.released)
			.finish()
	}
}
