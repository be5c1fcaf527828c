//! Lifecycle notifications for session managers.
//!
//! Observers get discrete [`Lifecycle`] events over a broadcast channel and
//! the current [`ConnectionState`] over a watch channel. The notifier
//! collapses repeated `Closed` events, so a run of failed attempts produces a
//! single `Closed`, and once sealed by a final close it emits nothing more.

use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// Connection state of a session manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
	#[default]
	Disconnected,
	Connecting,
	Connected,
	/// Explicitly closed; terminal.
	Closing,
	/// Credentials were rejected; terminal until the pool recreates the manager.
	AuthFailed,
}

/// Discrete lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
	/// A session was established.
	Ready,
	/// The session went away, or an attempt to establish one failed.
	Closed,
}

/// Emitting side, owned by the session manager's actor.
#[derive(Debug)]
pub(crate) struct LifecycleNotifier {
	events: broadcast::Sender<Lifecycle>,
	state: watch::Sender<ConnectionState>,
	last: Option<Lifecycle>,
	sealed: bool,
}

impl LifecycleNotifier {
	pub(crate) fn new(capacity: usize) -> Self {
		let (events, _) = broadcast::channel(capacity.max(1));
		let (state, _) = watch::channel(ConnectionState::Disconnected);
		Self {
			events,
			state,
			last: None,
			sealed: false,
		}
	}

	pub(crate) fn event_sender(&self) -> broadcast::Sender<Lifecycle> {
		self.events.clone()
	}

	pub(crate) fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
		self.state.subscribe()
	}

	pub(crate) fn set_state(&self, state: ConnectionState) {
		self.state.send_replace(state);
	}

	/// Emits `Ready`. Returns whether anything was sent.
	pub(crate) fn ready(&mut self) -> bool {
		self.emit(Lifecycle::Ready)
	}

	/// Emits `Closed` unless the previous event already was one.
	pub(crate) fn closed(&mut self) -> bool {
		if self.last == Some(Lifecycle::Closed) {
			return false;
		}
		self.emit(Lifecycle::Closed)
	}

	/// Emits the final `Closed` (if still owed) and stops all further events.
	pub(crate) fn seal(&mut self) {
		self.closed();
		self.sealed = true;
	}

	fn emit(&mut self, event: Lifecycle) -> bool {
		if self.sealed {
			return false;
		}
		self.last = Some(event);
		// No receivers is fine.
		let _ = self.events.send(event);
		true
	}
}
