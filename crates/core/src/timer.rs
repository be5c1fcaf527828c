//! Named, cancellable one-shot timers owned by a state machine.
//!
//! A [`Timer`] is just an optional deadline: arming replaces any previous
//! deadline, cancelling clears it, and [`Timer::expired`] resolves at the
//! deadline or never. The owner polls `expired` from its event loop and
//! cancels the timer before acting on it, so a cancelled timer can never fire.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct Timer {
	name: &'static str,
	deadline: Option<Instant>,
}

impl Timer {
	pub fn new(name: &'static str) -> Self {
		Self { name, deadline: None }
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	/// Arms the timer `delay` from now, replacing any pending deadline.
	pub fn arm(&mut self, delay: Duration) -> Instant {
		let deadline = Instant::now() + delay;
		self.deadline = Some(deadline);
		deadline
	}

	/// Disarms the timer. Returns whether it was armed; a no-op otherwise.
	pub fn cancel(&mut self) -> bool {
		self.deadline.take().is_some()
	}

	pub fn is_armed(&self) -> bool {
		self.deadline.is_some()
	}

	/// Resolves when the armed deadline passes; pending forever if disarmed.
	pub async fn expired(&self) {
		match self.deadline {
			Some(deadline) => tokio::time::sleep_until(deadline).await,
			None => std::future::pending().await,
		}
	}
}
