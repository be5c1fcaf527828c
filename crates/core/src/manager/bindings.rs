//! Requested versus active bindings of one session manager.
//!
//! Requested topics and procedures are durable intent and survive
//! reconnects. Active bindings describe the current session only and are
//! cleared whenever it goes away.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use serde::Serialize;
use wamp_protocol::Id;

use crate::handlers::{EventHandler, HandlerId, HandlerMap, ProcedureHandler};

/// Remote side of a topic or procedure on the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Binding {
	/// Establishment in flight.
	Pending,
	Active(Id),
	/// The router refused; retried on the next session.
	Rejected,
}

/// Point-in-time view of a manager's bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindingsSnapshot {
	pub topics: BTreeMap<String, TopicState>,
	pub procedures: BTreeMap<String, BindingState>,
}

/// One requested topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicState {
	/// Local handlers sharing the remote subscription.
	pub handlers: usize,
	pub binding: BindingState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
	Unbound,
	Pending,
	Active(Id),
	Rejected,
}

impl From<Option<&Binding>> for BindingState {
	fn from(binding: Option<&Binding>) -> Self {
		match binding {
			None => BindingState::Unbound,
			Some(Binding::Pending) => BindingState::Pending,
			Some(Binding::Active(id)) => BindingState::Active(*id),
			Some(Binding::Rejected) => BindingState::Rejected,
		}
	}
}

#[derive(Default)]
pub(crate) struct Bindings {
	topics: IndexMap<String, HandlerMap>,
	subscriptions: HashMap<String, Binding>,
	subscription_topics: HashMap<Id, String>,
	procedures: IndexMap<String, ProcedureHandler>,
	registrations: HashMap<String, Binding>,
	registration_procedures: HashMap<Id, String>,
}

impl Bindings {
	pub(crate) fn add_handler(&mut self, topic: String, id: HandlerId, handler: EventHandler) {
		self.topics.entry(topic).or_default().insert(id, handler);
	}

	/// Removes one handler. When it was the topic's last, the topic is
	/// forgotten and its active subscription id (if any) returned.
	pub(crate) fn remove_handler(&mut self, topic: &str, id: HandlerId) -> Option<Id> {
		let handlers = self.topics.get_mut(topic)?;
		handlers.shift_remove(&id);
		if !handlers.is_empty() {
			return None;
		}
		self.topics.shift_remove(topic);
		match self.subscriptions.get(topic) {
			Some(Binding::Active(subscription)) => {
				let subscription = *subscription;
				self.subscriptions.remove(topic);
				self.subscription_topics.remove(&subscription);
				Some(subscription)
			}
			// A pending establishment settles the marker when it completes.
			Some(Binding::Pending) => None,
			_ => {
				self.subscriptions.remove(topic);
				None
			}
		}
	}

	pub(crate) fn has_handlers(&self, topic: &str) -> bool {
		self.topics.get(topic).is_some_and(|h| !h.is_empty())
	}

	/// Marks `topic` pending if it is requested and neither active nor in
	/// flight. A rejected topic is claimed again.
	pub(crate) fn claim_topic(&mut self, topic: &str) -> bool {
		if !self.has_handlers(topic) || !claimable(self.subscriptions.get(topic)) {
			return false;
		}
		self.subscriptions.insert(topic.to_string(), Binding::Pending);
		true
	}

	/// Claims every requested topic without a binding.
	pub(crate) fn claim_unbound_topics(&mut self) -> Vec<String> {
		let unbound: Vec<String> = self
			.topics
			.keys()
			.filter(|topic| !self.subscriptions.contains_key(*topic))
			.cloned()
			.collect();
		for topic in &unbound {
			self.subscriptions.insert(topic.clone(), Binding::Pending);
		}
		unbound
	}

	/// Settles a subscribe request. Returns `false` when the subscription is
	/// no longer wanted and should be dropped remotely.
	pub(crate) fn subscription_established(&mut self, topic: &str, subscription: Id) -> bool {
		let wanted = self.has_handlers(topic) && self.subscriptions.get(topic) == Some(&Binding::Pending);
		if wanted {
			self.subscriptions.insert(topic.to_string(), Binding::Active(subscription));
			self.subscription_topics.insert(subscription, topic.to_string());
		} else if self.subscriptions.get(topic) == Some(&Binding::Pending) {
			self.subscriptions.remove(topic);
		}
		wanted
	}

	pub(crate) fn subscription_rejected(&mut self, topic: &str) {
		if self.has_handlers(topic) {
			self.subscriptions.insert(topic.to_string(), Binding::Rejected);
		} else {
			self.subscriptions.remove(topic);
		}
	}

	/// Topic and handlers for an inbound event.
	pub(crate) fn route_event(&self, subscription: Id) -> Option<(&str, &HandlerMap)> {
		let topic = self.subscription_topics.get(&subscription)?;
		let handlers = self.topics.get(topic)?;
		Some((topic.as_str(), handlers))
	}

	/// Installs the handler for `procedure`, replacing any previous one.
	pub(crate) fn set_procedure(&mut self, procedure: String, handler: ProcedureHandler) {
		self.procedures.insert(procedure, handler);
	}

	pub(crate) fn claim_procedure(&mut self, procedure: &str) -> bool {
		if !self.procedures.contains_key(procedure) || !claimable(self.registrations.get(procedure)) {
			return false;
		}
		self.registrations.insert(procedure.to_string(), Binding::Pending);
		true
	}

	pub(crate) fn claim_unbound_procedures(&mut self) -> Vec<String> {
		let unbound: Vec<String> = self
			.procedures
			.keys()
			.filter(|procedure| !self.registrations.contains_key(*procedure))
			.cloned()
			.collect();
		for procedure in &unbound {
			self.registrations.insert(procedure.clone(), Binding::Pending);
		}
		unbound
	}

	pub(crate) fn registration_established(&mut self, procedure: &str, registration: Id) {
		self.registrations
			.insert(procedure.to_string(), Binding::Active(registration));
		self.registration_procedures
			.insert(registration, procedure.to_string());
	}

	pub(crate) fn registration_rejected(&mut self, procedure: &str) {
		self.registrations
			.insert(procedure.to_string(), Binding::Rejected);
	}

	/// Procedure name and handler for an inbound invocation.
	pub(crate) fn route_invocation(&self, registration: Id) -> Option<(&str, &ProcedureHandler)> {
		let procedure = self.registration_procedures.get(&registration)?;
		let handler = self.procedures.get(procedure)?;
		Some((procedure.as_str(), handler))
	}

	/// Forgets everything tied to the current session.
	pub(crate) fn clear_active(&mut self) {
		self.subscriptions.clear();
		self.subscription_topics.clear();
		self.registrations.clear();
		self.registration_procedures.clear();
	}

	pub(crate) fn snapshot(&self) -> BindingsSnapshot {
		let topics = self
			.topics
			.iter()
			.map(|(topic, handlers)| {
				let state = TopicState {
					handlers: handlers.len(),
					binding: self.subscriptions.get(topic).into(),
				};
				(topic.clone(), state)
			})
			.collect();
		let procedures = self
			.procedures
			.keys()
			.map(|procedure| (procedure.clone(), self.registrations.get(procedure).into()))
			.collect();
		BindingsSnapshot { topics, procedures }
	}
}

fn claimable(binding: Option<&Binding>) -> bool {
	matches!(binding, None | Some(Binding::Rejected))
}
