//! WAMP v2 messages and their JSON array codec.
//!
//! Every WAMP message is a JSON array whose first element is the message type
//! code. Only the messages a client sends or receives are modelled; broker or
//! dealer internal messages (and advanced-profile ones like CANCEL) decode to
//! [`DecodeError::UnknownType`].

use serde_json::Value;
use thiserror::Error;

use crate::arguments::{Arguments, Dict};

/// Session-scoped or global identifier (request, subscription, registration...).
pub type Id = u64;

/// WAMP message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
	Hello,
	Welcome,
	Abort,
	Challenge,
	Authenticate,
	Goodbye,
	Error,
	Publish,
	Published,
	Subscribe,
	Subscribed,
	Unsubscribe,
	Unsubscribed,
	Event,
	Call,
	Result,
	Register,
	Registered,
	Unregister,
	Unregistered,
	Invocation,
	Yield,
}

impl MessageType {
	pub fn code(self) -> u64 {
		match self {
			Self::Hello => 1,
			Self::Welcome => 2,
			Self::Abort => 3,
			Self::Challenge => 4,
			Self::Authenticate => 5,
			Self::Goodbye => 6,
			Self::Error => 8,
			Self::Publish => 16,
			Self::Published => 17,
			Self::Subscribe => 32,
			Self::Subscribed => 33,
			Self::Unsubscribe => 34,
			Self::Unsubscribed => 35,
			Self::Event => 36,
			Self::Call => 48,
			Self::Result => 50,
			Self::Register => 64,
			Self::Registered => 65,
			Self::Unregister => 66,
			Self::Unregistered => 67,
			Self::Invocation => 68,
			Self::Yield => 70,
		}
	}

	pub fn from_code(code: u64) -> Option<Self> {
		Some(match code {
			1 => Self::Hello,
			2 => Self::Welcome,
			3 => Self::Abort,
			4 => Self::Challenge,
			5 => Self::Authenticate,
			6 => Self::Goodbye,
			8 => Self::Error,
			16 => Self::Publish,
			17 => Self::Published,
			32 => Self::Subscribe,
			33 => Self::Subscribed,
			34 => Self::Unsubscribe,
			35 => Self::Unsubscribed,
			36 => Self::Event,
			48 => Self::Call,
			50 => Self::Result,
			64 => Self::Register,
			65 => Self::Registered,
			66 => Self::Unregister,
			67 => Self::Unregistered,
			68 => Self::Invocation,
			70 => Self::Yield,
			_ => return None,
		})
	}
}

/// Failure to decode an inbound frame into a [`Message`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
	#[error("WAMP message must be a JSON array")]
	NotAnArray,

	#[error("WAMP message is missing its type code")]
	MissingType,

	#[error("unsupported WAMP message type {0}")]
	UnknownType(u64),

	#[error("{message:?} field {index}: expected {expected}")]
	InvalidField {
		message: MessageType,
		index: usize,
		expected: &'static str,
	},
}

/// Client-relevant WAMP v2 message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
	Hello { realm: String, details: Dict },
	Welcome { session: Id, details: Dict },
	Abort { details: Dict, reason: String },
	Challenge { auth_method: String, extra: Dict },
	Authenticate { signature: String, extra: Dict },
	Goodbye { details: Dict, reason: String },
	Error {
		request_type: u64,
		request: Id,
		details: Dict,
		error: String,
		arguments: Arguments,
	},
	Publish {
		request: Id,
		options: Dict,
		topic: String,
		arguments: Arguments,
	},
	Published { request: Id, publication: Id },
	Subscribe { request: Id, options: Dict, topic: String },
	Subscribed { request: Id, subscription: Id },
	Unsubscribe { request: Id, subscription: Id },
	Unsubscribed { request: Id },
	Event {
		subscription: Id,
		publication: Id,
		details: Dict,
		arguments: Arguments,
	},
	Call {
		request: Id,
		options: Dict,
		procedure: String,
		arguments: Arguments,
	},
	Result { request: Id, details: Dict, arguments: Arguments },
	Register { request: Id, options: Dict, procedure: String },
	Registered { request: Id, registration: Id },
	Unregister { request: Id, registration: Id },
	Unregistered { request: Id },
	Invocation {
		request: Id,
		registration: Id,
		details: Dict,
		arguments: Arguments,
	},
	Yield { request: Id, options: Dict, arguments: Arguments },
}

impl Message {
	pub fn message_type(&self) -> MessageType {
		match self {
			Self::Hello { .. } => MessageType::Hello,
			Self::Welcome { .. } => MessageType::Welcome,
			Self::Abort { .. } => MessageType::Abort,
			Self::Challenge { .. } => MessageType::Challenge,
			Self::Authenticate { .. } => MessageType::Authenticate,
			Self::Goodbye { .. } => MessageType::Goodbye,
			Self::Error { .. } => MessageType::Error,
			Self::Publish { .. } => MessageType::Publish,
			Self::Published { .. } => MessageType::Published,
			Self::Subscribe { .. } => MessageType::Subscribe,
			Self::Subscribed { .. } => MessageType::Subscribed,
			Self::Unsubscribe { .. } => MessageType::Unsubscribe,
			Self::Unsubscribed { .. } => MessageType::Unsubscribed,
			Self::Event { .. } => MessageType::Event,
			Self::Call { .. } => MessageType::Call,
			Self::Result { .. } => MessageType::Result,
			Self::Register { .. } => MessageType::Register,
			Self::Registered { .. } => MessageType::Registered,
			Self::Unregister { .. } => MessageType::Unregister,
			Self::Unregistered { .. } => MessageType::Unregistered,
			Self::Invocation { .. } => MessageType::Invocation,
			Self::Yield { .. } => MessageType::Yield,
		}
	}

	/// Request id this message answers or carries, if any.
	pub fn request_id(&self) -> Option<Id> {
		match self {
			Self::Error { request, .. }
			| Self::Publish { request, .. }
			| Self::Published { request, .. }
			| Self::Subscribe { request, .. }
			| Self::Subscribed { request, .. }
			| Self::Unsubscribe { request, .. }
			| Self::Unsubscribed { request }
			| Self::Call { request, .. }
			| Self::Result { request, .. }
			| Self::Register { request, .. }
			| Self::Registered { request, .. }
			| Self::Unregister { request, .. }
			| Self::Unregistered { request }
			| Self::Invocation { request, .. }
			| Self::Yield { request, .. } => Some(*request),
			_ => None,
		}
	}

	/// Encodes into the JSON array wire form.
	pub fn to_value(&self) -> Value {
		let mut fields = vec![Value::from(self.message_type().code())];
		match self {
			Self::Hello { realm, details } => {
				fields.push(realm.as_str().into());
				fields.push(Value::Object(details.clone()));
			}
			Self::Welcome { session, details } => {
				fields.push((*session).into());
				fields.push(Value::Object(details.clone()));
			}
			Self::Abort { details, reason } | Self::Goodbye { details, reason } => {
				fields.push(Value::Object(details.clone()));
				fields.push(reason.as_str().into());
			}
			Self::Challenge { auth_method, extra } => {
				fields.push(auth_method.as_str().into());
				fields.push(Value::Object(extra.clone()));
			}
			Self::Authenticate { signature, extra } => {
				fields.push(signature.as_str().into());
				fields.push(Value::Object(extra.clone()));
			}
			Self::Error {
				request_type,
				request,
				details,
				error,
				arguments,
			} => {
				fields.push((*request_type).into());
				fields.push((*request).into());
				fields.push(Value::Object(details.clone()));
				fields.push(error.as_str().into());
				arguments.append_to(&mut fields);
			}
			Self::Publish {
				request,
				options,
				topic,
				arguments,
			} => {
				fields.push((*request).into());
				fields.push(Value::Object(options.clone()));
				fields.push(topic.as_str().into());
				arguments.append_to(&mut fields);
			}
			Self::Published { request, publication } => {
				fields.push((*request).into());
				fields.push((*publication).into());
			}
			Self::Subscribe { request, options, topic } => {
				fields.push((*request).into());
				fields.push(Value::Object(options.clone()));
				fields.push(topic.as_str().into());
			}
			Self::Subscribed { request, subscription } | Self::Unsubscribe { request, subscription } => {
				fields.push((*request).into());
				fields.push((*subscription).into());
			}
			Self::Unsubscribed { request } | Self::Unregistered { request } => {
				fields.push((*request).into());
			}
			Self::Event {
				subscription,
				publication,
				details,
				arguments,
			} => {
				fields.push((*subscription).into());
				fields.push((*publication).into());
				fields.push(Value::Object(details.clone()));
				arguments.append_to(&mut fields);
			}
			Self::Call {
				request,
				options,
				procedure,
				arguments,
			} => {
				fields.push((*request).into());
				fields.push(Value::Object(options.clone()));
				fields.push(procedure.as_str().into());
				arguments.append_to(&mut fields);
			}
			Self::Result {
				request,
				details,
				arguments,
			} => {
				fields.push((*request).into());
				fields.push(Value::Object(details.clone()));
				arguments.append_to(&mut fields);
			}
			Self::Register {
				request,
				options,
				procedure,
			} => {
				fields.push((*request).into());
				fields.push(Value::Object(options.clone()));
				fields.push(procedure.as_str().into());
			}
			Self::Registered { request, registration } | Self::Unregister { request, registration } => {
				fields.push((*request).into());
				fields.push((*registration).into());
			}
			Self::Invocation {
				request,
				registration,
				details,
				arguments,
			} => {
				fields.push((*request).into());
				fields.push((*registration).into());
				fields.push(Value::Object(details.clone()));
				arguments.append_to(&mut fields);
			}
			Self::Yield {
				request,
				options,
				arguments,
			} => {
				fields.push((*request).into());
				fields.push(Value::Object(options.clone()));
				arguments.append_to(&mut fields);
			}
		}
		Value::Array(fields)
	}

	/// Decodes a JSON array frame.
	pub fn from_value(value: Value) -> Result<Self, DecodeError> {
		let Value::Array(items) = value else {
			return Err(DecodeError::NotAnArray);
		};
		let code = items.first().and_then(Value::as_u64).ok_or(DecodeError::MissingType)?;
		let kind = MessageType::from_code(code).ok_or(DecodeError::UnknownType(code))?;
		let mut f = Fields { kind, items };

		Ok(match kind {
			MessageType::Hello => Self::Hello {
				realm: f.string(1)?,
				details: f.dict(2)?,
			},
			MessageType::Welcome => Self::Welcome {
				session: f.id(1)?,
				details: f.dict(2)?,
			},
			MessageType::Abort => Self::Abort {
				details: f.dict(1)?,
				reason: f.string(2)?,
			},
			MessageType::Challenge => Self::Challenge {
				auth_method: f.string(1)?,
				extra: f.dict(2)?,
			},
			MessageType::Authenticate => Self::Authenticate {
				signature: f.string(1)?,
				extra: f.dict(2)?,
			},
			MessageType::Goodbye => Self::Goodbye {
				details: f.dict(1)?,
				reason: f.string(2)?,
			},
			MessageType::Error => Self::Error {
				request_type: f.id(1)?,
				request: f.id(2)?,
				details: f.dict(3)?,
				error: f.string(4)?,
				arguments: f.arguments(5)?,
			},
			MessageType::Publish => Self::Publish {
				request: f.id(1)?,
				options: f.dict(2)?,
				topic: f.string(3)?,
				arguments: f.arguments(4)?,
			},
			MessageType::Published => Self::Published {
				request: f.id(1)?,
				publication: f.id(2)?,
			},
			MessageType::Subscribe => Self::Subscribe {
				request: f.id(1)?,
				options: f.dict(2)?,
				topic: f.string(3)?,
			},
			MessageType::Subscribed => Self::Subscribed {
				request: f.id(1)?,
				subscription: f.id(2)?,
			},
			MessageType::Unsubscribe => Self::Unsubscribe {
				request: f.id(1)?,
				subscription: f.id(2)?,
			},
			MessageType::Unsubscribed => Self::Unsubscribed { request: f.id(1)? },
			MessageType::Event => Self::Event {
				subscription: f.id(1)?,
				publication: f.id(2)?,
				details: f.dict(3)?,
				arguments: f.arguments(4)?,
			},
			MessageType::Call => Self::Call {
				request: f.id(1)?,
				options: f.dict(2)?,
				procedure: f.string(3)?,
				arguments: f.arguments(4)?,
			},
			MessageType::Result => Self::Result {
				request: f.id(1)?,
				details: f.dict(2)?,
				arguments: f.arguments(3)?,
			},
			MessageType::Register => Self::Register {
				request: f.id(1)?,
				options: f.dict(2)?,
				procedure: f.string(3)?,
			},
			MessageType::Registered => Self::Registered {
				request: f.id(1)?,
				registration: f.id(2)?,
			},
			MessageType::Unregister => Self::Unregister {
				request: f.id(1)?,
				registration: f.id(2)?,
			},
			MessageType::Unregistered => Self::Unregistered { request: f.id(1)? },
			MessageType::Invocation => Self::Invocation {
				request: f.id(1)?,
				registration: f.id(2)?,
				details: f.dict(3)?,
				arguments: f.arguments(4)?,
			},
			MessageType::Yield => Self::Yield {
				request: f.id(1)?,
				options: f.dict(2)?,
				arguments: f.arguments(3)?,
			},
		})
	}
}

/// Positional field reader; takes values out of the frame instead of cloning.
struct Fields {
	kind: MessageType,
	items: Vec<Value>,
}

impl Fields {
	fn invalid(&self, index: usize, expected: &'static str) -> DecodeError {
		DecodeError::InvalidField {
			message: self.kind,
			index,
			expected,
		}
	}

	fn id(&self, index: usize) -> Result<Id, DecodeError> {
		self.items
			.get(index)
			.and_then(Value::as_u64)
			.ok_or_else(|| self.invalid(index, "id"))
	}

	fn string(&mut self, index: usize) -> Result<String, DecodeError> {
		match self.items.get_mut(index).map(Value::take) {
			Some(Value::String(s)) => Ok(s),
			_ => Err(self.invalid(index, "string")),
		}
	}

	fn dict(&mut self, index: usize) -> Result<Dict, DecodeError> {
		match self.items.get_mut(index).map(Value::take) {
			Some(Value::Object(map)) => Ok(map),
			_ => Err(self.invalid(index, "dict")),
		}
	}

	fn arguments(&mut self, index: usize) -> Result<Arguments, DecodeError> {
		let args = match self.items.get_mut(index).map(Value::take) {
			None => Vec::new(),
			Some(Value::Array(args)) => args,
			Some(_) => return Err(self.invalid(index, "list")),
		};
		let kwargs = match self.items.get_mut(index + 1).map(Value::take) {
			None => Dict::new(),
			Some(Value::Object(kwargs)) => kwargs,
			Some(_) => return Err(self.invalid(index + 1, "dict")),
		};
		Ok(Arguments::from_parts(args, kwargs))
	}
}
