//! Positional and named argument payloads.
//!
//! WAMP messages that carry application data (PUBLISH, EVENT, CALL, RESULT,
//! INVOCATION, YIELD, ERROR) end with an optional `Arguments|list` and an
//! optional `ArgumentsKw|dict`. [`Arguments`] models the four shapes this can
//! take explicitly, and the `for_call` / `for_publish` constructors map a
//! caller's JSON payload onto one of them deterministically.

use serde_json::{Map, Value};

/// WAMP dictionary (`Details`, `Options`, `ArgumentsKw`).
pub type Dict = Map<String, Value>;

const ARGS_FIELD: &str = "args";
const KWARGS_FIELD: &str = "kwargs";

/// Application payload of a publish, event, call, result or invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Arguments {
	/// No arguments at all.
	#[default]
	Empty,
	/// Positional arguments only.
	Positional(Vec<Value>),
	/// Named arguments only (sent with an empty positional list).
	Named(Dict),
	/// Both positional and named arguments.
	Both(Vec<Value>, Dict),
}

impl Arguments {
	/// Builds the most compact variant for the given parts.
	pub fn from_parts(args: Vec<Value>, kwargs: Dict) -> Self {
		match (args.is_empty(), kwargs.is_empty()) {
			(true, true) => Self::Empty,
			(false, true) => Self::Positional(args),
			(true, false) => Self::Named(kwargs),
			(false, false) => Self::Both(args, kwargs),
		}
	}

	/// Translates a caller payload into call arguments.
	///
	/// | payload | result |
	/// |---|---|
	/// | absent | [`Empty`](Self::Empty) |
	/// | object with `args` and/or `kwargs` | [`Both`](Self::Both), passed through |
	/// | array | [`Positional`](Self::Positional) |
	/// | any other object | [`Named`](Self::Named) |
	/// | scalar (including `null`) | single positional argument |
	///
	/// In the pass-through case a non-array `args` becomes `[]` and a
	/// non-object `kwargs` becomes `{}`.
	pub fn for_call(payload: Option<Value>) -> Self {
		match payload {
			None => Self::Empty,
			Some(Value::Object(mut map)) if map.contains_key(ARGS_FIELD) || map.contains_key(KWARGS_FIELD) => {
				let args = match map.remove(ARGS_FIELD) {
					Some(Value::Array(args)) => args,
					_ => Vec::new(),
				};
				let kwargs = match map.remove(KWARGS_FIELD) {
					Some(Value::Object(kwargs)) => kwargs,
					_ => Dict::new(),
				};
				Self::Both(args, kwargs)
			}
			Some(Value::Array(args)) => Self::Positional(args),
			Some(Value::Object(kwargs)) => Self::Named(kwargs),
			Some(scalar) => Self::Positional(vec![scalar]),
		}
	}

	/// Translates a publish message: objects become named arguments, arrays
	/// positional arguments, and anything else a single positional argument.
	pub fn for_publish(message: Value) -> Self {
		match message {
			Value::Object(kwargs) => Self::Named(kwargs),
			Value::Array(args) => Self::Positional(args),
			scalar => Self::Positional(vec![scalar]),
		}
	}

	/// Positional arguments (empty slice if none).
	pub fn positional(&self) -> &[Value] {
		match self {
			Self::Positional(args) | Self::Both(args, _) => args,
			Self::Empty | Self::Named(_) => &[],
		}
	}

	/// Named arguments, if any were supplied.
	pub fn named(&self) -> Option<&Dict> {
		match self {
			Self::Named(kwargs) | Self::Both(_, kwargs) => Some(kwargs),
			Self::Empty | Self::Positional(_) => None,
		}
	}

	/// Splits into `(args, kwargs)`, filling in empty collections.
	pub fn into_parts(self) -> (Vec<Value>, Dict) {
		match self {
			Self::Empty => (Vec::new(), Dict::new()),
			Self::Positional(args) => (args, Dict::new()),
			Self::Named(kwargs) => (Vec::new(), kwargs),
			Self::Both(args, kwargs) => (args, kwargs),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.positional().is_empty() && self.named().is_none_or(Dict::is_empty)
	}

	/// Appends the trailing `Arguments|list, ArgumentsKw|dict` fields of a
	/// message, omitting empty trailing elements as the protocol requires.
	pub(crate) fn append_to(&self, fields: &mut Vec<Value>) {
		let args = self.positional();
		match self.named() {
			Some(kwargs) if !kwargs.is_empty() => {
				fields.push(Value::Array(args.to_vec()));
				fields.push(Value::Object(kwargs.clone()));
			}
			_ if !args.is_empty() => fields.push(Value::Array(args.to_vec())),
			_ => {}
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn dict(value: Value) -> Dict {
		match value {
			Value::Object(map) => map,
			other => panic!("expected object, got {other}"),
		}
	}

	#[test]
	fn absent_call_payload_is_empty() {
		assert_eq!(Arguments::for_call(None), Arguments::Empty);
	}

	#[test]
	fn explicit_args_and_kwargs_pass_through() {
		let payload = json!({"args": [1, 2], "kwargs": {"dirno": "101"}});
		assert_eq!(
			Arguments::for_call(Some(payload)),
			Arguments::Both(vec![json!(1), json!(2)], dict(json!({"dirno": "101"})))
		);
	}

	#[test]
	fn explicit_fields_with_wrong_shapes_fall_back_to_empty() {
		let payload = json!({"args": "nope", "kwargs": [1]});
		assert_eq!(Arguments::for_call(Some(payload)), Arguments::Both(vec![], Dict::new()));

		let only_kwargs = json!({"kwargs": {"a": 1}});
		assert_eq!(Arguments::for_call(Some(only_kwargs)), Arguments::Both(vec![], dict(json!({"a": 1}))));
	}

	#[test]
	fn array_payload_is_positional() {
		assert_eq!(
			Arguments::for_call(Some(json!(["a", 1]))),
			Arguments::Positional(vec![json!("a"), json!(1)])
		);
	}

	#[test]
	fn plain_object_payload_is_named() {
		let payload = json!({"from_dirno": "100", "to_dirno": "200"});
		let args = Arguments::for_call(Some(payload.clone()));
		assert_eq!(args, Arguments::Named(dict(payload)));
		assert!(args.positional().is_empty());
	}

	#[test]
	fn scalar_payload_is_single_positional() {
		assert_eq!(Arguments::for_call(Some(json!(42))), Arguments::Positional(vec![json!(42)]));
		assert_eq!(Arguments::for_call(Some(json!("x"))), Arguments::Positional(vec![json!("x")]));
		assert_eq!(Arguments::for_call(Some(Value::Null)), Arguments::Positional(vec![Value::Null]));
	}

	#[test]
	fn publish_translation() {
		assert_eq!(Arguments::for_publish(json!({"x": 1})), Arguments::Named(dict(json!({"x": 1}))));
		assert_eq!(Arguments::for_publish(json!([1, 2])), Arguments::Positional(vec![json!(1), json!(2)]));
		assert_eq!(Arguments::for_publish(json!(true)), Arguments::Positional(vec![json!(true)]));
	}

	#[test]
	fn from_parts_picks_compact_variant() {
		assert_eq!(Arguments::from_parts(vec![], Dict::new()), Arguments::Empty);
		assert_eq!(Arguments::from_parts(vec![json!(1)], Dict::new()), Arguments::Positional(vec![json!(1)]));
		assert_eq!(
			Arguments::from_parts(vec![], dict(json!({"k": 1}))),
			Arguments::Named(dict(json!({"k": 1})))
		);
	}

	#[test]
	fn trailing_fields_omit_empty_parts() {
		let mut fields = Vec::new();
		Arguments::Empty.append_to(&mut fields);
		assert!(fields.is_empty());

		Arguments::Named(dict(json!({"k": 1}))).append_to(&mut fields);
		assert_eq!(fields, vec![json!([]), json!({"k": 1})]);

		fields.clear();
		Arguments::Both(vec![json!(1)], Dict::new()).append_to(&mut fields);
		assert_eq!(fields, vec![json!([1])]);
	}

	#[test]
	fn empty_collections_count_as_empty() {
		assert!(Arguments::Both(vec![], Dict::new()).is_empty());
		assert!(Arguments::Named(Dict::new()).is_empty());
		assert!(!Arguments::Positional(vec![json!(1)]).is_empty());
	}
}
