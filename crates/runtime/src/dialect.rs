//! Per-protocol message envelopes.
//!
//! A [`Dialect`] knows how to wrap an outgoing request and how to classify an
//! inbound message as a response, an event, or noise. The [`Connection`]
//! itself is protocol-agnostic.
//!
//! [`Connection`]: crate::connection::Connection

use bugs_protocol::cdp::{CdpMessage, CdpRequest};
use bugs_protocol::v8::{self, V8Request};
use serde_json::Value;

use crate::error::{Error, Result};

/// Unsolicited notification from the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolEvent {
	pub name: String,
	pub body: Value,
}

/// Classified inbound message.
#[derive(Debug)]
pub enum Inbound {
	Response { id: u64, result: Result<Value> },
	Event(ProtocolEvent),
	Unknown(Value),
}

/// Wire envelope of one debugger protocol.
pub trait Dialect: Send + Sync + 'static {
	fn name(&self) -> &'static str;

	/// Builds the request envelope for correlation id `id`.
	fn encode_request(&self, id: u64, method: &str, params: Value) -> Result<Value>;

	fn decode(&self, message: Value) -> Inbound;
}

/// Legacy V8 debugger protocol.
///
/// Successful responses resolve to the whole response object so callers can
/// reach `refs` and `running` alongside `body`.
#[derive(Debug, Default, Clone, Copy)]
pub struct V8Dialect;

impl Dialect for V8Dialect {
	fn name(&self) -> &'static str {
		"v8"
	}

	fn encode_request(&self, id: u64, method: &str, params: Value) -> Result<Value> {
		Ok(serde_json::to_value(V8Request::new(id, method, params))?)
	}

	fn decode(&self, message: Value) -> Inbound {
		match message.get("type").and_then(Value::as_str) {
			Some("response") => {
				let Some(id) = message.get("request_seq").and_then(Value::as_u64) else {
					return Inbound::Unknown(message);
				};
				let success = message.get("success").and_then(Value::as_bool).unwrap_or(false);
				let result = if success {
					Ok(message)
				} else {
					let text = message
						.get("message")
						.and_then(Value::as_str)
						.unwrap_or("request failed")
						.to_string();
					Err(Error::remote(text))
				};
				Inbound::Response { id, result }
			}
			Some("event") => {
				let Some(name) = message.get("event").and_then(Value::as_str).map(str::to_string) else {
					return Inbound::Unknown(message);
				};
				let body = message.get("body").cloned().unwrap_or(Value::Null);
				Inbound::Event(ProtocolEvent { name, body })
			}
			Some("connect") => Inbound::Event(ProtocolEvent {
				name: v8::events::CONNECT.to_string(),
				body: message.get("headers").cloned().unwrap_or(Value::Null),
			}),
			_ => Inbound::Unknown(message),
		}
	}
}

/// Chrome DevTools Protocol.
///
/// Successful responses resolve to the `result` object.
#[derive(Debug, Default, Clone, Copy)]
pub struct CdpDialect;

impl Dialect for CdpDialect {
	fn name(&self) -> &'static str {
		"cdp"
	}

	fn encode_request(&self, id: u64, method: &str, params: Value) -> Result<Value> {
		let request = CdpRequest {
			id,
			method: method.to_string(),
			params: (!params.is_null()).then_some(params),
		};
		Ok(serde_json::to_value(request)?)
	}

	fn decode(&self, message: Value) -> Inbound {
		match serde_json::from_value::<CdpMessage>(message) {
			Ok(CdpMessage::Response(response)) => {
				let result = match response.error {
					Some(error) => {
						let message = match error.data {
							Some(data) => format!("{} ({data})", error.message),
							None => error.message,
						};
						Err(Error::remote(message))
					}
					None => Ok(response.result.unwrap_or(Value::Null)),
				};
				Inbound::Response {
					id: response.id,
					result,
				}
			}
			Ok(CdpMessage::Event(event)) => Inbound::Event(ProtocolEvent {
				name: event.method,
				body: event.params,
			}),
			Ok(CdpMessage::Unknown(value)) => Inbound::Unknown(value),
			Err(e) => Inbound::Unknown(Value::String(format!("undecodable message: {e}"))),
		}
	}
}
