//! Wire types for the legacy V8 debugger protocol spoken by `node --debug`.
//!
//! Every message is a JSON object with a `type` discriminator. Requests carry a
//! `seq` chosen by the client, responses echo it back as `request_seq`, and
//! events arrive unsolicited on the same stream.
//!
//! ```text
//! -> {"seq":3,"type":"request","command":"evaluate","arguments":{"expression":"1+1","global":true}}
//! <- {"seq":9,"request_seq":3,"type":"response","command":"evaluate","success":true,"body":{"handle":5,"type":"number","value":2,"text":"2"},"refs":[],"running":false}
//! <- {"seq":10,"type":"event","event":"break","body":{"sourceLine":4,"sourceColumn":2,"script":{"name":"/tmp/app.js"}}}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command names understood by the V8 debug agent.
pub mod commands {
	pub const CONTINUE: &str = "continue";
	pub const BACKTRACE: &str = "backtrace";
	pub const EVALUATE: &str = "evaluate";
	pub const LOOKUP: &str = "lookup";
	pub const SCOPES: &str = "scopes";
	pub const SET_BREAKPOINT: &str = "setbreakpoint";
	pub const CLEAR_BREAKPOINT: &str = "clearbreakpoint";
	pub const SET_EXCEPTION_BREAK: &str = "setexceptionbreak";
	pub const DISCONNECT: &str = "disconnect";
}

/// Event names emitted by the V8 debug agent.
pub mod events {
	pub const BREAK: &str = "break";
	pub const EXCEPTION: &str = "exception";
	pub const AFTER_COMPILE: &str = "afterCompile";
	/// Synthetic event for the header-only greeting sent on connect.
	pub const CONNECT: &str = "connect";
}

/// Outgoing request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V8Request {
	pub seq: u64,
	#[serde(rename = "type")]
	pub kind: String,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub arguments: Option<Value>,
}

impl V8Request {
	pub fn new(seq: u64, command: &str, arguments: Value) -> Self {
		Self {
			seq,
			kind: "request".to_string(),
			command: command.to_string(),
			arguments: (!arguments.is_null()).then_some(arguments),
		}
	}
}

/// Response to a [`V8Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V8Response {
	#[serde(default)]
	pub seq: u64,
	pub request_seq: u64,
	#[serde(default)]
	pub command: Option<String>,
	pub success: bool,
	#[serde(default)]
	pub body: Value,
	/// Mirrors referenced by `ref` fields inside `body`.
	#[serde(default)]
	pub refs: Vec<Mirror>,
	#[serde(default)]
	pub running: bool,
	/// Failure text when `success` is false.
	#[serde(default)]
	pub message: Option<String>,
}

impl V8Response {
	/// Finds a mirror in `refs` by its handle.
	pub fn find_ref(&self, handle: u64) -> Option<&Mirror> {
		self.refs.iter().find(|m| m.handle == Some(handle))
	}
}

/// Unsolicited event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V8Event {
	#[serde(default)]
	pub seq: u64,
	pub event: String,
	#[serde(default)]
	pub body: Value,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum V8Message {
	Response(V8Response),
	Event(V8Event),
	/// Header-only greeting (`Type: connect`, `V8-Version`, ...).
	Connect {
		#[serde(default)]
		headers: HashMap<String, String>,
	},
}

/// Serialized object mirror (the V8 representation of a remote value).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mirror {
	#[serde(default)]
	pub handle: Option<u64>,
	/// Set instead of the full mirror when the value is only referenced.
	#[serde(default, rename = "ref")]
	pub reference: Option<u64>,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub class_name: Option<String>,
	#[serde(default)]
	pub value: Option<Value>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub inferred_name: Option<String>,
	#[serde(default)]
	pub properties: Vec<PropertyRef>,
}

impl Mirror {
	/// Returns true when this is only a `{ "ref": N }` placeholder.
	pub fn is_reference_only(&self) -> bool {
		self.kind.is_empty() && self.reference.is_some()
	}
}

/// Named property pointing at another mirror by handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRef {
	#[serde(deserialize_with = "name_from_any")]
	pub name: String,
	#[serde(rename = "ref")]
	pub reference: u64,
	#[serde(default)]
	pub property_type: Option<u8>,
}

/// Array indices arrive as numbers, everything else as strings.
fn name_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let value = Value::deserialize(deserializer)?;
	Ok(match value {
		Value::String(s) => s,
		other => other.to_string(),
	})
}

/// Script reference embedded in break events and frames.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRef {
	#[serde(default)]
	pub id: Option<u64>,
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default, rename = "ref")]
	pub reference: Option<u64>,
}

/// Body of `break` and `exception` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakBody {
	#[serde(default)]
	pub source_line: u32,
	#[serde(default)]
	pub source_column: u32,
	#[serde(default)]
	pub source_line_text: Option<String>,
	#[serde(default)]
	pub script: Option<ScriptRef>,
	#[serde(default)]
	pub breakpoints: Vec<u64>,
	/// Present on `exception` events.
	#[serde(default)]
	pub uncaught: Option<bool>,
	#[serde(default)]
	pub exception: Option<Mirror>,
}

/// Body of a `backtrace` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktraceBody {
	#[serde(default)]
	pub total_frames: u32,
	#[serde(default)]
	pub frames: Vec<FrameMirror>,
}

/// One frame of a `backtrace` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMirror {
	#[serde(default)]
	pub index: u32,
	#[serde(default)]
	pub func: Mirror,
	#[serde(default)]
	pub script: ScriptRef,
	#[serde(default)]
	pub line: u32,
	#[serde(default)]
	pub column: u32,
}

/// Body of a `scopes` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesBody {
	#[serde(default)]
	pub scopes: Vec<ScopeMirror>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeMirror {
	#[serde(rename = "type", default)]
	pub kind: u8,
	#[serde(default)]
	pub index: u32,
	#[serde(default)]
	pub object: Mirror,
}

/// Body of a `setbreakpoint` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetBreakpointBody {
	pub breakpoint: u64,
	#[serde(default)]
	pub script_name: Option<String>,
	#[serde(default)]
	pub line: Option<u32>,
}
