//! Chrome DevTools Protocol subset used by the browser backend.
//!
//! Requests carry an `id` mirrored by the peer in the response; notifications
//! carry a `method` and no `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method and notification names, grouped by domain.
pub mod methods {
	pub mod debugger {
		pub const ENABLE: &str = "Debugger.enable";
		pub const SET_BREAKPOINTS_ACTIVE: &str = "Debugger.setBreakpointsActive";
		pub const SET_PAUSE_ON_EXCEPTIONS: &str = "Debugger.setPauseOnExceptions";
		pub const SET_BREAKPOINT_BY_URL: &str = "Debugger.setBreakpointByUrl";
		pub const REMOVE_BREAKPOINT: &str = "Debugger.removeBreakpoint";
		pub const RESUME: &str = "Debugger.resume";
		pub const STEP_OVER: &str = "Debugger.stepOver";
		pub const STEP_INTO: &str = "Debugger.stepInto";
		pub const STEP_OUT: &str = "Debugger.stepOut";
		pub const EVALUATE_ON_CALL_FRAME: &str = "Debugger.evaluateOnCallFrame";

		pub const PAUSED: &str = "Debugger.paused";
		pub const RESUMED: &str = "Debugger.resumed";
		pub const SCRIPT_PARSED: &str = "Debugger.scriptParsed";
		pub const BREAKPOINT_RESOLVED: &str = "Debugger.breakpointResolved";
	}

	pub mod console {
		pub const ENABLE: &str = "Console.enable";
		pub const MESSAGE_ADDED: &str = "Console.messageAdded";
	}

	pub mod page {
		pub const NAVIGATE: &str = "Page.navigate";
	}

	pub mod overlay {
		pub const SET_PAUSED_MESSAGE: &str = "Overlay.setPausedInDebuggerMessage";
	}

	pub mod runtime {
		pub const EVALUATE: &str = "Runtime.evaluate";
		pub const GET_PROPERTIES: &str = "Runtime.getProperties";
	}
}

/// Outgoing command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpRequest {
	pub id: u64,
	pub method: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub params: Option<Value>,
}

/// Error object of a failed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpError {
	#[serde(default)]
	pub code: i64,
	pub message: String,
	#[serde(default)]
	pub data: Option<String>,
}

/// Response to a [`CdpRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpResponse {
	pub id: u64,
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<CdpError>,
}

/// Notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpEvent {
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
	/// Has an `id` field.
	Response(CdpResponse),
	/// Has a `method` field and no `id`.
	Event(CdpEvent),
	Unknown(Value),
}

/// Mirror of a value living in the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub subtype: Option<String>,
	#[serde(default)]
	pub class_name: Option<String>,
	#[serde(default)]
	pub value: Option<Value>,
	#[serde(default)]
	pub unserializable_value: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub object_id: Option<String>,
}

/// Entry of a `Runtime.getProperties` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
	pub name: String,
	#[serde(default)]
	pub value: Option<RemoteObject>,
	#[serde(default)]
	pub is_own: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPropertiesResult {
	#[serde(default)]
	pub result: Vec<PropertyDescriptor>,
}

/// Script position; lines and columns are 0-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
	pub script_id: String,
	pub line_number: u32,
	#[serde(default)]
	pub column_number: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
	#[serde(rename = "type")]
	pub kind: String,
	pub object: RemoteObject,
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
	pub call_frame_id: String,
	#[serde(default)]
	pub function_name: String,
	pub location: Location,
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub scope_chain: Vec<Scope>,
}

/// Params of `Debugger.paused`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
	#[serde(default)]
	pub call_frames: Vec<CallFrame>,
	#[serde(default)]
	pub reason: String,
	#[serde(default)]
	pub data: Option<Value>,
	#[serde(default)]
	pub hit_breakpoints: Vec<String>,
}

/// Params of `Debugger.scriptParsed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsedEvent {
	pub script_id: String,
	#[serde(default)]
	pub url: String,
}

/// Params of `Debugger.breakpointResolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResolvedEvent {
	pub breakpoint_id: String,
	pub location: Location,
}

/// Result of `Debugger.setBreakpointByUrl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointByUrlResult {
	pub breakpoint_id: String,
	#[serde(default)]
	pub locations: Vec<Location>,
}

/// Result of `Runtime.evaluate` and `Debugger.evaluateOnCallFrame`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
	pub result: RemoteObject,
	#[serde(default)]
	pub exception_details: Option<ExceptionDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub exception: Option<RemoteObject>,
}

/// Params of `Console.messageAdded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessageAdded {
	pub message: ConsoleMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
	#[serde(default)]
	pub source: String,
	#[serde(default)]
	pub level: String,
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub url: Option<String>,
	/// 1-based; 0 when unknown.
	#[serde(default)]
	pub line: u32,
	#[serde(default)]
	pub column: u32,
}

/// Entry of the `GET /json` discovery list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	#[serde(default)]
	pub id: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}
