//! Debugger backends.
//!
//! [`DebugBackend`] is the one surface the session drives. Each backend turns
//! its protocol's events into [`BackendEvent`]s on a channel handed out when
//! it is built, so the session never looks at wire `type` or `method` strings.

mod chrome;
mod node;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bugs_runtime::Result;

pub use chrome::ChromeBackend;
pub use node::NodeBackend;

use crate::config::{ExceptionBreak, TransportKind};
use crate::location::{EditorLocation, ProtocolLocation};
use crate::value::RemoteValue;

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Backend-assigned breakpoint identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakpointId(pub String);

impl fmt::Display for BreakpointId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Reply to a successful `set_breakpoint`.
#[derive(Debug, Clone)]
pub struct BreakpointAck {
	pub id: BreakpointId,
	/// Where the backend actually placed it, when it says.
	pub resolved: Option<ProtocolLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
	Over,
	Into,
	Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseReason {
	Breakpoint(Vec<BreakpointId>),
	Exception { uncaught: bool, description: Option<String> },
	/// `debugger` statement, step completion, or any other backend reason.
	Other(String),
}

impl PauseReason {
	pub fn is_exception(&self) -> bool {
		matches!(self, PauseReason::Exception { .. })
	}
}

impl fmt::Display for PauseReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PauseReason::Breakpoint(_) => f.write_str("breakpoint"),
			PauseReason::Exception {
				uncaught,
				description,
			} => {
				f.write_str(if *uncaught { "uncaught exception" } else { "exception" })?;
				if let Some(description) = description {
					write!(f, ": {description}")?;
				}
				Ok(())
			}
			PauseReason::Other(reason) => f.write_str(reason),
		}
	}
}

/// One stack frame of the current pause, innermost first.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
	pub index: u32,
	pub function_name: Option<String>,
	pub location: ProtocolLocation,
	pub editor_location: EditorLocation,
	/// DevTools call frame id; absent for node.
	pub call_frame_id: Option<String>,
}

impl Frame {
	pub fn display_name(&self) -> &str {
		self.function_name.as_deref().unwrap_or("(anonymous)")
	}
}

impl fmt::Display for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{} {} ({})", self.index, self.display_name(), self.editor_location)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
	Global,
	Local,
	With,
	Closure,
	Catch,
	Block,
	Script,
	Other,
}

impl ScopeKind {
	/// V8 mirror scope type numbers.
	pub fn from_v8(kind: u8) -> Self {
		match kind {
			0 => ScopeKind::Global,
			1 => ScopeKind::Local,
			2 => ScopeKind::With,
			3 => ScopeKind::Closure,
			4 => ScopeKind::Catch,
			5 => ScopeKind::Block,
			6 => ScopeKind::Script,
			_ => ScopeKind::Other,
		}
	}

	pub fn from_cdp(kind: &str) -> Self {
		match kind {
			"global" => ScopeKind::Global,
			"local" => ScopeKind::Local,
			"with" => ScopeKind::With,
			"closure" => ScopeKind::Closure,
			"catch" => ScopeKind::Catch,
			"block" => ScopeKind::Block,
			"script" => ScopeKind::Script,
			_ => ScopeKind::Other,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ScopeKind::Global => "global",
			ScopeKind::Local => "local",
			ScopeKind::With => "with",
			ScopeKind::Closure => "closure",
			ScopeKind::Catch => "catch",
			ScopeKind::Block => "block",
			ScopeKind::Script => "script",
			ScopeKind::Other => "other",
		}
	}
}

#[derive(Debug, Clone)]
pub struct Scope {
	pub kind: ScopeKind,
	pub object: RemoteValue,
}

/// What a backend reports, already stripped of protocol details.
#[derive(Debug, Clone)]
pub enum BackendEvent {
	Paused {
		location: ProtocolLocation,
		reason: PauseReason,
	},
	Resumed,
	/// A resume reported as `Resumed` was rejected; the debuggee is still
	/// paused where it was.
	ResumeFailed,
	ScriptParsed {
		id: String,
		url: String,
	},
	BreakpointResolved {
		id: BreakpointId,
		location: ProtocolLocation,
	},
	Console {
		error: bool,
		text: String,
		location: Option<ProtocolLocation>,
	},
	/// The connection is gone; no further events follow.
	Disconnected,
}

/// Operations the session needs from a connected debugger.
pub trait DebugBackend: Send + Sync {
	fn kind(&self) -> TransportKind;

	fn set_exception_break(&self, policy: ExceptionBreak) -> BackendFuture<'_, ()>;

	fn set_breakpoint<'a>(
		&'a self,
		location: &'a ProtocolLocation,
		condition: Option<&'a str>,
	) -> BackendFuture<'a, BreakpointAck>;

	fn clear_breakpoint<'a>(&'a self, id: &'a BreakpointId) -> BackendFuture<'a, ()>;

	fn resume(&self) -> BackendFuture<'_, ()>;

	fn step(&self, action: StepAction) -> BackendFuture<'_, ()>;

	/// Frames of the current pause.
	fn backtrace(&self) -> BackendFuture<'_, Vec<Frame>>;

	fn scopes<'a>(&'a self, frame: &'a Frame) -> BackendFuture<'a, Vec<Scope>>;

	/// Evaluates in `frame`, or globally when `None`.
	fn evaluate<'a>(&'a self, expression: &'a str, frame: Option<&'a Frame>) -> BackendFuture<'a, RemoteValue>;

	/// Last handshake step, after breakpoints are registered.
	fn finish_handshake(&self) -> BackendFuture<'_, ()> {
		Box::pin(async { Ok(()) })
	}

	/// Politely detaches from the debuggee.
	fn disconnect(&self) -> BackendFuture<'_, ()>;

	/// Drops the connection, failing anything still outstanding.
	fn close(&self);
}
