//! Error types for the debug session runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a debuggee.
#[derive(Debug, Error)]
pub enum Error {
	/// The debugger transport could not be reached within the retry budget.
	#[error("Failed to connect debugger after {attempts} attempt(s): {reason}")]
	ConnectionFailed { attempts: u32, reason: String },

	/// The debuggee process could not be started.
	#[error("Failed to launch debuggee: {0}")]
	LaunchFailed(String),

	/// The debuggee process exited.
	#[error("Debuggee exited{}", .0.map(|c| format!(" with code {c}")).unwrap_or_default())]
	ProcessExited(Option<i32>),

	/// Transport-level error (socket or WebSocket I/O).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// The backend sent something that does not fit the expected shape.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// A message failed to parse or referenced an unknown request id.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),

	/// The backend rejected a request (evaluation error, invalid breakpoint, ...).
	#[error("{name}: {message}")]
	Remote {
		/// Error class reported by the debuggee (e.g. "ReferenceError")
		name: String,
		/// Human-readable error message
		message: String,
	},

	/// Target discovery over HTTP did not produce a usable endpoint.
	#[error("Target discovery failed: {0}")]
	Discovery(String),

	/// The session was torn down while the operation was outstanding.
	#[error("Debug session closed")]
	SessionClosed,

	/// Operation is not valid in the current session state.
	#[error("Cannot {operation} while session is {state}")]
	InvalidState { operation: &'static str, state: String },

	/// A bounded wait elapsed (event waiters, teardown).
	#[error("Timeout: {0}")]
	Timeout(String),

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// HTTP error during target discovery.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	/// WebSocket error.
	#[error("WebSocket error: {0}")]
	WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
	/// Builds a [`Error::Remote`] from a debugger message such as
	/// `"ReferenceError: foo is not defined"`.
	pub fn remote(message: impl Into<String>) -> Self {
		let message = message.into();
		match message.split_once(": ") {
			Some((name, rest)) if is_error_class(name) => Error::Remote {
				name: name.to_string(),
				message: rest.to_string(),
			},
			_ => Error::Remote {
				name: "Error".to_string(),
				message,
			},
		}
	}

	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name.as_str()),
			_ => None,
		}
	}

	/// Returns true if the error ends the session rather than one request.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			Error::ConnectionFailed { .. }
				| Error::LaunchFailed(_)
				| Error::ProcessExited(_)
				| Error::TransportError(_)
				| Error::SessionClosed
				| Error::Discovery(_)
				| Error::WebSocket(_)
		)
	}

	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}

	/// Returns true if this is a closed-session error.
	pub fn is_session_closed(&self) -> bool {
		matches!(self, Error::SessionClosed)
	}
}

fn is_error_class(name: &str) -> bool {
	!name.is_empty() && name.ends_with("Error") && name.chars().all(|c| c.is_ascii_alphanumeric())
}
