use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BugsError>;

#[derive(Debug, Error)]
pub enum BugsError {
	/// Bad command-line or REPL input.
	#[error("{0}")]
	Usage(String),

	#[error("invalid config {path}: {source}")]
	Config {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	Session(#[from] bugs::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),

	/// The failure was already shown as session events.
	#[error("output already printed")]
	OutputAlreadyPrinted,
}

impl BugsError {
	/// Short machine-readable code for JSON output.
	pub fn code(&self) -> &'static str {
		match self {
			BugsError::Usage(_) => "USAGE",
			BugsError::Config { .. } => "INVALID_CONFIG",
			BugsError::Session(e) => match e {
				bugs::Error::ConnectionFailed { .. } => "CONNECTION_FAILED",
				bugs::Error::LaunchFailed(_) | bugs::Error::ProcessExited(_) => "LAUNCH_FAILED",
				bugs::Error::Remote { .. } => "REMOTE_ERROR",
				bugs::Error::InvalidState { .. } => "INVALID_STATE",
				bugs::Error::SessionClosed => "SESSION_CLOSED",
				bugs::Error::Timeout(_) => "TIMEOUT",
				_ => "SESSION_ERROR",
			},
			BugsError::Io(_) => "IO_ERROR",
			BugsError::Json(_) => "JSON_ERROR",
			BugsError::Anyhow(_) | BugsError::OutputAlreadyPrinted => "INTERNAL_ERROR",
		}
	}

	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, BugsError::OutputAlreadyPrinted)
	}

	/// Whether the session can carry on after this error in the REPL.
	pub fn is_recoverable(&self) -> bool {
		match self {
			BugsError::Session(e) => !e.is_fatal(),
			BugsError::Usage(_) => true,
			_ => false,
		}
	}
}
