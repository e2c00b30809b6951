//! Session configuration.
//!
//! [`SessionConfig`] is what an editor hands over when the user starts
//! debugging. It deserializes from camelCase JSON so a front end can pass it
//! through unchanged.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bugs_runtime::{Error, Result, RetryPolicy, expand_home};
use serde::{Deserialize, Serialize};

use crate::location::SourceMapper;

pub const DEFAULT_NODE_PORT: u16 = 5858;
pub const DEFAULT_NODE_HOST: &str = "localhost";
pub const DEFAULT_CHROME_PORT: u16 = 9222;
pub const DEFAULT_CHROME_HOST: &str = "127.0.0.1";

pub const NODE_CONNECT_ATTEMPTS: u32 = 5;
pub const CHROME_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Flag that makes node open its debug port and stop before the first line.
pub const DEFAULT_DEBUG_FLAG: &str = "--debug-brk";

pub const NODE_BINARY_ENV: &str = "BUGS_NODE_BINARY";
pub const CHROME_BINARY_ENV: &str = "BUGS_CHROME_BINARY";

/// Which debugger protocol the debuggee speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
	/// Node.js, legacy V8 debugger protocol over TCP.
	#[default]
	Node,
	/// Chrome, DevTools protocol over WebSocket.
	#[serde(alias = "chrome")]
	Browser,
}

impl std::fmt::Display for TransportKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TransportKind::Node => "node",
			TransportKind::Browser => "browser",
		})
	}
}

/// Which exceptions pause the debuggee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionBreak {
	None,
	Uncaught,
	#[default]
	All,
}

impl ExceptionBreak {
	/// Value of `Debugger.setPauseOnExceptions` `state`.
	pub fn as_str(self) -> &'static str {
		match self {
			ExceptionBreak::None => "none",
			ExceptionBreak::Uncaught => "uncaught",
			ExceptionBreak::All => "all",
		}
	}
}

impl std::str::FromStr for ExceptionBreak {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"none" => Ok(ExceptionBreak::None),
			"uncaught" => Ok(ExceptionBreak::Uncaught),
			"all" => Ok(ExceptionBreak::All),
			other => Err(Error::InvalidArgument(format!(
				"exception break must be none, uncaught or all, got {other:?}"
			))),
		}
	}
}

/// What to do with the first pause of a session.
///
/// `node --debug-brk` stops before the first statement. With `Resume` that
/// pause is reported as a message and the script continues to the first real
/// breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialBreak {
	Resume,
	Stop,
}

/// Everything needed to start one debug session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	pub transport_kind: TransportKind,
	/// Script to run (node).
	pub file_name: Option<PathBuf>,
	/// Page to open and the served root for URL rewriting (browser).
	pub url: Option<String>,
	/// Runtime executable; falls back to the environment, then `PATH`.
	pub binary: Option<PathBuf>,
	/// Extra arguments passed after the script.
	pub args: Vec<String>,
	/// Added to the inherited environment.
	pub env: BTreeMap<String, String>,
	pub cwd: Option<PathBuf>,
	/// Source directory relative to `cwd` that the page URL serves (browser).
	pub sources: Option<PathBuf>,
	/// Local root override for URL rewriting (browser).
	pub source_maps: Option<PathBuf>,
	pub port: Option<u16>,
	pub hostname: Option<String>,
	pub exception_break: ExceptionBreak,
	/// Defaults to `resume` for a launched node script, `stop` otherwise.
	pub initial_break: Option<InitialBreak>,
	pub debug_flag: String,
	pub connect_attempts: Option<u32>,
	pub retry_backoff_ms: u64,
	/// Connect to an already running debuggee instead of spawning one.
	pub attach: bool,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			transport_kind: TransportKind::Node,
			file_name: None,
			url: None,
			binary: None,
			args: Vec::new(),
			env: BTreeMap::new(),
			cwd: None,
			sources: None,
			source_maps: None,
			port: None,
			hostname: None,
			exception_break: ExceptionBreak::default(),
			initial_break: None,
			debug_flag: DEFAULT_DEBUG_FLAG.to_string(),
			connect_attempts: None,
			retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
			attach: false,
		}
	}
}

impl SessionConfig {
	/// Config for debugging a node script.
	pub fn node(file_name: impl Into<PathBuf>) -> Self {
		Self {
			transport_kind: TransportKind::Node,
			file_name: Some(file_name.into()),
			..Default::default()
		}
	}

	/// Config for debugging a page in Chrome.
	pub fn browser(url: Option<String>) -> Self {
		Self {
			transport_kind: TransportKind::Browser,
			url,
			..Default::default()
		}
	}

	pub fn port(&self) -> u16 {
		self.port.unwrap_or(match self.transport_kind {
			TransportKind::Node => DEFAULT_NODE_PORT,
			TransportKind::Browser => DEFAULT_CHROME_PORT,
		})
	}

	pub fn hostname(&self) -> &str {
		self.hostname.as_deref().unwrap_or(match self.transport_kind {
			TransportKind::Node => DEFAULT_NODE_HOST,
			TransportKind::Browser => DEFAULT_CHROME_HOST,
		})
	}

	pub fn initial_break(&self) -> InitialBreak {
		self.initial_break.unwrap_or(match self.transport_kind {
			TransportKind::Node if !self.attach => InitialBreak::Resume,
			_ => InitialBreak::Stop,
		})
	}

	pub fn retry_policy(&self) -> RetryPolicy {
		let attempts = self.connect_attempts.unwrap_or(match self.transport_kind {
			TransportKind::Node => NODE_CONNECT_ATTEMPTS,
			TransportKind::Browser => CHROME_CONNECT_ATTEMPTS,
		});
		RetryPolicy::new(attempts, Duration::from_millis(self.retry_backoff_ms))
	}

	/// Script path with `~` expanded.
	pub fn script_path(&self) -> Option<PathBuf> {
		self.file_name
			.as_ref()
			.map(|p| expand_home(&p.to_string_lossy()))
	}

	pub fn working_dir(&self) -> Option<PathBuf> {
		self.cwd.as_ref().map(|p| expand_home(&p.to_string_lossy()))
	}

	/// Builds the location mapper for this session.
	///
	/// Node scripts are addressed by path, so nothing is rewritten. For the
	/// browser, URLs under `url` map to files under `source_maps`, else
	/// `cwd/sources`, else `cwd`.
	pub fn source_mapper(&self) -> SourceMapper {
		if self.transport_kind == TransportKind::Node {
			return SourceMapper::Identity;
		}
		let Some(served_root) = self.url.as_deref() else {
			return SourceMapper::Identity;
		};

		let local_root = match (&self.source_maps, self.working_dir()) {
			(Some(maps), _) => Some(expand_home(&maps.to_string_lossy())),
			(None, Some(cwd)) => Some(match &self.sources {
				Some(sources) => cwd.join(sources),
				None => cwd,
			}),
			(None, None) => None,
		};

		match local_root {
			Some(local_root) => SourceMapper::served(served_root, &local_root.to_string_lossy()),
			None => SourceMapper::Identity,
		}
	}

	/// Checks that the config names something to debug.
	pub fn validate(&self) -> Result<()> {
		match self.transport_kind {
			TransportKind::Node if !self.attach && self.file_name.is_none() => Err(Error::InvalidArgument(
				"node sessions need a script (fileName)".to_string(),
			)),
			_ if self.debug_flag.is_empty() => Err(Error::InvalidArgument("debug flag must not be empty".to_string())),
			_ => Ok(()),
		}
	}
}
