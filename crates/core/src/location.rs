//! Conversion between editor positions and debugger positions.
//!
//! Editors count lines from 1 and address files by path. Both debugger
//! protocols count from 0, and the browser addresses scripts by the URL the
//! page was served from.

use std::fmt;
use std::str::FromStr;

use bugs_runtime::{Error, Result};

/// A 1-based position in a local file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EditorLocation {
	pub path: String,
	pub line: u32,
	pub column: Option<u32>,
}

impl EditorLocation {
	pub fn new(path: impl Into<String>, line: u32, column: Option<u32>) -> Self {
		Self {
			path: path.into(),
			line,
			column,
		}
	}
}

impl fmt::Display for EditorLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.column {
			Some(column) => write!(f, "{}:{}:{}", self.path, self.line, column),
			None => write!(f, "{}:{}", self.path, self.line),
		}
	}
}

impl FromStr for EditorLocation {
	type Err = Error;

	/// Parses `path:line` or `path:line:column`.
	///
	/// Splits from the right so paths containing `:` (URLs, drive letters)
	/// survive.
	fn from_str(s: &str) -> Result<Self> {
		let invalid = || Error::InvalidArgument(format!("expected path:line[:column], got {s:?}"));

		let (head, last) = s.rsplit_once(':').ok_or_else(invalid)?;
		let last: u32 = last.parse().map_err(|_| invalid())?;

		let (path, line, column) = match head.rsplit_once(':') {
			Some((path, line)) if !path.is_empty() && line.parse::<u32>().is_ok() => {
				(path, line.parse::<u32>().map_err(|_| invalid())?, Some(last))
			}
			_ => (head, last, None),
		};

		if path.is_empty() || line == 0 {
			return Err(invalid());
		}
		Ok(EditorLocation::new(path, line, column))
	}
}

/// A 0-based position as the debugger reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtocolLocation {
	/// Script path (node) or URL (browser).
	pub script: String,
	pub line: u32,
	pub column: u32,
}

impl ProtocolLocation {
	pub fn new(script: impl Into<String>, line: u32, column: u32) -> Self {
		Self {
			script: script.into(),
			line,
			column,
		}
	}
}

impl fmt::Display for ProtocolLocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.script, self.line, self.column)
	}
}

/// Maps script identifiers between the debugger and the local file system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SourceMapper {
	/// Scripts are addressed by their local path.
	#[default]
	Identity,
	/// Scripts under `served_root` are files under `local_root`.
	Served { served_root: String, local_root: String },
}

impl SourceMapper {
	pub fn served(served_root: &str, local_root: &str) -> Self {
		SourceMapper::Served {
			served_root: served_root.trim_end_matches('/').to_string(),
			local_root: local_root.trim_end_matches('/').to_string(),
		}
	}

	/// Converts an editor position into what the debugger expects.
	pub fn to_protocol_location(&self, path: &str, line: u32) -> Result<ProtocolLocation> {
		if line == 0 {
			return Err(Error::InvalidArgument(format!(
				"line numbers start at 1, got 0 for {path}"
			)));
		}
		Ok(ProtocolLocation::new(self.to_script_url(path), line - 1, 0))
	}

	/// Converts a debugger position into an editor position.
	pub fn to_editor_location(&self, location: &ProtocolLocation) -> EditorLocation {
		EditorLocation::new(
			self.to_local_path(&location.script),
			location.line + 1,
			Some(location.column + 1),
		)
	}

	pub fn to_script_url(&self, path: &str) -> String {
		match self {
			SourceMapper::Identity => path.to_string(),
			SourceMapper::Served { served_root, local_root } => rebase(path, local_root, served_root),
		}
	}

	pub fn to_local_path(&self, script: &str) -> String {
		match self {
			SourceMapper::Identity => script.to_string(),
			SourceMapper::Served { served_root, local_root } => rebase(script, served_root, local_root),
		}
	}
}

/// Swaps `from` for `to` when `value` lies under `from`.
fn rebase(value: &str, from: &str, to: &str) -> String {
	match value.strip_prefix(from) {
		Some(rest) if rest.is_empty() || rest.starts_with('/') => format!("{to}{rest}"),
		_ => value.to_string(),
	}
}
