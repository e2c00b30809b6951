//! Line-oriented command loop over a running session.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use bugs::{BreakpointKey, BreakpointSpec, EventStream, Session, SessionEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{BugsError, Result};
use crate::output::{Printer, Reply};

/// Property depth shown for each scope by `scope`.
const SCOPE_DEPTH: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
	Continue,
	Next,
	Step,
	Out,
	Print(String),
	Inspect(String),
	Backtrace,
	Scopes(usize),
	Break(BreakpointSpec),
	Delete(BreakpointKey),
	Breakpoints,
	State,
	Help,
	Quit,
}

impl Command {
	pub fn name(&self) -> &'static str {
		match self {
			Command::Continue => "continue",
			Command::Next => "next",
			Command::Step => "step",
			Command::Out => "out",
			Command::Print(_) => "print",
			Command::Inspect(_) => "inspect",
			Command::Backtrace => "backtrace",
			Command::Scopes(_) => "scope",
			Command::Break(_) => "break",
			Command::Delete(_) => "delete",
			Command::Breakpoints => "breakpoints",
			Command::State => "state",
			Command::Help => "help",
			Command::Quit => "quit",
		}
	}
}

impl FromStr for Command {
	type Err = BugsError;

	fn from_str(line: &str) -> Result<Self> {
		let line = line.trim();
		let (word, rest) = match line.split_once(char::is_whitespace) {
			Some((word, rest)) => (word, rest.trim()),
			None => (line, ""),
		};
		let argument = |what: &str| {
			if rest.is_empty() {
				Err(BugsError::Usage(format!("`{word}` needs {what}")))
			} else {
				Ok(rest.to_string())
			}
		};

		Ok(match word {
			"c" | "cont" | "continue" => Command::Continue,
			"n" | "next" => Command::Next,
			"s" | "step" => Command::Step,
			"o" | "out" | "finish" => Command::Out,
			"p" | "print" => Command::Print(argument("an expression")?),
			"i" | "inspect" => Command::Inspect(argument("an expression")?),
			"bt" | "backtrace" | "where" => Command::Backtrace,
			"scope" | "scopes" if rest.is_empty() => Command::Scopes(0),
			"scope" | "scopes" => Command::Scopes(
				rest.parse()
					.map_err(|_| BugsError::Usage(format!("invalid frame index `{rest}`")))?,
			),
			"b" | "break" => Command::Break(parse_breakpoint(&argument("FILE:LINE")?)?),
			"d" | "delete" => {
				let key = argument("a breakpoint id")?;
				Command::Delete(BreakpointKey(
					key.parse()
						.map_err(|_| BugsError::Usage(format!("invalid breakpoint id `{key}`")))?,
				))
			}
			"bl" | "breakpoints" => Command::Breakpoints,
			"state" => Command::State,
			"h" | "help" | "?" => Command::Help,
			"q" | "quit" | "exit" => Command::Quit,
			other => return Err(BugsError::Usage(format!("unknown command `{other}` (try `help`)"))),
		})
	}
}

/// Parses `FILE:LINE` with an optional trailing `if CONDITION`.
///
/// Relative paths are made absolute against the current directory, since
/// backends match scripts by absolute path.
pub fn parse_breakpoint(text: &str) -> Result<BreakpointSpec> {
	let (location, condition) = match text.split_once(" if ") {
		Some((location, condition)) => (location.trim(), Some(condition.trim())),
		None => (text.trim(), None),
	};
	let (path, line) = location
		.rsplit_once(':')
		.filter(|(path, _)| !path.is_empty())
		.ok_or_else(|| BugsError::Usage(format!("expected FILE:LINE, got `{location}`")))?;
	let line: u32 = line
		.parse()
		.ok()
		.filter(|line| *line > 0)
		.ok_or_else(|| BugsError::Usage(format!("invalid line number `{line}`")))?;

	let path = Path::new(path);
	let path = if path.is_absolute() {
		path.to_path_buf()
	} else {
		std::path::absolute(path)?
	};

	let spec = BreakpointSpec::new(path.to_string_lossy(), line);
	Ok(match condition.filter(|c| !c.is_empty()) {
		Some(condition) => spec.with_condition(condition),
		None => spec,
	})
}

/// Runs one command against the session.
pub async fn execute(session: &Session, command: &Command) -> Result<Reply> {
	Ok(match command {
		Command::Continue => {
			session.resume().await?;
			Reply::Done
		}
		Command::Next => {
			session.step_over().await?;
			Reply::Done
		}
		Command::Step => {
			session.step_into().await?;
			Reply::Done
		}
		Command::Out => {
			session.step_out().await?;
			Reply::Done
		}
		Command::Print(expression) => Reply::Value(session.evaluate(expression).await?),
		Command::Inspect(expression) => Reply::Inspected(session.inspect(expression).await?),
		Command::Backtrace => Reply::Frames(session.frames()),
		Command::Scopes(frame) => {
			let mut scopes = Vec::new();
			for scope in session.scopes(*frame).await? {
				let variables = bugs::materialize(&scope.object, SCOPE_DEPTH).await?;
				scopes.push((scope.kind, variables));
			}
			Reply::Scopes(scopes)
		}
		Command::Break(spec) => Reply::Breakpoint(session.set_breakpoint(spec.clone()).await?),
		Command::Delete(key) => {
			session.clear_breakpoint(*key).await?;
			Reply::Done
		}
		Command::Breakpoints => Reply::Breakpoints(session.breakpoints()),
		Command::State => Reply::State(session.state()),
		Command::Help => Reply::Help,
		Command::Quit => Reply::Done,
	})
}

/// Reads commands from `input` and prints session events until the session
/// closes, the input ends, or the user quits. The session is destroyed on
/// the way out.
pub async fn run<W, R>(
	session: &Session,
	printer: &mut Printer<W>,
	mut events: EventStream<SessionEvent>,
	input: R,
) -> Result<()>
where
	W: Write,
	R: AsyncBufRead + Unpin,
{
	let mut lines = input.lines();
	loop {
		tokio::select! {
			event = events.recv() => match event {
				Some(event) => {
					printer.event(&event);
					if matches!(event, SessionEvent::Closed) {
						return Ok(());
					}
				}
				None => return Ok(()),
			},
			line = lines.next_line() => {
				let Some(line) = line? else {
					tracing::debug!("Input closed, ending session");
					break;
				};
				if line.trim().is_empty() {
					continue;
				}
				let command = match line.parse::<Command>() {
					Ok(command) => command,
					Err(err) => {
						printer.error("parse", &err);
						continue;
					}
				};
				if command == Command::Quit {
					break;
				}
				tracing::debug!(command = command.name(), "Executing");
				match execute(session, &command).await {
					Ok(reply) => printer.result(command.name(), &reply),
					Err(err) if err.is_recoverable() => printer.error(command.name(), &err),
					Err(err) => {
						session.destroy().await;
						drain(printer, &mut events);
						return Err(err);
					}
				}
			}
		}
	}

	session.destroy().await;
	drain(printer, &mut events);
	Ok(())
}

/// Prints whatever the session emitted while shutting down.
pub fn drain<W: Write>(printer: &mut Printer<W>, events: &mut EventStream<SessionEvent>) {
	while let Some(event) = events.try_recv() {
		printer.event(&event);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_short_and_long_forms() {
		assert_eq!("c".parse::<Command>().unwrap(), Command::Continue);
		assert_eq!("next".parse::<Command>().unwrap(), Command::Next);
		assert_eq!("  s  ".parse::<Command>().unwrap(), Command::Step);
		assert_eq!("finish".parse::<Command>().unwrap(), Command::Out);
		assert_eq!("bt".parse::<Command>().unwrap(), Command::Backtrace);
		assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
	}

	#[test]
	fn expressions_keep_their_spacing() {
		assert_eq!(
			"p  a + b".parse::<Command>().unwrap(),
			Command::Print("a + b".to_string())
		);
		assert_eq!(
			"inspect window.location".parse::<Command>().unwrap(),
			Command::Inspect("window.location".to_string())
		);
	}

	#[test]
	fn missing_arguments_are_usage_errors() {
		assert!(matches!("p".parse::<Command>(), Err(BugsError::Usage(_))));
		assert!(matches!("b".parse::<Command>(), Err(BugsError::Usage(_))));
		assert!(matches!("d x".parse::<Command>(), Err(BugsError::Usage(_))));
		assert!(matches!("frobnicate".parse::<Command>(), Err(BugsError::Usage(_))));
	}

	#[test]
	fn scope_defaults_to_top_frame() {
		assert_eq!("scope".parse::<Command>().unwrap(), Command::Scopes(0));
		assert_eq!("scope 2".parse::<Command>().unwrap(), Command::Scopes(2));
		assert_eq!("d 3".parse::<Command>().unwrap(), Command::Delete(BreakpointKey(3)));
	}

	#[test]
	fn breakpoint_with_condition() {
		let spec = parse_breakpoint("/srv/app/main.js:12 if n > 1").unwrap();
		assert_eq!(spec.path, "/srv/app/main.js");
		assert_eq!(spec.line, 12);
		assert_eq!(spec.condition.as_deref(), Some("n > 1"));

		let spec = parse_breakpoint("/srv/app/main.js:3").unwrap();
		assert_eq!(spec.condition, None);
	}

	#[test]
	fn relative_breakpoint_paths_become_absolute() {
		let spec = parse_breakpoint("lib/util.js:7").unwrap();
		let expected = std::env::current_dir().unwrap().join("lib/util.js");
		assert_eq!(spec.path, expected.to_string_lossy());
	}

	#[test]
	fn rejects_bad_locations() {
		assert!(parse_breakpoint("main.js").is_err());
		assert!(parse_breakpoint(":4").is_err());
		assert!(parse_breakpoint("/srv/main.js:0").is_err());
		assert!(parse_breakpoint("/srv/main.js:abc").is_err());
	}

	#[test]
	fn windows_style_drive_letters_keep_the_last_colon() {
		let spec = parse_breakpoint("/c:/work/app.js:9").unwrap();
		assert_eq!(spec.path, "/c:/work/app.js");
		assert_eq!(spec.line, 9);
	}
}
