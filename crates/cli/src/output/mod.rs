//! Rendering of session events and command results.
//!
//! Text output is meant for a terminal. JSON output writes one object per
//! line on stdout, so a driving program can follow the session:
//!
//! ```json
//! {"event":"break","location":"/srv/app/main.js:3:5","reason":"breakpoint"}
//! {"ok":true,"command":"print","data":{"kind":"number","text":"2"}}
//! {"ok":false,"command":"print","error":{"code":"REMOTE_ERROR","message":"ReferenceError: x is not defined"}}
//! ```


use std::io::{self, Write};

use bugs::{Breakpoint, Frame, Materialized, RemoteValue, ScopeKind, SessionEvent, SessionState};
use colored::Colorize;
use serde_json::{Value, json};

use crate::error::BugsError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text
	#[default]
	Text,
	/// One JSON object per line
	Json,
}

/// What a REPL command produced.
#[derive(Debug)]
pub enum Reply {
	Done,
	Value(RemoteValue),
	Inspected(Materialized),
	Frames(Vec<Frame>),
	Scopes(Vec<(ScopeKind, Materialized)>),
	Breakpoint(Breakpoint),
	Breakpoints(Vec<Breakpoint>),
	State(SessionState),
	Help,
}

pub const HELP: &str = "\
c, continue          resume execution
n, next              step over
s, step              step into
o, out               step out
p, print EXPR        evaluate EXPR
i, inspect EXPR      evaluate EXPR and expand objects
bt, backtrace        show the call stack
scope [N]            show variables of frame N (default 0)
b, break FILE:LINE [if COND]
                     set a breakpoint
d, delete ID         remove a breakpoint
bl, breakpoints      list breakpoints
state                show the session state
q, quit              end the session";

pub struct Printer<W: Write> {
	format: OutputFormat,
	out: W,
}

impl Printer<io::Stdout> {
	pub fn stdout(format: OutputFormat) -> Self {
		Self::new(format, io::stdout())
	}
}

impl<W: Write> Printer<W> {
	pub fn new(format: OutputFormat, out: W) -> Self {
		Self { format, out }
	}

	pub fn format(&self) -> OutputFormat {
		self.format
	}

	#[cfg(test)]
	pub fn into_inner(self) -> W {
		self.out
	}

	pub fn event(&mut self, event: &SessionEvent) {
		match self.format {
			OutputFormat::Json => {
				let line = event_json(event);
				self.line(&line.to_string());
			}
			OutputFormat::Text => {
				if let Some(text) = event_text(event) {
					self.line(&text);
				}
			}
		}
	}

	pub fn result(&mut self, command: &str, reply: &Reply) {
		match self.format {
			OutputFormat::Json => {
				let mut envelope = json!({"ok": true, "command": command});
				if let Some(data) = reply_json(reply) {
					envelope["data"] = data;
				}
				self.line(&envelope.to_string());
			}
			OutputFormat::Text => {
				if let Some(text) = reply_text(reply) {
					self.line(&text);
				}
			}
		}
	}

	pub fn error(&mut self, command: &str, err: &BugsError) {
		match self.format {
			OutputFormat::Json => {
				let envelope = json!({
					"ok": false,
					"command": command,
					"error": {"code": err.code(), "message": err.to_string()},
				});
				self.line(&envelope.to_string());
			}
			OutputFormat::Text => {
				let text = format!("{} {err}", "error:".red().bold());
				self.line(&text);
			}
		}
	}

	fn line(&mut self, text: &str) {
		let _ = writeln!(self.out, "{text}");
		let _ = self.out.flush();
	}
}

fn event_text(event: &SessionEvent) -> Option<String> {
	Some(match event {
		SessionEvent::Message(text) => text.trim_end().to_string(),
		SessionEvent::Error(text) => text.trim_end().red().to_string(),
		SessionEvent::Started => "Debugger attached".green().to_string(),
		SessionEvent::Break { location, reason } => {
			format!("{} ({reason}) at {location}", "Paused".yellow().bold())
		}
		SessionEvent::Resumed => "Resumed".dimmed().to_string(),
		SessionEvent::BreakpointResolved { key, location } => {
			format!("Breakpoint {key} resolved to {location}")
		}
		SessionEvent::Closed => "Session closed".dimmed().to_string(),
		SessionEvent::BacktraceChanged(_) | SessionEvent::StateChanged(_) => return None,
	})
}

fn event_json(event: &SessionEvent) -> Value {
	let mut value = json!({"event": event.name()});
	match event {
		SessionEvent::Message(text) | SessionEvent::Error(text) => value["text"] = json!(text),
		SessionEvent::Break { location, reason } => {
			value["location"] = json!(location.to_string());
			value["reason"] = json!(reason.to_string());
		}
		SessionEvent::BacktraceChanged(frames) => {
			value["frames"] = Value::Array(frames.iter().map(frame_json).collect());
		}
		SessionEvent::BreakpointResolved { key, location } => {
			value["id"] = json!(key.0);
			value["location"] = json!(location.to_string());
		}
		SessionEvent::StateChanged(state) => value["state"] = json!(state.as_str()),
		SessionEvent::Started | SessionEvent::Resumed | SessionEvent::Closed => {}
	}
	value
}

fn frame_json(frame: &Frame) -> Value {
	json!({
		"index": frame.index,
		"function": frame.display_name(),
		"location": frame.editor_location.to_string(),
	})
}

fn breakpoint_json(breakpoint: &Breakpoint) -> Value {
	json!({
		"id": breakpoint.key.0,
		"path": breakpoint.spec.path,
		"line": breakpoint.spec.line,
		"condition": breakpoint.spec.condition,
		"registered": breakpoint.is_registered(),
		"resolved": breakpoint.resolved.as_ref().map(ToString::to_string),
	})
}

/// Objects become JSON objects; anything cut short stays as its text form.
fn materialized_json(value: &Materialized) -> Value {
	match value {
		Materialized::Primitive { value, .. } => value.clone(),
		Materialized::Object { properties, .. } => Value::Object(
			properties
				.iter()
				.map(|(name, child)| (name.clone(), materialized_json(child)))
				.collect(),
		),
		other => json!(other.to_string()),
	}
}

fn reply_json(reply: &Reply) -> Option<Value> {
	Some(match reply {
		Reply::Done => return None,
		Reply::Value(value) => json!({
			"kind": value.kind.as_str(),
			"className": value.class_name,
			"text": value.to_string(),
		}),
		Reply::Inspected(value) => json!({"value": materialized_json(value), "text": value.to_string()}),
		Reply::Frames(frames) => Value::Array(frames.iter().map(frame_json).collect()),
		Reply::Scopes(scopes) => Value::Array(
			scopes
				.iter()
				.map(|(kind, vars)| json!({"kind": kind.as_str(), "variables": materialized_json(vars)}))
				.collect(),
		),
		Reply::Breakpoint(breakpoint) => breakpoint_json(breakpoint),
		Reply::Breakpoints(list) => Value::Array(list.iter().map(breakpoint_json).collect()),
		Reply::State(state) => json!(state.as_str()),
		Reply::Help => json!(HELP),
	})
}

fn reply_text(reply: &Reply) -> Option<String> {
	Some(match reply {
		Reply::Done => return None,
		Reply::Value(value) => value.to_string(),
		Reply::Inspected(value) => value.to_string(),
		Reply::Frames(frames) if frames.is_empty() => "No frames (not paused)".to_string(),
		Reply::Frames(frames) => frames
			.iter()
			.map(|frame| {
				let marker = if frame.index == 0 { "→" } else { " " };
				format!("{marker} {frame}")
			})
			.collect::<Vec<_>>()
			.join("\n"),
		Reply::Scopes(scopes) => scopes
			.iter()
			.map(|(kind, vars)| format!("{}: {vars}", kind.as_str().cyan()))
			.collect::<Vec<_>>()
			.join("\n"),
		Reply::Breakpoint(breakpoint) => format!("Breakpoint {breakpoint}"),
		Reply::Breakpoints(list) if list.is_empty() => "No breakpoints".to_string(),
		Reply::Breakpoints(list) => list.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n"),
		Reply::State(state) => state.to_string(),
		Reply::Help => HELP.to_string(),
	})
}
