//! Node.js backend over the legacy V8 debugger protocol.

use std::sync::Arc;

use bugs_protocol::v8::{
	BacktraceBody, BreakBody, FrameMirror, Mirror, ScopesBody, ScriptRef, SetBreakpointBody, V8Response, commands,
	events,
};
use bugs_runtime::{Connection, Error, ProtocolEvent, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
	BackendEvent, BackendFuture, BreakpointAck, BreakpointId, DebugBackend, Frame, PauseReason, Scope, ScopeKind,
	StepAction,
};
use crate::config::{ExceptionBreak, TransportKind};
use crate::location::{ProtocolLocation, SourceMapper};
use crate::resolver::normalize_v8;
use crate::value::{Properties, PropertiesFuture, PropertyQuery, PropertySource, RemoteValue};

pub struct NodeBackend {
	connection: Arc<Connection>,
	mapper: SourceMapper,
	properties: Arc<dyn PropertySource>,
	events_tx: mpsc::UnboundedSender<BackendEvent>,
	translator: Mutex<Option<JoinHandle<()>>>,
}

impl NodeBackend {
	/// Wraps a V8 connection and starts translating its events.
	pub fn new(
		connection: Arc<Connection>,
		protocol_events: mpsc::UnboundedReceiver<ProtocolEvent>,
		mapper: SourceMapper,
	) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let translator = tokio::spawn(translate(protocol_events, events_tx.clone()));
		let properties: Arc<dyn PropertySource> = Arc::new(V8Properties {
			connection: Arc::clone(&connection),
		});

		let backend = Self {
			connection,
			mapper,
			properties,
			events_tx,
			translator: Mutex::new(Some(translator)),
		};
		(backend, events_rx)
	}

	async fn command(&self, command: &str, arguments: Value) -> Result<V8Response> {
		let response = self.connection.request(command, arguments).await?;
		parse(response)
	}

	/// `continue`, optionally stepping.
	async fn resume_with(&self, arguments: Value) -> Result<()> {
		// queued first so a `break` that beats the reply still follows it
		let _ = self.events_tx.send(BackendEvent::Resumed);
		if let Err(e) = self.command(commands::CONTINUE, arguments).await {
			let _ = self.events_tx.send(BackendEvent::ResumeFailed);
			return Err(e);
		}
		Ok(())
	}

	fn frame_from_mirror(&self, frame: &FrameMirror, refs: &[Mirror]) -> Frame {
		let script = script_name(&frame.script, refs).unwrap_or_default();
		let func = match frame.func.reference {
			Some(handle) if frame.func.is_reference_only() => {
				refs.iter().find(|m| m.handle == Some(handle)).unwrap_or(&frame.func)
			}
			_ => &frame.func,
		};
		let function_name = func
			.name
			.as_deref()
			.filter(|n| !n.is_empty())
			.or(func.inferred_name.as_deref().filter(|n| !n.is_empty()))
			.map(str::to_string);

		let location = ProtocolLocation::new(script, frame.line, frame.column);
		Frame {
			index: frame.index,
			function_name,
			editor_location: self.mapper.to_editor_location(&location),
			location,
			call_frame_id: None,
		}
	}
}

impl DebugBackend for NodeBackend {
	fn kind(&self) -> TransportKind {
		TransportKind::Node
	}

	fn set_exception_break(&self, policy: ExceptionBreak) -> BackendFuture<'_, ()> {
		Box::pin(async move {
			let (all, uncaught) = match policy {
				ExceptionBreak::All => (true, true),
				ExceptionBreak::Uncaught => (false, true),
				ExceptionBreak::None => (false, false),
			};
			self.command(commands::SET_EXCEPTION_BREAK, json!({"type": "all", "enabled": all}))
				.await?;
			if !all {
				self.command(
					commands::SET_EXCEPTION_BREAK,
					json!({"type": "uncaught", "enabled": uncaught}),
				)
				.await?;
			}
			Ok(())
		})
	}

	fn set_breakpoint<'a>(
		&'a self,
		location: &'a ProtocolLocation,
		condition: Option<&'a str>,
	) -> BackendFuture<'a, BreakpointAck> {
		Box::pin(async move {
			let mut arguments = json!({
				"type": "script",
				"target": location.script,
				"line": location.line,
			});
			if let Some(condition) = condition {
				arguments["condition"] = json!(condition);
			}

			let response = self.command(commands::SET_BREAKPOINT, arguments).await?;
			let body: SetBreakpointBody = body(&response)?;
			tracing::debug!(id = body.breakpoint, target = %location.script, line = location.line, "breakpoint set");

			Ok(BreakpointAck {
				id: BreakpointId(body.breakpoint.to_string()),
				resolved: None,
			})
		})
	}

	fn clear_breakpoint<'a>(&'a self, id: &'a BreakpointId) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			let number: u64 = id
				.0
				.parse()
				.map_err(|_| Error::InvalidArgument(format!("not a V8 breakpoint id: {id}")))?;
			self.command(commands::CLEAR_BREAKPOINT, json!({"breakpoint": number}))
				.await?;
			Ok(())
		})
	}

	fn resume(&self) -> BackendFuture<'_, ()> {
		Box::pin(self.resume_with(Value::Null))
	}

	fn step(&self, action: StepAction) -> BackendFuture<'_, ()> {
		let stepaction = match action {
			StepAction::Over => "next",
			StepAction::Into => "in",
			StepAction::Out => "out",
		};
		Box::pin(self.resume_with(json!({"stepaction": stepaction, "stepcount": 1})))
	}

	fn backtrace(&self) -> BackendFuture<'_, Vec<Frame>> {
		Box::pin(async move {
			let response = self.command(commands::BACKTRACE, json!({"inlineRefs": true})).await?;
			let body: BacktraceBody = body(&response)?;
			Ok(body
				.frames
				.iter()
				.map(|frame| self.frame_from_mirror(frame, &response.refs))
				.collect())
		})
	}

	fn scopes<'a>(&'a self, frame: &'a Frame) -> BackendFuture<'a, Vec<Scope>> {
		Box::pin(async move {
			let response = self
				.command(
					commands::SCOPES,
					json!({"frameNumber": frame.index, "inlineRefs": true}),
				)
				.await?;
			let body: ScopesBody = body(&response)?;
			Ok(body
				.scopes
				.iter()
				.map(|scope| Scope {
					kind: ScopeKind::from_v8(scope.kind),
					object: normalize_v8(&scope.object, &response.refs, &self.properties),
				})
				.collect())
		})
	}

	fn evaluate<'a>(&'a self, expression: &'a str, frame: Option<&'a Frame>) -> BackendFuture<'a, RemoteValue> {
		Box::pin(async move {
			let mut arguments = json!({
				"expression": expression,
				"disable_break": true,
			});
			match frame {
				Some(frame) => arguments["frame"] = json!(frame.index),
				None => arguments["global"] = json!(true),
			}

			let response = self.command(commands::EVALUATE, arguments).await?;
			let mirror: Mirror = body(&response)?;
			Ok(normalize_v8(&mirror, &response.refs, &self.properties))
		})
	}

	fn disconnect(&self) -> BackendFuture<'_, ()> {
		Box::pin(async move {
			self.connection.request(commands::DISCONNECT, Value::Null).await?;
			Ok(())
		})
	}

	fn close(&self) {
		self.connection.close();
		if let Some(translator) = self.translator.lock().take() {
			translator.abort();
		}
	}
}

impl std::fmt::Debug for NodeBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NodeBackend")
			.field("connection", &self.connection)
			.field("mapper", &self.mapper)
			.finish_non_exhaustive()
	}
}

/// Resolves `lookup` queries for V8 mirrors.
struct V8Properties {
	connection: Arc<Connection>,
}

impl PropertySource for V8Properties {
	fn own_properties<'a>(&'a self, query: &'a PropertyQuery) -> PropertiesFuture<'a> {
		Box::pin(async move {
			let PropertyQuery::Refs(refs) = query else {
				return Err(Error::ProtocolError(format!("V8 cannot expand {query:?}")));
			};
			if refs.is_empty() {
				return Ok(Properties::new());
			}

			let mut handles: Vec<u64> = refs.iter().map(|(_, handle)| *handle).collect();
			handles.sort_unstable();
			handles.dedup();

			let response = parse(
				self.connection
					.request(commands::LOOKUP, json!({"handles": handles, "includeSource": false}))
					.await?,
			)?;
			let source: Arc<dyn PropertySource> = Arc::new(V8Properties {
				connection: Arc::clone(&self.connection),
			});

			let mut properties = Properties::with_capacity(refs.len());
			for (name, handle) in refs {
				let value = match response.body.get(handle.to_string()) {
					Some(mirror) => {
						let mirror: Mirror = serde_json::from_value(mirror.clone())?;
						normalize_v8(&mirror, &response.refs, &source)
					}
					None => RemoteValue::undefined(),
				};
				properties.insert(name.clone(), value);
			}
			Ok(properties)
		})
	}
}

/// Turns V8 events into backend events until the connection closes.
async fn translate(
	mut protocol_events: mpsc::UnboundedReceiver<ProtocolEvent>,
	events_tx: mpsc::UnboundedSender<BackendEvent>,
) {
	while let Some(event) = protocol_events.recv().await {
		let translated = match event.name.as_str() {
			events::BREAK | events::EXCEPTION => match serde_json::from_value::<BreakBody>(event.body) {
				Ok(body) => Some(paused(&event.name, body)),
				Err(e) => {
					tracing::warn!(event = %event.name, error = %e, "unparseable pause event");
					None
				}
			},
			events::AFTER_COMPILE => {
				let script: ScriptRef = serde_json::from_value(event.body["script"].clone()).unwrap_or_default();
				script.name.map(|url| BackendEvent::ScriptParsed {
					id: script.id.map(|id| id.to_string()).unwrap_or_default(),
					url,
				})
			}
			events::CONNECT => {
				tracing::debug!(headers = %event.body, "V8 agent greeting");
				None
			}
			other => {
				tracing::trace!(event = other, "ignored V8 event");
				None
			}
		};

		if let Some(translated) = translated {
			if events_tx.send(translated).is_err() {
				return;
			}
		}
	}

	tracing::debug!("V8 event stream ended");
	let _ = events_tx.send(BackendEvent::Disconnected);
}

fn paused(name: &str, body: BreakBody) -> BackendEvent {
	let script = body.script.and_then(|s| s.name).unwrap_or_default();
	let location = ProtocolLocation::new(script, body.source_line, body.source_column);

	let reason = if name == events::EXCEPTION {
		PauseReason::Exception {
			uncaught: body.uncaught.unwrap_or(false),
			description: body.exception.and_then(|e| e.text),
		}
	} else if !body.breakpoints.is_empty() {
		PauseReason::Breakpoint(body.breakpoints.iter().map(|id| BreakpointId(id.to_string())).collect())
	} else {
		PauseReason::Other("break".to_string())
	};

	BackendEvent::Paused { location, reason }
}

fn script_name(script: &ScriptRef, refs: &[Mirror]) -> Option<String> {
	if let Some(name) = &script.name {
		return Some(name.clone());
	}
	let handle = script.reference?;
	refs.iter().find(|m| m.handle == Some(handle)).and_then(|m| m.name.clone())
}

fn parse(response: Value) -> Result<V8Response> {
	serde_json::from_value(response).map_err(|e| Error::ProtocolError(format!("unexpected V8 response: {e}")))
}

fn body<T: DeserializeOwned>(response: &V8Response) -> Result<T> {
	serde_json::from_value(response.body.clone()).map_err(|e| {
		Error::ProtocolError(format!(
			"unexpected body for {}: {e}",
			response.command.as_deref().unwrap_or("response")
		))
	})
}
