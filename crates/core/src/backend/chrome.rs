//! Chrome backend over the DevTools protocol.

use std::collections::HashMap;
use std::sync::Arc;

use bugs_protocol::cdp::{
	BreakpointResolvedEvent, CallFrame, ConsoleMessageAdded, EvaluateResult, GetPropertiesResult, Location,
	PausedEvent, ScriptParsedEvent, SetBreakpointByUrlResult, methods,
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
use crate::resolver::normalize_cdp;
use crate::value::{Properties, PropertiesFuture, PropertyQuery, PropertySource, RemoteValue};

/// Text shown over the page while it is paused.
pub const PAUSED_MESSAGE: &str = "Paused in bugs";

/// State shared with the event translator.
#[derive(Default)]
struct PageState {
	/// scriptId to URL, from `Debugger.scriptParsed`.
	scripts: Mutex<HashMap<String, String>>,
	/// Call frames of the current pause.
	call_frames: Mutex<Vec<CallFrame>>,
}

impl PageState {
	fn location(&self, location: &Location, fallback_url: Option<&str>) -> ProtocolLocation {
		let script = self
			.scripts
			.lock()
			.get(&location.script_id)
			.cloned()
			.or_else(|| fallback_url.filter(|u| !u.is_empty()).map(str::to_string))
			.unwrap_or_else(|| location.script_id.clone());
		ProtocolLocation::new(script, location.line_number, location.column_number.unwrap_or(0))
	}
}

pub struct ChromeBackend {
	connection: Arc<Connection>,
	mapper: SourceMapper,
	/// Page opened once breakpoints are in place.
	url: Option<String>,
	state: Arc<PageState>,
	properties: Arc<dyn PropertySource>,
	translator: Mutex<Option<JoinHandle<()>>>,
}

impl ChromeBackend {
	/// Wraps a DevTools connection and starts translating its events.
	pub fn new(
		connection: Arc<Connection>,
		protocol_events: mpsc::UnboundedReceiver<ProtocolEvent>,
		mapper: SourceMapper,
		url: Option<String>,
	) -> (Self, mpsc::UnboundedReceiver<BackendEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let state = Arc::new(PageState::default());
		let translator = tokio::spawn(translate(
			protocol_events,
			events_tx,
			Arc::clone(&state),
			Arc::clone(&connection),
		));
		let properties: Arc<dyn PropertySource> = Arc::new(CdpProperties {
			connection: Arc::clone(&connection),
		});

		let backend = Self {
			connection,
			mapper,
			url,
			state,
			properties,
			translator: Mutex::new(Some(translator)),
		};
		(backend, events_rx)
	}

	/// Enables the domains the session relies on.
	pub async fn handshake(&self) -> Result<()> {
		self.connection.request(methods::console::ENABLE, Value::Null).await?;
		self.connection.request(methods::debugger::ENABLE, Value::Null).await?;
		self.connection
			.request(methods::debugger::SET_BREAKPOINTS_ACTIVE, json!({"active": true}))
			.await?;
		Ok(())
	}

	async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
		let result = self.connection.request(method, params).await?;
		serde_json::from_value(result).map_err(|e| Error::ProtocolError(format!("unexpected {method} result: {e}")))
	}

	fn frame(&self, index: usize, call_frame: &CallFrame) -> Frame {
		let location = self.state.location(&call_frame.location, call_frame.url.as_deref());
		Frame {
			index: index as u32,
			function_name: Some(call_frame.function_name.clone()).filter(|n| !n.is_empty()),
			editor_location: self.mapper.to_editor_location(&location),
			location,
			call_frame_id: Some(call_frame.call_frame_id.clone()),
		}
	}
}

impl DebugBackend for ChromeBackend {
	fn kind(&self) -> TransportKind {
		TransportKind::Browser
	}

	fn set_exception_break(&self, policy: ExceptionBreak) -> BackendFuture<'_, ()> {
		Box::pin(async move {
			self.connection
				.request(
					methods::debugger::SET_PAUSE_ON_EXCEPTIONS,
					json!({"state": policy.as_str()}),
				)
				.await?;
			Ok(())
		})
	}

	fn set_breakpoint<'a>(
		&'a self,
		location: &'a ProtocolLocation,
		condition: Option<&'a str>,
	) -> BackendFuture<'a, BreakpointAck> {
		Box::pin(async move {
			let mut params = json!({
				"lineNumber": location.line,
				"url": location.script,
			});
			if let Some(condition) = condition {
				params["condition"] = json!(condition);
			}

			let result: SetBreakpointByUrlResult = self.call(methods::debugger::SET_BREAKPOINT_BY_URL, params).await?;
			tracing::debug!(id = %result.breakpoint_id, url = %location.script, line = location.line, "breakpoint set");

			Ok(BreakpointAck {
				resolved: result.locations.first().map(|l| self.state.location(l, None)),
				id: BreakpointId(result.breakpoint_id),
			})
		})
	}

	fn clear_breakpoint<'a>(&'a self, id: &'a BreakpointId) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			self.connection
				.request(methods::debugger::REMOVE_BREAKPOINT, json!({"breakpointId": id.0}))
				.await?;
			Ok(())
		})
	}

	fn resume(&self) -> BackendFuture<'_, ()> {
		Box::pin(async move {
			self.connection.request(methods::debugger::RESUME, Value::Null).await?;
			Ok(())
		})
	}

	fn step(&self, action: StepAction) -> BackendFuture<'_, ()> {
		let method = match action {
			StepAction::Over => methods::debugger::STEP_OVER,
			StepAction::Into => methods::debugger::STEP_INTO,
			StepAction::Out => methods::debugger::STEP_OUT,
		};
		Box::pin(async move {
			self.connection.request(method, Value::Null).await?;
			Ok(())
		})
	}

	fn backtrace(&self) -> BackendFuture<'_, Vec<Frame>> {
		Box::pin(async move {
			let call_frames = self.state.call_frames.lock().clone();
			Ok(call_frames
				.iter()
				.enumerate()
				.map(|(index, call_frame)| self.frame(index, call_frame))
				.collect())
		})
	}

	fn scopes<'a>(&'a self, frame: &'a Frame) -> BackendFuture<'a, Vec<Scope>> {
		Box::pin(async move {
			let scope_chain = self
				.state
				.call_frames
				.lock()
				.iter()
				.find(|f| Some(&f.call_frame_id) == frame.call_frame_id.as_ref())
				.map(|f| f.scope_chain.clone())
				.ok_or_else(|| Error::ProtocolError(format!("frame #{} is no longer paused", frame.index)))?;

			Ok(scope_chain
				.iter()
				.map(|scope| Scope {
					kind: ScopeKind::from_cdp(&scope.kind),
					object: normalize_cdp(&scope.object, &self.properties),
				})
				.collect())
		})
	}

	fn evaluate<'a>(&'a self, expression: &'a str, frame: Option<&'a Frame>) -> BackendFuture<'a, RemoteValue> {
		Box::pin(async move {
			let result: EvaluateResult = match frame.and_then(|f| f.call_frame_id.as_deref()) {
				Some(call_frame_id) => {
					self.call(
						methods::debugger::EVALUATE_ON_CALL_FRAME,
						json!({"callFrameId": call_frame_id, "expression": expression}),
					)
					.await?
				}
				None => {
					self.call(methods::runtime::EVALUATE, json!({"expression": expression}))
						.await?
				}
			};

			if let Some(details) = result.exception_details {
				let message = details
					.exception
					.and_then(|e| e.description)
					.unwrap_or(details.text);
				return Err(Error::remote(message));
			}
			Ok(normalize_cdp(&result.result, &self.properties))
		})
	}

	fn finish_handshake(&self) -> BackendFuture<'_, ()> {
		Box::pin(async move {
			if let Some(url) = &self.url {
				tracing::debug!(%url, "navigating");
				self.connection.request(methods::page::NAVIGATE, json!({"url": url})).await?;
			}
			Ok(())
		})
	}

	/// DevTools has no detach command; closing the socket detaches.
	fn disconnect(&self) -> BackendFuture<'_, ()> {
		Box::pin(async { Ok(()) })
	}

	fn close(&self) {
		self.connection.close();
		if let Some(translator) = self.translator.lock().take() {
			translator.abort();
		}
	}
}

impl std::fmt::Debug for ChromeBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChromeBackend")
			.field("connection", &self.connection)
			.field("url", &self.url)
			.finish_non_exhaustive()
	}
}

struct CdpProperties {
	connection: Arc<Connection>,
}

impl PropertySource for CdpProperties {
	fn own_properties<'a>(&'a self, query: &'a PropertyQuery) -> PropertiesFuture<'a> {
		Box::pin(async move {
			let PropertyQuery::ObjectId(object_id) = query else {
				return Err(Error::ProtocolError(format!("DevTools cannot expand {query:?}")));
			};
			let result = self
				.connection
				.request(
					methods::runtime::GET_PROPERTIES,
					json!({"objectId": object_id, "ownProperties": true}),
				)
				.await?;
			let result: GetPropertiesResult = serde_json::from_value(result)?;

			let source: Arc<dyn PropertySource> = Arc::new(CdpProperties {
				connection: Arc::clone(&self.connection),
			});
			Ok(result
				.result
				.iter()
				.filter_map(|p| p.value.as_ref().map(|v| (p.name.clone(), normalize_cdp(v, &source))))
				.collect::<Properties>())
		})
	}
}

/// Turns DevTools notifications into backend events until the socket closes.
async fn translate(
	mut protocol_events: mpsc::UnboundedReceiver<ProtocolEvent>,
	events_tx: mpsc::UnboundedSender<BackendEvent>,
	state: Arc<PageState>,
	connection: Arc<Connection>,
) {
	while let Some(event) = protocol_events.recv().await {
		let translated = match event.name.as_str() {
			methods::debugger::PAUSED => match params::<PausedEvent>(&event) {
				Some(paused) => {
					set_overlay(&connection, Some(PAUSED_MESSAGE));
					Some(pause(&state, paused))
				}
				None => None,
			},
			methods::debugger::RESUMED => {
				state.call_frames.lock().clear();
				set_overlay(&connection, None);
				Some(BackendEvent::Resumed)
			}
			methods::debugger::SCRIPT_PARSED => params::<ScriptParsedEvent>(&event).map(|script| {
				state
					.scripts
					.lock()
					.insert(script.script_id.clone(), script.url.clone());
				BackendEvent::ScriptParsed {
					id: script.script_id,
					url: script.url,
				}
			}),
			methods::debugger::BREAKPOINT_RESOLVED => {
				params::<BreakpointResolvedEvent>(&event).map(|resolved| BackendEvent::BreakpointResolved {
					location: state.location(&resolved.location, None),
					id: BreakpointId(resolved.breakpoint_id),
				})
			}
			methods::console::MESSAGE_ADDED => params::<ConsoleMessageAdded>(&event).map(|added| {
				let message = added.message;
				BackendEvent::Console {
					error: matches!(message.level.as_str(), "error" | "warning"),
					location: message
						.url
						.filter(|u| !u.is_empty() && message.line > 0)
						.map(|url| ProtocolLocation::new(url, message.line - 1, message.column.saturating_sub(1))),
					text: message.text,
				}
			}),
			other => {
				tracing::trace!(method = other, "ignored DevTools event");
				None
			}
		};

		if let Some(translated) = translated {
			if events_tx.send(translated).is_err() {
				return;
			}
		}
	}

	tracing::debug!("DevTools event stream ended");
	let _ = events_tx.send(BackendEvent::Disconnected);
}

fn params<T: DeserializeOwned>(event: &ProtocolEvent) -> Option<T> {
	match serde_json::from_value(event.body.clone()) {
		Ok(params) => Some(params),
		Err(e) => {
			tracing::warn!(method = %event.name, error = %e, "unparseable DevTools event");
			None
		}
	}
}

fn pause(state: &PageState, paused: PausedEvent) -> BackendEvent {
	let location = paused
		.call_frames
		.first()
		.map(|f| state.location(&f.location, f.url.as_deref()))
		.unwrap_or_else(|| ProtocolLocation::new("", 0, 0));

	let reason = match paused.reason.as_str() {
		"exception" | "promiseRejection" => {
			let data = paused.data.unwrap_or(Value::Null);
			PauseReason::Exception {
				uncaught: data["uncaught"].as_bool().unwrap_or(false),
				description: data["description"].as_str().map(str::to_string),
			}
		}
		_ if !paused.hit_breakpoints.is_empty() => {
			PauseReason::Breakpoint(paused.hit_breakpoints.into_iter().map(BreakpointId).collect())
		}
		other => PauseReason::Other(other.to_string()),
	};

	*state.call_frames.lock() = paused.call_frames;
	BackendEvent::Paused { location, reason }
}

/// Best effort; pages without an overlay (headless, workers) reject it.
fn set_overlay(connection: &Arc<Connection>, message: Option<&str>) {
	let connection = Arc::clone(connection);
	let params = match message {
		Some(message) => json!({"message": message}),
		None => json!({}),
	};
	tokio::spawn(async move {
		if let Err(e) = connection.request(methods::overlay::SET_PAUSED_MESSAGE, params).await {
			tracing::debug!(error = %e, "overlay message not shown");
		}
	});
}
