// Session state machine against a scripted backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bugs::{
	BackendEvent, BackendFuture, BreakpointAck, BreakpointId, BreakpointSpec, Connected, Connector, DebugBackend,
	EditorLocation, Error, ExceptionBreak, Frame, Launched, PauseReason, ProtocolLocation, RemoteValue, Result, Scope, Session,
	SessionConfig, SessionEvent, SessionManager, SessionState, StepAction, TransportKind,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

struct ScriptedBackend {
	calls: Mutex<Vec<String>>,
	next_id: AtomicU32,
	reject_breakpoints: bool,
	handshake_gate: Option<Arc<Notify>>,
	closed: AtomicBool,
	events: mpsc::UnboundedSender<BackendEvent>,
}

impl ScriptedBackend {
	fn record(&self, call: impl Into<String>) {
		self.calls.lock().push(call.into());
	}

	fn calls(&self) -> Vec<String> {
		self.calls.lock().clone()
	}
}

impl DebugBackend for ScriptedBackend {
	fn kind(&self) -> TransportKind {
		TransportKind::Node
	}

	fn set_exception_break(&self, policy: ExceptionBreak) -> BackendFuture<'_, ()> {
		self.record(format!("exceptions {}", policy.as_str()));
		Box::pin(async { Ok(()) })
	}

	fn set_breakpoint<'a>(
		&'a self,
		location: &'a ProtocolLocation,
		_condition: Option<&'a str>,
	) -> BackendFuture<'a, BreakpointAck> {
		Box::pin(async move {
			self.record(format!("breakpoint {}:{}", location.script, location.line));
			if self.reject_breakpoints {
				return Err(Error::remote("Error: script not found"));
			}
			let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
			Ok(BreakpointAck {
				id: BreakpointId(format!("bp-{id}")),
				resolved: None,
			})
		})
	}

	fn clear_breakpoint<'a>(&'a self, id: &'a BreakpointId) -> BackendFuture<'a, ()> {
		self.record(format!("clear {id}"));
		Box::pin(async { Ok(()) })
	}

	fn resume(&self) -> BackendFuture<'_, ()> {
		self.record("resume");
		let _ = self.events.send(BackendEvent::Resumed);
		Box::pin(async { Ok(()) })
	}

	fn step(&self, action: StepAction) -> BackendFuture<'_, ()> {
		self.record(format!("step {action:?}"));
		Box::pin(async { Ok(()) })
	}

	fn backtrace(&self) -> BackendFuture<'_, Vec<Frame>> {
		let location = ProtocolLocation::new("/tmp/app.js", 0, 0);
		let frame = Frame {
			index: 0,
			function_name: None,
			editor_location: EditorLocation::new("/tmp/app.js", 1, Some(1)),
			location,
			call_frame_id: None,
		};
		Box::pin(async move { Ok(vec![frame]) })
	}

	fn scopes<'a>(&'a self, _frame: &'a Frame) -> BackendFuture<'a, Vec<Scope>> {
		Box::pin(async { Ok(Vec::new()) })
	}

	fn evaluate<'a>(&'a self, expression: &'a str, frame: Option<&'a Frame>) -> BackendFuture<'a, RemoteValue> {
		self.record(format!("evaluate {expression} in {}", if frame.is_some() { "frame" } else { "global" }));
		Box::pin(async { Ok(RemoteValue::undefined()) })
	}

	fn finish_handshake(&self) -> BackendFuture<'_, ()> {
		self.record("finish handshake");
		Box::pin(async move {
			if let Some(gate) = &self.handshake_gate {
				gate.notified().await;
			}
			Ok(())
		})
	}

	fn disconnect(&self) -> BackendFuture<'_, ()> {
		self.record("disconnect");
		Box::pin(async { Ok(()) })
	}

	fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
	}
}

#[derive(Default)]
struct ScriptedConnector {
	gate: Option<Arc<Notify>>,
	handshake_gate: Option<Arc<Notify>>,
	reject_breakpoints: bool,
	backends: Mutex<Vec<Arc<ScriptedBackend>>>,
}

impl ScriptedConnector {
	fn backend(&self, index: usize) -> Arc<ScriptedBackend> {
		Arc::clone(&self.backends.lock()[index])
	}
}

impl Connector for ScriptedConnector {
	fn launch(&self, _config: &SessionConfig) -> Result<Option<Launched>> {
		Ok(None)
	}

	fn connect<'a>(&'a self, _config: &'a SessionConfig) -> BackendFuture<'a, Connected> {
		Box::pin(async move {
			if let Some(gate) = &self.gate {
				gate.notified().await;
			}
			let (events, events_rx) = mpsc::unbounded_channel();
			let backend = Arc::new(ScriptedBackend {
				calls: Mutex::new(Vec::new()),
				next_id: AtomicU32::new(0),
				reject_breakpoints: self.reject_breakpoints,
				handshake_gate: self.handshake_gate.clone(),
				closed: AtomicBool::new(false),
				events,
			});
			self.backends.lock().push(Arc::clone(&backend));
			Ok(Connected {
				backend,
				events: events_rx,
			})
		})
	}
}

fn config() -> SessionConfig {
	SessionConfig {
		attach: true,
		..SessionConfig::node("/tmp/app.js")
	}
}

#[tokio::test]
async fn breakpoint_set_while_connecting_registers_only_once_running() {
	let gate = Arc::new(Notify::new());
	let connector = Arc::new(ScriptedConnector {
		gate: Some(Arc::clone(&gate)),
		..Default::default()
	});
	let session = Session::with_connector(config(), connector.clone());

	let connecting = session.wait_for_event(
		|e| matches!(e, SessionEvent::StateChanged(SessionState::Connecting)),
		Duration::from_secs(5),
	);
	let starter = tokio::spawn({
		let session = session.clone();
		async move { session.start().await }
	});
	connecting.await.unwrap();

	let pending = session.add_breakpoint(BreakpointSpec::new("/tmp/app.js", 4)).unwrap();
	let mut registered = Box::pin(pending.registered());
	assert!(
		tokio::time::timeout(Duration::from_millis(50), &mut registered)
			.await
			.is_err()
	);
	assert_eq!(session.state(), SessionState::Connecting);

	gate.notify_one();
	let breakpoint = registered.await.unwrap();
	assert_eq!(breakpoint.protocol_id, Some(BreakpointId("bp-1".to_string())));
	assert_eq!(session.state(), SessionState::Running);
	starter.await.unwrap().unwrap();

	let backend = connector.backend(0);
	assert_eq!(
		backend.calls(),
		vec!["exceptions all", "breakpoint /tmp/app.js:3", "finish handshake"]
	);

	session.destroy().await;
	assert!(backend.closed.load(Ordering::SeqCst));
	assert_eq!(backend.calls().last().map(String::as_str), Some("disconnect"));
}

#[tokio::test]
async fn breakpoint_added_during_last_handshake_step_waits_for_running() {
	let gate = Arc::new(Notify::new());
	let connector = Arc::new(ScriptedConnector {
		handshake_gate: Some(Arc::clone(&gate)),
		..Default::default()
	});
	let session = Session::with_connector(config(), connector.clone());
	let starter = tokio::spawn({
		let session = session.clone();
		async move { session.start().await }
	});

	tokio::time::timeout(Duration::from_secs(5), async {
		loop {
			let parked = connector
				.backends
				.lock()
				.first()
				.is_some_and(|b| b.calls().iter().any(|c| c == "finish handshake"));
			if parked {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.unwrap();
	assert_eq!(session.state(), SessionState::Connecting);

	let pending = session.add_breakpoint(BreakpointSpec::new("/tmp/app.js", 8)).unwrap();
	let mut registered = Box::pin(pending.registered());
	assert!(
		tokio::time::timeout(Duration::from_millis(50), &mut registered)
			.await
			.is_err()
	);
	assert_eq!(session.state(), SessionState::Connecting);
	assert!(session.breakpoints().iter().all(|b| b.protocol_id.is_none()));
	let backend = connector.backend(0);
	assert!(!backend.calls().iter().any(|c| c.starts_with("breakpoint")));

	gate.notify_one();
	let breakpoint = registered.await.unwrap();
	assert_eq!(session.state(), SessionState::Running);
	assert_eq!(breakpoint.protocol_id, Some(BreakpointId("bp-1".to_string())));
	starter.await.unwrap().unwrap();
	assert_eq!(
		backend.calls(),
		vec!["exceptions all", "finish handshake", "breakpoint /tmp/app.js:7"]
	);

	session.destroy().await;
}

#[tokio::test]
async fn rejected_resume_restores_paused() {
	let connector = Arc::new(ScriptedConnector::default());
	let session = Session::with_connector(config(), connector.clone());
	session.start().await.unwrap();
	let backend = connector.backend(0);

	let paused = session.wait_for_event(|e| matches!(e, SessionEvent::Break { .. }), Duration::from_secs(5));
	backend
		.events
		.send(BackendEvent::Paused {
			location: ProtocolLocation::new("/tmp/app.js", 4, 0),
			reason: PauseReason::Other("debugger".to_string()),
		})
		.unwrap();
	paused.await.unwrap();

	let restored = session.wait_for_event(
		|e| matches!(e, SessionEvent::StateChanged(SessionState::Paused)),
		Duration::from_secs(5),
	);
	backend.events.send(BackendEvent::Resumed).unwrap();
	backend.events.send(BackendEvent::ResumeFailed).unwrap();
	restored.await.unwrap();

	assert_eq!(session.state(), SessionState::Paused);
	assert_eq!(session.frames().len(), 1);
	session.step_over().await.unwrap();
	session.destroy().await;
}

#[tokio::test]
async fn state_changes_are_reported_in_order() {
	let connector = Arc::new(ScriptedConnector::default());
	let session = Session::with_connector(config(), connector.clone());
	let mut events = session.events();
	session.start().await.unwrap();

	let mut seen = Vec::new();
	while let Some(event) = events.try_recv() {
		seen.push(match event {
			SessionEvent::StateChanged(state) => state.to_string(),
			other => other.name().to_string(),
		});
	}
	assert_eq!(seen, vec!["launching", "connecting", "running", "started"]);
	session.destroy().await;
}

#[tokio::test]
async fn rejected_breakpoint_fails_the_handshake() {
	let connector = Arc::new(ScriptedConnector {
		reject_breakpoints: true,
		..Default::default()
	});
	let session = Session::with_connector(config(), connector.clone());
	let pending = session.add_breakpoint(BreakpointSpec::new("/tmp/app.js", 1)).unwrap();

	let err = session.start().await.unwrap_err();
	assert!(matches!(err, Error::Remote { .. }));
	assert_eq!(session.state(), SessionState::Failed);
	assert!(connector.backend(0).closed.load(Ordering::SeqCst));
	assert!(pending.registered().await.is_err());
}

#[tokio::test]
async fn evaluation_scope_follows_state() {
	let connector = Arc::new(ScriptedConnector::default());
	let session = Session::with_connector(config(), connector.clone());
	session.start().await.unwrap();
	let backend = connector.backend(0);

	session.evaluate("a").await.unwrap();

	let paused = session.wait_for_event(|e| matches!(e, SessionEvent::Break { .. }), Duration::from_secs(5));
	backend
		.events
		.send(BackendEvent::Paused {
			location: ProtocolLocation::new("/tmp/app.js", 0, 0),
			reason: PauseReason::Other("debugger".to_string()),
		})
		.unwrap();
	paused.await.unwrap();
	assert_eq!(session.frames().len(), 1);
	session.evaluate("b").await.unwrap();
	session.step_into().await.unwrap();
	session.resume().await.unwrap();

	assert_eq!(
		backend.calls()[2..],
		["evaluate a in global", "evaluate b in frame", "step Into", "resume"]
	);
	session.destroy().await;
}

#[tokio::test]
async fn backend_disconnect_closes_the_session() {
	let connector = Arc::new(ScriptedConnector::default());
	let session = Session::with_connector(config(), connector.clone());
	session.start().await.unwrap();

	let closed = session.wait_for_event(|e| matches!(e, SessionEvent::Closed), Duration::from_secs(5));
	connector.backend(0).events.send(BackendEvent::Disconnected).unwrap();
	closed.await.unwrap();
	assert_eq!(session.state(), SessionState::Closed);
	assert!(matches!(
		session.add_breakpoint(BreakpointSpec::new("/tmp/app.js", 1)),
		Err(Error::InvalidState { .. })
	));
}

#[tokio::test]
async fn manager_keeps_one_session() {
	let connector = Arc::new(ScriptedConnector::default());
	let manager = SessionManager::with_connector(connector.clone());

	let first = manager.start_session(config()).await.unwrap();
	let second = manager.start_session(config()).await.unwrap();

	assert_eq!(first.state(), SessionState::Closed);
	assert!(connector.backend(0).closed.load(Ordering::SeqCst));
	assert_eq!(second.state(), SessionState::Running);
	assert_eq!(manager.current().await.map(|s| s.state()), Some(SessionState::Running));

	manager.destroy_session().await;
	assert_eq!(second.state(), SessionState::Closed);
	assert!(manager.current().await.is_none());
}
