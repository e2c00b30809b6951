//! Debug session lifecycle.
//!
//! A [`Session`] walks `Idle → Launching → Connecting → Running ⇄ Paused`
//! and ends in `Closed` (or `Failed`). It owns the debuggee process, the
//! backend and the breakpoint registry, and reports everything through
//! [`SessionEvent`]s.
//!
//! Backend events are only consumed once the handshake is done: the
//! exception policy and every breakpoint queued so far are sent first, in
//! order, and only then does the session become `Running`.

mod breakpoints;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bugs_runtime::{Error, ProcessEvent, ProcessSupervisor, Result};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::{BackendEvent, DebugBackend, Frame, PauseReason, Scope, StepAction};
use crate::config::{InitialBreak, SessionConfig};
use crate::connector::{Connected, Connector, ProcessConnector};
use crate::events::{EventBus, EventStream, EventWaiter, SessionEvent};
use crate::location::{ProtocolLocation, SourceMapper};
use crate::resolver::{EAGER_DEPTH, materialize};
use crate::value::{Materialized, RemoteValue};

pub use breakpoints::{Breakpoint, BreakpointKey, BreakpointSpec, PendingBreakpoint};
use breakpoints::{BreakpointRegistry, Notify, Submission};

/// Upper bound on the polite goodbye before the socket is dropped.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Idle,
	Launching,
	Connecting,
	Running,
	Paused,
	Closed,
	Failed,
}

impl SessionState {
	pub fn as_str(self) -> &'static str {
		match self {
			SessionState::Idle => "idle",
			SessionState::Launching => "launching",
			SessionState::Connecting => "connecting",
			SessionState::Running => "running",
			SessionState::Paused => "paused",
			SessionState::Closed => "closed",
			SessionState::Failed => "failed",
		}
	}

	/// No transition leaves a terminal state.
	pub fn is_terminal(self) -> bool {
		matches!(self, SessionState::Closed | SessionState::Failed)
	}

	/// Running or paused: the backend is up and the handshake is done.
	pub fn is_live(self) -> bool {
		matches!(self, SessionState::Running | SessionState::Paused)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

struct Inner {
	config: SessionConfig,
	connector: Arc<dyn Connector>,
	mapper: SourceMapper,
	state: Mutex<SessionState>,
	bus: EventBus<SessionEvent>,
	breakpoints: Mutex<BreakpointRegistry>,
	backend: Mutex<Option<Arc<dyn DebugBackend>>>,
	supervisor: Mutex<Option<ProcessSupervisor>>,
	frames: Mutex<Vec<Frame>>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	/// Cleared by the first pause.
	pristine: AtomicBool,
	closed: AtomicBool,
}

/// One debugging session. Cloning yields another handle to the same
/// session.
#[derive(Clone)]
pub struct Session {
	inner: Arc<Inner>,
}

impl fmt::Debug for Session {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Session")
			.field("kind", &self.inner.config.transport_kind)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl Session {
	/// A session that launches real processes.
	pub fn new(config: SessionConfig) -> Self {
		Self::with_connector(config, Arc::new(ProcessConnector))
	}

	pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
		let mapper = config.source_mapper();
		Self {
			inner: Arc::new(Inner {
				config,
				connector,
				mapper,
				state: Mutex::new(SessionState::Idle),
				bus: EventBus::default(),
				breakpoints: Mutex::new(BreakpointRegistry::default()),
				backend: Mutex::new(None),
				supervisor: Mutex::new(None),
				frames: Mutex::new(Vec::new()),
				tasks: Mutex::new(Vec::new()),
				pristine: AtomicBool::new(true),
				closed: AtomicBool::new(false),
			}),
		}
	}

	fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
		weak.upgrade().map(|inner| Self { inner })
	}

	fn downgrade(&self) -> Weak<Inner> {
		Arc::downgrade(&self.inner)
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	pub fn state(&self) -> SessionState {
		*self.inner.state.lock()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::SeqCst)
	}

	/// Call frames of the current pause, innermost first. Empty unless
	/// paused.
	pub fn frames(&self) -> Vec<Frame> {
		self.inner.frames.lock().clone()
	}

	pub fn breakpoints(&self) -> Vec<Breakpoint> {
		self.inner.breakpoints.lock().list()
	}

	/// Events emitted from now on.
	pub fn events(&self) -> EventStream<SessionEvent> {
		self.inner.bus.subscribe()
	}

	/// Captures the next event matching `predicate`. Register before
	/// triggering the action that produces it.
	pub fn wait_for_event<F>(&self, predicate: F, timeout: Duration) -> EventWaiter<SessionEvent>
	where
		F: Fn(&SessionEvent) -> bool + Send + Sync + 'static,
	{
		if self.is_closed() {
			let (_, rx) = oneshot::channel();
			return EventWaiter::new(rx, timeout);
		}
		EventWaiter::new(self.inner.bus.register_waiter(predicate), timeout)
	}

	fn emit(&self, event: SessionEvent) {
		tracing::trace!(event = event.name(), "session event");
		self.inner.bus.emit(event);
	}

	/// Moves to `next` unless the session already ended.
	fn set_state(&self, next: SessionState) -> bool {
		let changed = {
			let mut state = self.inner.state.lock();
			if state.is_terminal() {
				return false;
			}
			let changed = *state != next;
			*state = next;
			changed
		};
		if changed {
			tracing::debug!(state = %next, "session state");
			self.emit(SessionEvent::StateChanged(next));
		}
		true
	}

	fn backend(&self) -> Option<Arc<dyn DebugBackend>> {
		self.inner.backend.lock().clone()
	}

	fn spawn_task<F>(&self, task: F)
	where
		F: std::future::Future<Output = ()> + Send + 'static,
	{
		let handle = tokio::spawn(task);
		let mut tasks = self.inner.tasks.lock();
		tasks.retain(|t| !t.is_finished());
		tasks.push(handle);
	}

	/// Launches (or attaches), connects, and replays the exception policy
	/// and queued breakpoints. On failure the session ends `Failed` with
	/// everything torn down.
	///
	/// # Errors
	///
	/// [`Error::InvalidState`] unless idle; otherwise whatever stopped the
	/// handshake.
	pub async fn start(&self) -> Result<()> {
		{
			let mut state = self.inner.state.lock();
			if *state != SessionState::Idle {
				return Err(Error::InvalidState {
					operation: "start",
					state: state.to_string(),
				});
			}
			*state = SessionState::Launching;
		}
		self.emit(SessionEvent::StateChanged(SessionState::Launching));

		match self.handshake().await {
			Ok(()) => Ok(()),
			Err(e) => {
				tracing::warn!(error = %e, "session failed to start");
				self.emit(SessionEvent::Error(e.to_string()));
				self.teardown(SessionState::Failed).await;
				Err(e)
			}
		}
	}

	async fn handshake(&self) -> Result<()> {
		let inner = &self.inner;
		inner.config.validate()?;

		let exit = match inner.connector.launch(&inner.config)? {
			Some((supervisor, output)) => {
				let exit = supervisor.wait();
				tracing::debug!(pid = ?supervisor.pid(), "debuggee started");
				*inner.supervisor.lock() = Some(supervisor);
				self.spawn_task(forward_output(self.downgrade(), output));
				Some(exit)
			}
			None => None,
		};

		if !self.set_state(SessionState::Connecting) {
			return Err(Error::SessionClosed);
		}
		let Connected { backend, events } = match exit {
			Some(exit) => {
				tokio::select! {
					connected = inner.connector.connect(&inner.config) => connected?,
					status = exit => return Err(Error::ProcessExited(status.code)),
				}
			}
			None => inner.connector.connect(&inner.config).await?,
		};

		*inner.backend.lock() = Some(Arc::clone(&backend));
		if self.is_closed() {
			backend.close();
			return Err(Error::SessionClosed);
		}

		backend.set_exception_break(inner.config.exception_break).await?;

		loop {
			let next = inner.breakpoints.lock().next_for_handshake();
			let Some(submission) = next else { break };
			let location = inner.mapper.to_protocol_location(&submission.spec.path, submission.spec.line)?;
			let ack = backend
				.set_breakpoint(&location, submission.spec.condition.as_deref())
				.await?;
			tracing::debug!(key = %submission.key, id = %ack.id, %location, "breakpoint registered");
			inner
				.breakpoints
				.lock()
				.acknowledge(submission.key, Ok(ack), &inner.mapper, Notify::Deferred);
		}

		backend.finish_handshake().await?;

		if !self.set_state(SessionState::Running) {
			return Err(Error::SessionClosed);
		}
		let late = inner.breakpoints.lock().go_live();
		tracing::info!(kind = %inner.config.transport_kind, "session running");
		self.emit(SessionEvent::Started);
		self.spawn_task(pump(self.downgrade(), events));
		for submission in late {
			let session = self.clone();
			self.spawn_task(async move { session.submit(submission).await });
		}
		Ok(())
	}

	/// Records a breakpoint. Before the session runs it is queued for the
	/// handshake; afterwards it is submitted right away. Must be called
	/// from within a Tokio runtime.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] for line 0, [`Error::InvalidState`] once
	/// the session ended.
	pub fn add_breakpoint(&self, spec: BreakpointSpec) -> Result<PendingBreakpoint> {
		if spec.line == 0 {
			return Err(Error::InvalidArgument("breakpoint lines are 1-based".to_string()));
		}
		let state = self.state();
		if state.is_terminal() {
			return Err(Error::InvalidState {
				operation: "set breakpoint",
				state: state.to_string(),
			});
		}

		let (pending, submission) = self.inner.breakpoints.lock().add(spec);
		if let Some(submission) = submission {
			let session = self.clone();
			self.spawn_task(async move { session.submit(submission).await });
		}
		Ok(pending)
	}

	/// [`add_breakpoint`](Self::add_breakpoint), then waits for the backend
	/// id.
	pub async fn set_breakpoint(&self, spec: BreakpointSpec) -> Result<Breakpoint> {
		self.add_breakpoint(spec)?.registered().await
	}

	async fn submit(&self, submission: Submission) {
		let result = match self.backend() {
			Some(backend) => match self.inner.mapper.to_protocol_location(&submission.spec.path, submission.spec.line) {
				Ok(location) => {
					backend
						.set_breakpoint(&location, submission.spec.condition.as_deref())
						.await
				}
				Err(e) => Err(e),
			},
			None => Err(Error::SessionClosed),
		};
		self.inner
			.breakpoints
			.lock()
			.acknowledge(submission.key, result, &self.inner.mapper, Notify::Now);
	}

	/// Removes a breakpoint. One that never got a backend id is only
	/// dropped locally.
	///
	/// # Errors
	///
	/// [`Error::InvalidState`] while its registration is in flight,
	/// [`Error::InvalidArgument`] for an unknown key.
	pub async fn clear_breakpoint(&self, key: BreakpointKey) -> Result<()> {
		let removed = self.inner.breakpoints.lock().remove(key)?;
		let Some(id) = removed else {
			return Ok(());
		};
		match self.backend() {
			Some(backend) => backend.clear_breakpoint(&id).await,
			None => Ok(()),
		}
	}

	fn paused_backend(&self, operation: &'static str) -> Result<Arc<dyn DebugBackend>> {
		let state = self.state();
		if state != SessionState::Paused {
			return Err(Error::InvalidState {
				operation,
				state: state.to_string(),
			});
		}
		self.backend().ok_or(Error::SessionClosed)
	}

	pub async fn resume(&self) -> Result<()> {
		self.paused_backend("resume")?.resume().await
	}

	pub async fn step_over(&self) -> Result<()> {
		self.paused_backend("step over")?.step(StepAction::Over).await
	}

	pub async fn step_into(&self) -> Result<()> {
		self.paused_backend("step into")?.step(StepAction::Into).await
	}

	pub async fn step_out(&self) -> Result<()> {
		self.paused_backend("step out")?.step(StepAction::Out).await
	}

	/// Evaluates in the top frame when paused, globally when running.
	///
	/// # Errors
	///
	/// [`Error::Remote`] when the expression throws.
	pub async fn evaluate(&self, expression: &str) -> Result<RemoteValue> {
		let state = self.state();
		if !state.is_live() {
			return Err(Error::InvalidState {
				operation: "evaluate",
				state: state.to_string(),
			});
		}
		let backend = self.backend().ok_or(Error::SessionClosed)?;
		let top = match state {
			SessionState::Paused => self.inner.frames.lock().first().cloned(),
			_ => None,
		};
		backend.evaluate(expression, top.as_ref()).await
	}

	/// Evaluates and expands the result a few levels deep.
	pub async fn inspect(&self, expression: &str) -> Result<Materialized> {
		let value = self.evaluate(expression).await?;
		materialize(&value, EAGER_DEPTH).await
	}

	/// Scope chain of a frame of the current pause.
	pub async fn scopes(&self, frame_index: usize) -> Result<Vec<Scope>> {
		let backend = self.paused_backend("list scopes")?;
		let frame = self
			.inner
			.frames
			.lock()
			.get(frame_index)
			.cloned()
			.ok_or_else(|| Error::InvalidArgument(format!("no frame #{frame_index}")))?;
		backend.scopes(&frame).await
	}

	/// Ends the session: says goodbye to the debugger, kills the debuggee
	/// and fails everything still waiting. Safe to call repeatedly.
	pub async fn destroy(&self) {
		self.teardown(SessionState::Closed).await;
	}

	async fn teardown(&self, final_state: SessionState) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}

		let changed = {
			let mut state = self.inner.state.lock();
			let changed = !state.is_terminal();
			if changed {
				*state = final_state;
			}
			changed
		};
		if changed {
			self.emit(SessionEvent::StateChanged(final_state));
		}

		let backend = self.inner.backend.lock().take();
		if let Some(backend) = backend {
			match tokio::time::timeout(DISCONNECT_TIMEOUT, backend.disconnect()).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => tracing::debug!(error = %e, "disconnect request failed"),
				Err(_) => tracing::debug!("disconnect request timed out"),
			}
			backend.close();
		}

		let supervisor = self.inner.supervisor.lock().take();
		if let Some(supervisor) = supervisor {
			if let Err(e) = supervisor.kill().await {
				tracing::warn!(error = %e, "failed to stop debuggee");
			}
		}

		let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
		for task in tasks {
			task.abort();
		}
		self.inner.frames.lock().clear();
		self.inner.breakpoints.lock().close();

		tracing::info!("session closed");
		self.emit(SessionEvent::Closed);
		self.inner.bus.clear_waiters();
	}

	/// Teardown from inside one of the session's own tasks, which teardown
	/// aborts.
	fn teardown_detached(&self) {
		let session = self.clone();
		tokio::spawn(async move { session.destroy().await });
	}

	async fn on_backend_event(&self, event: BackendEvent) {
		match event {
			BackendEvent::Paused { location, reason } => self.on_paused(location, reason).await,
			BackendEvent::Resumed => {
				self.inner.frames.lock().clear();
				if self.set_state(SessionState::Running) {
					self.emit(SessionEvent::Resumed);
				}
			}
			BackendEvent::ResumeFailed => self.on_resume_failed().await,
			BackendEvent::ScriptParsed { id, url } => {
				tracing::debug!(%id, %url, "script parsed");
			}
			BackendEvent::BreakpointResolved { id, location } => {
				let location = self.inner.mapper.to_editor_location(&location);
				let key = self.inner.breakpoints.lock().set_resolved(&id, location.clone());
				match key {
					Some(key) => self.emit(SessionEvent::BreakpointResolved { key, location }),
					None => tracing::debug!(%id, "resolution for unknown breakpoint"),
				}
			}
			BackendEvent::Console { error, text, location } => {
				let text = match location {
					Some(location) => format!("{} {text}", self.inner.mapper.to_editor_location(&location)),
					None => text,
				};
				self.emit(if error {
					SessionEvent::Error(text)
				} else {
					SessionEvent::Message(text)
				});
			}
			BackendEvent::Disconnected => {
				tracing::info!("debugger disconnected");
				self.teardown_detached();
			}
		}
	}

	async fn on_paused(&self, location: ProtocolLocation, reason: PauseReason) {
		let Some(backend) = self.backend() else {
			return;
		};
		let editor_location = self.inner.mapper.to_editor_location(&location);

		let first_pause = self.inner.pristine.swap(false, Ordering::SeqCst);
		if first_pause && !reason.is_exception() && self.inner.config.initial_break() == InitialBreak::Resume {
			tracing::debug!(location = %editor_location, "skipping initial break");
			self.emit(SessionEvent::Message(format!("Running {editor_location}")));
			if let Err(e) = backend.resume().await {
				self.emit(SessionEvent::Error(format!("Failed to resume: {e}")));
			}
			return;
		}

		let frames = match backend.backtrace().await {
			Ok(frames) => frames,
			Err(e) => {
				tracing::warn!(error = %e, "backtrace failed");
				self.emit(SessionEvent::Error(format!("Failed to fetch backtrace: {e}")));
				Vec::new()
			}
		};
		*self.inner.frames.lock() = frames.clone();
		if !self.set_state(SessionState::Paused) {
			return;
		}
		tracing::debug!(location = %editor_location, %reason, "paused");
		self.emit(SessionEvent::Break {
			location: editor_location,
			reason,
		});
		self.emit(SessionEvent::BacktraceChanged(frames));
	}

	/// The debuggee never left its pause: restore `Paused` with fresh frames.
	async fn on_resume_failed(&self) {
		let Some(backend) = self.backend() else {
			return;
		};
		if self.state() != SessionState::Running {
			return;
		}
		let frames = match backend.backtrace().await {
			Ok(frames) => frames,
			Err(e) => {
				tracing::warn!(error = %e, "backtrace failed");
				Vec::new()
			}
		};
		*self.inner.frames.lock() = frames.clone();
		if self.set_state(SessionState::Paused) {
			tracing::debug!("resume rejected, still paused");
			self.emit(SessionEvent::BacktraceChanged(frames));
		}
	}
}

/// Feeds backend events into the session, one at a time.
async fn pump(session: Weak<Inner>, mut events: mpsc::UnboundedReceiver<BackendEvent>) {
	while let Some(event) = events.recv().await {
		let Some(session) = Session::from_weak(&session) else {
			return;
		};
		let disconnected = matches!(event, BackendEvent::Disconnected);
		session.on_backend_event(event).await;
		if disconnected {
			return;
		}
	}
	if let Some(session) = Session::from_weak(&session) {
		session.teardown_detached();
	}
}

/// Debuggee stdout and stderr become messages; its exit ends a live
/// session.
async fn forward_output(session: Weak<Inner>, mut output: mpsc::UnboundedReceiver<ProcessEvent>) {
	while let Some(event) = output.recv().await {
		let Some(session) = Session::from_weak(&session) else {
			return;
		};
		match event {
			ProcessEvent::Stdout(text) => session.emit(SessionEvent::Message(text)),
			ProcessEvent::Stderr(text) => session.emit(SessionEvent::Error(text)),
			ProcessEvent::Exited { code } => {
				tracing::info!(?code, "debuggee exited");
				if session.state().is_live() {
					session.teardown_detached();
				}
				return;
			}
		}
	}
}

/// Holds at most one session; starting a new one ends the previous.
pub struct SessionManager {
	connector: Arc<dyn Connector>,
	current: tokio::sync::Mutex<Option<Session>>,
}

impl Default for SessionManager {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionManager {
	pub fn new() -> Self {
		Self::with_connector(Arc::new(ProcessConnector))
	}

	pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
		Self {
			connector,
			current: tokio::sync::Mutex::new(None),
		}
	}

	/// Creates the session without starting it, so breakpoints can be
	/// queued first. Any previous session is destroyed.
	pub async fn create_session(&self, config: SessionConfig) -> Session {
		let mut current = self.current.lock().await;
		if let Some(previous) = current.take() {
			previous.destroy().await;
		}
		let session = Session::with_connector(config, Arc::clone(&self.connector));
		*current = Some(session.clone());
		session
	}

	/// [`create_session`](Self::create_session) followed by
	/// [`Session::start`].
	pub async fn start_session(&self, config: SessionConfig) -> Result<Session> {
		let session = self.create_session(config).await;
		session.start().await?;
		Ok(session)
	}

	pub async fn current(&self) -> Option<Session> {
		self.current.lock().await.clone()
	}

	pub async fn destroy_session(&self) {
		let session = self.current.lock().await.take();
		if let Some(session) = session {
			session.destroy().await;
		}
	}
}
