//! Session event delivery.
//!
//! - [`EventBus`]: two broadcast lanes plus predicate waiters
//! - [`EventStream`]: merges the lanes back into emit order
//! - [`EventWaiter`]: one-shot capture with a timeout
//!
//! Bulk text (debuggee output, console) has its own bounded lane, so a slow
//! subscriber loses output before it loses a `Break` or `Closed`. Waiters
//! are served before subscribers on every emit, so `wait_for_event` sees
//! its event even when a stream consumer lags.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bugs_runtime::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use crate::backend::{Frame, PauseReason};
use crate::location::EditorLocation;
use crate::session::{BreakpointKey, SessionState};

/// Room for lifecycle events per subscriber, whatever the bulk capacity.
pub const LIFECYCLE_CAPACITY: usize = 4096;

/// An event that can travel on an [`EventBus`].
pub trait BusEvent: Clone + Send + 'static {
	/// High-volume text that may be skipped for a lagging subscriber.
	fn is_bulk(&self) -> bool {
		false
	}
}

/// Everything a front end hears from a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
	/// Informational text (process stdout, console output, initial break).
	Message(String),
	/// Error text (process stderr, console errors, session failure).
	Error(String),
	/// Handshake finished; the debuggee is running.
	Started,
	Break {
		location: EditorLocation,
		reason: PauseReason,
	},
	BacktraceChanged(Vec<Frame>),
	Resumed,
	/// The backend moved a breakpoint to where code actually is.
	BreakpointResolved {
		key: BreakpointKey,
		location: EditorLocation,
	},
	StateChanged(SessionState),
	Closed,
}

impl SessionEvent {
	pub fn name(&self) -> &'static str {
		match self {
			SessionEvent::Message(_) => "message",
			SessionEvent::Error(_) => "error",
			SessionEvent::Started => "started",
			SessionEvent::Break { .. } => "break",
			SessionEvent::BacktraceChanged(_) => "backtrace",
			SessionEvent::Resumed => "resumed",
			SessionEvent::BreakpointResolved { .. } => "breakpoint-resolved",
			SessionEvent::StateChanged(_) => "state",
			SessionEvent::Closed => "closed",
		}
	}
}

impl BusEvent for SessionEvent {
	fn is_bulk(&self) -> bool {
		matches!(self, SessionEvent::Message(_) | SessionEvent::Error(_))
	}
}

struct WaiterEntry<E> {
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

pub(crate) struct EventBus<E: BusEvent> {
	lifecycle: broadcast::Sender<(u64, E)>,
	bulk: broadcast::Sender<(u64, E)>,
	/// Held while sending, so sequence order is channel order.
	seq: Mutex<u64>,
	waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: BusEvent> EventBus<E> {
	/// `capacity` bounds the bulk lane.
	pub fn new(capacity: usize) -> Self {
		let (lifecycle, _) = broadcast::channel(capacity.max(LIFECYCLE_CAPACITY));
		let (bulk, _) = broadcast::channel(capacity);
		Self {
			lifecycle,
			bulk,
			seq: Mutex::new(0),
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Delivers to matching waiters (removing them), then to subscribers.
	pub fn emit(&self, event: E) {
		{
			let mut waiters = self.waiters.lock();
			let mut i = 0;
			while i < waiters.len() {
				if (waiters[i].predicate)(&event) {
					let entry = waiters.swap_remove(i);
					let _ = entry.complete_tx.send(event.clone());
				} else {
					i += 1;
				}
			}
		}
		let mut seq = self.seq.lock();
		*seq += 1;
		let lane = if event.is_bulk() { &self.bulk } else { &self.lifecycle };
		let _ = lane.send((*seq, event));
	}

	/// Events emitted before the call are not received.
	pub fn subscribe(&self) -> EventStream<E> {
		let _seq = self.seq.lock();
		EventStream::new(self.lifecycle.subscribe(), self.bulk.subscribe())
	}

	pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (complete_tx, complete_rx) = oneshot::channel();
		self.waiters.lock().push(WaiterEntry {
			predicate: Box::new(predicate),
			complete_tx,
		});
		complete_rx
	}

	/// Drops every waiter; their receivers resolve with a closed error.
	pub fn clear_waiters(&self) {
		self.waiters.lock().clear();
	}

	#[cfg_attr(not(test), allow(dead_code))]
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

impl<E: BusEvent> Default for EventBus<E> {
	fn default() -> Self {
		Self::new(256)
	}
}

/// Subscriber side of an [`EventBus`]. Logs and skips lag instead of
/// failing.
pub struct EventStream<E: BusEvent> {
	lifecycle: broadcast::Receiver<(u64, E)>,
	bulk: broadcast::Receiver<(u64, E)>,
	next_lifecycle: Option<(u64, E)>,
	next_bulk: Option<(u64, E)>,
	closed: bool,
}

impl<E: BusEvent> EventStream<E> {
	pub(crate) fn new(lifecycle: broadcast::Receiver<(u64, E)>, bulk: broadcast::Receiver<(u64, E)>) -> Self {
		Self {
			lifecycle,
			bulk,
			next_lifecycle: None,
			next_bulk: None,
			closed: false,
		}
	}

	/// Returns `None` once the session is gone.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			if let Some(event) = self.try_recv() {
				return Some(event);
			}
			if self.closed {
				return None;
			}
			let (result, slot) = tokio::select! {
				result = self.lifecycle.recv() => (result, &mut self.next_lifecycle),
				result = self.bulk.recv() => (result, &mut self.next_bulk),
			};
			match result {
				Ok(item) => *slot = Some(item),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "subscriber fell behind, skipping session events");
				}
				Err(broadcast::error::RecvError::Closed) => self.closed = true,
			}
		}
	}

	/// Oldest event already emitted, if any.
	pub fn try_recv(&mut self) -> Option<E> {
		// a lane found empty here holds nothing older than the other lane's head
		self.closed |= fill(&mut self.lifecycle, &mut self.next_lifecycle);
		self.closed |= fill(&mut self.bulk, &mut self.next_bulk);
		let bulk_first = match (&self.next_lifecycle, &self.next_bulk) {
			(Some((lifecycle, _)), Some((bulk, _))) => bulk < lifecycle,
			(None, Some(_)) => true,
			(Some(_), None) => false,
			(None, None) => return None,
		};
		let slot = if bulk_first { &mut self.next_bulk } else { &mut self.next_lifecycle };
		slot.take().map(|(_, event)| event)
	}
}

/// Tops up an empty slot from `rx`. Returns true once the lane is closed.
fn fill<E: Clone>(rx: &mut broadcast::Receiver<(u64, E)>, slot: &mut Option<(u64, E)>) -> bool {
	while slot.is_none() {
		match rx.try_recv() {
			Ok(item) => *slot = Some(item),
			Err(broadcast::error::TryRecvError::Lagged(n)) => {
				tracing::warn!(dropped = n, "subscriber fell behind, skipping session events");
			}
			Err(broadcast::error::TryRecvError::Empty) => return false,
			Err(broadcast::error::TryRecvError::Closed) => return true,
		}
	}
	false
}

/// One-shot event capture.
///
/// [`wait`](Self::wait) applies the timeout; awaiting directly does not.
pub struct EventWaiter<E> {
	rx: oneshot::Receiver<E>,
	timeout: Duration,
}

impl<E: Send + 'static> EventWaiter<E> {
	pub(crate) fn new(rx: oneshot::Receiver<E>, timeout: Duration) -> Self {
		Self { rx, timeout }
	}

	/// # Errors
	///
	/// - [`Error::Timeout`] if nothing matched in time
	/// - [`Error::SessionClosed`] if the session went away first
	pub async fn wait(self) -> Result<E> {
		let timeout = self.timeout;
		tokio::time::timeout(timeout, self.rx)
			.await
			.map_err(|_| Error::Timeout(format!("no matching session event within {timeout:?}")))?
			.map_err(|_| Error::SessionClosed)
	}
}

impl<E: Send + 'static> Future for EventWaiter<E> {
	type Output = Result<E>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(event)) => Poll::Ready(Ok(event)),
			Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SessionClosed)),
			Poll::Pending => Poll::Pending,
		}
	}
}
