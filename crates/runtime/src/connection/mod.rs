//! Request/response correlation on top of a transport.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::request`] with a method and params
//! 2. Connection assigns the next id (starting at 1) and parks a oneshot sender
//! 3. The [`Dialect`] wraps the request and the writer task sends it
//! 4. The dispatch loop classifies each inbound message
//! 5. Responses complete the matching oneshot; events go to the event channel
//!
//! Responses may arrive in any order. A response whose id matches nothing
//! pending is logged and dropped. Closing the connection fails every pending
//! request with [`Error::SessionClosed`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex as ParkingLotMutex;
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dialect::{Dialect, Inbound, ProtocolEvent};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

#[cfg(test)]
mod tests;

/// Pending request callbacks keyed by request id.
type CallbackMap = Arc<ParkingLotMutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Removes the pending entry when a request future is dropped before its
/// response arrives.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u64, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if self.callbacks.lock().remove(&self.id).is_some() {
			tracing::debug!(id = self.id, "removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::request`].
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::SessionClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Correlating connection to a debuggee.
pub struct Connection {
	/// Last issued request id
	last_id: AtomicU64,
	callbacks: CallbackMap,
	/// Channel feeding the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	transport_sender: TokioMutex<Option<Box<dyn Transport>>>,
	transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
	message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Dropped on close so event consumers observe end-of-stream
	events_tx: ParkingLotMutex<Option<mpsc::UnboundedSender<ProtocolEvent>>>,
	dialect: Box<dyn Dialect>,
	closed: AtomicBool,
	shutdown: Notify,
}

impl Connection {
	/// Wraps a connected transport. Returns the connection and the stream of
	/// protocol events it will dispatch once [`run`](Self::run) is driven.
	pub fn new(parts: TransportParts, dialect: impl Dialect) -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		let connection = Self {
			last_id: AtomicU64::new(0),
			callbacks: Arc::new(ParkingLotMutex::new(HashMap::new())),
			outbound_tx,
			transport_sender: TokioMutex::new(Some(sender)),
			transport_receiver: TokioMutex::new(Some(receiver)),
			message_rx: TokioMutex::new(Some(message_rx)),
			outbound_rx: TokioMutex::new(Some(outbound_rx)),
			events_tx: ParkingLotMutex::new(Some(events_tx)),
			dialect: Box::new(dialect),
			closed: AtomicBool::new(false),
			shutdown: Notify::new(),
		};

		(connection, events_rx)
	}

	/// Creates the connection and spawns its dispatch loop.
	pub fn spawn(
		parts: TransportParts,
		dialect: impl Dialect,
	) -> (Arc<Self>, mpsc::UnboundedReceiver<ProtocolEvent>, JoinHandle<()>) {
		let (connection, events_rx) = Self::new(parts, dialect);
		let connection = Arc::new(connection);
		let runner = Arc::clone(&connection);
		let handle = tokio::spawn(async move { runner.run().await });
		(connection, events_rx, handle)
	}

	pub fn dialect_name(&self) -> &'static str {
		self.dialect.name()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Number of requests still awaiting a response.
	pub fn pending_count(&self) -> usize {
		self.callbacks.lock().len()
	}

	/// Sends a request and awaits its response.
	///
	/// Fails with [`Error::SessionClosed`] if the connection is closed before
	/// or while the request is outstanding.
	pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::SessionClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);
		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		// close() may have drained the map between the check above and insert
		if self.is_closed() {
			return Err(Error::SessionClosed);
		}

		let message = self.dialect.encode_request(id, method, params)?;
		tracing::debug!(id, method, dialect = self.dialect.name(), "sending request");

		if self.outbound_tx.send(message).is_err() {
			tracing::error!("failed to queue request: outbound channel closed");
			return Err(Error::SessionClosed);
		}

		ResponseFuture { rx, guard }.await
	}

	/// Runs the reader, writer, and dispatch loop until the transport ends or
	/// [`close`](Self::close) is called.
	pub async fn run(self: &Arc<Self>) {
		let (Some(transport_receiver), Some(mut transport_sender), Some(mut outbound_rx), Some(mut message_rx)) = (
			self.transport_receiver.lock().await.take(),
			self.transport_sender.lock().await.take(),
			self.outbound_rx.lock().await.take(),
			self.message_rx.lock().await.take(),
		) else {
			tracing::error!("Connection::run called more than once");
			return;
		};

		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::error!(error = %e, "transport read error");
			}
		});

		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!(error = %e, "transport write error");
					break;
				}
			}
			let _ = transport_sender.close().await;
		});

		if !self.is_closed() {
			loop {
				tokio::select! {
					biased;
					_ = self.shutdown.notified() => break,
					message = message_rx.recv() => match message {
						Some(value) => self.dispatch(value),
						None => {
							tracing::debug!("transport closed");
							break;
						}
					},
				}
			}
		}

		self.fail_pending();
		reader_handle.abort();
		writer_handle.abort();
	}

	/// Closes the connection. Pending and future requests fail with
	/// [`Error::SessionClosed`] and the event stream ends.
	pub fn close(&self) {
		self.fail_pending();
		self.shutdown.notify_one();
	}

	pub(crate) fn dispatch(&self, message: Value) {
		match self.dialect.decode(message) {
			Inbound::Response { id, result } => {
				let callback = self.callbacks.lock().remove(&id);
				match callback {
					Some(callback) => {
						let _ = callback.send(result);
					}
					None => tracing::warn!(id, "dropping response for unknown request"),
				}
			}
			Inbound::Event(event) => {
				tracing::trace!(name = %event.name, "protocol event");
				let guard = self.events_tx.lock();
				if let Some(tx) = guard.as_ref() {
					if tx.send(event).is_err() {
						tracing::debug!("event receiver dropped");
					}
				}
			}
			Inbound::Unknown(value) => {
				tracing::debug!(message = %value, "ignoring unrecognized message");
			}
		}
	}

	fn fail_pending(&self) {
		self.closed.store(true, Ordering::SeqCst);
		let pending: Vec<_> = self.callbacks.lock().drain().collect();
		if !pending.is_empty() {
			tracing::debug!(count = pending.len(), "failing pending requests");
		}
		for (_, callback) in pending {
			let _ = callback.send(Err(Error::SessionClosed));
		}
		self.events_tx.lock().take();
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("dialect", &self.dialect.name())
			.field("pending", &self.pending_count())
			.field("closed", &self.is_closed())
			.finish()
	}
}
