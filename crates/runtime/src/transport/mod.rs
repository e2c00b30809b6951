//! Duplex message channels to a debuggee.
//!
//! A transport is split into a sending half ([`Transport`]) and a receiving
//! half ([`TransportReceiver`]) so the connection can run its reader and
//! writer as independent tasks. Inbound JSON messages are pushed onto the
//! unbounded channel returned alongside the halves.
//!
//! - [`FramedTransport`]: `Content-Length` framed JSON over a byte stream
//!   (the V8 debugger protocol over TCP)
//! - [`WebSocketTransport`]: JSON text frames over a WebSocket (Chrome DevTools
//!   Protocol)

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

mod framed;
mod websocket;


pub use framed::{FramedReceiver, FramedSender, FramedTransport, MAX_FRAME_LEN, write_frame};
pub use websocket::{WebSocketReceiver, WebSocketSender, WebSocketTransport};

/// Boxed future returned by transport operations.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Serializes and writes one message.
	fn send(&mut self, message: Value) -> TransportFuture<'_>;

	/// Flushes and closes the outgoing direction.
	fn close(&mut self) -> TransportFuture<'_>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads messages until the peer closes the channel or the message
	/// receiver is dropped.
	fn run(self: Box<Self>) -> TransportFuture<'static>;
}

/// Both halves of a connected transport plus its inbound message queue.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

impl std::fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportParts").finish_non_exhaustive()
	}
}
