//! `Content-Length` framed JSON, as spoken by the V8 debug agent.
//!
//! ```text
//! Content-Length: 54\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"continue"}
//! ```
//!
//! The agent opens every connection with a header-only frame (`Type: connect`,
//! `V8-Version: ...`, `Content-Length: 0`). It is surfaced as
//! `{"type":"connect","headers":{...}}` so the connection layer can treat it as
//! an ordinary event.

use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Framed transport over any async byte stream pair.
pub struct FramedTransport<W, R> {
	writer: W,
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> FramedTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport and the channel its inbound messages are pushed to.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				writer,
				reader,
				message_tx,
			},
			message_rx,
		)
	}

	/// Reads frames until EOF.
	///
	/// A clean EOF between frames ends the loop with `Ok`. EOF inside a frame
	/// is an error. Bodies that are not valid JSON are logged and skipped.
	pub async fn run(&mut self) -> Result<()> {
		read_loop(&mut self.reader, &self.message_tx).await
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (FramedSender<W>, FramedReceiver<R>) {
		(
			FramedSender {
				writer: self.writer,
			},
			FramedReceiver {
				reader: self.reader,
				message_tx: self.message_tx,
			},
		)
	}

	/// Boxes both halves for use by a connection.
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

impl FramedTransport<OwnedWriteHalf, OwnedReadHalf> {
	/// Opens a TCP connection to a V8 debug agent.
	pub async fn connect(host: &str, port: u16) -> Result<TransportParts> {
		let stream = TcpStream::connect((host, port)).await?;
		stream.set_nodelay(true)?;
		let (reader, writer) = stream.into_split();
		let (transport, message_rx) = FramedTransport::new(writer, reader);
		tracing::debug!(host, port, "framed transport connected");
		Ok(transport.into_transport_parts(message_rx))
	}
}

/// Sending half of a [`FramedTransport`].
pub struct FramedSender<W> {
	writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FramedSender<W> {
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}
}

impl<W: AsyncWrite + Unpin + Send> Transport for FramedSender<W> {
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(async move { write_frame(&mut self.writer, &message).await })
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			self.writer.shutdown().await?;
			Ok(())
		})
	}
}

/// Receiving half of a [`FramedTransport`].
pub struct FramedReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for FramedReceiver<R> {
	fn run(self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move {
			let FramedReceiver {
				mut reader,
				message_tx,
			} = *self;
			read_loop(&mut reader, &message_tx).await
		})
	}
}

/// Writes one `Content-Length` framed JSON message.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
	let body = serde_json::to_vec(message)?;
	let header = format!("Content-Length: {}\r\n\r\n", body.len());
	writer
		.write_all(header.as_bytes())
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write frame header: {e}")))?;
	writer
		.write_all(&body)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write frame body: {e}")))?;
	writer.flush().await?;
	Ok(())
}

struct RawFrame {
	headers: HashMap<String, String>,
	body: Vec<u8>,
}

async fn read_loop<R: AsyncRead + Unpin>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()> {
	let mut reader = BufReader::new(reader);
	loop {
		let Some(frame) = read_frame(&mut reader).await? else {
			tracing::debug!("framed transport reached EOF");
			return Ok(());
		};

		let message = if frame.body.is_empty() {
			json!({ "type": "connect", "headers": frame.headers })
		} else {
			match serde_json::from_slice::<Value>(&frame.body) {
				Ok(value) => value,
				Err(e) => {
					tracing::warn!(error = %e, len = frame.body.len(), "skipping malformed frame body");
					continue;
				}
			}
		};

		if message_tx.send(message).is_err() {
			tracing::debug!("message receiver dropped, stopping framed reader");
			return Ok(());
		}
	}
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<Option<RawFrame>> {
	let mut headers = HashMap::new();
	let mut line = String::new();
	let mut first = true;

	loop {
		line.clear();
		let read = reader
			.read_line(&mut line)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read frame header: {e}")))?;
		if read == 0 {
			if first {
				return Ok(None);
			}
			return Err(Error::TransportError(
				"Failed to read frame header: unexpected EOF".to_string(),
			));
		}
		if !line.ends_with('\n') {
			return Err(Error::TransportError(
				"Failed to read frame header: unexpected EOF".to_string(),
			));
		}
		first = false;

		let trimmed = line.trim_end_matches(['\r', '\n']);
		if trimmed.is_empty() {
			if headers.is_empty() {
				// stray blank line between frames
				first = true;
				continue;
			}
			break;
		}

		match trimmed.split_once(':') {
			Some((name, value)) => {
				headers.insert(name.trim().to_string(), value.trim().to_string());
			}
			None => {
				return Err(Error::MalformedResponse(format!("invalid frame header line: {trimmed:?}")));
			}
		}
	}

	let len = headers
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_LENGTH))
		.map(|(_, value)| value.as_str())
		.ok_or_else(|| Error::MalformedResponse("frame without Content-Length".to_string()))?
		.parse::<usize>()
		.map_err(|e| Error::MalformedResponse(format!("invalid Content-Length: {e}")))?;

	if len > MAX_FRAME_LEN {
		return Err(Error::MalformedResponse(format!(
			"frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
		)));
	}

	let mut body = vec![0u8; len];
	reader
		.read_exact(&mut body)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to read frame body: {e}")))?;

	Ok(Some(RawFrame { headers, body }))
}
