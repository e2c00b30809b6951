//! JSON over WebSocket text frames, as spoken by the DevTools endpoint.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client side of a DevTools WebSocket.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Connects to `ws://host:port/devtools/page/<id>`-style URLs.
	pub async fn connect(url: &str) -> Result<TransportParts> {
		let (stream, _response) = connect_async(url).await?;
		tracing::debug!(url, "websocket transport connected");

		let (sink, source) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		Ok(TransportParts {
			sender: Box::new(WebSocketSender { sink }),
			receiver: Box::new(WebSocketReceiver { source, message_tx }),
			message_rx,
		})
	}
}

/// Sending half of a [`WebSocketTransport`].
pub struct WebSocketSender {
	sink: SplitSink<WsStream, Message>,
}

impl Transport for WebSocketSender {
	fn send(&mut self, message: Value) -> TransportFuture<'_> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink.send(Message::text(text)).await?;
			Ok(())
		})
	}

	fn close(&mut self) -> TransportFuture<'_> {
		Box::pin(async move {
			match self.sink.close().await {
				Ok(()) | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
				Err(e) => Err(e.into()),
			}
		})
	}
}

/// Receiving half of a [`WebSocketTransport`].
pub struct WebSocketReceiver {
	source: SplitStream<WsStream>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for WebSocketReceiver {
	fn run(self: Box<Self>) -> TransportFuture<'static> {
		Box::pin(async move {
			let WebSocketReceiver {
				mut source,
				message_tx,
			} = *self;

			while let Some(frame) = source.next().await {
				let payload = match frame {
					Ok(Message::Text(text)) => serde_json::from_str::<Value>(&text),
					Ok(Message::Binary(bytes)) => serde_json::from_slice::<Value>(&bytes),
					Ok(Message::Close(reason)) => {
						tracing::debug!(?reason, "websocket closed by peer");
						break;
					}
					Ok(_) => continue,
					Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => break,
					Err(e) => return Err(Error::TransportError(format!("WebSocket read failed: {e}"))),
				};

				match payload {
					Ok(value) => {
						if message_tx.send(value).is_err() {
							tracing::debug!("message receiver dropped, stopping websocket reader");
							break;
						}
					}
					Err(e) => tracing::warn!(error = %e, "skipping malformed websocket message"),
				}
			}

			Ok(())
		})
	}
}
