//! Launching debuggees and connecting backends to them.
//!
//! The session only knows the [`Connector`] trait, which keeps process and
//! socket handling swappable (tests connect to in-process fake agents).

use std::sync::Arc;

use bugs_runtime::{
	CdpDialect, Connection, FramedTransport, ProcessEvent, ProcessSupervisor, Result, V8Dialect, WebSocketTransport,
	connect_with_retry, discover_websocket_url,
};
use tokio::sync::mpsc;

use crate::backend::{BackendEvent, BackendFuture, ChromeBackend, DebugBackend, NodeBackend};
use crate::config::{SessionConfig, TransportKind};
use crate::launch::launch_spec;

/// A spawned debuggee and its output stream.
pub type Launched = (ProcessSupervisor, mpsc::UnboundedReceiver<ProcessEvent>);

/// A backend ready for the session handshake.
pub struct Connected {
	pub backend: Arc<dyn DebugBackend>,
	pub events: mpsc::UnboundedReceiver<BackendEvent>,
}

impl std::fmt::Debug for Connected {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connected")
			.field("kind", &self.backend.kind())
			.finish_non_exhaustive()
	}
}

pub trait Connector: Send + Sync {
	/// Starts the debuggee; `None` when attaching to one already running.
	fn launch(&self, config: &SessionConfig) -> Result<Option<Launched>>;

	/// Reaches the debugger, retrying per the config's policy.
	fn connect<'a>(&'a self, config: &'a SessionConfig) -> BackendFuture<'a, Connected>;
}

/// Spawns real processes and talks to them over TCP or WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessConnector;

impl Connector for ProcessConnector {
	fn launch(&self, config: &SessionConfig) -> Result<Option<Launched>> {
		if config.attach {
			return Ok(None);
		}
		let spec = launch_spec(config)?;
		tracing::info!(program = %spec.program.display(), kind = %config.transport_kind, "launching debuggee");
		ProcessSupervisor::launch(spec).map(Some)
	}

	fn connect<'a>(&'a self, config: &'a SessionConfig) -> BackendFuture<'a, Connected> {
		Box::pin(async move {
			match config.transport_kind {
				TransportKind::Node => connect_node(config).await,
				TransportKind::Browser => connect_chrome(config).await,
			}
		})
	}
}

async fn connect_node(config: &SessionConfig) -> Result<Connected> {
	let host = config.hostname();
	let port = config.port();

	let parts = connect_with_retry(config.retry_policy(), |attempt| async move {
		tracing::debug!(attempt, host, port, "connecting to V8 agent");
		FramedTransport::connect(host, port).await
	})
	.await?;
	tracing::info!(host, port, "connected to V8 agent");

	let (connection, protocol_events, _runner) = Connection::spawn(parts, V8Dialect);
	let (backend, events) = NodeBackend::new(connection, protocol_events, config.source_mapper());
	Ok(Connected {
		backend: Arc::new(backend),
		events,
	})
}

async fn connect_chrome(config: &SessionConfig) -> Result<Connected> {
	let host = config.hostname();
	let port = config.port();
	let home_page = config.url.as_deref();

	let ws_url = connect_with_retry(config.retry_policy(), |attempt| async move {
		tracing::debug!(attempt, host, port, "discovering devtools target");
		discover_websocket_url(host, port, home_page).await
	})
	.await?;
	tracing::info!(%ws_url, "attaching to page");

	let parts = WebSocketTransport::connect(&ws_url).await?;
	let (connection, protocol_events, _runner) = Connection::spawn(parts, CdpDialect);
	let (backend, events) = ChromeBackend::new(connection, protocol_events, config.source_mapper(), config.url.clone());

	if let Err(e) = backend.handshake().await {
		backend.close();
		return Err(e);
	}
	Ok(Connected {
		backend: Arc::new(backend),
		events,
	})
}
