//! Debug session runtime: processes, transports, and request correlation.
//!
//! ```text
//! ┌──────────────────┐
//! │     bugs-rs      │  Session state machine, backends
//! └────────┬─────────┘
//! ┌────────▼─────────┐
//! │   bugs-runtime   │  This crate
//! │  ┌────────────┐  │
//! │  │ Connection │  │  id correlation, event dispatch
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ Transport  │  │  Content-Length TCP / WebSocket
//! │  └────────────┘  │
//! │  ┌────────────┐  │
//! │  │ Supervisor │  │  debuggee process lifecycle
//! │  └────────────┘  │
//! └──────────────────┘
//! ```

pub mod connection;
pub mod dialect;
pub mod discovery;
pub mod error;
pub mod retry;
pub mod supervisor;
pub mod transport;

pub use connection::Connection;
pub use dialect::{CdpDialect, Dialect, Inbound, ProtocolEvent, V8Dialect};
pub use discovery::{NEW_TAB_URL, discover_websocket_url, list_targets, select_target};
pub use error::{Error, Result};
pub use retry::{RetryPolicy, connect_with_retry};
pub use supervisor::{LaunchSpec, ProcessEvent, ProcessExit, ProcessSupervisor, expand_home, expand_path_list, parent_dir};
pub use transport::{
	FramedReceiver, FramedSender, FramedTransport, Transport, TransportParts, TransportReceiver, WebSocketReceiver,
	WebSocketSender, WebSocketTransport,
};
