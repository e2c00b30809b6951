//! bugs: debug sessions for Node.js scripts and Chrome pages.
//!
//! A [`Session`] launches (or attaches to) a debuggee, speaks the legacy V8
//! debugger protocol to Node over TCP or the Chrome DevTools Protocol over
//! WebSocket, and presents both through one event stream and one set of
//! operations.
//!
//! ```text
//! ┌──────────────┐  SessionEvent   ┌──────────────┐
//! │   Session    │ ──────────────► │  front end   │
//! └──────┬───────┘                 └──────────────┘
//!        │ DebugBackend
//! ┌──────▼───────┐ ┌──────────────┐
//! │ NodeBackend  │ │ ChromeBackend│
//! └──────┬───────┘ └──────┬───────┘
//!        │ bugs-runtime Connection
//! ```
//!
//! ```ignore
//! use bugs::{BreakpointSpec, Session, SessionConfig, SessionEvent};
//!
//! let session = Session::new(SessionConfig::node("app.js"));
//! session.add_breakpoint(BreakpointSpec::new("app.js", 12))?;
//! let mut events = session.events();
//! session.start().await?;
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::Break { location, .. } = event {
//!         println!("paused at {location}");
//!         println!("{}", session.inspect("this").await?);
//!         session.resume().await?;
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod connector;
pub mod events;
pub mod launch;
pub mod location;
pub mod resolver;
pub mod session;
pub mod value;

pub use backend::{
	BackendEvent, BackendFuture, BreakpointAck, BreakpointId, ChromeBackend, DebugBackend, Frame, NodeBackend,
	PauseReason, Scope, ScopeKind, StepAction,
};
pub use bugs_runtime::{Error, Result};
pub use config::{ExceptionBreak, InitialBreak, SessionConfig, TransportKind};
pub use connector::{Connected, Connector, Launched, ProcessConnector};
pub use events::{BusEvent, EventStream, EventWaiter, LIFECYCLE_CAPACITY, SessionEvent};
pub use location::{EditorLocation, ProtocolLocation, SourceMapper};
pub use resolver::{EAGER_DEPTH, materialize};
pub use session::{
	Breakpoint, BreakpointKey, BreakpointSpec, PendingBreakpoint, Session, SessionManager, SessionState,
};
pub use value::{Materialized, ObjectHandle, Properties, PropertySource, RemoteValue, ValueKind};
