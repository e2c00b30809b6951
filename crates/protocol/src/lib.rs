//! Wire types for the two debugger protocols spoken by `bugs`.
//!
//! - [`v8`]: the legacy V8 debugger protocol (`node --debug-brk`), JSON bodies
//!   framed by `Content-Length` headers over TCP.
//! - [`cdp`]: the Chrome DevTools Protocol subset, JSON over WebSocket.
//!
//! This crate only describes messages; I/O lives in `bugs-runtime`.

pub mod cdp;
pub mod v8;
