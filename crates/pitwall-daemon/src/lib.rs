//! pitwall server runtime.
//!
//! Binds the domain logic from `pitwall-core` into a long-running daemon:
//! the SQLite store, the form value service, the LDX directory watcher and
//! XML injector, the telemetry hub and sources, and the HTTP/WebSocket
//! surface. Everything long-lived is a task that honors a shared shutdown
//! signal.

pub mod http;
pub mod hub;
pub mod ldx;
pub mod source;
pub mod store;
pub mod values;
pub mod watcher;
