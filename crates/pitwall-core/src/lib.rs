//! Domain logic for the pitwall dashboard server.
//!
//! This crate holds everything that does not need a database handle or a
//! running task: the closed subteam role set, the typed form schema model
//! and its on-disk registry, field validation and coercion, the telemetry
//! frame type and deterministic simulator, serial frame decoding, and the
//! password/JWT primitives. The `pitwall-daemon` crate wires these into the
//! server runtime.

pub mod auth;
pub mod config;
pub mod roles;
pub mod schema;
pub mod serial;
pub mod telemetry;

pub use roles::Role;
