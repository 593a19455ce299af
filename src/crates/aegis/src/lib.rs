//! Aegis: an autonomous agent runtime.
//!
//! The binary crate wires the cognitive core together: layered
//! configuration, adapters, and the phased runtime that owns
//! initialization, identity, and coordinated shutdown.

pub mod adapters;
pub mod config;
pub mod runtime;

/// Crate version, surfaced by the CLI
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
