//! # Application Layer Protocols
//!
//! Protocol implementations layered on a [`Connection`](crate::network::Connection).
//! They work with any transport, never allocate, and take every buffer and
//! timeout from the caller.

/// MQTT 3.1.1 packet codec and session engine.
pub mod mqtt;
