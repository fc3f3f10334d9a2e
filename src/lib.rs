//! # tmlink - Thing Model device agent
//!
//! A `no_std` device agent for Thing Model IoT platforms. A device logs in
//! over MQTT with a signed token, reports properties and events as OneJSON
//! documents, and answers the platform's property reads, writes and service
//! invocations.
//!
//! ## Layers
//!
//! - [`network`]: timeout-bounded transport traits, a `std::net` backend and
//!   the MQTT 3.1.1 codec and session engine
//! - [`thing`]: the Thing Model agent: topic routing, request/reply
//!   correlation, OneJSON envelopes, handler registries and token generation
//! - [`time`]: millisecond clocks and the countdown deadlines every blocking
//!   call is built on
//! - [`config`]: device identity, broker endpoints and capacity limits
//!
//! Nothing allocates. Buffers are borrowed from the caller or are fixed-size
//! `heapless` containers, and every blocking call takes a timeout.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! tmlink = { version = "0.1.0", features = ["log"] }
//! ```
//!
//! ```rust,no_run
//! use tmlink::config::DeviceConfig;
//! use tmlink::thing::{
//!     HandlerError, HandlerResult, PropertyHandler, SignMethod, Signer, ThingModel, TokenError,
//! };
//! # use tmlink::network::{Close, Connect, Connection, Read, Write};
//! # use tmlink::time::Clock;
//! # struct Socket;
//! # impl Read for Socket {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8], _t: u32) -> Result<usize, ()> { Ok(0) }
//! # }
//! # impl Write for Socket {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8], _t: u32) -> Result<usize, ()> { Ok(buf.len()) }
//! # }
//! # impl Close for Socket {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl Connection for Socket {}
//! # struct Dialer;
//! # impl Connect for Dialer {
//! #     type Connection = Socket;
//! #     type Error = ();
//! #     fn connect(&mut self, _host: &str, _port: u16, _t: u32) -> Result<Socket, ()> { Ok(Socket) }
//! # }
//! # #[derive(Clone)]
//! # struct Ticks;
//! # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } }
//!
//! struct Hmac;
//! impl Signer for Hmac {
//!     fn method(&self) -> SignMethod { SignMethod::Sha1 }
//!     fn sign(&self, _key: &[u8], _msg: &[u8], _out: &mut [u8]) -> Result<usize, TokenError> {
//!         unimplemented!("platform HMAC")
//!     }
//! }
//!
//! struct Temperature;
//! impl PropertyHandler for Temperature {
//!     fn write(&mut self, _value: &str) -> Result<(), HandlerError> { Err(HandlerError::ReadOnly) }
//!     fn read(&mut self) -> HandlerResult { Ok(heapless::String::try_from("21.5").ok()) }
//! }
//!
//! let config = DeviceConfig::new("product", "sensor-01", "a2V5");
//! let mut send = [0u8; 1024];
//! let mut recv = [0u8; 1024];
//! let mut thing: ThingModel<'_, _, _, Temperature> =
//!     ThingModel::new(Dialer, Ticks, &mut send, &mut recv);
//! thing.register_property("temp", Temperature).unwrap();
//! thing.login_signed(&config, &Hmac, 5_000).unwrap();
//! thing.post_property(r#"{"temp":{"value":21.5}}"#).unwrap();
//! ```
//!
//! With the `std` feature, `network::tcp::TcpConnector` opens the broker socket and
//! `time::StdClock` provides the clock.
//!
//! ## Optional Features
//!
//! - `std`: `time::StdClock` and the `network::tcp` backend
//! - `log`: crate logging through the `log` facade
//! - `defmt`: crate logging through `defmt` and `defmt::Format` on public types
//! - `gateway`: sub-device traffic routing

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

// Must come first so the logging macros are visible in every module.
mod fmt;

/// Device identity, broker endpoints and capacity limits.
pub mod config;

/// Transport traits and protocol implementations.
pub mod network;

/// The Thing Model device agent.
pub mod thing;

/// Millisecond clocks and countdown deadlines.
pub mod time;
