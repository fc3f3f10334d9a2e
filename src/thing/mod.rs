//! Thing Model device agent.
//!
//! [`ThingModel`] logs a device in to the platform over an MQTT [`Session`],
//! answers the platform's property and service requests from the registered
//! handlers, and sends the device's own requests (property posts, events,
//! desired property queries, ...) and waits for the matching reply.
//!
//! # Examples
//!
//! ```rust,no_run
//! use tmlink::config::DeviceConfig;
//! use tmlink::thing::{HandlerError, HandlerResult, NoService, PropertyHandler, ThingModel};
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
//! struct Led(bool);
//!
//! impl PropertyHandler for Led {
//!     fn write(&mut self, value: &str) -> Result<(), HandlerError> {
//!         self.0 = value.trim() == "true";
//!         Ok(())
//!     }
//!     fn read(&mut self) -> HandlerResult {
//!         let value = if self.0 { "true" } else { "false" };
//!         Ok(Some(heapless::String::try_from(value).map_err(|_| HandlerError::BufferOverflow)?))
//!     }
//! }
//!
//! let mut send = [0u8; 1024];
//! let mut recv = [0u8; 1024];
//! let mut thing: ThingModel<'_, _, _, Led, NoService> =
//!     ThingModel::new(Dialer, Ticks, &mut send, &mut recv);
//! thing.register_property("led", Led(false)).unwrap();
//!
//! let config = DeviceConfig::new("product", "lamp-01", "a2V5");
//! thing.login(&config, "version=2018-10-31&res=...", 5_000).unwrap();
//! thing.post_property(r#"{"led":{"value":false}}"#).unwrap();
//! loop {
//!     thing.step(200).unwrap();
//! }
//! ```

pub mod correlator;
pub mod onejson;
pub mod registry;
pub mod router;
pub mod token;

pub use correlator::{Correlator, ReplyStatus};
pub use onejson::{Body, Reply};
pub use registry::{
    HandlerError, HandlerResult, NoService, PropertyHandler, PropertyRegistry, RegistryError,
    ServiceHandler, ServiceRegistry,
};
pub use router::Router;
#[cfg(feature = "gateway")]
pub use router::SubDeviceHandler;
pub use token::{SignMethod, Signer, TokenError};

use crate::config::{DeviceConfig, MAX_CLIENT_ID_LEN, MAX_PAYLOAD_LEN};
use crate::network::{Close, Connect};
use crate::network::application::mqtt::{self, MAX_TOPIC_LEN, Options, QoS, Session};
use crate::time::{Clock, Countdown};
use core::fmt::Write as _;
use heapless::String;
use onejson::{CODE_OK, JsonWriter};

/// Topic suffixes below `$sys/{pid}/{dev}/thing`.
pub mod action {
    /// Report property values.
    pub const PROPERTY_POST: &str = "/property/post";
    /// Report an event.
    pub const EVENT_POST: &str = "/event/post";
    /// Query desired property values.
    pub const DESIRED_GET: &str = "/property/desired/get";
    /// Delete desired property values.
    pub const DESIRED_DELETE: &str = "/property/desired/delete";
    /// Report packed data for several devices.
    pub const PACK_POST: &str = "/pack/post";
    /// Report historical data.
    pub const HISTORY_POST: &str = "/history/post";
    /// Platform writes properties.
    pub const PROPERTY_SET: &str = "/property/set";
    /// Answer to [`PROPERTY_SET`].
    pub const PROPERTY_SET_REPLY: &str = "/property/set_reply";
    /// Platform reads properties.
    pub const PROPERTY_GET: &str = "/property/get";
    /// Answer to [`PROPERTY_GET`].
    pub const PROPERTY_GET_REPLY: &str = "/property/get_reply";
    /// Service invocations, followed by the service id.
    pub const SERVICE: &str = "/service/";
    /// Appended to `SERVICE{id}` for an invocation.
    pub const INVOKE: &str = "/invoke";
    /// Appended to `SERVICE{id}` for the invocation answer.
    pub const INVOKE_REPLY: &str = "/invoke_reply";
    /// Appended to a request action for the platform's answer.
    pub const REPLY: &str = "/reply";
    /// Sub-device traffic relayed through a gateway.
    pub const SUB_DEVICE: &str = "/sub/";
}

/// Errors reported by [`ThingModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The MQTT session failed.
    Mqtt(mqtt::Error),
    /// No matching reply arrived before the deadline.
    Timeout,
    /// The platform answered with a code other than 200.
    ReplyCode(i32),
    /// A OneJSON document could not be decoded.
    Decode,
    /// A document does not fit its buffer.
    BufferOverflow,
    /// A topic does not fit [`MAX_TOPIC_LEN`].
    TopicTooLong,
    /// The operation needs a logged in device.
    NotLoggedIn,
    /// `login` was called while logged in.
    AlreadyLoggedIn,
    /// The broker could not be reached.
    Transport,
    /// The login token could not be built.
    Token(TokenError),
    /// A handler could not be registered.
    Registry(RegistryError),
}

impl From<mqtt::Error> for Error {
    fn from(e: mqtt::Error) -> Self {
        Error::Mqtt(e)
    }
}

impl From<TokenError> for Error {
    fn from(e: TokenError) -> Self {
        Error::Token(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Error {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Mqtt(e) => defmt::write!(f, "Mqtt({})", e),
            Error::Timeout => defmt::write!(f, "Timeout"),
            Error::ReplyCode(code) => defmt::write!(f, "ReplyCode({})", code),
            Error::Decode => defmt::write!(f, "Decode"),
            Error::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            Error::TopicTooLong => defmt::write!(f, "TopicTooLong"),
            Error::NotLoggedIn => defmt::write!(f, "NotLoggedIn"),
            Error::AlreadyLoggedIn => defmt::write!(f, "AlreadyLoggedIn"),
            Error::Transport => defmt::write!(f, "Transport"),
            Error::Token(e) => defmt::write!(f, "Token({})", e),
            Error::Registry(e) => defmt::write!(f, "Registry({})", e),
        }
    }
}

/// A device logged in to the Thing Model platform.
///
/// Owns the MQTT session and the router the session dispatches into. `login`
/// opens the broker connection through the [`Connect`] implementation and
/// `logout` closes it again. Every method that waits on the network pumps the
/// session itself, so incoming property and service requests are answered
/// while a request is waiting for its reply.
///
/// Only one request can be outstanding at a time; `&mut self` on
/// [`send_request`](Self::send_request) enforces it.
pub struct ThingModel<'b, N: Connect, K, P, S = NoService> {
    connector: N,
    session: Session<'b, N::Connection, K, Router<P, S>>,
    router: Router<P, S>,
    clock: K,
    request_timeout_ms: u32,
}

impl<N: Connect, K, P, S> core::fmt::Debug for ThingModel<'_, N, K, P, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ThingModel")
            .field("session", &self.session)
            .field("prefix", &self.router.prefix())
            .field("status", &self.router.correlator.status())
            .finish_non_exhaustive()
    }
}

impl<'b, N, K, P, S> ThingModel<'b, N, K, P, S>
where
    N: Connect,
    K: Clock + Clone,
    P: PropertyHandler,
    S: ServiceHandler,
{
    /// A logged out device that opens its broker connections with `connector`.
    pub fn new(connector: N, clock: K, send_buf: &'b mut [u8], recv_buf: &'b mut [u8]) -> Self {
        Self {
            connector,
            session: Session::detached(clock.clone(), send_buf, recv_buf),
            router: Router::new(),
            clock,
            request_timeout_ms: crate::config::DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }

    /// The underlying MQTT session.
    pub fn session(&self) -> &Session<'b, N::Connection, K, Router<P, S>> {
        &self.session
    }

    /// Request correlation state.
    pub fn correlator(&self) -> &Correlator {
        &self.router.correlator
    }

    /// `$sys/{pid}/{dev}/thing` while logged in, empty otherwise.
    pub fn prefix(&self) -> &str {
        self.router.prefix()
    }

    /// `true` between a successful `login` and `logout` or a session failure.
    pub fn is_logged_in(&self) -> bool {
        !self.router.prefix().is_empty() && self.session.is_connected()
    }

    /// Registered properties.
    pub fn properties(&mut self) -> &mut PropertyRegistry<P> {
        &mut self.router.properties
    }

    /// Registered services.
    pub fn services(&mut self) -> &mut ServiceRegistry<S> {
        &mut self.router.services
    }

    /// Register a property handler under `name`.
    pub fn register_property(&mut self, name: &str, handler: P) -> Result<(), Error> {
        Ok(self.router.properties.register(name, handler)?)
    }

    /// Register a service handler under `name`.
    pub fn register_service(&mut self, name: &str, handler: S) -> Result<(), Error> {
        Ok(self.router.services.register(name, handler)?)
    }

    /// Route sub-device traffic to `handler`, or stop with `None`.
    #[cfg(feature = "gateway")]
    pub fn set_sub_device_handler(&mut self, handler: Option<SubDeviceHandler>) {
        self.router.sub_device = handler;
    }

    /// Open the configured broker, connect with `token` as password and
    /// subscribe to the device's topics.
    ///
    /// A transport left over from a failed session is closed first. Any
    /// failure after the transport is open closes it again.
    pub fn login(
        &mut self,
        config: &DeviceConfig<'_>,
        token: &str,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        if self.session.is_connected() {
            return Err(Error::AlreadyLoggedIn);
        }
        let timer = Countdown::start(self.clock.clone(), timeout_ms);

        let mut client_id: String<MAX_CLIENT_ID_LEN> =
            String::try_from(config.device_name).map_err(|_| Error::BufferOverflow)?;
        if let Some(suffix) = config.client_id_suffix {
            client_id.push_str(suffix).map_err(|_| Error::BufferOverflow)?;
        }
        let options = Options {
            client_id: &client_id,
            keep_alive_seconds: config.keep_alive_seconds,
            clean_session: true,
            username: Some(config.product_id),
            password: Some(token.as_bytes()),
            will: None,
        };

        self.router.set_prefix(config.product_id, config.device_name)?;
        let mut filter: String<MAX_TOPIC_LEN> = String::new();
        if write!(filter, "{}/#", self.router.prefix()).is_err() {
            self.router.clear_prefix();
            return Err(Error::TopicTooLong);
        }

        let address = config.broker_address();
        self.release_transport();
        let transport = match self.connector.connect(address.host, address.port, timer.left()) {
            Ok(transport) => transport,
            Err(_) => {
                error!("cannot open {}:{}", address.host, address.port);
                self.router.clear_prefix();
                return Err(Error::Transport);
            }
        };
        if let Ok(Some(stale)) | Err(stale) = self.session.attach(transport) {
            close_transport(stale);
        }

        if let Err(e) = self.session.connect(&mut self.router, &options, timer.left()) {
            self.release_transport();
            self.router.clear_prefix();
            return Err(e.into());
        }
        let subscribed = self.session.subscribe(
            &mut self.router,
            &filter,
            QoS::AtMostOnce,
            router::on_message::<P, S>,
            timer.left(),
        );
        if let Err(e) = subscribed {
            error!("subscribing {} failed: {:?}", filter.as_str(), e);
            if let Err(disconnect) = self.session.disconnect(timer.left()) {
                warn!("disconnect after the failed subscription: {:?}", disconnect);
            }
            self.release_transport();
            self.router.clear_prefix();
            return Err(e.into());
        }

        self.request_timeout_ms = config.request_timeout_ms;
        info!("device {} logged in", client_id.as_str());
        Ok(())
    }

    /// [`login`](Self::login) with a token generated from the configured
    /// access key and expiry.
    pub fn login_signed<G: Signer + ?Sized>(
        &mut self,
        config: &DeviceConfig<'_>,
        signer: &G,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        let token = token::generate(
            signer,
            config.token_expiry,
            config.product_id,
            Some(config.device_name),
            config.access_key,
        )?;
        self.login(config, &token, timeout_ms)
    }

    /// Disconnect from the platform and close the transport.
    ///
    /// The transport is closed even when DISCONNECT cannot be written.
    pub fn logout(&mut self, timeout_ms: u32) -> Result<(), Error> {
        self.router.clear_prefix();
        self.router.correlator.cancel();
        let result = self.session.disconnect(timeout_ms);
        self.release_transport();
        result?;
        Ok(())
    }

    fn release_transport(&mut self) {
        if let Some(transport) = self.session.detach() {
            close_transport(transport);
        }
    }

    /// Pump the session once, waiting at most `timeout_ms` for a packet.
    pub fn step(&mut self, timeout_ms: u32) -> Result<(), Error> {
        self.ensure_logged_in()?;
        self.session.yield_now(&mut self.router, timeout_ms)?;
        Ok(())
    }

    /// Send a request on `action` and wait for its reply.
    ///
    /// Replies for other request ids are skipped. A reply with a code other
    /// than 200 is reported as [`Error::ReplyCode`].
    pub fn send_request(
        &mut self,
        action: &str,
        body: Body<'_>,
        timeout_ms: u32,
    ) -> Result<Reply, Error> {
        self.ensure_logged_in()?;
        let timer = Countdown::start(self.clock.clone(), timeout_ms);
        let topic = self.router.topic(action)?;

        let id = self.router.correlator.next_id();
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let len = onejson::write_request(&mut payload, id, &body)?;
        self.session.publish(
            &mut self.router,
            &topic,
            &payload[..len],
            QoS::AtMostOnce,
            false,
            timer.left(),
        )?;
        self.router.correlator.begin(id, body.is_raw());
        debug!("request {} sent on {}", id, action);

        let reply = match self.wait_reply(&timer) {
            Ok(reply) => reply,
            Err(e) => {
                self.router.correlator.cancel();
                return Err(e);
            }
        };
        if reply.code != CODE_OK {
            warn!("request {} answered with code {}", id, reply.code);
            return Err(Error::ReplyCode(reply.code));
        }
        Ok(reply)
    }

    fn wait_reply(&mut self, timer: &Countdown<K>) -> Result<Reply, Error> {
        loop {
            self.session.yield_now(&mut self.router, timer.left())?;
            if let Some(reply) = self.router.correlator.take_matching() {
                return reply;
            }
            if timer.is_expired() {
                warn!("no reply before the deadline");
                return Err(Error::Timeout);
            }
        }
    }

    /// Publish a reply envelope for request `id` on `action`.
    pub fn send_response(
        &mut self,
        action: &str,
        id: &str,
        code: i32,
        data: Option<&str>,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        self.ensure_logged_in()?;
        let topic = self.router.topic(action)?;
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let len = onejson::write_reply(&mut payload, id, code, data)?;
        self.session.publish(
            &mut self.router,
            &topic,
            &payload[..len],
            QoS::AtMostOnce,
            false,
            timeout_ms,
        )?;
        Ok(())
    }

    /// Report property values. `params` is the OneJSON property object.
    pub fn post_property(&mut self, params: &str) -> Result<Reply, Error> {
        self.send_request(action::PROPERTY_POST, Body::Json(params), self.request_timeout_ms)
    }

    /// Report an event. `params` is the OneJSON event object.
    pub fn post_event(&mut self, params: &str) -> Result<Reply, Error> {
        self.send_request(action::EVENT_POST, Body::Json(params), self.request_timeout_ms)
    }

    /// Report data for several devices; see [`onejson::write_pack_entry`].
    pub fn post_pack_data(&mut self, params: &str) -> Result<Reply, Error> {
        self.send_request(action::PACK_POST, Body::Json(params), self.request_timeout_ms)
    }

    /// Report historical values.
    pub fn post_history_data(&mut self, params: &str) -> Result<Reply, Error> {
        self.send_request(action::HISTORY_POST, Body::Json(params), self.request_timeout_ms)
    }

    /// Send `raw` as a string body on `action`. The reply's data is kept
    /// unquoted.
    pub fn post_raw(&mut self, action: &str, raw: &str) -> Result<Reply, Error> {
        self.send_request(action, Body::Raw(raw), self.request_timeout_ms)
    }

    /// Fetch desired values for every registered property and write each one
    /// returned through its handler.
    pub fn get_desired_properties(&mut self) -> Result<Reply, Error> {
        let mut params = [0u8; MAX_PAYLOAD_LEN / 2];
        let len = {
            let mut w = JsonWriter::new(&mut params);
            w.raw("[")?;
            for (i, name) in self.router.properties.names().enumerate() {
                if i > 0 {
                    w.raw(",")?;
                }
                w.string(name)?;
            }
            w.raw("]")?;
            w.finish()
        };
        let params = core::str::from_utf8(&params[..len]).map_err(|_| Error::Decode)?;

        let reply = self.send_request(action::DESIRED_GET, Body::Json(params), self.request_timeout_ms)?;
        if !reply.data.is_empty() {
            for member in onejson::members(&reply.data)? {
                let (name, value) = member?;
                if let Some(Err(e)) = self.router.properties.write(name, value) {
                    warn!("desired value for {} rejected: {:?}", name, e);
                }
            }
        }
        Ok(reply)
    }

    /// Delete the desired values of every registered property.
    pub fn delete_desired_properties(&mut self) -> Result<Reply, Error> {
        let mut params = [0u8; MAX_PAYLOAD_LEN / 2];
        let len = {
            let mut w = JsonWriter::new(&mut params);
            w.raw("{")?;
            for (i, name) in self.router.properties.names().enumerate() {
                if i > 0 {
                    w.raw(",")?;
                }
                w.string(name)?;
                w.raw(":{}")?;
            }
            w.raw("}")?;
            w.finish()
        };
        let params = core::str::from_utf8(&params[..len]).map_err(|_| Error::Decode)?;
        self.send_request(action::DESIRED_DELETE, Body::Json(params), self.request_timeout_ms)
    }

    fn ensure_logged_in(&self) -> Result<(), Error> {
        if self.router.prefix().is_empty() {
            Err(Error::NotLoggedIn)
        } else {
            Ok(())
        }
    }
}

fn close_transport<C: Close>(transport: C) {
    if transport.close().is_err() {
        warn!("closing the transport failed");
    }
}
