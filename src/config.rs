//! Device identity, broker addresses and capacity limits.
//!
//! Nothing here is read from files. A device fills a [`DeviceConfig`] from its
//! provisioning data and hands it to [`ThingModel::login`](crate::thing::ThingModel::login).

/// Default platform broker host.
pub const DEFAULT_HOST: &str = "mqtts.heclouds.com";
/// Default plain MQTT port.
pub const DEFAULT_PORT: u16 = 1883;
/// Default MQTT over TLS port.
pub const DEFAULT_TLS_PORT: u16 = 8883;
/// Default keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 120;
/// Default budget for one correlated request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 3_000;
/// Default token expiry (2030-12-31T16:00:00Z) in unix seconds.
pub const DEFAULT_TOKEN_EXPIRY: u64 = 1_924_833_600;

/// Largest OneJSON document sent or answered in one publication.
pub const MAX_PAYLOAD_LEN: usize = 1024;
/// Largest `data` member kept from a reply.
pub const MAX_REPLY_DATA_LEN: usize = 512;
/// Number of properties a device can register.
pub const MAX_PROPERTIES: usize = 16;
/// Number of services a device can register.
pub const MAX_SERVICES: usize = 8;
/// Longest property or service name.
pub const MAX_NAME_LEN: usize = 32;
/// Longest MQTT client id, including the optional suffix.
pub const MAX_CLIENT_ID_LEN: usize = 64;

/// Host and port of a broker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerAddress<'a> {
    /// Host name or address literal.
    pub host: &'a str,
    /// TCP port.
    pub port: u16,
}

/// Everything a device needs to log in to the platform.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig<'a> {
    /// Product the device belongs to. Used as the MQTT username.
    pub product_id: &'a str,
    /// Device name inside the product. Used as the MQTT client id.
    pub device_name: &'a str,
    /// Base64 device or product key the login token is signed with.
    pub access_key: &'a str,
    /// Appended to the device name to form the client id.
    pub client_id_suffix: Option<&'a str>,
    /// Plain MQTT endpoint.
    pub broker: BrokerAddress<'a>,
    /// TLS endpoint.
    pub tls_broker: BrokerAddress<'a>,
    /// Select [`tls_broker`](Self::tls_broker) in [`broker_address`](Self::broker_address).
    pub use_tls: bool,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_seconds: u16,
    /// Budget for one correlated request.
    pub request_timeout_ms: u32,
    /// Token expiry in unix seconds.
    pub token_expiry: u64,
}

impl<'a> DeviceConfig<'a> {
    /// A configuration for the default platform endpoints.
    pub fn new(product_id: &'a str, device_name: &'a str, access_key: &'a str) -> Self {
        Self {
            product_id,
            device_name,
            access_key,
            client_id_suffix: None,
            broker: BrokerAddress {
                host: DEFAULT_HOST,
                port: DEFAULT_PORT,
            },
            tls_broker: BrokerAddress {
                host: DEFAULT_HOST,
                port: DEFAULT_TLS_PORT,
            },
            use_tls: false,
            keep_alive_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            token_expiry: DEFAULT_TOKEN_EXPIRY,
        }
    }

    /// The endpoint selected by [`use_tls`](Self::use_tls).
    pub fn broker_address(&self) -> BrokerAddress<'a> {
        if self.use_tls {
            self.tls_broker
        } else {
            self.broker
        }
    }
}
