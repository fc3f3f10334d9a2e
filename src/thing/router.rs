//! Downlink routing for the device's thing topics.
//!
//! Everything the platform sends arrives under `$sys/{pid}/{dev}/thing`. The
//! part after that prefix (the action) decides what happens: property writes
//! and reads are answered from the [`PropertyRegistry`], service invocations
//! from the [`ServiceRegistry`], and replies to the device's own requests are
//! handed to the [`Correlator`].

use super::correlator::Correlator;
use super::onejson::{self, CODE_FAILED, CODE_OK, JsonWriter};
use super::registry::{PropertyHandler, PropertyRegistry, ServiceHandler, ServiceRegistry};
use super::{Error, action};
use crate::config::{MAX_PAYLOAD_LEN, MAX_REPLY_DATA_LEN};
use crate::network::application::mqtt::{MAX_TOPIC_LEN, Message, Publish};
use core::fmt::Write as _;
use heapless::String;

/// Longest topic prefix.
pub const MAX_PREFIX_LEN: usize = 96;

/// Callback for sub-device traffic: the action and the raw payload.
#[cfg(feature = "gateway")]
pub type SubDeviceHandler = fn(action: &str, payload: &[u8]);

/// Actions whose messages are replies to a device request.
const REPLY_ACTIONS: [&str; 6] = [
    action::PROPERTY_POST,
    action::EVENT_POST,
    action::DESIRED_GET,
    action::DESIRED_DELETE,
    action::PACK_POST,
    action::HISTORY_POST,
];

/// Marker of a composite property post reply, matched anywhere in the topic.
const COMPOSITE_POST_REPLY: &str = "/cmp/property/post/reply";

/// What a downlink topic asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Downlink<'a> {
    /// Write properties and answer `/property/set_reply`.
    PropertySet,
    /// Read properties and answer `/property/get_reply`.
    PropertyGet,
    /// A reply to one of the device's requests.
    Reply,
    /// Invoke the named service.
    ServiceInvoke(&'a str),
    /// Traffic for a sub-device behind this gateway.
    #[cfg(feature = "gateway")]
    SubDevice {
        /// The action part of the topic.
        action: &'a str,
        /// The action is a reply to a device request.
        is_reply: bool,
    },
    /// Nothing this router handles.
    Unknown,
}

/// Classify `topic` against the device prefix.
///
/// Actions are matched whole. The device subscribes to its entire topic tree,
/// so its own uplinks (`/property/post`, `/property/set_reply`, ...) come back
/// from the broker and must fall through to [`Downlink::Unknown`].
pub fn classify<'a>(prefix: &str, topic: &'a str) -> Downlink<'a> {
    let suffix = topic.strip_prefix(prefix).filter(|_| !prefix.is_empty());

    if let Some(suffix) = suffix {
        match suffix {
            action::PROPERTY_SET => return Downlink::PropertySet,
            action::PROPERTY_GET => return Downlink::PropertyGet,
            _ => {}
        }
        if is_reply_to_request(suffix) {
            return Downlink::Reply;
        }
    }
    if topic.contains(COMPOSITE_POST_REPLY) {
        return Downlink::Reply;
    }
    if let Some(service) = suffix.and_then(invoked_service) {
        return Downlink::ServiceInvoke(service);
    }
    #[cfg(feature = "gateway")]
    if let Some(suffix) = suffix.filter(|s| s.starts_with(action::SUB_DEVICE)) {
        return Downlink::SubDevice {
            action: suffix,
            is_reply: suffix.ends_with(action::REPLY),
        };
    }
    Downlink::Unknown
}

fn is_reply_to_request(suffix: &str) -> bool {
    suffix
        .strip_suffix(action::REPLY)
        .is_some_and(|request| REPLY_ACTIONS.contains(&request))
}

// `/service/{id}/invoke` with a single non-empty id level.
fn invoked_service(suffix: &str) -> Option<&str> {
    let service = suffix
        .strip_prefix(action::SERVICE)?
        .strip_suffix(action::INVOKE)?;
    (!service.is_empty() && !service.contains('/')).then_some(service)
}

/// Routes downlink messages and owns the request correlation state.
#[derive(Debug)]
pub struct Router<P, S> {
    prefix: String<MAX_PREFIX_LEN>,
    pub(crate) correlator: Correlator,
    pub(crate) properties: PropertyRegistry<P>,
    pub(crate) services: ServiceRegistry<S>,
    #[cfg(feature = "gateway")]
    pub(crate) sub_device: Option<SubDeviceHandler>,
}

/// Session message handler that forwards to [`Router::route`].
pub fn on_message<P: PropertyHandler, S: ServiceHandler>(
    router: &mut Router<P, S>,
    message: &Message<'_>,
    out: &mut dyn Publish,
) {
    router.route(message.topic, message.payload, out);
}

impl<P, S> Router<P, S> {
    /// The topic prefix, empty while logged out.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn set_prefix(&mut self, product_id: &str, device_name: &str) -> Result<(), Error> {
        self.prefix.clear();
        if write!(self.prefix, "$sys/{}/{}/thing", product_id, device_name).is_err() {
            self.prefix.clear();
            return Err(Error::TopicTooLong);
        }
        Ok(())
    }

    pub(crate) fn clear_prefix(&mut self) {
        self.prefix.clear();
    }

    /// The full topic for `action`.
    pub fn topic(&self, action: &str) -> Result<String<MAX_TOPIC_LEN>, Error> {
        let mut topic = String::new();
        topic.push_str(&self.prefix).map_err(|_| Error::TopicTooLong)?;
        topic.push_str(action).map_err(|_| Error::TopicTooLong)?;
        Ok(topic)
    }
}

impl<P: PropertyHandler, S: ServiceHandler> Router<P, S> {
    /// A router with empty registries and no prefix.
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            correlator: Correlator::new(),
            properties: PropertyRegistry::new(),
            services: ServiceRegistry::new(),
            #[cfg(feature = "gateway")]
            sub_device: None,
        }
    }

    /// Handle one downlink message, publishing any answer through `out`.
    pub fn route(&mut self, topic: &str, payload: &[u8], out: &mut dyn Publish) {
        let Ok(text) = core::str::from_utf8(payload) else {
            warn!("non utf-8 payload on {}", topic);
            return;
        };
        trace!("downlink on {}", topic);

        match classify(&self.prefix, topic) {
            Downlink::PropertySet => self.property_set(text, out),
            Downlink::PropertyGet => self.property_get(text, out),
            Downlink::Reply => self.correlator.complete(text),
            Downlink::ServiceInvoke(service) => self.service_invoke(service, text, out),
            #[cfg(feature = "gateway")]
            Downlink::SubDevice { action: suffix, is_reply } => {
                if let Some(handler) = self.sub_device {
                    handler(suffix, payload);
                }
                if is_reply {
                    self.correlator.complete(text);
                }
            }
            Downlink::Unknown => debug!("unhandled topic {}", topic),
        }
    }

    /// Publish a reply envelope on `prefix + action`.
    pub fn respond(
        &self,
        out: &mut dyn Publish,
        action: &str,
        id: &str,
        code: i32,
        data: Option<&str>,
    ) -> Result<(), Error> {
        let topic = self.topic(action)?;
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let len = onejson::write_reply(&mut payload, id, code, data)?;
        out.publish(&topic, &payload[..len])?;
        Ok(())
    }

    fn property_set(&mut self, text: &str, out: &mut dyn Publish) {
        let request = match onejson::parse_request(text) {
            Ok(request) => request,
            Err(e) => {
                warn!("bad property set request: {:?}", e);
                return;
            }
        };

        let mut code = CODE_OK;
        if let Some(params) = request.params {
            match onejson::members(params) {
                Ok(members) => {
                    for member in members {
                        let Ok((name, value)) = member else {
                            code = CODE_FAILED;
                            break;
                        };
                        match self.properties.write(name, value) {
                            Some(Ok(())) => {}
                            Some(Err(e)) => {
                                warn!("property {} rejected value: {:?}", name, e);
                                code = CODE_FAILED;
                            }
                            None => debug!("ignoring unknown property {}", name),
                        }
                    }
                }
                Err(_) => code = CODE_FAILED,
            }
        }

        if let Err(e) = self.respond(out, action::PROPERTY_SET_REPLY, request.id, code, None) {
            warn!("property set reply failed: {:?}", e);
        }
    }

    fn property_get(&mut self, text: &str, out: &mut dyn Publish) {
        let request = match onejson::parse_request(text) {
            Ok(request) => request,
            Err(e) => {
                warn!("bad property get request: {:?}", e);
                return;
            }
        };

        let mut data = [0u8; MAX_REPLY_DATA_LEN];
        let collected = self.collect_properties(request.params.unwrap_or("[]"), &mut data);
        let (code, data) = match collected {
            Ok(len) => (CODE_OK, core::str::from_utf8(&data[..len]).ok()),
            Err(e) => {
                warn!("property get failed: {:?}", e);
                (CODE_FAILED, None)
            }
        };

        if let Err(e) = self.respond(out, action::PROPERTY_GET_REPLY, request.id, code, data) {
            warn!("property get reply failed: {:?}", e);
        }
    }

    // Build `{"name":value,...}` for every requested property that exists.
    fn collect_properties(&mut self, names: &str, buf: &mut [u8]) -> Result<usize, Error> {
        let mut w = JsonWriter::new(buf);
        w.raw("{")?;
        let mut first = true;
        for element in onejson::elements(names)? {
            let name = onejson::string_contents(element?)?;
            let value = match self.properties.read(name) {
                Some(Ok(Some(value))) => value,
                Some(Ok(None)) => continue,
                Some(Err(e)) => {
                    warn!("reading property {} failed: {:?}", name, e);
                    continue;
                }
                None => {
                    debug!("ignoring unknown property {}", name);
                    continue;
                }
            };
            if !first {
                w.raw(",")?;
            }
            first = false;
            w.string(name)?;
            w.raw(":")?;
            w.raw(&value)?;
        }
        w.raw("}")?;
        Ok(w.finish())
    }

    fn service_invoke(&mut self, service: &str, text: &str, out: &mut dyn Publish) {
        let request = match onejson::parse_request(text) {
            Ok(request) => request,
            Err(e) => {
                warn!("bad invoke request for {}: {:?}", service, e);
                return;
            }
        };

        let (code, output) = match self.services.invoke(service, request.params.unwrap_or("{}")) {
            Some(Ok(output)) => (CODE_OK, output),
            Some(Err(e)) => {
                warn!("service {} failed: {:?}", service, e);
                (CODE_FAILED, None)
            }
            None => {
                warn!("no service named {}", service);
                return;
            }
        };

        let mut reply_action: String<MAX_TOPIC_LEN> = String::new();
        if write!(reply_action, "{}{}{}", action::SERVICE, service, action::INVOKE_REPLY).is_err() {
            warn!("service name {} too long", service);
            return;
        }
        let data = output.as_deref().unwrap_or("{}");
        if let Err(e) = self.respond(out, &reply_action, request.id, code, Some(data)) {
            warn!("invoke reply failed: {:?}", e);
        }
    }
}

impl<P: PropertyHandler, S: ServiceHandler> Default for Router<P, S> {
    fn default() -> Self {
        Self::new()
    }
}
