//! Downlink handler registries.
//!
//! The platform addresses device properties and services by name. A device
//! registers one handler per name; the router looks them up when a
//! `/property/set`, `/property/get` or `/service/{id}/invoke` request arrives.

use crate::config::{MAX_NAME_LEN, MAX_PROPERTIES, MAX_SERVICES};
use heapless::{FnvIndexMap, String};

/// Longest JSON value a handler can produce.
pub const MAX_VALUE_LEN: usize = 128;

/// Result type for property reads and service invocations.
pub type HandlerResult = Result<Option<String<MAX_VALUE_LEN>>, HandlerError>;

/// Errors a handler reports back to the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerError {
    /// The value or arguments could not be interpreted.
    InvalidArguments,
    /// The device could not carry the request out.
    ExecutionError,
    /// The output does not fit.
    BufferOverflow,
    /// The property cannot be written from the platform.
    ReadOnly,
}

#[cfg(feature = "defmt")]
impl defmt::Format for HandlerError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            HandlerError::InvalidArguments => defmt::write!(f, "InvalidArguments"),
            HandlerError::ExecutionError => defmt::write!(f, "ExecutionError"),
            HandlerError::BufferOverflow => defmt::write!(f, "BufferOverflow"),
            HandlerError::ReadOnly => defmt::write!(f, "ReadOnly"),
        }
    }
}

/// A named device property.
pub trait PropertyHandler {
    /// Apply `value`, the JSON text the platform sent for this property.
    fn write(&mut self, value: &str) -> Result<(), HandlerError>;

    /// The current value as JSON text. `Ok(None)` leaves the property out of
    /// the reply.
    fn read(&mut self) -> HandlerResult;
}

/// A named device service.
pub trait ServiceHandler {
    /// Run the service with `params`, the JSON text of the request's `params`.
    /// The returned JSON becomes the reply's `data`.
    fn invoke(&mut self, params: &str) -> HandlerResult;
}

/// Registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The name is longer than [`MAX_NAME_LEN`].
    NameTooLong,
    /// Every slot is taken.
    Full,
}

/// Properties by name.
#[derive(Debug)]
pub struct PropertyRegistry<P> {
    handlers: FnvIndexMap<String<MAX_NAME_LEN>, P, MAX_PROPERTIES>,
}

impl<P: PropertyHandler> PropertyRegistry<P> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: FnvIndexMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: P) -> Result<(), RegistryError> {
        let key = String::try_from(name).map_err(|_| RegistryError::NameTooLong)?;
        self.handlers
            .insert(key, handler)
            .map_err(|_| RegistryError::Full)?;
        Ok(())
    }

    /// Write `value` to the named property. `None` when no such property exists.
    pub fn write(&mut self, name: &str, value: &str) -> Option<Result<(), HandlerError>> {
        self.get_mut(name).map(|handler| handler.write(value))
    }

    /// Read the named property. `None` when no such property exists.
    pub fn read(&mut self, name: &str) -> Option<HandlerResult> {
        self.get_mut(name).map(|handler| handler.read())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|key| key.as_str())
    }

    /// Number of registered properties.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut P> {
        self.handlers
            .iter_mut()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, handler)| handler)
    }
}

impl<P: PropertyHandler> Default for PropertyRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Services by name.
#[derive(Debug)]
pub struct ServiceRegistry<S> {
    handlers: FnvIndexMap<String<MAX_NAME_LEN>, S, MAX_SERVICES>,
}

impl<S: ServiceHandler> ServiceRegistry<S> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: FnvIndexMap::new(),
        }
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register(&mut self, name: &str, handler: S) -> Result<(), RegistryError> {
        let key = String::try_from(name).map_err(|_| RegistryError::NameTooLong)?;
        self.handlers
            .insert(key, handler)
            .map_err(|_| RegistryError::Full)?;
        Ok(())
    }

    /// Invoke the named service. `None` when no such service exists.
    pub fn invoke(&mut self, name: &str, params: &str) -> Option<HandlerResult> {
        self.handlers
            .iter_mut()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, handler)| handler.invoke(params))
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<S: ServiceHandler> Default for ServiceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Placeholder for devices without services.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoService;

impl ServiceHandler for NoService {
    fn invoke(&mut self, _params: &str) -> HandlerResult {
        Err(HandlerError::ExecutionError)
    }
}
