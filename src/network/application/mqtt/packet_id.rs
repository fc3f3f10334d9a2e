//! Packet identifier allocation.

/// Hands out MQTT packet identifiers in `1..=65535`.
///
/// The counter starts at 1 and is incremented before each use, so the first
/// identifier issued is 2. After 65535 it wraps to 1; 0 is never produced.
#[derive(Debug, Clone)]
pub struct PacketIdGenerator {
    last: u16,
}

impl PacketIdGenerator {
    /// A fresh generator.
    pub const fn new() -> Self {
        Self { last: 1 }
    }

    /// A generator whose next identifier follows `last`.
    pub const fn starting_after(last: u16) -> Self {
        Self { last }
    }

    /// Allocate the next identifier.
    pub fn next_id(&mut self) -> u16 {
        self.last = match self.last {
            u16::MAX | 0 => 1,
            id => id + 1,
        };
        self.last
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
