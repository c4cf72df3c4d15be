//! Describes the target's peripherals and a user's configuration of them. This information is
//! used to generate initialization code.

mod peripheral;
mod pin;
mod predicate;
mod snapshot;
mod template;

// Anything that's part of the public API of the submodules is also part of the public API of model
pub use peripheral::*;
pub use pin::*;
pub use predicate::*;
pub use snapshot::*;
pub use template::*;

/// A complete peripheral schema for one device
///
/// Loaded once and immutable afterwards. Replacing a schema at runtime goes through
/// [`crate::SchemaRegistry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub(crate) device: String,
    pub(crate) default_clock_hz: Option<u32>,
    pub(crate) peripherals: Vec<PeripheralDescriptor>,
    pub(crate) conflicts: Vec<ConflictRule>,
}

impl Schema {
    /// Name of the device, e.g., `ATmega328P`
    pub fn device(&self) -> &str {
        &self.device
    }

    /// CPU clock declared by the schema, used when the caller does not supply one
    pub fn default_clock_hz(&self) -> Option<u32> {
        self.default_clock_hz
    }

    /// Peripherals in declaration order
    pub fn peripherals(&self) -> &[PeripheralDescriptor] {
        &self.peripherals
    }

    pub fn peripheral(&self, id: PeripheralId) -> Option<&PeripheralDescriptor> {
        self.peripherals.iter().find(|p| p.id == id)
    }

    pub fn conflicts(&self) -> &[ConflictRule] {
        &self.conflicts
    }
}
