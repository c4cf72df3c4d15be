//! Diagnostics about a configuration snapshot: pin conflicts and validity against the schema
//!
//! Nothing here blocks generation. Diagnostics are advisory and it is up to the caller to decide
//! whether any of them should stop a run.

mod conflict;
mod validate;

pub use conflict::{detect_conflicts, ConflictMessage};

use std::fmt;

use crate::model::{ConfigurationSnapshot, PeripheralId, PinId, Schema};
use json::JsonValue;
use log::info;
use strum::{AsRefStr, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// What a diagnostic is about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticKind {
    /// Two peripherals occupy a pin in violation of a conflict rule
    Conflict,
    /// The snapshot configures a peripheral the schema does not describe
    UnknownPeripheral,
    /// A pin is not mapped by the peripheral it is assigned to
    UndeclaredPin,
    UnknownField,
    /// A peripheral-level field is set on a single pin
    MisplacedField,
    /// A value is not allowed for its field, or has the wrong kind
    InvalidValue,
    UnknownInterrupt,
    /// The state does not fit the peripheral's resource kind
    StateShape,
    /// Several peripherals occupy a pin no conflict rule talks about
    SharedPin,
    /// Only some pins of a peripheral that needs all of them are configured
    IncompletePinSet,
}

/// A finding about one peripheral, optionally narrowed down to a pin and a field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub peripheral: PeripheralId,
    pub pin: Option<PinId>,
    pub field: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn new(
        severity: Severity,
        kind: DiagnosticKind,
        peripheral: PeripheralId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            peripheral,
            pin: None,
            field: None,
            message: message.into(),
        }
    }

    pub(crate) fn error(kind: DiagnosticKind, peripheral: PeripheralId, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, kind, peripheral, message)
    }

    pub(crate) fn warning(
        kind: DiagnosticKind,
        peripheral: PeripheralId,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, kind, peripheral, message)
    }

    #[must_use]
    pub(crate) fn at_pin(mut self, pin: &PinId) -> Self {
        self.pin = Some(pin.clone());
        self
    }

    #[must_use]
    pub(crate) fn at_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_owned());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Machine readable representation
    pub fn to_json(&self) -> JsonValue {
        json::object! {
            severity: self.severity.as_ref(),
            kind: self.kind.as_ref(),
            peripheral: self.peripheral.as_ref(),
            pin: self.pin.as_ref().map(PinId::to_string),
            field: self.field.clone(),
            message: self.message.clone(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.peripheral)?;
        if let Some(pin) = &self.pin {
            write!(f, " {pin}")?;
        }
        if let Some(field) = &self.field {
            write!(f, " [{field}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl From<ConflictMessage> for Diagnostic {
    fn from(value: ConflictMessage) -> Self {
        Diagnostic::warning(DiagnosticKind::Conflict, value.other, value.to_string())
            .at_pin(&value.pin)
    }
}

/// Run every check on `snapshot`: conflicts first, then validity
pub fn check(schema: &Schema, snapshot: &ConfigurationSnapshot) -> Vec<Diagnostic> {
    let diagnostics = detect_conflicts(schema, snapshot)
        .into_iter()
        .map(Diagnostic::from)
        .chain(validate::validate(schema, snapshot))
        .collect::<Vec<_>>();
    info!(
        "Found {} diagnostics ({} errors)",
        diagnostics.len(),
        diagnostics.iter().filter(|d| d.is_error()).count()
    );
    diagnostics
}

#[test]
fn diagnostic_renders_location() {
    let pin: PinId = "PB3".parse().unwrap();
    let d = Diagnostic::error(DiagnosticKind::InvalidValue, PeripheralId::Gpio, "bad value")
        .at_pin(&pin)
        .at_field("mode");
    assert_eq!(d.to_string(), "error: gpio PB3 [mode]: bad value");
    assert_eq!(d.to_json()["kind"], "invalid_value");
    assert_eq!(d.to_json()["pin"], "PB3");
}
