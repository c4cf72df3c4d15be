//! Static description of the target's peripherals

use std::collections::BTreeMap;

use crate::model::{PinId, Predicate, SettingValue, Template, TemplateScope, TemplateSet};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Identity of a peripheral of the target
///
/// The set of peripherals is closed; schema and snapshot identifiers parse into this type and
/// anything else is rejected.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum PeripheralId {
    Gpio,
    Uart,
    Spi,
    I2c,
    Timer0,
    Timer1,
    Timer2,
    Adc,
    #[strum(serialize = "extint")]
    ExtInt,
    Pcint,
    #[strum(serialize = "ac")]
    AnalogComparator,
    #[strum(serialize = "wdt")]
    Watchdog,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown peripheral {0:?}")]
pub struct UnknownPeripheralError(pub String);

impl PeripheralId {
    pub fn parse(s: &str) -> Result<Self, UnknownPeripheralError> {
        s.parse()
            .map_err(|_| UnknownPeripheralError(s.to_owned()))
    }

    /// Peripherals whose pins are handed to the pin-change interrupt aggregator instead of being
    /// expanded on their own
    pub const fn feeds_pcint(self) -> bool {
        matches!(self, Self::Pcint)
    }
}

/// Resource kind of a peripheral
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
pub enum PeripheralKind {
    /// Occupies specific physical pins
    #[strum(serialize = "pin-bound")]
    PinBound,
    /// Has no pin footprint, e.g., the watchdog timer
    #[strum(serialize = "global")]
    Global,
}

/// Kind of value a configuration field accepts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// One of a fixed list of values, compared by canonical string
    Choice(Vec<String>),
    Int { min: i64, max: i64 },
    Flag,
}

impl FieldKind {
    /// Whether `value` is acceptable for a field of this kind
    pub fn admits(&self, value: &SettingValue) -> bool {
        match (self, value) {
            (Self::Choice(allowed), v) => allowed.contains(&v.key_string()),
            (Self::Int { min, max }, SettingValue::Int(i)) => (*min..=*max).contains(i),
            (Self::Flag, SettingValue::Bool(_)) => true,
            _ => false,
        }
    }
}

/// Whether a field is set per pin or once for the whole peripheral
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FieldScope {
    Pin,
    Peripheral,
}

/// A user-facing setting of a peripheral
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigField {
    pub key: String,
    pub display_name: String,
    pub kind: FieldKind,
    pub scope: FieldScope,
    pub default: SettingValue,
    /// The field is only relevant when this holds over the other settings
    pub visible: Option<Predicate>,
}

impl ConfigField {
    pub fn is_visible(&self, settings: &crate::model::Settings) -> bool {
        self.visible.as_ref().map_or(true, |p| p.eval(settings))
    }
}

/// Declares which field selects the template set and how its values translate into keys
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeKey {
    pub field: String,
    /// Explicit raw value to mode key mapping. Unmapped values use the fallback derivation.
    pub mapping: BTreeMap<String, String>,
}

/// Per-field lookup tables from user-facing value to register-ready text
pub type ValueMaps = BTreeMap<String, BTreeMap<String, String>>;

/// A caller-supplied argument of an init routine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutineParam {
    pub name: String,
    pub c_type: String,
    /// The setting whose value is passed for this argument
    pub field: String,
}

/// C signature of a peripheral's init routine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutineSpec {
    pub name: String,
    pub params: Vec<RoutineParam>,
}

impl RoutineSpec {
    /// Routine without arguments
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            params: vec![],
        }
    }

    /// Parameter list as written in a C prototype, e.g., `uint32_t baud` or `void`
    pub fn c_params(&self) -> String {
        if self.params.is_empty() {
            "void".to_owned()
        } else {
            self.params
                .iter()
                .map(|p| format!("{} {}", p.c_type, p.name))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterruptDescriptor {
    pub name: String,
    pub label: String,
    pub description: String,
    /// avr-libc vector name, e.g., `USART_RX_vect`
    pub vector: String,
    pub default_enabled: bool,
    pub applies_to: Option<Predicate>,
    /// The interrupt belongs to the pin mapped to this signal
    pub signal: Option<String>,
    pub enable_lines: Vec<Template>,
    pub handler_lines: Vec<Template>,
}

/// If `trigger` occupies any of `reserved_pins`, no peripheral in `conflicting` may occupy the
/// same pin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictRule {
    pub reserved_pins: Vec<PinId>,
    pub trigger: PeripheralId,
    /// Empty means any other peripheral
    pub conflicting: Vec<PeripheralId>,
    pub message: String,
}

impl ConflictRule {
    pub fn forbids(&self, other: PeripheralId) -> bool {
        other != self.trigger && (self.conflicting.is_empty() || self.conflicting.contains(&other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralDescriptor {
    pub id: PeripheralId,
    pub name: String,
    pub kind: PeripheralKind,
    /// The peripheral is only functional when all mapped pins are configured
    pub requires_all_pins: bool,
    /// Signal to pin mapping in declaration order
    pub pin_mapping: Vec<(String, Vec<PinId>)>,
    pub fields: Vec<ConfigField>,
    pub mode_key: Option<ModeKey>,
    pub value_maps: ValueMaps,
    pub routine: RoutineSpec,
    pub interrupts: Vec<InterruptDescriptor>,
    pub templates: Vec<TemplateSet>,
}

impl PeripheralDescriptor {
    /// All mapped pins in declaration order
    pub fn declared_pins(&self) -> impl Iterator<Item = &PinId> {
        self.pin_mapping.iter().flat_map(|(_, pins)| pins)
    }

    pub fn declares_pin(&self, pin: &PinId) -> bool {
        self.declared_pins().any(|p| p == pin)
    }

    /// Name of the signal `pin` is mapped to
    pub fn signal_of(&self, pin: &PinId) -> Option<&str> {
        self.pin_mapping
            .iter()
            .find(|(_, pins)| pins.contains(pin))
            .map(|(signal, _)| signal.as_str())
    }

    /// Pins mapped to `signal`
    pub fn pins_of(&self, signal: &str) -> &[PinId] {
        self.pin_mapping
            .iter()
            .find(|(s, _)| s == signal)
            .map_or(&[], |(_, pins)| pins.as_slice())
    }

    pub fn field(&self, key: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn interrupt(&self, name: &str) -> Option<&InterruptDescriptor> {
        self.interrupts.iter().find(|i| i.name == name)
    }

    /// Template sets of `scope` selected by `key`, in declaration order
    pub fn template_sets(&self, scope: TemplateScope, key: &str) -> Vec<&TemplateSet> {
        self.templates
            .iter()
            .filter(|t| t.scope == scope && t.key == key)
            .collect()
    }
}

#[test]
fn peripheral_ids_parse_from_schema_names() {
    assert_eq!(PeripheralId::parse("gpio"), Ok(PeripheralId::Gpio));
    assert_eq!(PeripheralId::parse("extint"), Ok(PeripheralId::ExtInt));
    assert_eq!(PeripheralId::parse("ac"), Ok(PeripheralId::AnalogComparator));
    assert_eq!(PeripheralId::parse("wdt"), Ok(PeripheralId::Watchdog));
    assert_eq!(PeripheralId::Timer1.to_string(), "timer1");
    assert_eq!(
        PeripheralId::parse("usb"),
        Err(UnknownPeripheralError("usb".to_owned()))
    );
}

#[test]
fn field_kinds_admit_values() {
    let choice = FieldKind::Choice(vec!["9600".to_owned(), "115200".to_owned()]);
    assert!(choice.admits(&SettingValue::from(9600)));
    assert!(choice.admits(&SettingValue::from("9600")));
    assert!(!choice.admits(&SettingValue::from(300)));

    let int = FieldKind::Int { min: 5, max: 8 };
    assert!(int.admits(&SettingValue::from(8)));
    assert!(!int.admits(&SettingValue::from(9)));
    assert!(!int.admits(&SettingValue::from("8")));

    assert!(FieldKind::Flag.admits(&SettingValue::from(true)));
    assert!(!FieldKind::Flag.admits(&SettingValue::from(1)));
}

#[test]
fn conflict_rule_with_empty_list_forbids_everyone_but_the_trigger() {
    let rule = ConflictRule {
        reserved_pins: vec![],
        trigger: PeripheralId::Uart,
        conflicting: vec![],
        message: String::new(),
    };
    assert!(rule.forbids(PeripheralId::Gpio));
    assert!(!rule.forbids(PeripheralId::Uart));
}
