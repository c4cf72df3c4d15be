//! The configuration snapshot: which peripherals are active and how they are set up

use std::{collections::BTreeMap, fmt};

use crate::model::{PeripheralId, PinId};

/// A single user-supplied setting
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl SettingValue {
    /// Falsy values are `false`, `0` and the empty string
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(s) => !s.is_empty(),
            Self::Int(i) => *i != 0,
            Self::Bool(b) => *b,
        }
    }

    /// Canonical string used to look this value up in mapping tables and allowed-value lists
    pub fn key_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

/// Renders the value the way it appears in generated C source
impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SettingValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// A settings record, keyed by field key
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings(BTreeMap<String, SettingValue>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new record with `other`'s entries taking precedence over `self`'s
    #[must_use]
    pub fn overlay(&self, other: &Settings) -> Settings {
        let mut merged = self.clone();
        merged
            .0
            .extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for Settings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Configuration of one peripheral within a snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeripheralState {
    /// The peripheral occupies the listed pins
    PinBound {
        /// Per-pin settings
        pins: BTreeMap<PinId, Settings>,
        /// Peripheral-level settings shared by all pins, e.g., a baud rate
        settings: Settings,
        /// Explicit interrupt enablement by interrupt name
        interrupts: BTreeMap<String, bool>,
    },
    /// A pin-bound peripheral selected only to enable the named interrupt, without occupying
    /// any pins
    InterruptOnly {
        interrupt: String,
        settings: Settings,
    },
    /// A peripheral without a pin footprint
    Global {
        enabled: bool,
        settings: Settings,
        interrupts: BTreeMap<String, bool>,
    },
}

impl PeripheralState {
    pub fn pin_bound<I: IntoIterator<Item = (PinId, Settings)>>(pins: I) -> Self {
        Self::PinBound {
            pins: pins.into_iter().collect(),
            settings: Settings::new(),
            interrupts: BTreeMap::new(),
        }
    }

    pub fn interrupt_only(interrupt: &str) -> Self {
        Self::InterruptOnly {
            interrupt: interrupt.to_owned(),
            settings: Settings::new(),
        }
    }

    pub fn global(enabled: bool) -> Self {
        Self::Global {
            enabled,
            settings: Settings::new(),
            interrupts: BTreeMap::new(),
        }
    }

    /// Replace the peripheral-level settings
    #[must_use]
    pub fn with_settings(mut self, new: Settings) -> Self {
        match &mut self {
            Self::PinBound { settings, .. }
            | Self::InterruptOnly { settings, .. }
            | Self::Global { settings, .. } => *settings = new,
        }
        self
    }

    /// Explicitly enable or disable an interrupt
    ///
    /// Has no effect on [`PeripheralState::InterruptOnly`], which names its single interrupt.
    #[must_use]
    pub fn with_interrupt(mut self, name: &str, enabled: bool) -> Self {
        match &mut self {
            Self::PinBound { interrupts, .. } | Self::Global { interrupts, .. } => {
                interrupts.insert(name.to_owned(), enabled);
            }
            Self::InterruptOnly { .. } => {}
        }
        self
    }

    /// Peripheral-level settings
    pub fn settings(&self) -> &Settings {
        match self {
            Self::PinBound { settings, .. }
            | Self::InterruptOnly { settings, .. }
            | Self::Global { settings, .. } => settings,
        }
    }

    /// Pins occupied by this peripheral, in ascending order
    pub fn occupied_pins(&self) -> impl Iterator<Item = &PinId> {
        let pins = match self {
            Self::PinBound { pins, .. } => Some(pins.keys()),
            Self::InterruptOnly { .. } | Self::Global { .. } => None,
        };
        pins.into_iter().flatten()
    }

    pub fn occupies(&self, pin: &PinId) -> bool {
        matches!(self, Self::PinBound { pins, .. } if pins.contains_key(pin))
    }

    /// Whether this state asks for any output at all
    pub fn is_active(&self) -> bool {
        match self {
            Self::PinBound { pins, .. } => !pins.is_empty(),
            Self::InterruptOnly { .. } => true,
            Self::Global { enabled, .. } => *enabled,
        }
    }

    /// Explicit enablement of interrupt `name`, if the state says anything about it
    pub fn interrupt_enabled(&self, name: &str) -> Option<bool> {
        match self {
            Self::PinBound { interrupts, .. } | Self::Global { interrupts, .. } => {
                interrupts.get(name).copied()
            }
            Self::InterruptOnly { interrupt, .. } => Some(interrupt == name),
        }
    }

    /// Explicit interrupt enablement entries
    pub fn interrupts(&self) -> Vec<(&str, bool)> {
        match self {
            Self::PinBound { interrupts, .. } | Self::Global { interrupts, .. } => interrupts
                .iter()
                .map(|(name, enabled)| (name.as_str(), *enabled))
                .collect(),
            Self::InterruptOnly { interrupt, .. } => vec![(interrupt.as_str(), true)],
        }
    }
}

/// The complete input of one generation run
///
/// Treated as immutable while a run is in progress.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationSnapshot(BTreeMap<PeripheralId, PeripheralState>);

impl ConfigurationSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, id: PeripheralId, state: PeripheralState) -> Self {
        self.insert(id, state);
        self
    }

    pub fn insert(&mut self, id: PeripheralId, state: PeripheralState) {
        self.0.insert(id, state);
    }

    pub fn get(&self, id: PeripheralId) -> Option<&PeripheralState> {
        self.0.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeripheralId, &PeripheralState)> {
        self.0.iter().map(|(id, state)| (*id, state))
    }

    /// Peripherals that ask for output
    pub fn active(&self) -> impl Iterator<Item = (PeripheralId, &PeripheralState)> {
        self.iter().filter(|(_, state)| state.is_active())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(s: &str) -> PinId {
        s.parse().unwrap()
    }

    #[test]
    fn truthiness() {
        assert!(!SettingValue::from("").is_truthy());
        assert!(SettingValue::from("OUTPUT").is_truthy());
        assert!(!SettingValue::from(0).is_truthy());
        assert!(SettingValue::from(9600).is_truthy());
        assert!(!SettingValue::from(false).is_truthy());
    }

    #[test]
    fn key_string_and_c_rendering_differ_for_booleans() {
        let v = SettingValue::from(true);
        assert_eq!(v.key_string(), "true");
        assert_eq!(v.to_string(), "1");
        assert_eq!(SettingValue::from(8).key_string(), "8");
    }

    #[test]
    fn overlay_prefers_other() {
        let base = Settings::new().with("mode", "INPUT").with("level", "LOW");
        let top = Settings::new().with("mode", "OUTPUT");
        let merged = base.overlay(&top);
        assert_eq!(merged.get("mode"), Some(&SettingValue::from("OUTPUT")));
        assert_eq!(merged.get("level"), Some(&SettingValue::from("LOW")));
        // Inputs are left as they were
        assert_eq!(base.get("mode"), Some(&SettingValue::from("INPUT")));
    }

    #[test]
    fn occupation_and_activity() {
        let gpio = PeripheralState::pin_bound([(pin("PB5"), Settings::new())]);
        assert!(gpio.occupies(&pin("PB5")));
        assert!(!gpio.occupies(&pin("PB4")));
        assert!(gpio.is_active());

        assert!(!PeripheralState::pin_bound([]).is_active());
        assert!(!PeripheralState::global(false).is_active());
        assert!(PeripheralState::interrupt_only("overflow").is_active());
        assert_eq!(
            PeripheralState::interrupt_only("overflow")
                .occupied_pins()
                .count(),
            0
        );
    }

    #[test]
    fn interrupt_only_enables_exactly_its_interrupt() {
        let state = PeripheralState::interrupt_only("overflow");
        assert_eq!(state.interrupt_enabled("overflow"), Some(true));
        assert_eq!(state.interrupt_enabled("compare_a"), Some(false));
    }
}
