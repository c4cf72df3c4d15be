//! Read a configuration snapshot from JSON
//!
//! ```json
//! {
//!   "gpio": { "pins": { "PB5": { "mode": "OUTPUT", "level": "HIGH" } } },
//!   "uart": { "pins": { "PD0": {}, "PD1": {} }, "settings": { "baud": 9600 }, "interrupts": { "rx": true } },
//!   "timer0": { "interrupt": "overflow", "settings": { "prescaler": 1024 } },
//!   "wdt": { "enabled": true, "settings": { "timeout": "2S" } }
//! }
//! ```

use std::collections::BTreeMap;

use crate::{
    error::SnapshotParseError,
    model::{ConfigurationSnapshot, PeripheralId, PeripheralState, PinId, SettingValue, Settings},
};
use json::JsonValue;

type Result<T> = std::result::Result<T, SnapshotParseError>;

fn expect_object<'a>(value: &'a JsonValue, what: &str) -> Result<&'a json::object::Object> {
    match value {
        JsonValue::Object(object) => Ok(object),
        _ => Err(SnapshotParseError::ExpectedObject(what.to_owned())),
    }
}

fn setting_value(key: &str, value: &JsonValue) -> Result<SettingValue> {
    if let Some(b) = value.as_bool() {
        return Ok(b.into());
    }
    if let Some(s) = value.as_str() {
        return Ok(s.into());
    }
    // Only integral numbers are meaningful as register settings
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
        .map(|f| SettingValue::Int(f as i64))
        .ok_or_else(|| SnapshotParseError::UnsupportedValue {
            key: key.to_owned(),
            value: value.dump(),
        })
}

impl TryFrom<&json::object::Object> for Settings {
    type Error = SnapshotParseError;

    fn try_from(value: &json::object::Object) -> Result<Self> {
        value
            .iter()
            .map(|(key, v)| Ok::<_, SnapshotParseError>((key, setting_value(key, v)?)))
            .collect()
    }
}

/// Read an optional `"settings"` object
fn settings_of(object: &json::object::Object, what: &str) -> Result<Settings> {
    object.get("settings").map_or_else(
        || Ok(Settings::new()),
        |v| Settings::try_from(expect_object(v, &format!("{what}.settings"))?),
    )
}

/// Read an optional `"interrupts"` object of booleans
fn interrupts_of(object: &json::object::Object, what: &str) -> Result<BTreeMap<String, bool>> {
    let Some(interrupts) = object.get("interrupts") else {
        return Ok(BTreeMap::new());
    };
    expect_object(interrupts, &format!("{what}.interrupts"))?
        .iter()
        .map(|(name, v)| {
            v.as_bool()
                .map(|enabled| (name.to_owned(), enabled))
                .ok_or_else(|| SnapshotParseError::ExpectedBool(format!("{what}.interrupts.{name}")))
        })
        .collect()
}

fn peripheral_state(id: PeripheralId, object: &json::object::Object) -> Result<PeripheralState> {
    let settings = settings_of(object, id.as_ref())?;

    if let Some(pins) = object.get("pins") {
        let pins = expect_object(pins, &format!("{id}.pins"))?
            .iter()
            .map(|(pin, v)| {
                let pin_id = pin.parse::<PinId>()?;
                let settings =
                    Settings::try_from(expect_object(v, &format!("{id}.pins.{pin}"))?)?;
                Ok::<_, SnapshotParseError>((pin_id, settings))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        return Ok(PeripheralState::PinBound {
            pins,
            settings,
            interrupts: interrupts_of(object, id.as_ref())?,
        });
    }

    if let Some(interrupt) = object.get("interrupt") {
        let interrupt = interrupt
            .as_str()
            .ok_or_else(|| SnapshotParseError::ExpectedString(format!("{id}.interrupt")))?;
        return Ok(PeripheralState::InterruptOnly {
            interrupt: interrupt.to_owned(),
            settings,
        });
    }

    if let Some(enabled) = object.get("enabled") {
        let enabled = enabled
            .as_bool()
            .ok_or_else(|| SnapshotParseError::ExpectedBool(format!("{id}.enabled")))?;
        return Ok(PeripheralState::Global {
            enabled,
            settings,
            interrupts: interrupts_of(object, id.as_ref())?,
        });
    }

    Err(SnapshotParseError::UnknownStateShape(id))
}

impl TryFrom<JsonValue> for ConfigurationSnapshot {
    type Error = SnapshotParseError;

    /// Extract a snapshot from a JSON object keyed by peripheral
    fn try_from(value: JsonValue) -> Result<Self> {
        let mut snapshot = ConfigurationSnapshot::new();
        for (key, state) in expect_object(&value, "snapshot")?.iter() {
            let id = PeripheralId::parse(key)?;
            snapshot.insert(id, peripheral_state(id, expect_object(state, key)?)?);
        }
        Ok(snapshot)
    }
}

/// Parse a configuration snapshot from JSON text
pub(crate) fn parse_snapshot(text: &str) -> Result<ConfigurationSnapshot> {
    ConfigurationSnapshot::try_from(json::parse(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_all_state_shapes() {
        let snapshot = parse_snapshot(indoc! {r#"
            {
              "gpio": { "pins": { "PB5": { "mode": "OUTPUT", "level": "HIGH" } } },
              "uart": {
                "pins": { "PD0": {}, "PD1": {} },
                "settings": { "baud": 9600, "parity": "None" },
                "interrupts": { "rx": true }
              },
              "timer0": { "interrupt": "overflow" },
              "wdt": { "enabled": false }
            }
        "#})
        .unwrap();

        let pb5: PinId = "PB5".parse().unwrap();
        let gpio = snapshot.get(PeripheralId::Gpio).unwrap();
        assert!(gpio.occupies(&pb5));

        let uart = snapshot.get(PeripheralId::Uart).unwrap();
        assert_eq!(uart.settings().get("baud"), Some(&SettingValue::Int(9600)));
        assert_eq!(uart.interrupt_enabled("rx"), Some(true));
        assert_eq!(uart.occupied_pins().count(), 2);

        assert_eq!(
            snapshot.get(PeripheralId::Timer0),
            Some(&PeripheralState::interrupt_only("overflow"))
        );
        assert!(!snapshot.get(PeripheralId::Watchdog).unwrap().is_active());
        assert_eq!(snapshot.active().count(), 3);
    }

    #[test]
    fn rejects_malformed_snapshots() {
        assert!(matches!(
            parse_snapshot("{"),
            Err(SnapshotParseError::Json(_))
        ));
        assert!(matches!(
            parse_snapshot(r#"{ "usb": { "enabled": true } }"#),
            Err(SnapshotParseError::UnknownPeripheral(_))
        ));
        assert!(matches!(
            parse_snapshot(r#"{ "gpio": { "pins": { "PE1": {} } } }"#),
            Err(SnapshotParseError::InvalidPin(_))
        ));
        assert_eq!(
            parse_snapshot(r#"{ "gpio": {} }"#),
            Err(SnapshotParseError::UnknownStateShape(PeripheralId::Gpio))
        );
        assert!(matches!(
            parse_snapshot(r#"{ "timer1": { "pins": { "PB1": { "duty": 1.5 } } } }"#),
            Err(SnapshotParseError::UnsupportedValue { .. })
        ));
        assert!(matches!(
            parse_snapshot(r#"{ "uart": { "interrupt": "rx", "settings": [] } }"#),
            Err(SnapshotParseError::ExpectedObject(_))
        ));
    }
}
