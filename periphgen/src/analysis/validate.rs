//! Check a snapshot against the schema it is generated with

use std::collections::BTreeMap;

use crate::{
    analysis::{Diagnostic, DiagnosticKind},
    model::{
        ConfigurationSnapshot, FieldScope, PeripheralDescriptor, PeripheralId, PeripheralKind,
        PeripheralState, PinId, Schema, Settings,
    },
};
use itertools::Itertools;

/// Check every setting of one settings record against the declared fields
fn check_settings(
    descriptor: &PeripheralDescriptor,
    settings: &Settings,
    pin: Option<&PinId>,
    out: &mut Vec<Diagnostic>,
) {
    let id = descriptor.id;
    for (key, value) in settings.iter() {
        let locate = |d: Diagnostic| match pin {
            Some(pin) => d.at_pin(pin).at_field(key),
            None => d.at_field(key),
        };
        let Some(field) = descriptor.field(key) else {
            out.push(locate(Diagnostic::error(
                DiagnosticKind::UnknownField,
                id,
                format!("{} has no setting {key:?}", descriptor.name),
            )));
            continue;
        };
        if pin.is_some() && field.scope == FieldScope::Peripheral {
            out.push(locate(Diagnostic::error(
                DiagnosticKind::MisplacedField,
                id,
                format!(
                    "{:?} applies to the whole peripheral and cannot be set per pin",
                    field.display_name
                ),
            )));
        }
        if !field.kind.admits(value) {
            out.push(locate(Diagnostic::error(
                DiagnosticKind::InvalidValue,
                id,
                format!(
                    "{:?} is not a valid value for {:?}",
                    value.key_string(),
                    field.display_name
                ),
            )));
        }
    }
}

fn check_peripheral(
    descriptor: &PeripheralDescriptor,
    state: &PeripheralState,
    out: &mut Vec<Diagnostic>,
) {
    let id = descriptor.id;

    let shape_fits = matches!(
        (descriptor.kind, state),
        (
            PeripheralKind::PinBound,
            PeripheralState::PinBound { .. } | PeripheralState::InterruptOnly { .. }
        ) | (PeripheralKind::Global, PeripheralState::Global { .. })
    );
    if !shape_fits {
        out.push(Diagnostic::error(
            DiagnosticKind::StateShape,
            id,
            format!("{} is a {} peripheral", descriptor.name, descriptor.kind),
        ));
        return;
    }
    // Pin-change interrupts are requested per pin
    if id.feeds_pcint() && matches!(state, PeripheralState::InterruptOnly { .. }) {
        out.push(Diagnostic::error(
            DiagnosticKind::StateShape,
            id,
            format!("{} must be given the pins to watch", descriptor.name),
        ));
        return;
    }

    check_settings(descriptor, state.settings(), None, out);

    if let PeripheralState::PinBound { pins, .. } = state {
        for (pin, settings) in pins {
            if descriptor.declares_pin(pin) {
                check_settings(descriptor, settings, Some(pin), out);
            } else {
                out.push(
                    Diagnostic::error(
                        DiagnosticKind::UndeclaredPin,
                        id,
                        format!("{} is not available on pin {pin}", descriptor.name),
                    )
                    .at_pin(pin),
                );
            }
        }

        if descriptor.requires_all_pins && !pins.is_empty() {
            let missing = descriptor
                .declared_pins()
                .filter(|pin| !pins.contains_key(*pin))
                .join(", ");
            if !missing.is_empty() {
                out.push(Diagnostic::warning(
                    DiagnosticKind::IncompletePinSet,
                    id,
                    format!("{} needs all of its pins, missing: {missing}", descriptor.name),
                ));
            }
        }
    }

    for (name, _) in state.interrupts() {
        if descriptor.interrupt(name).is_none() {
            out.push(Diagnostic::error(
                DiagnosticKind::UnknownInterrupt,
                id,
                format!("{} has no interrupt {name:?}", descriptor.name),
            ));
        }
    }
}

/// Whether a conflict rule already speaks about `a` and `b` meeting on `pin`
fn covered_by_rule(schema: &Schema, pin: &PinId, a: PeripheralId, b: PeripheralId) -> bool {
    schema.conflicts().iter().any(|rule| {
        rule.reserved_pins.contains(pin)
            && ((rule.trigger == a && rule.forbids(b)) || (rule.trigger == b && rule.forbids(a)))
    })
}

/// Pins occupied by more than one peripheral outside every conflict rule
fn check_shared_pins(
    schema: &Schema,
    snapshot: &ConfigurationSnapshot,
    out: &mut Vec<Diagnostic>,
) {
    let mut owners: BTreeMap<&PinId, Vec<PeripheralId>> = BTreeMap::new();
    for (id, state) in snapshot.active() {
        for pin in state.occupied_pins() {
            owners.entry(pin).or_default().push(id);
        }
    }

    for (pin, ids) in owners.into_iter().filter(|(_, ids)| ids.len() > 1) {
        for (a, b) in ids.into_iter().tuple_combinations() {
            // Pin-change requests from both are merged into one
            if matches!(
                (a, b),
                (PeripheralId::Gpio, PeripheralId::Pcint) | (PeripheralId::Pcint, PeripheralId::Gpio)
            ) {
                continue;
            }
            if covered_by_rule(schema, pin, a, b) {
                continue;
            }
            out.push(
                Diagnostic::warning(
                    DiagnosticKind::SharedPin,
                    b,
                    format!("{pin} is also used by {a}"),
                )
                .at_pin(pin),
            );
        }
    }
}

/// Report configuration validity problems
///
/// These describe the snapshot, not the schema, and never stop generation: undeclared pins are
/// skipped and unknown settings ignored there.
pub(crate) fn validate(schema: &Schema, snapshot: &ConfigurationSnapshot) -> Vec<Diagnostic> {
    let mut out = vec![];
    for (id, state) in snapshot.iter() {
        match schema.peripheral(id) {
            Some(descriptor) => check_peripheral(descriptor, state, &mut out),
            None => out.push(Diagnostic::error(
                DiagnosticKind::UnknownPeripheral,
                id,
                format!("{id} is not described by the schema for {}", schema.device()),
            )),
        }
    }
    check_shared_pins(schema, snapshot, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        crate::frontend::schema_xml::parse_schema(include_str!("../../schema/atmega328p.xml"))
            .unwrap()
    }

    fn pin(s: &str) -> PinId {
        s.parse().unwrap()
    }

    fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn valid_snapshot_is_clean() {
        let snapshot = ConfigurationSnapshot::new().with(
            PeripheralId::Gpio,
            PeripheralState::pin_bound([(
                pin("PB5"),
                Settings::new().with("mode", "OUTPUT").with("level", "HIGH"),
            )]),
        );
        assert!(validate(&schema(), &snapshot).is_empty());
    }

    #[test]
    fn reports_pins_fields_and_values() {
        let snapshot = ConfigurationSnapshot::new()
            .with(
                PeripheralId::Uart,
                PeripheralState::pin_bound([
                    (pin("PD0"), Settings::new().with("baud", 9600)),
                    (pin("PB0"), Settings::new()),
                ])
                .with_settings(Settings::new().with("baud", 1234).with("flow", "RTS")),
            )
            .with(
                PeripheralId::Gpio,
                PeripheralState::pin_bound([(pin("PB1"), Settings::new().with("mode", 1))]),
            );
        let diagnostics = validate(&schema(), &snapshot);
        let found = kinds(&diagnostics);

        assert!(found.contains(&DiagnosticKind::UndeclaredPin));
        assert!(found.contains(&DiagnosticKind::UnknownField));
        assert!(found.contains(&DiagnosticKind::MisplacedField));
        assert_eq!(
            found
                .iter()
                .filter(|k| **k == DiagnosticKind::InvalidValue)
                .count(),
            2
        );
        // PD1 was left out
        assert!(found.contains(&DiagnosticKind::IncompletePinSet));
        let undeclared = diagnostics
            .iter()
            .find(|d| d.kind == DiagnosticKind::UndeclaredPin)
            .unwrap();
        assert_eq!(undeclared.pin, Some(pin("PB0")));
    }

    #[test]
    fn reports_shape_and_interrupt_mismatches() {
        let snapshot = ConfigurationSnapshot::new()
            .with(PeripheralId::Watchdog, PeripheralState::interrupt_only("timeout"))
            .with(PeripheralId::Timer0, PeripheralState::interrupt_only("underflow"));
        assert_eq!(
            kinds(&validate(&schema(), &snapshot)),
            [DiagnosticKind::UnknownInterrupt, DiagnosticKind::StateShape]
        );
    }

    #[test]
    fn pin_change_interrupts_need_pins() {
        let snapshot = ConfigurationSnapshot::new()
            .with(PeripheralId::Pcint, PeripheralState::interrupt_only("pcint0"));
        let diagnostics = validate(&schema(), &snapshot);
        assert_eq!(kinds(&diagnostics), [DiagnosticKind::StateShape]);
        assert!(diagnostics[0].is_error());
    }

    #[test]
    fn shared_pins_outside_rules_are_warned_about() {
        // GPIO and INT0 on PD2: no rule mentions this pair
        let snapshot = ConfigurationSnapshot::new()
            .with(
                PeripheralId::Gpio,
                PeripheralState::pin_bound([(pin("PD2"), Settings::new())]),
            )
            .with(
                PeripheralId::ExtInt,
                PeripheralState::pin_bound([(pin("PD2"), Settings::new())]),
            )
            .with(
                PeripheralId::Pcint,
                PeripheralState::pin_bound([(pin("PD2"), Settings::new())]),
            );
        let diagnostics = validate(&schema(), &snapshot);
        // gpio-extint and extint-pcint; gpio-pcint requests are merged
        assert_eq!(diagnostics.len(), 2);
        assert!(diagnostics
            .iter()
            .all(|d| d.kind == DiagnosticKind::SharedPin && d.pin == Some(pin("PD2"))));

        // SPI and GPIO on PB3 are covered by a rule and left to the conflict detector
        let snapshot = ConfigurationSnapshot::new()
            .with(
                PeripheralId::Gpio,
                PeripheralState::pin_bound([(pin("PB3"), Settings::new())]),
            )
            .with(
                PeripheralId::Spi,
                PeripheralState::pin_bound([(pin("PB3"), Settings::new())]),
            );
        assert!(!kinds(&validate(&schema(), &snapshot)).contains(&DiagnosticKind::SharedPin));
    }
}
