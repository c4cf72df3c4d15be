//! Pin-change interrupt aggregation
//!
//! Pins requesting a pin-change interrupt come from two producers: pins assigned to the `pcint`
//! peripheral and GPIO pins with the `pcint` flag set. Requests are pooled and grouped by port
//! group so that each group gets one enable bit, one mask write and one handler, no matter how
//! many pins or producers contributed to it.

use std::collections::BTreeMap;

use crate::{
    codegen::{Handler, PeripheralOutput},
    model::{
        ConfigurationSnapshot, FieldScope, PeripheralId, PeripheralState, PinId, PortGroup,
        RoutineSpec, Schema, Settings,
    },
    resolve::effective_settings,
};
use itertools::Itertools;
use log::{debug, warn};

/// Routine used when the schema does not describe the `pcint` peripheral
const DEFAULT_ROUTINE: &str = "pcint_init";
/// GPIO flag requesting a pin-change interrupt
const FLAG_FIELD: &str = "pcint";
const PULLUP_FIELD: &str = "pullup";
const GPIO_MODE_FIELD: &str = "mode";
const GPIO_PULLUP_MODE: &str = "INPUT_PULLUP";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcintSource {
    /// The pin is assigned to the pin-change interrupt peripheral
    Explicit,
    /// A GPIO pin has its pin-change flag set
    Flagged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcintRequest {
    pub pin: PinId,
    pub pullup: bool,
    pub source: PcintSource,
}

/// One pin of a port group after deduplication
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinEntry {
    pub pin: PinId,
    pub pullup: bool,
}

/// Pools pin-change requests
///
/// A pin requested more than once is kept once, with a pull-up if any request asked for one.
#[derive(Debug, Default)]
pub struct PcintAggregator {
    requests: BTreeMap<PinId, bool>,
}

impl PcintAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, request: PcintRequest) {
        debug!(
            "Pin change request for {} ({:?}, pullup: {})",
            request.pin, request.source, request.pullup
        );
        *self.requests.entry(request.pin).or_default() |= request.pullup;
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Requested pins by port group, each group ordered by bit
    pub fn finish(self) -> BTreeMap<PortGroup, Vec<PinEntry>> {
        // `PinId` orders by port then bit
        self.requests
            .into_iter()
            .map(|(pin, pullup)| (pin.group(), PinEntry { pin, pullup }))
            .into_group_map()
            .into_iter()
            .map(|(group, mut entries)| {
                entries.sort_by(|a, b| a.pin.cmp(&b.pin));
                (group, entries)
            })
            .collect()
    }
}

impl Extend<PcintRequest> for PcintAggregator {
    fn extend<T: IntoIterator<Item = PcintRequest>>(&mut self, iter: T) {
        iter.into_iter().for_each(|request| self.add(request));
    }
}

/// Configured pins of `id` that its descriptor declares, with their effective settings
fn configured_pins(
    schema: &Schema,
    snapshot: &ConfigurationSnapshot,
    id: PeripheralId,
) -> Vec<(PinId, Settings)> {
    let (Some(descriptor), Some(state)) = (schema.peripheral(id), snapshot.get(id)) else {
        return vec![];
    };
    let PeripheralState::PinBound { pins, settings, .. } = state else {
        warn!("{} is configured without pins, skipping", descriptor.name);
        return vec![];
    };
    pins.iter()
        .filter(|(pin, _)| {
            let declared = descriptor.declares_pin(pin);
            if !declared {
                warn!("{} is not available on {pin}, skipping", descriptor.name);
            }
            declared
        })
        .map(|(pin, pin_settings)| {
            let settings = effective_settings(
                &descriptor.fields,
                FieldScope::Pin,
                &settings.overlay(pin_settings),
            );
            (pin.clone(), settings)
        })
        .collect()
}

/// Requests from pins assigned to the pin-change interrupt peripheral
pub fn explicit_requests(schema: &Schema, snapshot: &ConfigurationSnapshot) -> Vec<PcintRequest> {
    configured_pins(schema, snapshot, PeripheralId::Pcint)
        .into_iter()
        .map(|(pin, settings)| PcintRequest {
            pin,
            pullup: settings.get(PULLUP_FIELD).is_some_and(|v| v.is_truthy()),
            source: PcintSource::Explicit,
        })
        .collect()
}

/// Requests from GPIO pins with the pin-change flag set
pub fn flagged_requests(schema: &Schema, snapshot: &ConfigurationSnapshot) -> Vec<PcintRequest> {
    configured_pins(schema, snapshot, PeripheralId::Gpio)
        .into_iter()
        .filter(|(_, settings)| settings.get(FLAG_FIELD).is_some_and(|v| v.is_truthy()))
        .map(|(pin, settings)| PcintRequest {
            pin,
            pullup: settings
                .get(GPIO_MODE_FIELD)
                .is_some_and(|v| v.key_string() == GPIO_PULLUP_MODE),
            source: PcintSource::Flagged,
        })
        .collect()
}

fn enable_lines(group: PortGroup, entries: &[PinEntry]) -> Vec<String> {
    let port = group.port();
    let mut lines = vec![];
    for PinEntry { pin, pullup } in entries {
        let bit = pin.bit();
        lines.push(format!("DDR{port} &= ~_BV(DD{port}{bit});"));
        if *pullup {
            lines.push(format!("PORT{port} |= _BV(PORT{port}{bit});"));
        }
    }
    lines.push(format!("PCICR |= _BV({});", group.enable_bit()));
    lines.push(format!(
        "{} |= {};",
        group.mask_reg(),
        entries
            .iter()
            .map(|e| format!("_BV(PCINT{})", e.pin.pcint_number()))
            .join(" | ")
    ));
    lines
}

/// The handler keeps the last port state and tests each requested pin for a change
fn handler(group: PortGroup, entries: &[PinEntry]) -> Handler {
    let port = group.port();
    let mut lines = vec![
        "static uint8_t previous;".to_owned(),
        format!("uint8_t pins = PIN{port};"),
        "uint8_t changed = pins ^ previous;".to_owned(),
        "previous = pins;".to_owned(),
    ];
    for PinEntry { pin, .. } in entries {
        lines.push(format!("if (changed & _BV(PIN{port}{})) {{", pin.bit()));
        lines.push(format!("    /* {pin} (PCINT{}) changed */", pin.pcint_number()));
        lines.push("}".to_owned());
    }
    Handler {
        vector: group.vector(),
        label: group.to_string(),
        lines,
    }
}

/// Expand pooled groups into init lines and one handler per group
pub fn emit_groups(
    groups: &BTreeMap<PortGroup, Vec<PinEntry>>,
    routine: &RoutineSpec,
) -> PeripheralOutput {
    let mut out = PeripheralOutput::new(PeripheralId::Pcint);
    for (group, entries) in groups {
        out.push_lines(routine, &[], enable_lines(*group, entries));
        out.handlers.push(handler(*group, entries));
    }
    out
}

/// Pool `requests` and group them by port group, see [`PcintAggregator`]
pub fn aggregate(
    requests: impl IntoIterator<Item = PcintRequest>,
) -> BTreeMap<PortGroup, Vec<PinEntry>> {
    let mut aggregator = PcintAggregator::new();
    aggregator.extend(requests);
    aggregator.finish()
}

/// Collect every pin-change request in `snapshot` and expand them
///
/// Returns `None` if no pin requested a pin-change interrupt.
pub fn aggregate_pcint(
    schema: &Schema,
    snapshot: &ConfigurationSnapshot,
) -> Option<PeripheralOutput> {
    let groups = aggregate(
        explicit_requests(schema, snapshot)
            .into_iter()
            .chain(flagged_requests(schema, snapshot)),
    );
    if groups.is_empty() {
        return None;
    }

    let routine = schema
        .peripheral(PeripheralId::Pcint)
        .map_or_else(|| RoutineSpec::plain(DEFAULT_ROUTINE), |d| d.routine.clone());
    debug!("Pin change interrupts span {} port groups", groups.len());
    Some(emit_groups(&groups, &routine))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(s: &str) -> PinId {
        s.parse().unwrap()
    }

    fn request(p: &str, pullup: bool, source: PcintSource) -> PcintRequest {
        PcintRequest {
            pin: pin(p),
            pullup,
            source,
        }
    }

    #[test]
    fn duplicate_requests_merge_pullups() {
        let mut aggregator = PcintAggregator::new();
        aggregator.extend([
            request("PB3", false, PcintSource::Explicit),
            request("PB3", true, PcintSource::Flagged),
            request("PB0", false, PcintSource::Flagged),
        ]);
        let groups = aggregator.finish();
        assert_eq!(groups.len(), 1);
        let entries = &groups[&pin("PB0").group()];
        assert_eq!(
            entries,
            &[
                PinEntry { pin: pin("PB0"), pullup: false },
                PinEntry { pin: pin("PB3"), pullup: true },
            ]
        );
    }

    #[test]
    fn aggregation_ignores_request_order() {
        let requests = [
            request("PD4", false, PcintSource::Explicit),
            request("PB1", true, PcintSource::Flagged),
            request("PD4", true, PcintSource::Flagged),
            request("PD0", false, PcintSource::Explicit),
        ];
        let mut reversed = requests.clone();
        reversed.reverse();
        assert_eq!(aggregate(requests), aggregate(reversed));
    }

    #[test]
    fn incremental_aggregation_matches_one_batch() {
        let a = request("PD4", false, PcintSource::Explicit);
        let b = request("PB1", true, PcintSource::Flagged);
        let c = request("PB1", false, PcintSource::Explicit);

        let mut aggregator = PcintAggregator::new();
        aggregator.extend([a.clone(), b.clone()]);
        aggregator.extend([c.clone()]);
        let incremental = aggregator.finish();

        assert_eq!(incremental, aggregate([c, b, a]));
        assert_eq!(incremental[&pin("PB1").group()], [PinEntry { pin: pin("PB1"), pullup: true }]);
        assert_eq!(incremental.len(), 2);
    }

    #[test]
    fn group_is_enabled_once() {
        let mut aggregator = PcintAggregator::new();
        aggregator.extend([
            request("PD4", true, PcintSource::Explicit),
            request("PD2", false, PcintSource::Explicit),
        ]);
        let out = emit_groups(&aggregator.finish(), &RoutineSpec::plain(DEFAULT_ROUTINE));
        assert_eq!(
            out.lines_of(DEFAULT_ROUTINE),
            [
                "DDRD &= ~_BV(DDD2);",
                "DDRD &= ~_BV(DDD4);",
                "PORTD |= _BV(PORTD4);",
                "PCICR |= _BV(PCIE2);",
                "PCMSK2 |= _BV(PCINT18) | _BV(PCINT20);",
            ]
        );
        assert_eq!(out.handlers.len(), 1);
        let handler = &out.handlers[0];
        assert_eq!(handler.vector, "PCINT2_vect");
        assert_eq!(handler.lines[1], "uint8_t pins = PIND;");
        assert!(handler.lines.contains(&"if (changed & _BV(PIND4)) {".to_owned()));
    }

    #[test]
    fn producers_read_their_own_settings() {
        let schema =
            crate::frontend::schema_xml::parse_schema(include_str!("../../schema/atmega328p.xml"))
                .unwrap();
        let snapshot = ConfigurationSnapshot::new()
            .with(
                PeripheralId::Pcint,
                PeripheralState::pin_bound([(pin("PB0"), Settings::new().with("pullup", true))]),
            )
            .with(
                PeripheralId::Gpio,
                PeripheralState::pin_bound([
                    (
                        pin("PC1"),
                        Settings::new().with("mode", "INPUT_PULLUP").with("pcint", true),
                    ),
                    (pin("PC2"), Settings::new().with("mode", "INPUT")),
                    // Hidden for outputs, so never a request
                    (
                        pin("PC3"),
                        Settings::new().with("mode", "OUTPUT").with("pcint", true),
                    ),
                ]),
            );

        assert_eq!(
            explicit_requests(&schema, &snapshot),
            [request("PB0", true, PcintSource::Explicit)]
        );
        assert_eq!(
            flagged_requests(&schema, &snapshot),
            [request("PC1", true, PcintSource::Flagged)]
        );
        let out = aggregate_pcint(&schema, &snapshot).unwrap();
        assert_eq!(out.handlers.len(), 2);

        assert!(aggregate_pcint(&schema, &ConfigurationSnapshot::new()).is_none());
    }
}
