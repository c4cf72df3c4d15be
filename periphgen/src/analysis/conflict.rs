//! Detect peripherals that claim the same pin in violation of a conflict rule

use std::fmt;

use crate::model::{ConfigurationSnapshot, ConflictRule, PeripheralId, PinId, Schema};
use log::debug;

/// One violation of one conflict rule on one pin
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictMessage {
    pub trigger: PeripheralId,
    /// The peripheral that may not use the pin while `trigger` does
    pub other: PeripheralId,
    pub pin: PinId,
    pub message: String,
}

impl fmt::Display for ConflictMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} cannot share it with {})",
            self.pin, self.message, self.other, self.trigger
        )
    }
}

fn detect_rule(rule: &ConflictRule, snapshot: &ConfigurationSnapshot) -> Vec<ConflictMessage> {
    let Some(trigger_state) = snapshot.get(rule.trigger) else {
        return vec![];
    };

    // Reserved pins actually driven by the trigger. An empty set means the rule is silent.
    let active = rule
        .reserved_pins
        .iter()
        .filter(|pin| trigger_state.occupies(pin));

    let mut messages = vec![];
    for pin in active {
        for (other, _) in snapshot
            .active()
            .filter(|(id, state)| rule.forbids(*id) && state.occupies(pin))
        {
            debug!("Conflict rule of {} fires on {pin} for {other}", rule.trigger);
            messages.push(ConflictMessage {
                trigger: rule.trigger,
                other,
                pin: pin.clone(),
                message: rule.message.clone(),
            });
        }
    }
    messages
}

/// Evaluate every conflict rule of `schema` against `snapshot`
///
/// Rules fire independently, so one overlap may be reported by more than one rule. Returns an
/// empty list when no rule is violated.
pub fn detect_conflicts(schema: &Schema, snapshot: &ConfigurationSnapshot) -> Vec<ConflictMessage> {
    schema
        .conflicts()
        .iter()
        .flat_map(|rule| detect_rule(rule, snapshot))
        .collect()
}
