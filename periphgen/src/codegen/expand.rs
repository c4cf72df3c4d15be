//! Expand one peripheral's state into routine fragments and interrupt handlers
//!
//! Expansion order is fixed: peripheral-scope template sets first, then each configured pin in
//! the order the peripheral declares its pins, then interrupts in declaration order.

use std::{borrow::Cow, collections::BTreeSet};

use crate::{
    codegen::Handler,
    error::{GenerateError, TemplateError},
    model::{
        FieldScope, InterruptDescriptor, Params, PeripheralDescriptor, PeripheralId,
        PeripheralState, PinId, RoutineSpec, Settings, Template, TemplateScope, TemplateSet,
        UnboundParam,
    },
    resolve::{apply_value_mapping, effective_settings, resolve_mode},
};
use log::{debug, warn};

/// The set key used when no mode or signal specific set applies
const INIT_KEY: &str = "init";
/// Placeholder bound to the configured CPU clock
const CLOCK_PARAM: &str = "clock_hz";

/// Lines destined for one init routine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub routine: RoutineSpec,
    /// Arguments the aggregate routine passes to `routine`
    pub args: Vec<String>,
    pub lines: Vec<String>,
}

/// Everything one peripheral contributes to the generated sources
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralOutput {
    pub peripheral: PeripheralId,
    pub includes: BTreeSet<String>,
    pub fragments: Vec<Fragment>,
    pub handlers: Vec<Handler>,
}

impl PeripheralOutput {
    pub fn new(peripheral: PeripheralId) -> Self {
        Self {
            peripheral,
            includes: BTreeSet::new(),
            fragments: vec![],
            handlers: vec![],
        }
    }

    /// Append `lines` to `routine`, opening a fragment for it on first use
    pub(crate) fn push_lines(&mut self, routine: &RoutineSpec, args: &[String], lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        match self
            .fragments
            .iter_mut()
            .find(|f| f.routine.name == routine.name)
        {
            Some(fragment) => fragment.lines.extend(lines),
            None => self.fragments.push(Fragment {
                routine: routine.clone(),
                args: args.to_vec(),
                lines,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.handlers.is_empty()
    }

    /// All lines of the fragment for routine `name`
    pub fn lines_of(&self, name: &str) -> &[String] {
        self.fragments
            .iter()
            .find(|f| f.routine.name == name)
            .map_or(&[], |f| f.lines.as_slice())
    }
}

/// Stringify settings for substitution
fn params_of(settings: &Settings) -> Params {
    settings
        .iter()
        .map(|(key, value)| (key.to_owned(), value.to_string()))
        .collect()
}

fn add_pin_symbols(params: &mut Params, pin: &PinId, signal: &str) {
    params.extend(pin.symbols().into_iter().map(|(k, v)| (k.to_owned(), v)));
    params.insert("signal".to_owned(), signal.to_owned());
}

/// The pin carrying `signal` for `interrupt`
///
/// A configured pin wins. A state that only asks for `interrupt` claims the first pin mapped to
/// the signal.
fn signal_pin<'d>(
    descriptor: &'d PeripheralDescriptor,
    state: &PeripheralState,
    interrupt: &InterruptDescriptor,
    signal: &str,
) -> Option<&'d PinId> {
    let pins = descriptor.pins_of(signal);
    match state {
        PeripheralState::InterruptOnly { interrupt: name, .. } if *name == interrupt.name => {
            pins.first()
        }
        _ => pins.iter().find(|pin| state.occupies(pin)),
    }
}

struct Expander<'a> {
    descriptor: &'a PeripheralDescriptor,
    clock_hz: Option<u32>,
    /// Arguments of the peripheral's own routine
    args: Vec<String>,
    out: PeripheralOutput,
}

impl<'a> Expander<'a> {
    fn new(
        descriptor: &'a PeripheralDescriptor,
        peripheral_settings: &Settings,
        clock_hz: Option<u32>,
    ) -> Result<Self, GenerateError> {
        let args = descriptor
            .routine
            .params
            .iter()
            .map(|p| {
                peripheral_settings
                    .get(&p.field)
                    .map(ToString::to_string)
                    .ok_or_else(|| GenerateError::MissingRoutineArgument {
                        peripheral: descriptor.id,
                        param: p.name.clone(),
                        field: p.field.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            descriptor,
            clock_hz,
            args,
            out: PeripheralOutput::new(descriptor.id),
        })
    }

    /// Bind the clock if any of `lines` needs it and one is configured
    fn bind_clock<'p>(&self, lines: &[Template], params: &'p Params) -> Cow<'p, Params> {
        match self.clock_hz {
            Some(hz) if lines.iter().any(|l| l.references(CLOCK_PARAM)) => {
                let mut params = params.clone();
                params.insert(CLOCK_PARAM.to_owned(), hz.to_string());
                Cow::Owned(params)
            }
            _ => Cow::Borrowed(params),
        }
    }

    fn render(
        &self,
        label: &str,
        lines: &[Template],
        params: &Params,
    ) -> Result<Vec<String>, TemplateError> {
        let params = self.bind_clock(lines, params);
        lines
            .iter()
            .map(|line| {
                line.render(&params)
                    .map_err(|UnboundParam(param)| TemplateError::MissingParameter {
                        peripheral: self.descriptor.id,
                        set: label.to_owned(),
                        param,
                    })
            })
            .collect()
    }

    /// Sets of `scope` under the first of `keys` that has any set applying to `settings`
    fn select(&self, scope: TemplateScope, keys: &[&str], settings: &Settings) -> Vec<&'a TemplateSet> {
        let descriptor = self.descriptor;
        keys.iter()
            .map(|key| {
                descriptor
                    .template_sets(scope, key)
                    .into_iter()
                    .filter(|set| set.applies(settings))
                    .collect::<Vec<_>>()
            })
            .find(|sets| !sets.is_empty())
            .unwrap_or_default()
    }

    fn emit_set(&mut self, set: &TemplateSet, params: &Params) -> Result<(), TemplateError> {
        let lines = self.render(&set.label(), &set.lines, params)?;
        self.out.includes.extend(set.includes.iter().cloned());
        match &set.routine {
            Some(name) => self.out.push_lines(&RoutineSpec::plain(name), &[], lines),
            None => {
                let routine = &self.descriptor.routine;
                self.out.push_lines(routine, &self.args, lines);
            }
        }
        Ok(())
    }

    /// Peripheral-scope sets under the resolved mode, falling back to `init`
    fn expand_peripheral_sets(&mut self, settings: &Settings) -> Result<(), TemplateError> {
        let mode = resolve_mode(settings, self.descriptor.mode_key.as_ref());
        let keys = mode
            .as_deref()
            .into_iter()
            .chain([INIT_KEY])
            .collect::<Vec<_>>();
        let params = params_of(&apply_value_mapping(settings, &self.descriptor.value_maps));
        for set in self.select(TemplateScope::Peripheral, &keys, settings) {
            debug!("{}: emitting {}", self.descriptor.id, set.label());
            self.emit_set(set, &params)?;
        }
        Ok(())
    }

    /// Peripheral-scope sets keyed by an interrupt name
    ///
    /// Returns whether any set applied.
    fn expand_interrupt_sets(&mut self, name: &str, settings: &Settings) -> Result<bool, TemplateError> {
        let sets = self.select(TemplateScope::Peripheral, &[name], settings);
        let params = params_of(&apply_value_mapping(settings, &self.descriptor.value_maps));
        for set in &sets {
            self.emit_set(set, &params)?;
        }
        Ok(!sets.is_empty())
    }

    fn expand_pin(
        &mut self,
        pin: &PinId,
        signal: &str,
        peripheral_settings: &Settings,
        pin_settings: &Settings,
    ) -> Result<(), TemplateError> {
        let descriptor = self.descriptor;
        let settings = effective_settings(
            &descriptor.fields,
            FieldScope::Pin,
            &peripheral_settings.overlay(pin_settings),
        );
        let mode = resolve_mode(&settings, descriptor.mode_key.as_ref());
        let keys = mode
            .as_deref()
            .into_iter()
            .chain([signal, INIT_KEY])
            .collect::<Vec<_>>();

        let mut params = params_of(&apply_value_mapping(&settings, &descriptor.value_maps));
        add_pin_symbols(&mut params, pin, signal);

        for set in self.select(TemplateScope::Pin, &keys, &settings) {
            debug!("{}: emitting {} for {pin}", descriptor.id, set.label());
            self.emit_set(set, &params)?;
        }
        Ok(())
    }

    fn expand_interrupt(
        &mut self,
        interrupt: &InterruptDescriptor,
        settings: &Settings,
        pin: Option<(&PinId, &str)>,
    ) -> Result<(), TemplateError> {
        let mut params = params_of(&apply_value_mapping(settings, &self.descriptor.value_maps));
        if let Some((pin, signal)) = pin {
            add_pin_symbols(&mut params, pin, signal);
        }
        params.insert("vector".to_owned(), interrupt.vector.clone());
        params.insert("label".to_owned(), interrupt.label.clone());

        let label = format!("interrupt:{}", interrupt.name);
        let enable = self.render(&label, &interrupt.enable_lines, &params)?;
        let handler = self.render(&label, &interrupt.handler_lines, &params)?;

        let routine = &self.descriptor.routine;
        self.out.push_lines(routine, &self.args, enable);
        self.out.handlers.push(Handler {
            vector: interrupt.vector.clone(),
            label: interrupt.label.clone(),
            lines: handler,
        });
        Ok(())
    }

    /// Enabled interrupts that apply to `settings`
    ///
    /// An interrupt bound to a signal only applies when a pin carrying that signal is configured.
    fn expand_interrupts(
        &mut self,
        state: &PeripheralState,
        settings: &Settings,
    ) -> Result<(), TemplateError> {
        let descriptor = self.descriptor;
        for interrupt in &descriptor.interrupts {
            let enabled = state
                .interrupt_enabled(&interrupt.name)
                .unwrap_or(interrupt.default_enabled);
            if !enabled {
                continue;
            }
            if !interrupt.applies_to.as_ref().map_or(true, |p| p.eval(settings)) {
                debug!("{}: {} does not apply", descriptor.id, interrupt.name);
                continue;
            }
            let pin = match &interrupt.signal {
                Some(signal) => {
                    let Some(pin) = signal_pin(descriptor, state, interrupt, signal) else {
                        debug!("{}: no pin carries {signal}", descriptor.id);
                        continue;
                    };
                    Some((pin, signal.as_str()))
                }
                None => None,
            };
            self.expand_interrupt(interrupt, settings, pin)?;
        }
        Ok(())
    }
}

/// Expand the state of one peripheral
///
/// `clock_hz` is bound as `{{clock_hz}}` in sets that reference it. Inactive states expand to
/// nothing. Pins the peripheral does not declare are skipped.
pub fn expand_peripheral(
    descriptor: &PeripheralDescriptor,
    state: &PeripheralState,
    clock_hz: Option<u32>,
) -> Result<PeripheralOutput, GenerateError> {
    if !state.is_active() {
        return Ok(PeripheralOutput::new(descriptor.id));
    }
    let settings = effective_settings(&descriptor.fields, FieldScope::Peripheral, state.settings());
    let mut expander = Expander::new(descriptor, &settings, clock_hz)?;

    match state {
        PeripheralState::PinBound { pins, .. } => {
            expander.expand_peripheral_sets(&settings)?;
            for (signal, mapped) in &descriptor.pin_mapping {
                for pin in mapped {
                    if let Some(pin_settings) = pins.get(pin) {
                        expander.expand_pin(pin, signal, &settings, pin_settings)?;
                    }
                }
            }
            for pin in pins.keys().filter(|pin| !descriptor.declares_pin(pin)) {
                warn!("{} is not available on {pin}, skipping", descriptor.name);
            }
        }
        PeripheralState::InterruptOnly { interrupt: name, .. } => {
            if !expander.expand_interrupt_sets(name, &settings)? {
                expander.expand_peripheral_sets(&settings)?;
            }
            // An interrupt bound to a signal needs its pin set up as well
            if let Some(interrupt) = descriptor.interrupt(name) {
                if let Some(signal) = &interrupt.signal {
                    if let Some(pin) = signal_pin(descriptor, state, interrupt, signal) {
                        expander.expand_pin(pin, signal, &settings, &Settings::new())?;
                    }
                }
            }
        }
        PeripheralState::Global { .. } => expander.expand_peripheral_sets(&settings)?,
    }
    expander.expand_interrupts(state, &settings)?;

    Ok(expander.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::schema_xml::parse_schema,
        model::{Schema, SettingValue},
    };

    fn schema() -> Schema {
        parse_schema(include_str!("../../schema/atmega328p.xml")).unwrap()
    }

    fn expand(id: PeripheralId, state: &PeripheralState) -> PeripheralOutput {
        let schema = schema();
        expand_peripheral(schema.peripheral(id).unwrap(), state, Some(16_000_000)).unwrap()
    }

    fn pin(s: &str) -> PinId {
        s.parse().unwrap()
    }

    #[test]
    fn gpio_output_sets_level_before_direction() {
        let state = PeripheralState::pin_bound([(
            pin("PB5"),
            Settings::new().with("mode", "OUTPUT").with("level", "HIGH"),
        )]);
        let out = expand(PeripheralId::Gpio, &state);
        assert_eq!(
            out.lines_of("gpio_init"),
            ["PORTB |= _BV(PORTB5);", "DDRB |= _BV(DDB5);"]
        );
        assert!(out.handlers.is_empty());
    }

    #[test]
    fn pins_follow_declaration_order() {
        let state = PeripheralState::pin_bound([
            (pin("PD7"), Settings::new().with("mode", "OUTPUT")),
            (pin("PB0"), Settings::new().with("mode", "OUTPUT")),
        ]);
        let lines = expand(PeripheralId::Gpio, &state).lines_of("gpio_init").to_vec();
        let pb0 = lines.iter().position(|l| l.contains("DDB0")).unwrap();
        let pd7 = lines.iter().position(|l| l.contains("DDD7")).unwrap();
        assert!(pb0 < pd7);
    }

    #[test]
    fn uart_binds_clock_and_argument() {
        let state = PeripheralState::pin_bound([
            (pin("PD0"), Settings::new()),
            (pin("PD1"), Settings::new()),
        ])
        .with_settings(Settings::new().with("baud", 9600))
        .with_interrupt("rx", true);
        let out = expand(PeripheralId::Uart, &state);

        let fragment = &out.fragments[0];
        assert_eq!(fragment.routine.name, "uart_init");
        assert_eq!(fragment.args, ["9600"]);
        assert!(fragment.lines.iter().any(|l| l.contains("16000000UL")));
        assert_eq!(out.handlers.len(), 1);
        assert_eq!(out.handlers[0].vector, "USART_RX_vect");
    }

    #[test]
    fn missing_clock_is_reported() {
        let schema = schema();
        let state = PeripheralState::pin_bound([(pin("PD0"), Settings::new())]);
        let err = expand_peripheral(schema.peripheral(PeripheralId::Uart).unwrap(), &state, None)
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::Template(TemplateError::MissingParameter { ref param, .. }) if param == "clock_hz"
        ));
    }

    #[test]
    fn signal_bound_interrupt_needs_its_pin() {
        // INT1 is enabled by default but PD3 is not configured
        let state = PeripheralState::pin_bound([(pin("PD2"), Settings::new())]);
        let out = expand(PeripheralId::ExtInt, &state);
        let vectors = out.handlers.iter().map(|h| h.vector.as_str()).collect::<Vec<_>>();
        assert_eq!(vectors, ["INT0_vect"]);
    }

    #[test]
    fn interrupt_only_enables_named_interrupt() {
        let state = PeripheralState::interrupt_only("overflow")
            .with_settings(Settings::new().with("prescaler", 1024));
        let out = expand(PeripheralId::Timer0, &state);
        assert_eq!(out.handlers.len(), 1);
        assert_eq!(out.handlers[0].vector, "TIMER0_OVF_vect");
        assert!(!out.lines_of("timer0_init").is_empty());
    }

    #[test]
    fn interrupt_only_claims_the_signal_pin() {
        let out = expand(PeripheralId::ExtInt, &PeripheralState::interrupt_only("int0"));
        assert_eq!(
            out.lines_of("extint_init"),
            [
                "DDRD &= ~_BV(DDD2);",
                "EICRA |= (2 << (INT0 * 2));",
                "EIMSK |= _BV(INT0);",
            ]
        );
        let vectors = out.handlers.iter().map(|h| h.vector.as_str()).collect::<Vec<_>>();
        assert_eq!(vectors, ["INT0_vect"]);
    }

    #[test]
    fn inactive_state_expands_to_nothing() {
        let out = expand(PeripheralId::Watchdog, &PeripheralState::global(false));
        assert!(out.is_empty());
    }

    #[test]
    fn hidden_fields_are_not_substituted() {
        // `clock_div` is only visible in master mode
        let settings = effective_settings(
            &schema().peripheral(PeripheralId::Spi).unwrap().fields,
            FieldScope::Peripheral,
            &Settings::new().with("role", "Slave").with("clock_div", 4),
        );
        assert_eq!(settings.get("clock_div"), None);
        assert_eq!(settings.get("role"), Some(&SettingValue::from("Slave")));
    }
}
