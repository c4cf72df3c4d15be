//! Merge per-peripheral outputs into one artifact

use std::collections::BTreeSet;

use crate::{
    codegen::{GeneratedArtifact, Handler, NamedRoutine, PeripheralOutput, AGGREGATE_ROUTINE},
    error::GenerateError,
};
use log::{debug, info};

const BASE_INCLUDE: &str = "avr/io.h";
const INTERRUPT_INCLUDE: &str = "avr/interrupt.h";
const STDINT_INCLUDE: &str = "stdint.h";

fn merge_routines(
    routines: &mut Vec<NamedRoutine>,
    output: &mut PeripheralOutput,
) -> Result<(), GenerateError> {
    for fragment in output.fragments.drain(..) {
        let params = fragment.routine.c_params();
        match routines.iter_mut().find(|r| r.name == fragment.routine.name) {
            Some(existing) => {
                if existing.params != params {
                    return Err(GenerateError::ConflictingSignature {
                        name: existing.name.clone(),
                        first: existing.params.clone(),
                        second: params,
                    });
                }
                if existing.args != fragment.args {
                    return Err(GenerateError::ConflictingArguments {
                        name: existing.name.clone(),
                        first: existing.args.join(", "),
                        second: fragment.args.join(", "),
                    });
                }
                debug!("{}: appending to {}", output.peripheral, existing.name);
                existing.lines.extend(fragment.lines);
            }
            None => routines.push(NamedRoutine {
                name: fragment.routine.name,
                params,
                args: fragment.args,
                lines: fragment.lines,
            }),
        }
    }
    Ok(())
}

/// Identical handlers for one vector collapse into one
fn merge_handlers(handlers: &mut Vec<Handler>, output: &mut PeripheralOutput) -> Result<(), GenerateError> {
    for handler in output.handlers.drain(..) {
        match handlers.iter().find(|h| h.vector == handler.vector) {
            Some(existing) if existing.lines == handler.lines => {
                debug!("{}: {} already handled", output.peripheral, handler.vector);
            }
            Some(_) => return Err(GenerateError::ConflictingHandler(handler.vector)),
            None => handlers.push(handler),
        }
    }
    Ok(())
}

/// Assemble the artifact for `device` from outputs in emission order
///
/// Routines keep the order in which they were first contributed to. The aggregate routine calls
/// each of them exactly once and enables interrupts globally if any handler exists.
pub(crate) fn assemble(
    device: &str,
    outputs: Vec<PeripheralOutput>,
) -> Result<GeneratedArtifact, GenerateError> {
    let mut includes = BTreeSet::from([BASE_INCLUDE.to_owned()]);
    let mut routines = vec![];
    let mut handlers = vec![];

    for mut output in outputs {
        includes.append(&mut output.includes);
        merge_routines(&mut routines, &mut output)?;
        merge_handlers(&mut handlers, &mut output)?;
    }

    if routines.iter().any(NamedRoutine::takes_params) {
        includes.insert(STDINT_INCLUDE.to_owned());
    }
    let mut calls = routines.iter().map(NamedRoutine::call).collect::<Vec<_>>();
    if !handlers.is_empty() {
        includes.insert(INTERRUPT_INCLUDE.to_owned());
        calls.push("sei();".to_owned());
    }

    info!(
        "Assembled {} init routines and {} interrupt handlers",
        routines.len(),
        handlers.len()
    );
    Ok(GeneratedArtifact {
        device: device.to_owned(),
        timestamp: None,
        includes,
        init_routines: routines,
        aggregate: NamedRoutine {
            name: AGGREGATE_ROUTINE.to_owned(),
            params: "void".to_owned(),
            args: vec![],
            lines: calls,
        },
        handlers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PeripheralId, RoutineParam, RoutineSpec};

    fn output(id: PeripheralId, routine: &RoutineSpec, args: &[&str], lines: &[&str]) -> PeripheralOutput {
        let mut out = PeripheralOutput::new(id);
        out.push_lines(
            routine,
            &args.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            lines.iter().map(|s| s.to_string()).collect(),
        );
        out
    }

    fn handler(vector: &str, lines: &[&str]) -> Handler {
        Handler {
            vector: vector.to_owned(),
            label: vector.to_owned(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn shared_routine_is_called_once() {
        let didr = RoutineSpec::plain("didr_init");
        let artifact = assemble(
            "ATmega328P",
            vec![
                output(PeripheralId::Adc, &didr, &[], &["DIDR0 |= _BV(ADC0D);"]),
                output(PeripheralId::AnalogComparator, &didr, &[], &["DIDR1 |= _BV(AIN0D);"]),
            ],
        )
        .unwrap();
        assert_eq!(artifact.init_routines.len(), 1);
        assert_eq!(artifact.init_routines[0].lines.len(), 2);
        assert_eq!(artifact.aggregate.lines, ["didr_init();"]);
        assert_eq!(
            artifact.includes.iter().map(String::as_str).collect::<Vec<_>>(),
            ["avr/io.h"]
        );
    }

    #[test]
    fn parameters_and_handlers_pull_in_headers() {
        let uart = RoutineSpec {
            name: "uart_init".to_owned(),
            params: vec![RoutineParam {
                name: "baud".to_owned(),
                c_type: "uint32_t".to_owned(),
                field: "baud".to_owned(),
            }],
        };
        let mut out = output(PeripheralId::Uart, &uart, &["9600"], &["UBRR0L = 103;"]);
        out.handlers.push(handler("USART_RX_vect", &[]));

        let artifact = assemble("ATmega328P", vec![out]).unwrap();
        assert!(artifact.includes.contains("stdint.h"));
        assert!(artifact.includes.contains("avr/interrupt.h"));
        assert_eq!(artifact.aggregate.lines, ["uart_init(9600);", "sei();"]);
    }

    #[test]
    fn mismatched_contributions_are_rejected() {
        let plain = RoutineSpec::plain("shared_init");
        let with_param = RoutineSpec {
            name: "shared_init".to_owned(),
            params: vec![RoutineParam {
                name: "x".to_owned(),
                c_type: "uint8_t".to_owned(),
                field: "x".to_owned(),
            }],
        };
        assert!(matches!(
            assemble(
                "ATmega328P",
                vec![
                    output(PeripheralId::Adc, &plain, &[], &["a;"]),
                    output(PeripheralId::AnalogComparator, &with_param, &["1"], &["b;"]),
                ]
            ),
            Err(GenerateError::ConflictingSignature { .. })
        ));
        assert!(matches!(
            assemble(
                "ATmega328P",
                vec![
                    output(PeripheralId::Adc, &with_param, &["1"], &["a;"]),
                    output(PeripheralId::AnalogComparator, &with_param, &["2"], &["b;"]),
                ]
            ),
            Err(GenerateError::ConflictingArguments { .. })
        ));

        let mut first = PeripheralOutput::new(PeripheralId::Gpio);
        first.handlers.push(handler("PCINT0_vect", &["a;"]));
        let mut same = PeripheralOutput::new(PeripheralId::Pcint);
        same.handlers.push(handler("PCINT0_vect", &["a;"]));
        let mut other = PeripheralOutput::new(PeripheralId::Pcint);
        other.handlers.push(handler("PCINT0_vect", &["b;"]));

        let artifact = assemble("ATmega328P", vec![first.clone(), same]).unwrap();
        assert_eq!(artifact.handlers.len(), 1);
        assert_eq!(
            assemble("ATmega328P", vec![first, other]),
            Err(GenerateError::ConflictingHandler("PCINT0_vect".to_owned()))
        );
    }
}
