//! Generate avr-libc C sources from a configuration snapshot
//!
//! Every active peripheral is expanded into fragments of init routines and interrupt handlers.
//! Pin-change interrupt requests are pooled across peripherals and expanded per port group.
//! The fragments are then merged into one [`GeneratedArtifact`] that renders to a header and a
//! source file.

mod emit;
mod expand;
mod pcint;

pub use self::expand::{expand_peripheral, Fragment, PeripheralOutput};
pub use self::pcint::{
    aggregate, aggregate_pcint, explicit_requests, flagged_requests, PcintAggregator,
    PcintRequest, PcintSource, PinEntry,
};

use std::{collections::BTreeSet, fmt::Write};

use crate::{
    error::GenerateError,
    model::{ConfigurationSnapshot, Schema},
};
use indoc::formatdoc;
use json::JsonValue;
use log::{debug, warn};

pub const HEADER_FILE_NAME: &str = "peripherals.h";
pub const SOURCE_FILE_NAME: &str = "peripherals.c";
/// The routine calling every other init routine
pub const AGGREGATE_ROUTINE: &str = "init_peripherals";
const HEADER_GUARD: &str = "PERIPHGEN_PERIPHERALS_H";
const INDENT: &str = "    ";

/// An init routine with its accumulated body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedRoutine {
    pub name: String,
    /// C parameter list, `void` if there are none
    pub params: String,
    /// Arguments passed by the aggregate routine
    pub args: Vec<String>,
    pub lines: Vec<String>,
}

impl NamedRoutine {
    pub fn prototype(&self) -> String {
        format!("void {}({})", self.name, self.params)
    }

    /// Call statement, e.g., `uart_init(9600);`
    pub fn call(&self) -> String {
        format!("{}({});", self.name, self.args.join(", "))
    }

    pub fn takes_params(&self) -> bool {
        self.params != "void"
    }
}

/// An interrupt service routine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Handler {
    /// avr-libc vector name, e.g., `TIMER0_OVF_vect`
    pub vector: String,
    pub label: String,
    pub lines: Vec<String>,
}

/// The complete output of one generation run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub device: String,
    pub timestamp: Option<String>,
    pub includes: BTreeSet<String>,
    /// Init routines in first-seen order
    pub init_routines: Vec<NamedRoutine>,
    pub aggregate: NamedRoutine,
    pub handlers: Vec<Handler>,
}

fn body(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| format!("{INDENT}{line}\n"))
        .collect()
}

impl GeneratedArtifact {
    fn banner(&self) -> String {
        let mut banner = format!(
            "/* Generated by periphgen for {}. Do not edit. */\n",
            self.device
        );
        if let Some(timestamp) = &self.timestamp {
            // Unwrap: writing to a String never fails
            writeln!(banner, "/* Generated at {timestamp} */").unwrap();
        }
        banner
    }

    /// Routines in declaration order, the aggregate last
    pub fn routines(&self) -> impl Iterator<Item = &NamedRoutine> {
        self.init_routines.iter().chain([&self.aggregate])
    }

    /// Contents of [`HEADER_FILE_NAME`]
    pub fn declarations(&self) -> String {
        let includes = self
            .includes
            .iter()
            .map(|include| format!("#include <{include}>\n"))
            .collect::<String>();
        let prototypes = self
            .routines()
            .map(|r| format!("{};\n", r.prototype()))
            .collect::<String>();
        formatdoc! {"
            {banner}
            #ifndef {guard}
            #define {guard}

            {includes}
            {prototypes}
            #endif /* {guard} */
            ",
            banner = self.banner(),
            guard = HEADER_GUARD,
            includes = includes,
            prototypes = prototypes,
        }
    }

    /// Contents of [`SOURCE_FILE_NAME`]
    pub fn implementation(&self) -> String {
        let mut out = self.banner();
        out.push('\n');
        // Unwrap: writing to a String never fails
        writeln!(out, "#include \"{HEADER_FILE_NAME}\"").unwrap();
        for routine in self.routines() {
            write!(
                out,
                "\n{}\n{{\n{}}}\n",
                routine.prototype(),
                body(&routine.lines)
            )
            .unwrap();
        }
        for handler in &self.handlers {
            write!(
                out,
                "\n/* {} */\nISR({})\n{{\n{}}}\n",
                handler.label,
                handler.vector,
                body(&handler.lines)
            )
            .unwrap();
        }
        out
    }

    /// Both files together with their structure, for tooling
    pub fn to_json(&self) -> JsonValue {
        let mut files = JsonValue::new_object();
        files[HEADER_FILE_NAME] = self.declarations().into();
        files[SOURCE_FILE_NAME] = self.implementation().into();
        json::object! {
            device: self.device.clone(),
            routines: self.routines().map(|r| json::object! {
                name: r.name.clone(),
                params: r.params.clone(),
                args: r.args.clone(),
            }).collect::<Vec<_>>(),
            handlers: self.handlers.iter().map(|h| json::object! {
                vector: h.vector.clone(),
                label: h.label.clone(),
            }).collect::<Vec<_>>(),
            files: files,
        }
    }
}

/// Expand every active peripheral of `snapshot` in schema order and assemble the result
///
/// Pin-change interrupts are expanded at the position of the `pcint` descriptor, or last if the
/// schema has none. Peripherals unknown to the schema are skipped.
pub(crate) fn generate_artifact(
    schema: &Schema,
    snapshot: &ConfigurationSnapshot,
    clock_hz: Option<u32>,
) -> Result<GeneratedArtifact, GenerateError> {
    let mut outputs = vec![];
    let mut pcint_expanded = false;

    for descriptor in schema.peripherals() {
        if descriptor.id.feeds_pcint() {
            outputs.extend(aggregate_pcint(schema, snapshot));
            pcint_expanded = true;
            continue;
        }
        let Some(state) = snapshot.get(descriptor.id).filter(|s| s.is_active()) else {
            continue;
        };
        debug!("Expanding {}", descriptor.id);
        outputs.push(expand_peripheral(descriptor, state, clock_hz)?);
    }
    if !pcint_expanded {
        outputs.extend(aggregate_pcint(schema, snapshot));
    }

    for (id, _) in snapshot
        .active()
        .filter(|(id, _)| schema.peripheral(*id).is_none())
    {
        warn!("{id} is not described by the schema for {}, skipping", schema.device());
    }

    emit::assemble(schema.device(), outputs)
}
