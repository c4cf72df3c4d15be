//! Exposes functionality supported by this crate
mod error;

use std::{
    path,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    codegen,
    frontend::{schema_xml, snapshot_json},
    util,
};
use log::info;

pub use crate::{
    analysis::{check, detect_conflicts, ConflictMessage, Diagnostic, DiagnosticKind, Severity},
    codegen::{
        aggregate, expand_peripheral, explicit_requests, flagged_requests, Fragment,
        GeneratedArtifact, Handler, NamedRoutine, PcintAggregator, PcintRequest, PcintSource,
        PeripheralOutput, PinEntry, AGGREGATE_ROUTINE, HEADER_FILE_NAME, SOURCE_FILE_NAME,
    },
    error::{
        GenerateError, ParseFileError, Position, PositionalError, SchemaError,
        SnapshotParseError, TemplateError,
    },
    model::{
        ConfigField, ConfigurationSnapshot, ConflictRule, FieldKind, FieldScope,
        InterruptDescriptor, InvalidPinError, ModeKey, PeripheralDescriptor, PeripheralId, PeripheralKind,
        PeripheralState, PinId, Port, PortGroup, Predicate, RoutineParam, RoutineSpec, Schema,
        SettingValue, Settings, Template, TemplateScope, TemplateSet, UnknownPeripheralError,
    },
    resolve::{apply_value_mapping, effective_settings, fallback_mode_key, resolve_mode},
};
pub use error::ApiError;

const BUILTIN_SCHEMA: &str = include_str!("../schema/atmega328p.xml");

impl Schema {
    /// The ATmega328P schema shipped with this crate
    pub fn builtin() -> Result<Self, ApiError> {
        Self::from_xml_str(BUILTIN_SCHEMA)
    }

    pub fn from_xml_str(text: &str) -> Result<Self, ApiError> {
        Ok(schema_xml::parse_schema(text)?)
    }
}

impl ConfigurationSnapshot {
    pub fn from_json_str(text: &str) -> Result<Self, ApiError> {
        Ok(snapshot_json::parse_snapshot(text)?)
    }
}

/// Load a peripheral schema from an XML file at `path`
pub fn load_schema(path: &path::Path) -> Result<Schema, ApiError> {
    let text = util::read_file(path)?;
    let schema = schema_xml::parse_schema(&text)
        .map_err(|err| err.with_fname(path.display().to_string()))?;
    Ok(schema)
}

/// Load a configuration snapshot from a JSON file at `path`
pub fn load_snapshot(path: &path::Path) -> Result<ConfigurationSnapshot, ApiError> {
    let text = util::read_file(path)?;
    snapshot_json::parse_snapshot(&text).map_err(|err| ApiError::SnapshotFile {
        fname: path.display().to_string(),
        err,
    })
}

/// Options of a generation run
#[derive(Clone, Debug, Default)]
pub struct GenerateConfig {
    /// CPU clock bound as `{{clock_hz}}`, falls back to the schema's clock
    clock_hz: Option<u32>,
    /// Stamp the output with the generation time
    ///
    /// Off by default so that identical inputs produce identical output.
    timestamp: bool,
}

impl GenerateConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn clock_hz(mut self, clock_hz: u32) -> Self {
        self.clock_hz = Some(clock_hz);
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: bool) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Generate initialization code and interrupt handlers for `snapshot`
///
/// Diagnostics are not consulted. Run [`check`] first to decide whether a snapshot should be
/// generated at all.
///
/// # Errors
///
/// - a template references a parameter that is never supplied
/// - several peripherals contribute incompatibly to one routine or vector
pub fn generate(
    schema: &Schema,
    snapshot: &ConfigurationSnapshot,
    config: &GenerateConfig,
) -> Result<GeneratedArtifact, ApiError> {
    let clock_hz = config.clock_hz.or(schema.default_clock_hz());
    let mut artifact = codegen::generate_artifact(schema, snapshot, clock_hz)?;
    if config.timestamp {
        let now = chrono::Utc::now();
        artifact.timestamp = Some(now.format("%Y-%m-%d %H:%M:%S UTC").to_string());
    }
    info!(
        "Generated {} routines and {} handlers for {} active peripherals",
        artifact.init_routines.len(),
        artifact.handlers.len(),
        snapshot.active().count()
    );
    Ok(artifact)
}

/// Parse the inputs without generating anything
///
/// Good for checking whether a schema and a snapshot can be read by periphgen.
pub fn dry_run(schema: Option<&path::Path>, snapshot: Option<&path::Path>) -> Result<(), ApiError> {
    let schema = match schema {
        Some(path) => load_schema(path)?,
        None => Schema::builtin()?,
    };
    info!(
        "Schema for {} describes {} peripherals and {} conflict rules",
        schema.device(),
        schema.peripherals().len(),
        schema.conflicts().len()
    );
    if let Some(path) = snapshot {
        let snapshot = load_snapshot(path)?;
        info!("Snapshot configures {} peripherals", snapshot.iter().count());
    }
    Ok(())
}

/// Shared access to the schema in use
///
/// Readers take a reference to one complete schema for the duration of a run. Replacing the
/// schema does not affect runs already holding the previous one.
#[derive(Debug)]
pub struct SchemaRegistry {
    schema: RwLock<Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: RwLock::new(Arc::new(schema)),
        }
    }

    /// The schema at the time of the call
    pub fn current(&self) -> Arc<Schema> {
        // A poisoned lock still holds a complete schema since writers only swap the `Arc`
        self.schema
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the schema, returning the previous one
    pub fn swap(&self, schema: Schema) -> Arc<Schema> {
        let mut guard = self.schema.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, Arc::new(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_schema_loads() {
        let schema = Schema::builtin().unwrap();
        assert_eq!(schema.device(), "ATmega328P");
        assert_eq!(schema.default_clock_hz(), Some(16_000_000));
        assert!(schema.peripheral(PeripheralId::Watchdog).is_some());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_schema(path::Path::new("/nonexistent/schema.xml")).unwrap_err();
        assert!(matches!(err, ApiError::Io(ref msg) if msg.contains("/nonexistent/schema.xml")));
    }

    #[test]
    fn config_clock_overrides_schema() {
        let schema = Schema::builtin().unwrap();
        let snapshot = ConfigurationSnapshot::new().with(
            PeripheralId::I2c,
            PeripheralState::pin_bound([
                ("PC4".parse().unwrap(), Settings::new()),
                ("PC5".parse().unwrap(), Settings::new()),
            ]),
        );
        let source = generate(&schema, &snapshot, &GenerateConfig::new().clock_hz(8_000_000))
            .unwrap()
            .implementation();
        assert!(source.contains("8000000UL"));
        assert!(!source.contains("16000000UL"));
    }
}
