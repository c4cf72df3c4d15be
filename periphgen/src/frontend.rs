//! Readers for the input formats: the peripheral schema (XML) and configuration snapshots (JSON)

pub(crate) mod schema_xml;
pub(crate) mod snapshot_json;
