use crate::error::{
    GenerateError, ParseFileError, PositionalError, SchemaError, SnapshotParseError,
};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("cannot load schema: {0}")]
    Schema(#[from] PositionalError<SchemaError>),
    #[error("cannot load schema: {0}")]
    SchemaFile(#[from] ParseFileError<SchemaError>),
    #[error("cannot read configuration snapshot: {0}")]
    Snapshot(#[from] SnapshotParseError),
    #[error("cannot read configuration snapshot {fname}: {err}")]
    SnapshotFile {
        fname: String,
        err: SnapshotParseError,
    },
    /// A rendered `std::io::Error`
    #[error("{0}")]
    Io(String),
    #[error("generation failed: {0}")]
    Generate(#[from] GenerateError),
}

impl From<std::io::Error> for ApiError {
    fn from(value: std::io::Error) -> Self {
        ApiError::Io(value.to_string())
    }
}
