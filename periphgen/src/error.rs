use std::{fmt, ops};

use crate::model::{InvalidPinError, PeripheralId, UnknownPeripheralError};
use thiserror::Error;

/// Representation of a file position in an error
///
/// Indexes start from 1:1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Point {
        line: u32,
        col: u32,
    },
    Line {
        line: u32,
        start_col: u32,
        end_col: u32,
    },
    MultiLine {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    },
}

impl From<ops::Range<roxmltree::TextPos>> for Position {
    fn from(value: ops::Range<roxmltree::TextPos>) -> Self {
        if value.start.row == value.end.row {
            // Same line, same column --> Point
            if value.start.col == value.end.col {
                Position::Point {
                    line: value.start.row,
                    col: value.start.col,
                }
            }
            // Same line but different column --> Line
            else {
                Position::Line {
                    line: value.start.row,
                    start_col: value.start.col,
                    end_col: value.end.col,
                }
            }
        }
        // Starts and ends on different lines --> MultiLine
        else {
            Position::MultiLine {
                start_line: value.start.row,
                start_col: value.start.col,
                end_line: value.end.row,
                end_col: value.end.col,
            }
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Point { line, col } => write!(f, "{line}:{col}"),
            Position::Line {
                line,
                start_col,
                end_col,
            } => write!(f, "{line}:{start_col}-{end_col}"),
            Position::MultiLine {
                start_line,
                start_col,
                end_line,
                end_col,
            } => write!(f, "{start_line}:{start_col}..{end_line}:{end_col}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{pos}\n{err}")]
pub struct PositionalError<T> {
    pub(crate) pos: Position,
    pub(crate) err: T,
}

impl<T> PositionalError<T> {
    pub(crate) fn with_fname(self, fname: String) -> ParseFileError<T> {
        ParseFileError { fname, err: self }
    }

    /// The error without position information
    pub fn inner(&self) -> &T {
        &self.err
    }

    pub fn position(&self) -> &Position {
        &self.pos
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("peripheral schema parse error --> {fname}:{err}")]
pub struct ParseFileError<T> {
    fname: String,
    err: PositionalError<T>,
}

impl<T> ParseFileError<T> {
    pub fn inner(&self) -> &PositionalError<T> {
        &self.err
    }
}

/// Error that happened while parsing a peripheral schema
///
/// These are authoring errors in the schema document and always abort loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("expected root element <device>, found <{0}>")]
    UnexpectedRoot(String),
    #[error("expected attribute {attr:?} in element {elem:?}")]
    ExpectedAttribute { elem: String, attr: String },
    #[error("invalid value {value:?} for attribute {attr:?}")]
    InvalidAttribute { attr: String, value: String },
    #[error("unexpected element <{elem}> in <{parent}>")]
    UnexpectedElement { elem: String, parent: String },
    #[error(transparent)]
    InvalidPin(#[from] InvalidPinError),
    #[error(transparent)]
    UnknownPeripheral(#[from] UnknownPeripheralError),
    #[error("peripheral {0} is declared more than once")]
    DuplicatePeripheral(PeripheralId),
    #[error("pin {pin} is mapped more than once in peripheral {peripheral}")]
    DuplicatePin { peripheral: PeripheralId, pin: String },
    #[error("global peripheral {0} cannot map signals to pins")]
    GlobalWithPins(PeripheralId),
    #[error("field {field:?} referenced by peripheral {peripheral} is not declared")]
    UndeclaredField {
        peripheral: PeripheralId,
        field: String,
    },
    #[error("signal {signal:?} is not mapped by peripheral {peripheral}")]
    UndeclaredSignal {
        peripheral: PeripheralId,
        signal: String,
    },
    #[error("default value {default:?} is not valid for field {field:?}")]
    InvalidDefault { field: String, default: String },
    #[error(
        "mode key collision in {peripheral}: value {value:?} derives key {key:?} which is also mapped explicitly from {mapped_from:?}"
    )]
    ModeKeyCollision {
        peripheral: PeripheralId,
        value: String,
        key: String,
        mapped_from: String,
    },
    #[error(transparent)]
    Template(#[from] TemplateParseError),
    #[error(transparent)]
    Predicate(#[from] PredicateParseError),
}

impl SchemaError {
    /// Convert into positional error, adding row and column information
    pub(crate) fn with_text_pos_range(
        self,
        pos: ops::Range<roxmltree::TextPos>,
    ) -> PositionalError<SchemaError> {
        PositionalError {
            pos: pos.into(),
            err: self,
        }
    }

    pub(crate) fn with_byte_pos_range(
        self,
        byte_pos: ops::Range<usize>,
        doc: &roxmltree::Document,
    ) -> PositionalError<SchemaError> {
        let text_pos = ops::Range {
            start: doc.text_pos_at(byte_pos.start),
            end: doc.text_pos_at(byte_pos.end),
        };
        self.with_text_pos_range(text_pos)
    }
}

impl From<roxmltree::Error> for PositionalError<SchemaError> {
    fn from(value: roxmltree::Error) -> Self {
        let pos = value.pos();
        SchemaError::Xml(value.to_string()).with_text_pos_range(pos..pos)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateParseError {
    #[error("unterminated placeholder in template {0:?}")]
    Unterminated(String),
    #[error("invalid placeholder name {name:?} in template {src:?}")]
    InvalidPlaceholder { src: String, name: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid predicate clause {clause:?} in {src:?}")]
pub struct PredicateParseError {
    pub(crate) src: String,
    pub(crate) clause: String,
}

/// A template references a parameter that resolution never supplies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error(
        "template {set:?} of peripheral {peripheral} references parameter {{{{{param}}}}} which is never supplied"
    )]
    MissingParameter {
        peripheral: PeripheralId,
        set: String,
        param: String,
    },
}

/// Error that happened while reading a configuration snapshot
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotParseError {
    #[error("malformed JSON: {0}")]
    Json(String),
    #[error("expected a JSON object for {0}")]
    ExpectedObject(String),
    #[error("expected a boolean for {0}")]
    ExpectedBool(String),
    #[error("expected a string for {0}")]
    ExpectedString(String),
    #[error(transparent)]
    UnknownPeripheral(#[from] UnknownPeripheralError),
    #[error(transparent)]
    InvalidPin(#[from] InvalidPinError),
    #[error("unsupported value for setting {key:?}: {value}")]
    UnsupportedValue { key: String, value: String },
    #[error("state of {0} must contain one of \"pins\", \"interrupt\" or \"enabled\"")]
    UnknownStateShape(PeripheralId),
}

impl From<json::Error> for SnapshotParseError {
    fn from(value: json::Error) -> Self {
        Self::Json(value.to_string())
    }
}

/// Error that happened during code generation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("routine {name} is declared with conflicting signatures: ({first}) and ({second})")]
    ConflictingSignature {
        name: String,
        first: String,
        second: String,
    },
    #[error("routine {name} is called with conflicting arguments: ({first}) and ({second})")]
    ConflictingArguments {
        name: String,
        first: String,
        second: String,
    },
    #[error("interrupt vector {0} is given two different handler bodies")]
    ConflictingHandler(String),
    #[error(
        "routine parameter {param:?} of {peripheral} reads setting {field:?}, which is not set"
    )]
    MissingRoutineArgument {
        peripheral: PeripheralId,
        param: String,
        field: String,
    },
}
