//! Methods for reading files

use std::{io, path};

use fs_err as fs;

/// Returns contents of a file at `path`
///
/// # Errors
///
/// The path does not exist or the file cannot be read. The error names the path.
pub(crate) fn read_file(path: &path::Path) -> io::Result<String> {
    fs::read_to_string(path)
}
