//! Request validation utilities.

use crate::printing::{PrintOptions, PrintOptionsInput};
use crate::types::{Error, FileId, Result};

/// Fewest and most copies a single job may request.
pub const MIN_COPIES: i64 = 1;
pub const MAX_COPIES: i64 = 10;

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.trim().is_empty() {
        return Err(Error::validation(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate that a copy count is within `MIN_COPIES..=MAX_COPIES`.
pub fn validate_copies(copies: i64) -> Result<u32> {
    if !(MIN_COPIES..=MAX_COPIES).contains(&copies) {
        return Err(Error::validation(format!(
            "copies must be between {} and {} (got {})",
            MIN_COPIES, MAX_COPIES, copies
        )));
    }
    u32::try_from(copies).map_err(|_| Error::validation("copies out of range"))
}

/// Turn frontend options into typed options, rejecting anything unsupported.
pub fn validate_print_options(input: &PrintOptionsInput) -> Result<PrintOptions> {
    Ok(PrintOptions {
        copies: validate_copies(input.copies)?,
        color_mode: input.color_mode.parse()?,
        duplex: input.duplex,
        paper_size: input.paper_size.parse()?,
    })
}

/// Validate a job's file list: non-empty, no repeats, bounded length.
pub fn validate_file_list(files: &[FileId], max_files: usize) -> Result<()> {
    if files.is_empty() {
        return Err(Error::validation("a print job needs at least one file"));
    }
    if files.len() > max_files {
        return Err(Error::validation(format!(
            "a print job may contain at most {} files (got {})",
            max_files,
            files.len()
        )));
    }
    for (i, file) in files.iter().enumerate() {
        if files[..i].contains(file) {
            return Err(Error::validation(format!("file {} listed twice", file)));
        }
    }
    Ok(())
}
