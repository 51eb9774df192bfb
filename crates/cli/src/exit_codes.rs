//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success (skipped rows are reported, not failures)        |
//! | 1    | General error (engine defect, unmergeable schema)        |
//! | 2    | Usage error (bad arguments, fewer than two archives)     |
//! | 3    | Input archives do not share one schema                   |
//! | 4    | Merged data violates a schema constraint                 |
//! | 5    | Archive, database or filesystem error                    |
//! | 6    | Merge rules or settings do not parse or do not validate  |

use jwlmerge_engine::MergeError;
use jwlmerge_io::IoError;

/// Success - command completed. Rows skipped by the merge do not change this.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Inputs disagree on schema version or table structure.
pub const EXIT_SCHEMA_MISMATCH: u8 = 3;

/// Post-merge constraint check or `PRAGMA foreign_key_check` failed.
pub const EXIT_CONSTRAINT: u8 = 4;

/// Cannot read an input archive or write the output.
pub const EXIT_ARCHIVE: u8 = 5;

/// Rules file or settings file is malformed or names unknown columns.
pub const EXIT_INVALID_RULES: u8 = 6;

/// Map engine errors to exit codes.
pub fn merge_exit_code(err: &MergeError) -> u8 {
    match err {
        MergeError::NoSources => EXIT_USAGE,
        MergeError::SchemaMismatch { .. } => EXIT_SCHEMA_MISMATCH,
        MergeError::ConstraintViolation { .. } => EXIT_CONSTRAINT,
        MergeError::ConfigParse(_) | MergeError::ConfigValidation(_) => EXIT_INVALID_RULES,
        MergeError::InvalidSchema(_)
        | MergeError::DependencyCycle(_)
        | MergeError::OutOfOrder { .. }
        | MergeError::AlreadyRemapped(_) => EXIT_ERROR,
    }
}

/// Map IO errors to exit codes.
pub fn io_exit_code(err: &IoError) -> u8 {
    match err {
        IoError::Merge(e) => merge_exit_code(e),
        _ => EXIT_ARCHIVE,
    }
}
