//! Error types for the `fits2db` library.

use std::path::PathBuf;
use thiserror::Error as ThisError;

/// Errors produced by the `fits2db` library.
#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Both an extension number and an extension name were supplied.
    #[error("only one of --extnum or --extname may be specified")]
    ExtensionSelectConflict,

    /// Unrecognized SQL dialect passed to `--sql`.
    #[error("unknown SQL dialect '{0}' (expected postgres, mysql or sqlite)")]
    UnknownDialect(
        /// Value provided by the user.
        String,
    ),

    /// Binary output requested for a non-Postgres format.
    #[error("--binary requires --sql=postgres")]
    BinaryRequiresPostgres,

    /// No input files were supplied.
    #[error("no input files specified")]
    NoInputFiles,

    /// The file does not carry the FITS `SIMPLE` signature.
    #[error("'{path}' is not a FITS file")]
    NotFits {
        /// Offending file.
        path: PathBuf,
    },

    /// The selected HDU is not a binary table.
    #[error("no binary table at the selected extension of '{path}'")]
    NotATable {
        /// Offending file.
        path: PathBuf,
    },

    /// No extension with the requested `EXTNAME` exists.
    #[error("extension '{name}' not found in '{path}'")]
    ExtensionNotFound {
        /// Requested extension name.
        name: String,
        /// Offending file.
        path: PathBuf,
    },

    /// A malformed or unsupported `[...]` filename modifier.
    #[error("unsupported filename modifier in '{spec}'")]
    BadModifier {
        /// The full input specification.
        spec: String,
    },

    /// A header card could not be parsed.
    #[error("malformed FITS header in '{path}': {detail}")]
    BadHeader {
        /// Offending file.
        path: PathBuf,
        /// What went wrong.
        detail: String,
    },

    /// A keyword required by the table structure is absent.
    #[error("missing required keyword {key} in '{path}'")]
    MissingKeyword {
        /// The keyword name.
        key: String,
        /// Offending file.
        path: PathBuf,
    },

    /// A column format this tool cannot read (variable-length arrays,
    /// unknown TFORM codes).
    #[error("unsupported TFORM '{tform}' for column {col} in '{path}'")]
    UnsupportedColumn {
        /// The raw TFORM value.
        tform: String,
        /// 1-based column number.
        col: usize,
        /// Offending file.
        path: PathBuf,
    },

    /// A read past the declared end of the table.
    #[error("row range {first}..{last} outside table of {rows} rows in '{path}'")]
    RowRange {
        /// First requested row (0-based).
        first: u64,
        /// One past the last requested row.
        last: u64,
        /// Rows in the table.
        rows: u64,
        /// Offending file.
        path: PathBuf,
    },

    /// Generic IO error.
    #[error("failed to {action} at {path}")]
    Io {
        /// Action causing the error.
        action: &'static str,
        /// File path causing the I/O error.
        path: PathBuf,
        /// Source of error.
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O error with the action and path it occurred on.
    pub fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { action, path, source }
    }
}
