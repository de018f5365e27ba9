//! Error types for the spectral library.

use thiserror::Error;

/// Coarse classification of a [`LibraryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required column is missing or holds values of the wrong type.
    Schema,
    /// Table, tensor and axis lengths disagree.
    Shape,
    /// An index or wavelength window falls outside the data.
    Range,
    /// Lookup of a library index that is not present.
    Lookup,
    /// Underlying file could not be opened, read or written.
    Io,
    /// A file was readable but its contents are malformed.
    Format,
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{column} required in {context}")]
    MissingColumn {
        column: String,
        context: &'static str,
    },

    #[error("column '{column}' expects {expected} values, found {found}")]
    ColumnType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("length of parameter table ({params}) and library spectra ({spectra}) are not equal")]
    LengthMismatch { params: usize, spectra: usize },

    #[error("{what} has {found} samples but the library wavelength array has {expected}")]
    SpectrumLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("library spectra should have shape {expected:?}, found {found:?}")]
    TensorShape {
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("library is inconsistent: {params} parameter rows but {spectra} spectra")]
    Inconsistent { params: usize, spectra: usize },

    #[error("array shape error: {0}")]
    Array(#[from] ndarray::ShapeError),

    #[error("index {index} is out of bounds in library spectra of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("parameter row {row} has no integer lib_index")]
    MissingIndex { row: usize },

    #[error("no wavelength samples found in range ({lo}, {hi})")]
    EmptyWavelengthWindow { lo: f64, hi: f64 },

    #[error("library index {0} not found")]
    NotFound(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed library file: {0}")]
    Format(String),
}

impl LibraryError {
    pub fn kind(&self) -> ErrorKind {
        use LibraryError::*;
        match self {
            MissingColumn { .. } | ColumnType { .. } => ErrorKind::Schema,
            LengthMismatch { .. }
            | SpectrumLength { .. }
            | TensorShape { .. }
            | Inconsistent { .. }
            | Array(_) => ErrorKind::Shape,
            IndexOutOfBounds { .. } | MissingIndex { .. } | EmptyWavelengthWindow { .. } => {
                ErrorKind::Range
            }
            NotFound(_) => ErrorKind::Lookup,
            Io(_) => ErrorKind::Io,
            Parquet(_) | Arrow(_) | Csv(_) | Json(_) | Format(_) => ErrorKind::Format,
        }
    }

    pub(crate) fn format<S: Into<String>>(message: S) -> Self {
        LibraryError::Format(message.into())
    }
}

pub type Result<T> = std::result::Result<T, LibraryError>;
