//! Stellar spectral library: parameter table, wavelength axis and a
//! (N, 2, W) flux/uncertainty tensor, persisted as a pair of Parquet files.
//!
//! ```no_run
//! use ndarray::Array1;
//! use specmatch_library::{ParameterRow, SpectralLibrary, SpectrumContainer};
//!
//! let wav = Array1::linspace(5000.0, 5100.0, 101);
//! let mut lib = SpectralLibrary::empty(wav, None);
//! let row = ParameterRow::new().with("cps_name", "10700").with("Teff", 5290.0);
//! lib.insert(&row, &[1.0; 101], &[0.01; 101])?;
//! lib.save("params.parquet".as_ref(), "spectra.parquet".as_ref())?;
//!
//! let back = SpectralLibrary::load("params.parquet".as_ref(), "spectra.parquet".as_ref(), None)?;
//! assert_eq!(back.length(), 1);
//! # Ok::<(), specmatch_library::LibraryError>(())
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod library;
pub mod storage;

pub use config::StorageOptions;
pub use data::filter::{filtered_indices, init_filter_state, select_value, FilterState};
pub use data::model::{Header, ParamValue, ParameterRow, ParameterTable, LIB_COLS};
pub use error::{ErrorKind, LibraryError, Result};
pub use library::{Entries, LibraryEntry, SpectralLibrary, SpectrumContainer};
pub use storage::WavelengthLimits;
