//! The spectral library container.

use std::fmt;
use std::path::Path;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use tempfile::NamedTempFile;

use crate::config::StorageOptions;
use crate::data::filter::{filtered_indices, FilterState};
use crate::data::loader::{read_parameter_table, write_parameter_table};
use crate::data::model::{
    Header, ParamValue, ParameterRow, ParameterTable, DATE_CREATED, INDEX_COL,
};
use crate::error::{LibraryError, Result};
use crate::storage::{read_spectra, write_spectra, SpectrumFile, WavelengthLimits};

/// Today's date in `YYYY-MM-DD` form.
fn today() -> ParamValue {
    ParamValue::Date(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string())
}

// ---------------------------------------------------------------------------
// Container protocol
// ---------------------------------------------------------------------------

/// One library entry: its parameter row and its (2, W) flux/uncertainty pair.
#[derive(Debug, Clone, Copy)]
pub struct LibraryEntry<'a> {
    pub params: &'a ParameterRow,
    pub spectrum: ArrayView2<'a, f64>,
}

impl<'a> LibraryEntry<'a> {
    pub fn flux(&self) -> ArrayView1<'a, f64> {
        self.spectrum.index_axis_move(Axis(0), 0)
    }

    pub fn uncertainty(&self) -> ArrayView1<'a, f64> {
        self.spectrum.index_axis_move(Axis(0), 1)
    }
}

/// Indexed access to library entries.
pub trait SpectrumContainer {
    /// Number of entries.
    fn length(&self) -> usize;

    /// Whether `index` is a filled library index.
    fn contains(&self, index: usize) -> bool;

    /// Entry at `index`, or [`LibraryError::NotFound`].
    fn get(&self, index: usize) -> Result<LibraryEntry<'_>>;

    /// Fresh iterator over all entries in index order.
    fn iterate(&self) -> Entries<'_>;
}

/// Forward iterator over the entries of a [`SpectralLibrary`].
#[derive(Debug, Clone)]
pub struct Entries<'a> {
    library: &'a SpectralLibrary,
    cursor: usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = LibraryEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.library.entry(self.cursor)?;
        self.cursor += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.library.len().saturating_sub(self.cursor);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Entries<'_> {}

// ---------------------------------------------------------------------------
// SpectralLibrary
// ---------------------------------------------------------------------------

/// Library spectra and stellar parameters, indexed by `lib_index`.
///
/// Row `i` of the parameter table pairs with `spectra[i]`, a (2, W) slab of
/// flux and flux uncertainty sampled on the shared wavelength axis.
#[derive(Debug, Clone)]
pub struct SpectralLibrary {
    params: ParameterTable,
    wav: Array1<f64>,
    spectra: Array3<f64>,
    header: Header,
    wavelength_limits: Option<WavelengthLimits>,
}

impl SpectralLibrary {
    /// Build a library, taking the empty path when either `spectra` or
    /// `params` is missing.
    pub fn create(
        wav: Array1<f64>,
        spectra: Option<Array3<f64>>,
        params: Option<ParameterTable>,
        header: Header,
        wavelength_limits: Option<WavelengthLimits>,
    ) -> Result<Self> {
        match (spectra, params) {
            (Some(spectra), Some(params)) => {
                Self::new(wav, spectra, params, header, wavelength_limits)
            }
            _ => Ok(Self::empty(wav, wavelength_limits)),
        }
    }

    /// An empty library over `wav`. The header only holds `date_created`.
    pub fn empty(wav: Array1<f64>, wavelength_limits: Option<WavelengthLimits>) -> Self {
        let num_wav = wav.len();
        let mut header = Header::new();
        header.insert(DATE_CREATED.to_string(), today());
        Self {
            params: ParameterTable::empty(),
            wav,
            spectra: Array3::zeros((0, 2, num_wav)),
            header,
            wavelength_limits,
        }
    }

    /// A fully formed library. Fails if the table lacks a required column,
    /// its length differs from the tensor's, a `lib_index` is missing or out
    /// of bounds, or the tensor is not (N, 2, W).
    ///
    /// `date_created` is always restamped with today's date.
    pub fn new(
        wav: Array1<f64>,
        spectra: Array3<f64>,
        params: ParameterTable,
        mut header: Header,
        wavelength_limits: Option<WavelengthLimits>,
    ) -> Result<Self> {
        if let Some(column) = params.missing_column() {
            return Err(LibraryError::MissingColumn {
                column: column.to_string(),
                context: "parameter table",
            });
        }

        let num_spec = spectra.dim().0;
        if params.len() != num_spec {
            return Err(LibraryError::LengthMismatch {
                params: params.len(),
                spectra: num_spec,
            });
        }

        for (row, entry) in params.rows().iter().enumerate() {
            let index = entry
                .lib_index()
                .ok_or(LibraryError::MissingIndex { row })?;
            if index < 0 || index as usize >= num_spec {
                return Err(LibraryError::IndexOutOfBounds {
                    index,
                    len: num_spec,
                });
            }
        }

        let (_, depth, num_wav) = spectra.dim();
        if depth != 2 || num_wav != wav.len() {
            return Err(LibraryError::TensorShape {
                expected: (num_spec, 2, wav.len()),
                found: spectra.dim(),
            });
        }

        header.insert(DATE_CREATED.to_string(), today());
        Ok(Self {
            params,
            wav,
            spectra,
            header,
            wavelength_limits,
        })
    }

    /// Append a star to the library and return its assigned `lib_index`.
    ///
    /// `spectrum` and `uncertainty` must already be shifted and interpolated
    /// onto the library wavelength scale. The caller's row is left untouched;
    /// the stored copy carries the new index, with values converted to their
    /// column types (see [`ParameterTable::push_row`]).
    pub fn insert(
        &mut self,
        row: &ParameterRow,
        spectrum: &[f64],
        uncertainty: &[f64],
    ) -> Result<usize> {
        if self.params.len() != self.spectra.dim().0 {
            return Err(LibraryError::Inconsistent {
                params: self.params.len(),
                spectra: self.spectra.dim().0,
            });
        }

        if let Some(column) = row.missing_field() {
            return Err(LibraryError::MissingColumn {
                column: column.to_string(),
                context: "parameter specification",
            });
        }

        let num_wav = self.wav.len();
        for (what, values) in [("spectrum", spectrum), ("spectrum uncertainty", uncertainty)] {
            if values.len() != num_wav {
                return Err(LibraryError::SpectrumLength {
                    what,
                    expected: num_wav,
                    found: values.len(),
                });
            }
        }

        let index = self.spectra.dim().0;
        let mut stored = row.clone();
        stored.set(INDEX_COL, index as i64);
        let prepared = self.params.prepare_row(stored)?;

        let mut slab = Array2::<f64>::zeros((2, num_wav));
        slab.row_mut(0).assign(&ArrayView1::from(spectrum));
        slab.row_mut(1).assign(&ArrayView1::from(uncertainty));
        self.spectra.push(Axis(0), slab.view())?;
        self.params.commit_row(prepared);
        Ok(index)
    }

    /// Save the library with default [`StorageOptions`].
    pub fn save(&self, parameter_path: &Path, spectrum_path: &Path) -> Result<()> {
        self.save_with(&StorageOptions::default(), parameter_path, spectrum_path)
    }

    /// Save parameters and spectra to two files.
    ///
    /// Each file is written to a temporary sibling and renamed into place
    /// once both are complete, so neither target is ever left half written.
    /// The two renames are not atomic as a pair.
    pub fn save_with(
        &self,
        options: &StorageOptions,
        parameter_path: &Path,
        spectrum_path: &Path,
    ) -> Result<()> {
        let mut param_tmp = sibling_temp_file(parameter_path)?;
        write_parameter_table(&self.params, param_tmp.as_file_mut())?;

        let mut spec_tmp = sibling_temp_file(spectrum_path)?;
        write_spectra(
            spec_tmp.as_file_mut(),
            self.wav.view(),
            self.spectra.view(),
            &self.header,
            options,
        )?;

        param_tmp.persist(parameter_path).map_err(|e| e.error)?;
        spec_tmp.persist(spectrum_path).map_err(|e| e.error)?;
        log::debug!(
            "Saved {} spectra to {} and {}",
            self.len(),
            parameter_path.display(),
            spectrum_path.display()
        );
        Ok(())
    }

    /// Load a library saved with [`SpectralLibrary::save`], optionally
    /// keeping only wavelengths strictly inside `wavelength_limits`.
    pub fn load(
        parameter_path: &Path,
        spectrum_path: &Path,
        wavelength_limits: Option<WavelengthLimits>,
    ) -> Result<Self> {
        let params = read_parameter_table(parameter_path)?;
        let SpectrumFile {
            header,
            wav,
            spectra,
        } = read_spectra(spectrum_path, wavelength_limits)?;
        Self::new(wav, spectra, params, header, wavelength_limits)
    }

    pub fn len(&self) -> usize {
        self.spectra.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    pub fn wav(&self) -> ArrayView1<'_, f64> {
        self.wav.view()
    }

    pub fn spectra(&self) -> ArrayView3<'_, f64> {
        self.spectra.view()
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn wavelength_limits(&self) -> Option<WavelengthLimits> {
        self.wavelength_limits
    }

    /// Library indices of rows passing `filters`.
    pub fn select(&self, filters: &FilterState) -> Vec<usize> {
        filtered_indices(&self.params, filters)
    }

    fn entry(&self, index: usize) -> Option<LibraryEntry<'_>> {
        if index >= self.len() {
            return None;
        }
        let params = self.params.row(index)?;
        Some(LibraryEntry {
            params,
            spectrum: self.spectra.index_axis(Axis(0), index),
        })
    }
}

/// Temporary file next to `path`, created with the mode a plain
/// `File::create` would give it (0666 less the umask) rather than 0600.
fn sibling_temp_file(path: &Path) -> std::io::Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(parent_dir(path))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

impl SpectrumContainer for SpectralLibrary {
    fn length(&self) -> usize {
        self.len()
    }

    fn contains(&self, index: usize) -> bool {
        index < self.params.len()
    }

    fn get(&self, index: usize) -> Result<LibraryEntry<'_>> {
        if !self.contains(index) {
            return Err(LibraryError::NotFound(index));
        }
        self.entry(index).ok_or(LibraryError::NotFound(index))
    }

    fn iterate(&self) -> Entries<'_> {
        Entries {
            library: self,
            cursor: 0,
        }
    }
}

impl<'a> IntoIterator for &'a SpectralLibrary {
    type Item = LibraryEntry<'a>;
    type IntoIter = Entries<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iterate()
    }
}

impl fmt::Display for SpectralLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<specmatch_library::SpectralLibrary>")?;
        for (key, value) in &self.header {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::filter::select_value;
    use crate::error::ErrorKind;

    const W: usize = 16;

    fn wav() -> Array1<f64> {
        Array1::linspace(5000.0, 5015.0, W)
    }

    fn star(name: &str, teff: f64) -> ParameterRow {
        ParameterRow::new()
            .with("cps_name", name)
            .with("Teff", teff)
            .with("source", "Mann")
    }

    fn flux(seed: f64) -> Vec<f64> {
        (0..W).map(|j| seed + j as f64 * 0.01).collect()
    }

    fn filled(n: usize) -> SpectralLibrary {
        let mut lib = SpectralLibrary::empty(wav(), None);
        for i in 0..n {
            let f = flux(i as f64);
            let u = vec![0.01; W];
            lib.insert(&star(&format!("star{i}"), 4000.0 + 100.0 * i as f64), &f, &u)
                .unwrap();
        }
        lib
    }

    fn full_parts(n: usize) -> (Array3<f64>, ParameterTable) {
        let spectra = Array3::from_shape_fn((n, 2, W), |(i, k, j)| (i * 10 + k) as f64 + j as f64);
        let rows = (0..n)
            .map(|i| star("x", 5000.0).with("lib_index", i as i64))
            .collect();
        (spectra, ParameterTable::from_rows(rows).unwrap())
    }

    #[test]
    fn empty_library_has_date_only_header() {
        let mut header = Header::new();
        header.insert("ignored".into(), ParamValue::Integer(1));
        let limits = Some((1.0, 2.0).into());
        let lib = SpectralLibrary::create(wav(), None, None, header, limits).unwrap();
        assert_eq!(lib.len(), 0);
        assert!(lib.is_empty());
        assert_eq!(lib.spectra().dim(), (0, 2, W));
        assert_eq!(lib.header().len(), 1);
        assert!(lib.header().contains_key(DATE_CREATED));
        assert_eq!(lib.params().columns().len(), 19);
        assert_eq!(lib.wavelength_limits(), Some(WavelengthLimits::new(1.0, 2.0)));
    }

    #[test]
    fn full_construction_succeeds_and_restamps_date() {
        let (spectra, params) = full_parts(3);
        let mut header = Header::new();
        header.insert(DATE_CREATED.into(), ParamValue::Date("1999-01-01".into()));
        header.insert("instrument".into(), ParamValue::from("HIRES"));
        let lib = SpectralLibrary::new(wav(), spectra, params, header, None).unwrap();
        assert_eq!(lib.len(), 3);
        assert_eq!(lib.header()[DATE_CREATED], today());
        assert_eq!(lib.header()["instrument"], ParamValue::from("HIRES"));
    }

    #[test]
    fn each_missing_required_column_is_reported() {
        for column in crate::data::model::LIB_COLS {
            let (spectra, params) = full_parts(2);
            let rows: Vec<ParameterRow> = params
                .rows()
                .iter()
                .cloned()
                .map(|mut r| {
                    r.remove(column);
                    r
                })
                .collect();
            let cols = params.columns().iter().filter(|c| *c != column).cloned().collect();
            let mut table = ParameterTable::with_columns(cols);
            for r in rows {
                table.push_row(r).unwrap();
            }
            let err = SpectralLibrary::new(wav(), spectra, table, Header::new(), None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Schema);
            assert!(err.to_string().contains(column), "{err}");
        }
    }

    #[test]
    fn wrong_tensor_shapes_are_shape_errors() {
        let (_, params) = full_parts(2);
        let narrow = Array3::<f64>::zeros((2, 1, W));
        let wide = Array3::<f64>::zeros((2, 2, W + 1));
        for spectra in [narrow, wide] {
            let err = SpectralLibrary::new(wav(), spectra, params.clone(), Header::new(), None)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Shape);
        }
    }

    #[test]
    fn length_mismatch_is_a_shape_error() {
        let (spectra, _) = full_parts(3);
        let (_, params) = full_parts(2);
        let err = SpectralLibrary::new(wav(), spectra, params, Header::new(), None).unwrap_err();
        assert!(matches!(err, LibraryError::LengthMismatch { params: 2, spectra: 3 }));
    }

    #[test]
    fn out_of_bounds_index_is_a_range_error() {
        let (spectra, _) = full_parts(2);
        let params = ParameterTable::from_rows(vec![
            star("a", 1.0).with("lib_index", 0i64),
            star("b", 1.0).with("lib_index", 2i64),
        ])
        .unwrap();
        let err = SpectralLibrary::new(wav(), spectra, params, Header::new(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn first_insert_gets_index_zero() {
        let mut lib = SpectralLibrary::empty(wav(), None);
        let row = star("10700", 5290.0);
        let f = flux(1.0);
        let u = vec![0.02; W];
        assert_eq!(lib.insert(&row, &f, &u).unwrap(), 0);

        assert_eq!(lib.len(), 1);
        let entry = lib.get(0).unwrap();
        assert_eq!(entry.params.lib_index(), Some(0));
        assert_eq!(entry.params.get("cps_name"), Some(&ParamValue::from("10700")));
        assert_eq!(entry.flux().to_vec(), f);
        assert_eq!(entry.uncertainty().to_vec(), u);
        // Caller's row is not modified.
        assert_eq!(row.lib_index(), None);
    }

    #[test]
    fn sequential_inserts_are_dense() {
        let lib = filled(5);
        assert_eq!(lib.len(), 5);
        let indices: Vec<_> = lib.iterate().map(|e| e.params.lib_index()).collect();
        assert_eq!(indices, (0..5).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn failed_insert_leaves_library_untouched() {
        let mut lib = filled(2);
        let mut incomplete = star("bad", 1.0);
        incomplete.remove("vsini");
        let err = lib.insert(&incomplete, &flux(0.0), &flux(0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("vsini"));

        let err = lib.insert(&star("short", 1.0), &[1.0, 2.0], &flux(0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
        let err = lib.insert(&star("short", 1.0), &flux(0.0), &[1.0]).unwrap_err();
        assert!(err.to_string().contains("uncertainty"));

        let err = lib
            .insert(&star("hot", 1.0).with("Teff", "hot"), &flux(0.0), &flux(0.0))
            .unwrap_err();
        assert!(matches!(err, LibraryError::ColumnType { .. }));

        assert_eq!(lib.len(), 2);
        assert_eq!(lib.params().len(), 2);
    }

    #[test]
    fn inserted_values_take_column_types() {
        let mut lib = filled(1);
        let row = star("int", 0.0)
            .with("Teff", 5800i64)
            .with("lib_obs", ParamValue::Date("2026-10-18".into()));
        lib.insert(&row, &flux(0.0), &flux(0.0)).unwrap();

        let stored = lib.get(1).unwrap().params;
        assert_eq!(stored.get("Teff"), Some(&ParamValue::Float(5800.0)));
        assert_eq!(stored.get("lib_obs"), Some(&ParamValue::from("2026-10-18")));
        assert_eq!(lib.select(&select_value("Teff", 5800.0)), vec![1]);
    }

    #[test]
    fn membership_and_lookup() {
        let lib = filled(3);
        for i in 0..3 {
            assert!(lib.contains(i));
        }
        assert!(!lib.contains(3));
        let err = lib.get(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup);
    }

    #[test]
    fn iteration_restarts_each_pass() {
        let lib = filled(4);
        let owned = |e: LibraryEntry<'_>| (e.params.clone(), e.spectrum.to_owned());
        let first: Vec<_> = lib.iterate().map(owned).collect();
        let second: Vec<_> = (&lib).into_iter().map(owned).collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        assert_eq!(lib.iterate().len(), 4);
    }

    #[test]
    fn select_filters_by_parameter_value() {
        let lib = filled(3);
        assert_eq!(lib.select(&select_value("cps_name", "star1")), vec![1]);
        assert_eq!(lib.select(&select_value("source", "Mann")), vec![0, 1, 2]);
    }

    #[test]
    fn display_lists_header_entries() {
        let mut lib = filled(1);
        lib.header_mut().insert("instrument".into(), ParamValue::from("HIRES"));
        let text = lib.to_string();
        assert!(text.starts_with("<specmatch_library::SpectralLibrary>\n"));
        assert!(text.contains("instrument: HIRES\n"));
        assert!(text.contains("date_created: "));
    }
}
