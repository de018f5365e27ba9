//! Spectrum container: wavelength axis, spectrum tensor and header stored in
//! one Parquet file used as a chunked array store.
//!
//! Layout:
//! ```text
//!   key/value metadata   header entries (typed text) + speclib:num_entries
//!   wav                  Float64, one row per wavelength sample
//!   library_spectra      List<Float64>, row j = tensor[:, :, j] flattened
//!                        entry-major: [f0, u0, f1, u1, ...]
//!   row group            one (N, 2, C) chunk of C consecutive samples
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Float64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Float64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use ndarray::{s, Array1, Array3, ArrayView1, ArrayView2, ArrayView3};
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder, RowSelection,
    RowSelector,
};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::basic::{Compression, Encoding, GzipLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::config::StorageOptions;
use crate::data::model::{Header, ParamValue};
use crate::error::{LibraryError, Result};

/// Dataset holding the wavelength axis.
pub const WAV_DATASET: &str = "wav";

/// Dataset holding the (N, 2, W) spectrum tensor.
pub const SPECTRA_DATASET: &str = "library_spectra";

/// Metadata key recording N, the leading tensor dimension.
pub const NUM_ENTRIES_KEY: &str = "speclib:num_entries";

const RESERVED_PREFIXES: [&str; 2] = ["speclib:", "ARROW:"];

// ---------------------------------------------------------------------------
// Wavelength limits
// ---------------------------------------------------------------------------

/// Open wavelength interval `(lo, hi)` restricting which samples are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthLimits {
    pub lo: f64,
    pub hi: f64,
}

impl WavelengthLimits {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    /// Strictly inside the limits.
    pub fn contains(&self, wavelength: f64) -> bool {
        self.lo < wavelength && wavelength < self.hi
    }

    /// Half-open index range from the first to one past the last sample
    /// inside the limits, or `None` when no sample qualifies.
    pub fn index_range(&self, wav: &[f64]) -> Option<(usize, usize)> {
        let first = wav.iter().position(|&v| self.contains(v))?;
        let last = wav.iter().rposition(|&v| self.contains(v))?;
        Some((first, last + 1))
    }
}

impl From<(f64, f64)> for WavelengthLimits {
    fn from((lo, hi): (f64, f64)) -> Self {
        Self::new(lo, hi)
    }
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// Chunk shape `(N, 2, C)` grouping all entries and both planes for `C`
/// consecutive wavelength samples, with `C` chosen so one chunk holds about
/// `target_bytes`. `C` is clamped to `[1, W]`.
pub fn chunk_shape(
    num_entries: usize,
    num_wav: usize,
    target_bytes: usize,
) -> (usize, usize, usize) {
    let bytes_per_column = num_entries * 2 * std::mem::size_of::<f64>();
    let columns = if bytes_per_column == 0 {
        num_wav
    } else {
        target_bytes / bytes_per_column
    };
    (num_entries, 2, columns.clamp(1, num_wav.max(1)))
}

fn spectra_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(WAV_DATASET, DataType::Float64, false),
        Field::new(
            SPECTRA_DATASET,
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Write axis, tensor and header to `writer`.
pub fn write_spectra<W: Write + Send>(
    writer: W,
    wav: ArrayView1<f64>,
    spectra: ArrayView3<f64>,
    header: &Header,
    options: &StorageOptions,
) -> Result<()> {
    let (num_entries, depth, num_wav) = spectra.dim();
    if depth != 2 || num_wav != wav.len() {
        return Err(LibraryError::TensorShape {
            expected: (num_entries, 2, wav.len()),
            found: spectra.dim(),
        });
    }

    let chunk = chunk_shape(num_entries, num_wav, options.target_chunk_bytes);
    log::info!("Storing model spectra with chunks of size {chunk:?}");

    let mut metadata = Vec::with_capacity(header.len() + 1);
    for (key, value) in header {
        if RESERVED_PREFIXES.iter().any(|p| key.starts_with(p)) {
            return Err(LibraryError::format(format!(
                "header key '{key}' uses a reserved prefix"
            )));
        }
        metadata.push(KeyValue::new(key.clone(), value.encode()));
    }
    metadata.push(KeyValue::new(NUM_ENTRIES_KEY.to_string(), num_entries.to_string()));

    let mut props = WriterProperties::builder()
        .set_compression(Compression::GZIP(GzipLevel::try_new(options.compression_level)?))
        .set_dictionary_enabled(false)
        .set_max_row_group_size(chunk.2)
        .set_key_value_metadata(Some(metadata));
    if options.shuffle {
        props = props.set_encoding(Encoding::BYTE_STREAM_SPLIT);
    }

    let schema = spectra_schema();
    let mut writer = ArrowWriter::try_new(writer, schema.clone(), Some(props.build()))?;
    let mut start = 0;
    while start < num_wav {
        let stop = (start + chunk.2).min(num_wav);
        let batch = chunk_batch(&schema, wav, spectra, start, stop)?;
        writer.write(&batch)?;
        start = stop;
    }
    writer.close()?;
    Ok(())
}

/// Record batch holding wavelength samples `start..stop`.
fn chunk_batch(
    schema: &SchemaRef,
    wav: ArrayView1<f64>,
    spectra: ArrayView3<f64>,
    start: usize,
    stop: usize,
) -> Result<RecordBatch> {
    let rows = stop - start;
    let slab_len = spectra.dim().0 * 2;

    let wav_array = Float64Array::from(wav.slice(s![start..stop]).to_vec());
    let mut list_builder =
        ListBuilder::with_capacity(Float64Builder::with_capacity(rows * slab_len), rows);
    for j in start..stop {
        let values = list_builder.values();
        for v in spectra.slice(s![.., .., j]).iter() {
            values.append_value(*v);
        }
        list_builder.append(true);
    }

    let columns: Vec<ArrayRef> = vec![Arc::new(wav_array), Arc::new(list_builder.finish())];
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Contents recovered from a spectrum file.
#[derive(Debug, Clone)]
pub struct SpectrumFile {
    pub header: Header,
    pub wav: Array1<f64>,
    pub spectra: Array3<f64>,
}

/// Read a spectrum file, optionally restricted to a wavelength window.
///
/// The file is opened once; the axis and the windowed tensor slice are both
/// read through that handle, and only the rows of the window are decoded.
pub fn read_spectra(path: &Path, limits: Option<WavelengthLimits>) -> Result<SpectrumFile> {
    let file = File::open(path)?;
    let metadata = ArrowReaderMetadata::load(&file, ArrowReaderOptions::default())?;

    let (header, num_entries) =
        read_header(metadata.metadata().file_metadata().key_value_metadata())?;
    let dataset_index = |name: &str| {
        metadata.schema().index_of(name).map_err(|_| {
            LibraryError::format(format!("{} has no '{name}' dataset", path.display()))
        })
    };
    let wav_idx = dataset_index(WAV_DATASET)?;
    let spectra_idx = dataset_index(SPECTRA_DATASET)?;

    // Full wavelength axis.
    let mask = ProjectionMask::roots(metadata.parquet_schema(), [wav_idx]);
    let reader =
        ParquetRecordBatchReaderBuilder::new_with_metadata(file.try_clone()?, metadata.clone())
            .with_projection(mask)
            .build()?;
    let mut wav = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let column = batch
            .column(0)
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| LibraryError::format("'wav' dataset is not Float64"))?;
        wav.extend(column.values().iter().copied());
    }

    let (start, stop) = match limits {
        None => (0, wav.len()),
        Some(lim) => lim
            .index_range(&wav)
            .ok_or(LibraryError::EmptyWavelengthWindow { lo: lim.lo, hi: lim.hi })?,
    };
    let width = stop - start;

    let mask = ProjectionMask::roots(metadata.parquet_schema(), [spectra_idx]);
    let mut builder =
        ParquetRecordBatchReaderBuilder::new_with_metadata(file, metadata).with_projection(mask);
    if limits.is_some() {
        let mut selectors = Vec::with_capacity(2);
        if start > 0 {
            selectors.push(RowSelector::skip(start));
        }
        selectors.push(RowSelector::select(width));
        builder = builder.with_row_selection(RowSelection::from(selectors));
    }
    log::debug!(
        "Reading {num_entries} spectra over wavelength samples {start}..{stop} from {}",
        path.display()
    );

    let mut spectra = Array3::<f64>::zeros((num_entries, 2, width));
    let mut column = 0;
    for batch_result in builder.build()? {
        let batch = batch_result?;
        let lists = batch
            .column(0)
            .as_list_opt::<i32>()
            .ok_or_else(|| LibraryError::format("'library_spectra' dataset is not a list column"))?;
        for row in 0..lists.len() {
            if column >= width {
                return Err(LibraryError::format("more spectrum rows than wavelength samples"));
            }
            let slab = lists.value(row);
            let values = slab
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(|| LibraryError::format("'library_spectra' values are not Float64"))?;
            if values.len() != num_entries * 2 {
                return Err(LibraryError::format(format!(
                    "spectrum row {} holds {} values, expected {}",
                    start + column,
                    values.len(),
                    num_entries * 2
                )));
            }
            let slab = ArrayView2::from_shape((num_entries, 2), &values.values()[..])?;
            spectra.slice_mut(s![.., .., column]).assign(&slab);
            column += 1;
        }
    }
    if column != width {
        return Err(LibraryError::format(format!(
            "expected {width} spectrum rows, found {column}"
        )));
    }

    Ok(SpectrumFile {
        header,
        wav: Array1::from(wav[start..stop].to_vec()),
        spectra,
    })
}

fn read_header(kv: Option<&Vec<KeyValue>>) -> Result<(Header, usize)> {
    let mut header = Header::new();
    let mut num_entries = None;
    for entry in kv.into_iter().flatten() {
        let value = entry.value.as_deref().unwrap_or("null");
        if entry.key == NUM_ENTRIES_KEY {
            let n = value
                .parse::<usize>()
                .map_err(|_| LibraryError::format(format!("bad entry count '{value}'")))?;
            num_entries = Some(n);
        } else if !RESERVED_PREFIXES.iter().any(|p| entry.key.starts_with(p)) {
            header.insert(entry.key.clone(), ParamValue::decode(value)?);
        }
    }
    let num_entries =
        num_entries.ok_or_else(|| LibraryError::format("spectrum file has no entry count"))?;
    Ok((header, num_entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn tensor(n: usize, w: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 2, w), |(i, k, j)| i as f64 * 100.0 + k as f64 * 0.5 + j as f64)
    }

    fn write_file(path: &Path, wav: &Array1<f64>, spectra: &Array3<f64>, header: &Header) {
        let file = File::create(path).unwrap();
        let options = StorageOptions::default();
        write_spectra(file, wav.view(), spectra.view(), header, &options).unwrap();
    }

    #[test]
    fn chunk_shape_targets_byte_budget() {
        // 10 entries * 2 planes * 8 bytes = 160 bytes per wavelength column
        assert_eq!(chunk_shape(10, 5000, 100_000), (10, 2, 625));
        // Clamped to the axis length
        assert_eq!(chunk_shape(10, 100, 100_000), (10, 2, 100));
        // Never below one column
        assert_eq!(chunk_shape(100_000, 50, 100_000), (100_000, 2, 1));
        // Empty library: one chunk spans the axis
        assert_eq!(chunk_shape(0, 300, 100_000), (0, 2, 300));
        assert_eq!(chunk_shape(0, 0, 100_000), (0, 2, 1));
    }

    #[test]
    fn limits_index_range_is_strict() {
        let wav = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(WavelengthLimits::new(2.0, 5.0).index_range(&wav), Some((2, 4)));
        assert_eq!(WavelengthLimits::new(0.0, 10.0).index_range(&wav), Some((0, 5)));
        assert_eq!(WavelengthLimits::new(2.0, 3.0).index_range(&wav), None);
    }

    #[test]
    fn full_read_recovers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.parquet");
        let wav = Array1::linspace(5000.0, 5100.0, 41);
        let spectra = tensor(3, 41);
        let mut header = Header::new();
        header.insert("date_created".into(), ParamValue::Date("2026-10-18".into()));
        header.insert("resolution".into(), ParamValue::Float(60_000.0));
        write_file(&path, &wav, &spectra, &header);

        let back = read_spectra(&path, None).unwrap();
        assert_eq!(back.wav, wav);
        assert_eq!(back.spectra, spectra);
        assert_eq!(back.header, header);
    }

    #[test]
    fn small_chunks_split_into_row_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunked.parquet");
        let wav = Array1::linspace(1.0, 50.0, 50);
        let spectra = tensor(4, 50);
        let options = StorageOptions {
            target_chunk_bytes: 4 * 2 * 8 * 7,
            ..StorageOptions::default()
        };
        let file = File::create(&path).unwrap();
        write_spectra(file, wav.view(), spectra.view(), &Header::new(), &options).unwrap();

        let meta =
            ArrowReaderMetadata::load(&File::open(&path).unwrap(), ArrowReaderOptions::default())
                .unwrap();
        assert_eq!(meta.metadata().num_row_groups(), 8);
        assert_eq!(meta.metadata().row_group(0).num_rows(), 7);

        let back = read_spectra(&path, Some(WavelengthLimits::new(10.5, 30.5))).unwrap();
        assert_eq!(back.wav.to_vec(), (11..=30).map(f64::from).collect::<Vec<_>>());
        assert_eq!(back.spectra, spectra.slice(s![.., .., 10..30]).to_owned());
    }

    #[test]
    fn empty_window_is_a_range_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spectra.parquet");
        let wav = Array1::linspace(5000.0, 5010.0, 11);
        write_file(&path, &wav, &tensor(1, 11), &Header::new());

        let err = read_spectra(&path, Some(WavelengthLimits::new(6000.0, 7000.0))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn empty_tensor_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let wav = Array1::linspace(1.0, 5.0, 5);
        let spectra = Array3::<f64>::zeros((0, 2, 5));
        write_file(&path, &wav, &spectra, &Header::new());

        let back = read_spectra(&path, None).unwrap();
        assert_eq!(back.wav, wav);
        assert_eq!(back.spectra.dim(), (0, 2, 5));
    }

    #[test]
    fn reserved_header_keys_are_rejected() {
        let mut header = Header::new();
        header.insert(NUM_ENTRIES_KEY.into(), ParamValue::Integer(3));
        let wav = Array1::linspace(1.0, 2.0, 2);
        let err = write_spectra(
            Vec::new(),
            wav.view(),
            tensor(1, 2).view(),
            &header,
            &StorageOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_spectra(&dir.path().join("nope.parquet"), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
