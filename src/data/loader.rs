use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType, Field, Float32Type, Float64Type, Int32Type, Int64Type, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::{EnabledStatistics, WriterProperties};

use super::model::{required_column_type, ColumnType, ParamValue, ParameterRow, ParameterTable};
use crate::error::{LibraryError, Result};

/// Metadata key naming the table stored in a parameter file.
pub const TABLE_KEY: &str = "speclib:table";

/// Name of the single table a parameter file holds.
pub const TABLE_NAME: &str = "library_params";

// ---------------------------------------------------------------------------
// Parquet writer
// ---------------------------------------------------------------------------

/// Write the parameter table as Parquet.
///
/// Required columns keep fixed types (`lib_index` Int64, identifiers and
/// source labels Utf8, physical quantities Float64). Other columns take the
/// type of their values; integer columns holding floats widen to Float64.
/// Page-level statistics are written so readers can seek to single rows.
pub fn write_parameter_table<W: Write + Send>(table: &ParameterTable, writer: W) -> Result<()> {
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for name in table.columns() {
        let (data_type, array) = match column_type(table, name) {
            ColumnType::Integer => (
                DataType::Int64,
                Arc::new(Int64Array::from(integer_values(table, name)?)) as ArrayRef,
            ),
            ColumnType::Float => (
                DataType::Float64,
                Arc::new(Float64Array::from(float_values(table, name)?)) as ArrayRef,
            ),
            ColumnType::Bool => (
                DataType::Boolean,
                Arc::new(BooleanArray::from(bool_values(table, name)?)) as ArrayRef,
            ),
            ColumnType::String => (
                DataType::Utf8,
                Arc::new(StringArray::from(string_values(table, name)?)) as ArrayRef,
            ),
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let options = RecordBatchOptions::new().with_row_count(Some(table.len()));
    let batch = RecordBatch::try_new_with_options(schema.clone(), arrays, &options)?;

    let props = WriterProperties::builder()
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_key_value_metadata(Some(vec![KeyValue::new(
            TABLE_KEY.to_string(),
            TABLE_NAME.to_string(),
        )]))
        .build();

    let mut writer = ArrowWriter::try_new(writer, schema, Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(&batch)?;
    }
    writer.close()?;
    Ok(())
}

fn column_type(table: &ParameterTable, name: &str) -> ColumnType {
    // All-null extra columns are stored as text.
    table.value_type(name).unwrap_or(ColumnType::String)
}

fn type_error(column: &str, expected: &'static str, value: &ParamValue) -> LibraryError {
    LibraryError::ColumnType {
        column: column.to_string(),
        expected,
        found: format!("{} '{value}'", value.type_name()),
    }
}

fn integer_values(table: &ParameterTable, name: &str) -> Result<Vec<Option<i64>>> {
    (0..table.len())
        .map(|pos| match table.value(pos, name) {
            ParamValue::Null => Ok(None),
            ParamValue::Integer(i) => Ok(Some(*i)),
            other => Err(type_error(name, "integer", other)),
        })
        .collect()
}

fn float_values(table: &ParameterTable, name: &str) -> Result<Vec<Option<f64>>> {
    (0..table.len())
        .map(|pos| match table.value(pos, name) {
            ParamValue::Null => Ok(None),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| type_error(name, "float", other)),
        })
        .collect()
}

fn bool_values(table: &ParameterTable, name: &str) -> Result<Vec<Option<bool>>> {
    (0..table.len())
        .map(|pos| match table.value(pos, name) {
            ParamValue::Null => Ok(None),
            ParamValue::Bool(b) => Ok(Some(*b)),
            other => Err(type_error(name, "bool", other)),
        })
        .collect()
}

fn string_values(table: &ParameterTable, name: &str) -> Result<Vec<Option<String>>> {
    (0..table.len())
        .map(|pos| match table.value(pos, name) {
            ParamValue::Null => Ok(None),
            ParamValue::String(s) | ParamValue::Date(s) => Ok(Some(s.clone())),
            other => Err(type_error(name, "string", other)),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Read a parameter table written by [`write_parameter_table`].
///
/// Any column set is accepted here; required columns are checked when the
/// table is handed to a library.
pub fn read_parameter_table(path: &Path) -> Result<ParameterTable> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let table_name = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kv| kv.iter().find(|e| e.key == TABLE_KEY))
        .and_then(|e| e.value.clone());
    if table_name.as_deref() != Some(TABLE_NAME) {
        return Err(LibraryError::format(format!(
            "{} does not contain a '{TABLE_NAME}' table",
            path.display()
        )));
    }

    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let mut table = ParameterTable::with_columns(columns.clone());

    let reader = builder.build()?;
    for batch_result in reader {
        let batch = batch_result?;
        for row in 0..batch.num_rows() {
            let mut params = ParameterRow::default();
            for (col_idx, name) in columns.iter().enumerate() {
                let value = extract_value(batch.column(col_idx), row)?;
                params.fields.insert(name.clone(), value);
            }
            table.push_row(params)?;
        }
    }

    log::debug!(
        "Read {} parameter rows with {} columns from {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(table)
}

/// Extract a single value from an Arrow column at a given row.
fn extract_value(col: &ArrayRef, row: usize) -> Result<ParamValue> {
    if col.is_null(row) {
        return Ok(ParamValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => ParamValue::String(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => ParamValue::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => ParamValue::Integer(col.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => ParamValue::Integer(col.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => ParamValue::Float(col.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => ParamValue::Float(col.as_primitive::<Float64Type>().value(row)),
        DataType::Boolean => ParamValue::Bool(col.as_boolean().value(row)),
        other => {
            return Err(LibraryError::format(format!(
                "unsupported parameter column type {other:?}"
            )))
        }
    };
    Ok(value)
}

// ---------------------------------------------------------------------------
// CSV import
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one star per record.
///
/// Required columns are parsed to their storage type (empty cells become
/// `Null`). Any other column takes the narrowest type all of its cells parse
/// as: integer, float, bool, then text.
pub fn read_csv_table(path: &Path) -> Result<ParameterTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let records = reader
        .records()
        .collect::<std::result::Result<Vec<_>, csv::Error>>()?;

    let types: Vec<ColumnType> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            required_column_type(name)
                .unwrap_or_else(|| guess_column_type(records.iter().filter_map(|r| r.get(i))))
        })
        .collect();

    let mut table = ParameterTable::with_columns(headers.clone());
    for record in &records {
        let mut row = ParameterRow::default();
        for ((name, ty), cell) in headers.iter().zip(&types).zip(record.iter()) {
            row.set(name, parse_cell(name, *ty, cell)?);
        }
        table.push_row(row)?;
    }
    Ok(table)
}

impl ParameterTable {
    /// Import a parameter table from CSV; see [`read_csv_table`].
    pub fn from_csv(path: &Path) -> Result<Self> {
        read_csv_table(path)
    }
}

fn parse_cell(column: &str, ty: ColumnType, cell: &str) -> Result<ParamValue> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(ParamValue::Null);
    }
    let bad = || LibraryError::ColumnType {
        column: column.to_string(),
        expected: ty.name(),
        found: format!("'{cell}'"),
    };
    match ty {
        ColumnType::Integer => cell.parse().map(ParamValue::Integer).map_err(|_| bad()),
        ColumnType::Float => cell.parse().map(ParamValue::Float).map_err(|_| bad()),
        ColumnType::Bool => cell.parse().map(ParamValue::Bool).map_err(|_| bad()),
        ColumnType::String => Ok(ParamValue::String(cell.to_string())),
    }
}

fn guess_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut guessed: Option<ColumnType> = None;
    for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
        let ty = if cell.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if cell.parse::<f64>().is_ok() {
            ColumnType::Float
        } else if cell == "true" || cell == "false" {
            ColumnType::Bool
        } else {
            return ColumnType::String;
        };
        guessed = match (guessed, ty) {
            (None, ty) => Some(ty),
            (Some(prev), ty) if prev == ty => Some(prev),
            (Some(ColumnType::Integer), ColumnType::Float)
            | (Some(ColumnType::Float), ColumnType::Integer) => Some(ColumnType::Float),
            _ => return ColumnType::String,
        };
    }
    guessed.unwrap_or(ColumnType::String)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::LIB_COLS;

    fn sample_table() -> ParameterTable {
        ParameterTable::from_rows(vec![
            ParameterRow::new()
                .with("lib_index", 0i64)
                .with("cps_name", "10700")
                .with("Teff", 5290.0)
                .with("u_Teff", 60.0)
                .with("source", "Mann")
                .with("binary", false),
            ParameterRow::new()
                .with("lib_index", 1i64)
                .with("cps_name", "GL570B")
                .with("Teff", f64::NAN)
                .with("feh", -0.12)
                .with("binary", true),
        ])
        .unwrap()
    }

    #[test]
    fn parquet_table_keeps_values_and_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.parquet");
        let table = sample_table();
        write_parameter_table(&table, File::create(&path).unwrap()).unwrap();

        let back = read_parameter_table(&path).unwrap();
        assert_eq!(back.columns(), table.columns());
        assert_eq!(back.len(), 2);
        assert_eq!(back.value(0, "cps_name"), &ParamValue::from("10700"));
        assert_eq!(back.value(1, "Teff"), &ParamValue::Float(f64::NAN));
        assert_eq!(back.value(1, "u_Teff"), &ParamValue::Null);
        assert_eq!(back.value(1, "binary"), &ParamValue::Bool(true));
        assert_eq!(back.value(1, "lib_index"), &ParamValue::Integer(1));
    }

    #[test]
    fn empty_table_keeps_required_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        write_parameter_table(&ParameterTable::empty(), File::create(&path).unwrap()).unwrap();

        let back = read_parameter_table(&path).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.columns().len(), LIB_COLS.len());
        assert!(back.missing_column().is_none());
    }

    #[test]
    fn foreign_column_type_is_a_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("Teff", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["hot"])) as ArrayRef],
        )
        .unwrap();
        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(vec![KeyValue::new(
                TABLE_KEY.to_string(),
                TABLE_NAME.to_string(),
            )]))
            .build();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, Some(props))
            .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let err = read_parameter_table(&path).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
        assert!(err.to_string().contains("Teff"));
    }

    #[test]
    fn mixed_integer_and_float_extras_widen() {
        let table = ParameterTable::from_rows(vec![
            ParameterRow::new().with("snr", 40i64),
            ParameterRow::new().with("snr", 55.5),
        ])
        .unwrap();
        assert_eq!(column_type(&table, "snr"), ColumnType::Float);
    }

    #[test]
    fn rows_without_an_extra_column_round_trip_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.parquet");
        let mut table = ParameterTable::empty();
        table
            .push_row(ParameterRow::new().with("lib_index", 0i64).with("snr", 40i64))
            .unwrap();
        table.push_row(ParameterRow::new().with("lib_index", 1i64)).unwrap();
        table
            .push_row(ParameterRow::new().with("lib_index", 2i64).with("Teff", 5800i64))
            .unwrap();
        write_parameter_table(&table, File::create(&path).unwrap()).unwrap();

        let back = read_parameter_table(&path).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.value(2, "Teff"), &ParamValue::Float(5800.0));
    }

    #[test]
    fn csv_import_types_required_and_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stars.csv");
        std::fs::write(
            &path,
            "lib_index,cps_name,Teff,logg,source,snr,vmag\n\
             0,123,5777,4.44,Brewer,80,8\n\
             1,HD 1,,nan,Mann,n/a,9.25\n",
        )
        .unwrap();

        let table = ParameterTable::from_csv(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.value(0, "cps_name"), &ParamValue::from("123"));
        assert_eq!(table.value(0, "Teff"), &ParamValue::Float(5777.0));
        assert_eq!(table.value(0, "lib_index"), &ParamValue::Integer(0));
        assert_eq!(table.value(0, "snr"), &ParamValue::from("80"));
        assert_eq!(table.value(0, "vmag"), &ParamValue::Float(8.0));
        assert_eq!(table.value(1, "Teff"), &ParamValue::Null);
        assert_eq!(table.value(1, "logg"), &ParamValue::Float(f64::NAN));
        assert_eq!(table.value(1, "snr"), &ParamValue::from("n/a"));
    }

    #[test]
    fn csv_rejects_unparsable_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "lib_index,Teff\n0,warm\n").unwrap();
        let err = ParameterTable::from_csv(&path).unwrap_err();
        assert!(err.to_string().contains("Teff"));
    }
}
