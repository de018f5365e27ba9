use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{LibraryError, Result};

// ---------------------------------------------------------------------------
// Required parameter columns
// ---------------------------------------------------------------------------

/// Columns every parameter table and row must carry, in storage order.
pub const LIB_COLS: [&str; 19] = [
    "lib_index",
    "cps_name",
    "obs",
    "lib_obs",
    "Teff",
    "u_Teff",
    "radius",
    "u_radius",
    "logg",
    "u_logg",
    "feh",
    "u_feh",
    "mass",
    "u_mass",
    "age",
    "u_age",
    "vsini",
    "source",
    "source_name",
];

/// Name of the library index column.
pub const INDEX_COL: &str = "lib_index";

/// Required columns holding text (identifiers and source labels).
pub const STRING_COLS: [&str; 5] = ["cps_name", "obs", "lib_obs", "source", "source_name"];

/// How a column is typed when the table is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Bool,
    String,
}

impl ColumnType {
    /// Column type a value implies; `None` for `Null`. Dates are stored as text.
    pub fn of(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Null => None,
            ParamValue::Integer(_) => Some(ColumnType::Integer),
            ParamValue::Float(_) => Some(ColumnType::Float),
            ParamValue::Bool(_) => Some(ColumnType::Bool),
            ParamValue::String(_) | ParamValue::Date(_) => Some(ColumnType::String),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::String => "string",
        }
    }

    /// Convert `value` to this storage type. Integers widen to floats and
    /// dates become strings; anything else must already match.
    pub fn coerce(self, column: &str, value: ParamValue) -> Result<ParamValue> {
        match (self, value) {
            (_, ParamValue::Null) => Ok(ParamValue::Null),
            (ColumnType::Integer, v @ ParamValue::Integer(_))
            | (ColumnType::Float, v @ ParamValue::Float(_))
            | (ColumnType::Bool, v @ ParamValue::Bool(_))
            | (ColumnType::String, v @ ParamValue::String(_)) => Ok(v),
            (ColumnType::Float, ParamValue::Integer(i)) => Ok(ParamValue::Float(i as f64)),
            (ColumnType::String, ParamValue::Date(d)) => Ok(ParamValue::String(d)),
            (ty, other) => Err(LibraryError::ColumnType {
                column: column.to_string(),
                expected: ty.name(),
                found: format!("{} '{other}'", other.type_name()),
            }),
        }
    }
}

/// Storage type of a required column, `None` for caller-defined extras.
pub fn required_column_type(name: &str) -> Option<ColumnType> {
    if name == INDEX_COL {
        Some(ColumnType::Integer)
    } else if STRING_COLS.contains(&name) {
        Some(ColumnType::String)
    } else if LIB_COLS.contains(&name) {
        Some(ColumnType::Float)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// ParamValue – a single cell of the parameter table or header
// ---------------------------------------------------------------------------

/// A dynamically-typed parameter value.
///
/// Ordering and equality treat floats by `total_cmp`, so NaN equals NaN and
/// values can live in `BTreeSet`s for queries.
#[derive(Debug, Clone)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text.
    Date(String),
    Null,
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for ParamValue {}

impl PartialOrd for ParamValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParamValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use ParamValue::*;
        fn discriminant(v: &ParamValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for ParamValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            ParamValue::String(s) | ParamValue::Date(s) => s.hash(state),
            ParamValue::Integer(i) => i.hash(state),
            ParamValue::Float(f) => f.to_bits().hash(state),
            ParamValue::Bool(b) => b.hash(state),
            ParamValue::Null => {}
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{s}"),
            ParamValue::Integer(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Date(d) => write!(f, "{d}"),
            ParamValue::Null => write!(f, "nan"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

impl ParamValue {
    /// Interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) | ParamValue::Date(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::String(_) => "string",
            ParamValue::Integer(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Bool(_) => "bool",
            ParamValue::Date(_) => "date",
            ParamValue::Null => "null",
        }
    }

    /// Encode as `type:payload` text for string-only metadata stores.
    pub fn encode(&self) -> String {
        match self {
            ParamValue::String(s) => format!("str:{s}"),
            ParamValue::Integer(i) => format!("int:{i}"),
            ParamValue::Float(v) => format!("float:{v}"),
            ParamValue::Bool(b) => format!("bool:{b}"),
            ParamValue::Date(d) => format!("date:{d}"),
            ParamValue::Null => "null".to_string(),
        }
    }

    /// Inverse of [`ParamValue::encode`].
    pub fn decode(text: &str) -> Result<Self> {
        if text == "null" {
            return Ok(ParamValue::Null);
        }
        let (tag, payload) = text
            .split_once(':')
            .ok_or_else(|| LibraryError::format(format!("untyped metadata value '{text}'")))?;
        let bad = || LibraryError::format(format!("cannot parse {tag} metadata value '{payload}'"));
        match tag {
            "str" => Ok(ParamValue::String(payload.to_string())),
            "date" => Ok(ParamValue::Date(payload.to_string())),
            "int" => payload.parse().map(ParamValue::Integer).map_err(|_| bad()),
            "float" => payload.parse().map(ParamValue::Float).map_err(|_| bad()),
            "bool" => payload.parse().map(ParamValue::Bool).map_err(|_| bad()),
            other => Err(LibraryError::format(format!("unknown metadata type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Header – scalar library metadata
// ---------------------------------------------------------------------------

/// Library-level metadata such as the creation date.
pub type Header = BTreeMap<String, ParamValue>;

/// Header key stamped at construction.
pub const DATE_CREATED: &str = "date_created";

// ---------------------------------------------------------------------------
// ParameterRow – one library star
// ---------------------------------------------------------------------------

/// Stellar parameters for a single library entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterRow {
    /// Field name → value.
    pub fields: BTreeMap<String, ParamValue>,
}

impl ParameterRow {
    /// A row holding every required field, all set to `Null`.
    pub fn new() -> Self {
        let fields = LIB_COLS
            .iter()
            .map(|c| (c.to_string(), ParamValue::Null))
            .collect();
        Self { fields }
    }

    /// Builder-style setter.
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.fields.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.fields.remove(name)
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn lib_index(&self) -> Option<i64> {
        self.get(INDEX_COL).and_then(ParamValue::as_i64)
    }

    /// First required field this row lacks.
    pub fn missing_field(&self) -> Option<&'static str> {
        LIB_COLS.iter().copied().find(|c| !self.contains_field(c))
    }
}

// ---------------------------------------------------------------------------
// ParameterTable – ordered rows with named columns
// ---------------------------------------------------------------------------

/// The parameter table: ordered column names plus rows in library order.
///
/// Every row holds every column, and each value already has the type its
/// column is stored with, so a table written and read back compares equal.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTable {
    columns: Vec<String>,
    rows: Vec<ParameterRow>,
}

/// A row checked against a table but not yet added to it.
#[derive(Debug)]
pub(crate) struct PreparedRow {
    row: ParameterRow,
    /// Extra integer columns that must become float columns.
    widen: Vec<String>,
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl ParameterTable {
    /// Zero rows, the required columns.
    pub fn empty() -> Self {
        Self::with_columns(LIB_COLS.iter().map(|c| c.to_string()).collect())
    }

    /// Zero rows, an arbitrary column list.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build from rows; columns are the union of row fields, required ones first.
    pub fn from_rows(rows: Vec<ParameterRow>) -> Result<Self> {
        let mut table = Self::with_columns(Vec::new());
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for col in LIB_COLS {
            if rows.iter().any(|r| r.contains_field(col)) {
                table.columns.push(col.to_string());
                seen.insert(col.to_string());
            }
        }
        for row in &rows {
            for name in row.fields.keys() {
                if seen.insert(name.clone()) {
                    table.columns.push(name.clone());
                }
            }
        }
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ParameterRow] {
        &self.rows
    }

    pub fn row(&self, position: usize) -> Option<&ParameterRow> {
        self.rows.get(position)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// First required column this table lacks.
    pub fn missing_column(&self) -> Option<&'static str> {
        LIB_COLS.iter().copied().find(|c| !self.has_column(c))
    }

    /// Type of the values held in `column`; `None` while it is all `Null`.
    pub fn value_type(&self, column: &str) -> Option<ColumnType> {
        if let Some(ty) = required_column_type(column) {
            return Some(ty);
        }
        self.rows
            .iter()
            .find_map(|r| r.get(column).and_then(ColumnType::of))
    }

    /// Append a row. New columns are added with `Null` in earlier rows, and
    /// columns the row lacks are filled with `Null`.
    ///
    /// Fails with [`LibraryError::ColumnType`] when a value does not fit its
    /// column; the table is left unchanged.
    pub fn push_row(&mut self, row: ParameterRow) -> Result<()> {
        let prepared = self.prepare_row(row)?;
        self.commit_row(prepared);
        Ok(())
    }

    /// Convert `row` to the table's column types without touching the table.
    pub(crate) fn prepare_row(&self, mut row: ParameterRow) -> Result<PreparedRow> {
        let mut widen = Vec::new();
        for (name, value) in row.fields.iter_mut() {
            let ty = match required_column_type(name) {
                Some(ty) => ty,
                None => match (self.value_type(name), ColumnType::of(value)) {
                    (_, None) => continue,
                    (Some(ColumnType::Integer), Some(ColumnType::Float)) => {
                        widen.push(name.clone());
                        ColumnType::Float
                    }
                    (Some(existing), _) => existing,
                    (None, Some(ty)) => ty,
                },
            };
            let taken = std::mem::replace(value, ParamValue::Null);
            *value = ty.coerce(name, taken)?;
        }
        Ok(PreparedRow { row, widen })
    }

    pub(crate) fn commit_row(&mut self, prepared: PreparedRow) {
        let PreparedRow { mut row, widen } = prepared;
        for name in &widen {
            for existing in &mut self.rows {
                if let Some(value) = existing.fields.get_mut(name) {
                    if let ParamValue::Integer(i) = *value {
                        *value = ParamValue::Float(i as f64);
                    }
                }
            }
        }
        for name in row.fields.keys() {
            if !self.has_column(name) {
                self.columns.push(name.clone());
                for existing in &mut self.rows {
                    existing.fields.insert(name.clone(), ParamValue::Null);
                }
            }
        }
        for col in &self.columns {
            row.fields.entry(col.clone()).or_insert(ParamValue::Null);
        }
        self.rows.push(row);
    }

    /// Value of `column` at `position`; absent fields read as `Null`.
    pub fn value(&self, position: usize, column: &str) -> &ParamValue {
        static NULL: ParamValue = ParamValue::Null;
        self.rows
            .get(position)
            .and_then(|r| r.get(column))
            .unwrap_or(&NULL)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// For each column the sorted set of distinct values.
    pub fn unique_values(&self) -> BTreeMap<String, BTreeSet<ParamValue>> {
        let mut unique_values: BTreeMap<String, BTreeSet<ParamValue>> = BTreeMap::new();
        for col in &self.columns {
            let set = unique_values.entry(col.clone()).or_default();
            for pos in 0..self.rows.len() {
                set.insert(self.value(pos, col).clone());
            }
        }
        unique_values
    }
}
