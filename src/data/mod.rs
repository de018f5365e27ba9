/// Parameter layer: row/table types, table I/O, and queries.
///
/// Architecture:
/// ```text
///  .parquet / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file ↔ ParameterTable
///   └──────────┘
///        │
///        ▼
///   ┌────────────────┐
///   │ ParameterTable │  ordered rows, named columns (LIB_COLS required)
///   └────────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  apply value predicates → library indices
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
