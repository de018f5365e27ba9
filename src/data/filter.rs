use std::collections::{BTreeMap, BTreeSet};

use super::model::{ParamValue, ParameterTable};

// ---------------------------------------------------------------------------
// Filter predicate: which values are selected per column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of selected values.
/// Columns absent from the map are unconstrained.
pub type FilterState = BTreeMap<String, BTreeSet<ParamValue>>;

/// Initialise a [`FilterState`] with every value of every column selected.
pub fn init_filter_state(table: &ParameterTable) -> FilterState {
    table.unique_values()
}

/// Build a filter selecting a single value in one column.
pub fn select_value(column: &str, value: impl Into<ParamValue>) -> FilterState {
    let mut filters = FilterState::new();
    filters
        .entry(column.to_string())
        .or_default()
        .insert(value.into());
    filters
}

/// Return positions of rows that pass all active filters.
///
/// A row passes a column filter when:
/// * The column is not present in `filters` → passes (no constraint)
/// * The filter set for that column is empty → nothing selected → fails
/// * The row's value for that column is in the selected set → passes
///   (a missing field counts as `Null`)
pub fn filtered_indices(table: &ParameterTable, filters: &FilterState) -> Vec<usize> {
    (0..table.len())
        .filter(|&pos| {
            filters
                .iter()
                .all(|(col, selected)| selected.contains(table.value(pos, col)))
        })
        .collect()
}
