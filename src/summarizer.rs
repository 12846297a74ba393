//! Summary statistics over an uploaded equipment table.

use crate::dataset::{Averages, PREVIEW_ROWS, PreviewRow, Summary};
use crate::error::{Error, Result};
use crate::loader::Table;
use indexmap::IndexMap;
use serde_json::Value;

/// Columns every upload must carry, in reporting order
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "Equipment Name",
    "Type",
    "Flowrate",
    "Pressure",
    "Temperature",
];

/// Columns coerced to floating point; a row missing any of them is dropped
pub const NUMERIC_COLUMNS: [&str; 3] = ["Flowrate", "Pressure", "Temperature"];

/// Compute the summary of a decoded table
///
/// # Arguments
/// * `table` - Table with trimmed headers, as produced by the loader
///
/// # Returns
/// * `Result<Summary>` - Row count, averages, type distribution and preview
///
/// # Errors
/// * `Validation` listing every required column absent from the headers
/// * `EmptyInput` if the table has no data rows
///
/// # Notes
/// * Averages are 0.0 when no row survives numeric coercion
/// * Type labels are grouped verbatim, without case or whitespace folding
pub fn summarize(table: &Table) -> Result<Summary> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| table.column_index(column).is_none())
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(Error::Validation { missing });
    }

    if table.rows().is_empty() {
        return Err(Error::EmptyInput);
    }

    let numeric_idx =
        NUMERIC_COLUMNS.map(|column| table.column_index(column).unwrap_or_default());
    let type_idx = table.column_index("Type").unwrap_or_default();

    // Rows surviving coercion, with their coerced numeric values
    let survivors: Vec<(&Vec<Value>, [f64; 3])> = table
        .rows()
        .iter()
        .filter_map(|row| {
            let mut values = [0.0; 3];
            for (slot, idx) in values.iter_mut().zip(numeric_idx) {
                *slot = coerce_numeric(&row[idx])?;
            }
            Some((row, values))
        })
        .collect();

    let total = survivors.len();
    let values_at = |pos: usize| survivors.iter().map(move |(_, values)| values[pos]);

    let mut type_distribution: IndexMap<String, u64> = IndexMap::new();
    for (row, _) in &survivors {
        if let Some(label) = category_label(&row[type_idx]) {
            *type_distribution.entry(label).or_insert(0) += 1;
        }
    }

    let data_preview = survivors
        .iter()
        .take(PREVIEW_ROWS)
        .map(|(row, values)| preview_row(table.headers(), row, &numeric_idx, values))
        .collect();

    Ok(Summary {
        total_records: total as u64,
        averages: Averages {
            flowrate: finite_mean(values_at(0), total),
            pressure: finite_mean(values_at(1), total),
            temperature: finite_mean(values_at(2), total),
        },
        type_distribution,
        data_preview,
    })
}

/// Coerce a cell to a finite float, or `None` when it cannot be read as one.
pub fn coerce_numeric(cell: &Value) -> Option<f64> {
    let value = match cell {
        Value::Number(n) => n.as_f64()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Mean of `count` finite values; 0.0 when there are none
///
/// A plain sum can overflow for values near `f64::MAX`; the mean is then
/// recomputed from pre-divided terms, which always stays finite.
fn finite_mean<I>(values: I, count: usize) -> f64
where
    I: Iterator<Item = f64> + Clone,
{
    if count == 0 {
        return 0.0;
    }
    let n = count as f64;
    let sum: f64 = values.clone().sum();
    if sum.is_finite() {
        sum / n
    } else {
        values.map(|value| value / n).sum()
    }
}

fn category_label(cell: &Value) -> Option<String> {
    match cell {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

// Numeric columns carry their coerced value; everything else is copied as read
fn preview_row(
    headers: &[String],
    row: &[Value],
    numeric_idx: &[usize; 3],
    values: &[f64; 3],
) -> PreviewRow {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let cell = match numeric_idx.iter().position(|&n| n == idx) {
                Some(pos) => Value::from(values[pos]),
                None => row[idx].clone(),
            };
            (header.clone(), cell)
        })
        .collect()
}
