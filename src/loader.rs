use crate::error::{Error, Result};
use calamine::{Data, Reader, Xlsx};
use serde_json::Value;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

/// Cell texts read as missing values, as spreadsheet exports commonly write them
const NA_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-NaN", "-nan", "<NA>", "N/A", "NA", "NULL", "NaN", "None",
    "n/a", "nan", "null",
];

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    /// Comma-separated values with a header row
    Csv,
    /// Office Open XML workbook, first worksheet only
    Xlsx,
}

impl TableFormat {
    /// Detect the format from a file name
    ///
    /// The extension is compared case-insensitively against the allowlist
    /// (`.csv`, `.xlsx`).
    ///
    /// # Arguments
    /// * `filename` - Original name of the uploaded file
    ///
    /// # Returns
    /// * `Result<TableFormat>` - The detected format, or `UnsupportedFormat`
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(TableFormat::Csv),
            Some("xlsx") => Ok(TableFormat::Xlsx),
            Some(ext) => Err(Error::UnsupportedFormat(format!(
                "unsupported file extension: .{}",
                ext
            ))),
            None => Err(Error::UnsupportedFormat("file has no extension".to_string())),
        }
    }
}

/// A column-tagged table decoded from an upload
///
/// Headers are trimmed and unique; every row has exactly one cell per header.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, normalizing headers and padding short rows with `null`.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let headers = normalize_headers(headers);
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Value::Null);
                row
            })
            .collect();
        Table { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }
}

/// Decode raw upload bytes into a [`Table`]
///
/// # Arguments
/// * `format` - Format detected from the file name
/// * `bytes` - Raw file content
///
/// # Returns
/// * `Result<Table>` - The decoded table
///
/// # Errors
/// * `CorruptInput` if the bytes cannot be parsed in the given format
/// * `EmptyInput` if there is no header row to read
pub fn load_table(format: TableFormat, bytes: &[u8]) -> Result<Table> {
    match format {
        TableFormat::Csv => from_csv(bytes),
        TableFormat::Xlsx => from_excel(bytes),
    }
}

/// Load a table from CSV bytes
///
/// The first record is the header row. Blank lines are skipped, short records
/// are padded with `null`, and a record with more fields than the header is
/// rejected as corrupt.
pub fn from_csv(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::CorruptInput(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.is_empty() {
        return Err(Error::EmptyInput);
    }

    let mut records = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::CorruptInput(e.to_string()))?;
        if record.len() > headers.len() {
            return Err(Error::CorruptInput(format!(
                "expected {} fields in data row {}, saw {}",
                headers.len(),
                line + 1,
                record.len()
            )));
        }
        records.push(record);
    }

    let kinds: Vec<ColumnKind> = (0..headers.len())
        .map(|col| ColumnKind::infer(records.iter().filter_map(|record| record.get(col))))
        .collect();
    let rows = records
        .iter()
        .map(|record| {
            record
                .iter()
                .zip(&kinds)
                .map(|(raw, kind)| kind.parse(raw))
                .collect()
        })
        .collect();

    Ok(Table::new(headers, rows))
}

/// Load a table from the first worksheet of an XLSX workbook
///
/// Rows with no value in any cell are skipped.
pub fn from_excel(bytes: &[u8]) -> Result<Table> {
    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| Error::CorruptInput(e.to_string()))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range.map_err(|e| Error::CorruptInput(e.to_string()))?,
        None => return Err(Error::EmptyInput),
    };

    let mut sheet_rows = range.rows();
    let headers: Vec<String> = match sheet_rows.next() {
        Some(row) => row.iter().map(header_text).collect(),
        None => return Err(Error::EmptyInput),
    };

    let rows = sheet_rows
        .map(|row| row.iter().map(excel_cell).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.is_null()))
        .collect();

    Ok(Table::new(headers, rows))
}

// Trim header names and suffix duplicates with `.N` so each stays addressable
fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let mut used = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());

    for name in raw {
        let base = name.trim().to_string();
        let mut candidate = base.clone();
        let mut n = 1;
        while !used.insert(candidate.clone()) {
            candidate = format!("{}.{}", base, n);
            n += 1;
        }
        headers.push(candidate);
    }

    headers
}

fn is_missing(raw: &str) -> bool {
    NA_TOKENS.contains(&raw.trim())
}

/// Type shared by every present cell of a CSV column
///
/// A column is numeric only when all of its non-missing cells are, so text
/// columns such as labels keep each cell exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    fn infer<'a>(cells: impl Iterator<Item = &'a str>) -> Self {
        let mut kind = None;
        for raw in cells.filter(|raw| !is_missing(raw)) {
            let raw = raw.trim();
            let cell = if raw.parse::<i64>().is_ok() {
                ColumnKind::Integer
            } else if raw.parse::<f64>().is_ok_and(f64::is_finite) {
                ColumnKind::Float
            } else {
                return ColumnKind::Text;
            };
            kind = match (kind, cell) {
                (Some(ColumnKind::Float), _) | (_, ColumnKind::Float) => Some(ColumnKind::Float),
                _ => Some(ColumnKind::Integer),
            };
        }
        kind.unwrap_or(ColumnKind::Text)
    }

    fn parse(self, raw: &str) -> Value {
        if is_missing(raw) {
            return Value::Null;
        }
        let parsed = match self {
            ColumnKind::Integer => raw.trim().parse::<i64>().ok().map(Value::from),
            ColumnKind::Float => raw.trim().parse::<f64>().ok().map(Value::from),
            ColumnKind::Text => None,
        };
        parsed.unwrap_or_else(|| Value::String(raw.to_string()))
    }
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn excel_cell(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::from(*i),
        Data::Float(f) if f.is_finite() => Value::from(*f),
        Data::Float(_) => Value::Null,
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if is_missing(s) => Value::Null,
        Data::String(s) => Value::String(s.clone()),
        Data::Error(_) => Value::Null,
        other => Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn format_detection_is_case_insensitive() {
        assert_eq!(TableFormat::from_filename("a.csv").unwrap(), TableFormat::Csv);
        assert_eq!(TableFormat::from_filename("B.XLSX").unwrap(), TableFormat::Xlsx);
        assert!(matches!(
            TableFormat::from_filename("notes.txt"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(
            TableFormat::from_filename("README"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(
            TableFormat::from_filename("old.xls"),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn csv_headers_are_trimmed_and_cells_typed() {
        let table =
            from_csv(b" Equipment Name ,Type , Flowrate\nPump-1,Pump,12.5\nValve,, 7\n").unwrap();
        assert_eq!(table.headers(), ["Equipment Name", "Type", "Flowrate"]);
        assert_eq!(table.rows()[0], vec![json!("Pump-1"), json!("Pump"), json!(12.5)]);
        assert_eq!(table.rows()[1], vec![json!("Valve"), Value::Null, json!(7.0)]);
    }

    #[test]
    fn csv_text_columns_keep_cells_verbatim() {
        let table = from_csv(b"Name,Type,Count\n007,1.50,1\nP-2,Pump,2\nP-3,01,3\n").unwrap();
        let column = |idx: usize| -> Vec<Value> {
            table.rows().iter().map(|row| row[idx].clone()).collect()
        };
        assert_eq!(column(0), [json!("007"), json!("P-2"), json!("P-3")]);
        assert_eq!(column(1), [json!("1.50"), json!("Pump"), json!("01")]);
        assert_eq!(column(2), [json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn csv_short_rows_are_padded() {
        let table = from_csv(b"a,b,c\n1,2\n").unwrap();
        assert_eq!(table.rows()[0], vec![json!(1), json!(2), Value::Null]);
    }

    #[test]
    fn csv_long_rows_are_corrupt() {
        let err = from_csv(b"a,b\n1,2,3\n").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
    }

    #[test]
    fn csv_without_header_is_empty() {
        assert!(matches!(from_csv(b"").unwrap_err(), Error::EmptyInput));
    }

    #[test]
    fn csv_invalid_utf8_is_corrupt() {
        let err = from_csv(b"a,b\n\xff\xfe,1\n").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
    }

    #[test]
    fn duplicate_headers_get_suffixes() {
        let table = Table::new(
            vec!["Type".into(), " Type ".into(), "Type".into()],
            vec![],
        );
        assert_eq!(table.headers(), ["Type", "Type.1", "Type.2"]);
    }

    #[test]
    fn na_tokens_become_null() {
        assert_eq!(ColumnKind::Float.parse("NaN"), Value::Null);
        assert_eq!(ColumnKind::Text.parse(" n/a "), Value::Null);
        assert_eq!(ColumnKind::infer(["1", "NA", "2.5"].into_iter()), ColumnKind::Float);
        assert_eq!(ColumnKind::infer(["1", "inf"].into_iter()), ColumnKind::Text);
        assert_eq!(ColumnKind::infer(["", "NA"].into_iter()), ColumnKind::Text);
    }

    #[test]
    fn garbage_xlsx_is_corrupt() {
        let err = from_excel(b"definitely not a zip archive").unwrap_err();
        assert!(matches!(err, Error::CorruptInput(_)));
    }
}
