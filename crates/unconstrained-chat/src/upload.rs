//! Uploaded files: type detection and tabular-to-JSON normalization.

use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// Errors from reading or converting an uploaded file
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported file type: {0}")]
    Unsupported(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("No header row found in {0}")]
    MissingHeader(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spreadsheet flavours that normalize to JSON records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Excel,
}

/// How an upload is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Tabular(TabularFormat),
    Pdf,
    Image,
}

impl FileKind {
    /// Classify by declared MIME type, falling back to the extension
    pub fn detect(file_name: &str, declared_mime: Option<&str>) -> Option<FileKind> {
        let by_mime = declared_mime.and_then(|mime| match mime {
            "text/csv" => Some(FileKind::Tabular(TabularFormat::Csv)),
            "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(FileKind::Tabular(TabularFormat::Excel))
            }
            "application/pdf" => Some(FileKind::Pdf),
            "image/png" | "image/jpeg" => Some(FileKind::Image),
            _ => None,
        });

        by_mime.or_else(|| {
            let ext = Path::new(file_name)
                .extension()
                .and_then(|e| e.to_str())?
                .to_ascii_lowercase();
            match ext.as_str() {
                "csv" => Some(FileKind::Tabular(TabularFormat::Csv)),
                "xls" | "xlsx" => Some(FileKind::Tabular(TabularFormat::Excel)),
                "pdf" => Some(FileKind::Pdf),
                "png" | "jpg" | "jpeg" => Some(FileKind::Image),
                _ => None,
            }
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Tabular(TabularFormat::Csv) => "CSV",
            FileKind::Tabular(TabularFormat::Excel) => "spreadsheet",
            FileKind::Pdf => "PDF",
            FileKind::Image => "image",
        }
    }
}

/// Raw bytes of a user-provided file
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            bytes,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a file from disk
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(name, bytes))
    }

    /// Classify this upload
    pub fn kind(&self) -> Result<FileKind, UploadError> {
        FileKind::detect(&self.name, self.mime_type.as_deref())
            .ok_or_else(|| UploadError::Unsupported(self.name.clone()))
    }

    /// MIME type to send when storing the raw bytes
    pub fn effective_mime_type(&self) -> String {
        if let Some(ref mime) = self.mime_type {
            return mime.clone();
        }
        match self.kind() {
            Ok(FileKind::Tabular(TabularFormat::Csv)) => "text/csv",
            Ok(FileKind::Tabular(TabularFormat::Excel)) => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            Ok(FileKind::Pdf) => "application/pdf",
            Ok(FileKind::Image) if self.name.to_ascii_lowercase().ends_with(".png") => "image/png",
            Ok(FileKind::Image) => "image/jpeg",
            Err(_) => "application/octet-stream",
        }
        .to_string()
    }

    /// Name for the converted JSON copy (`sales.csv` -> `sales.json`)
    pub fn json_name(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_string());
        format!("{}.json", stem)
    }
}

/// A table converted to row-oriented JSON
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: usize,
    /// Pretty-printed JSON array, one object per row
    pub json: String,
}

/// Convert tabular bytes to an array of `{column: value}` records
pub fn normalize_tabular(
    name: &str,
    bytes: &[u8],
    format: TabularFormat,
) -> Result<NormalizedTable, UploadError> {
    let (columns, records) = match format {
        TabularFormat::Csv => read_csv(name, bytes)?,
        TabularFormat::Excel => read_excel(name, bytes)?,
    };

    let rows = records.len();
    let json = to_pretty_json(&records)?;
    tracing::debug!("Normalized {} ({} rows x {} columns)", name, rows, columns.len());

    Ok(NormalizedTable {
        columns,
        rows,
        json,
    })
}

type Records = (Vec<String>, Vec<Map<String, Value>>);

fn read_csv(name: &str, bytes: &[u8]) -> Result<Records, UploadError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(UploadError::MissingHeader(name.to_string()));
    }
    let columns = unique_columns(headers.iter().map(str::to_string));

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = columns
            .iter()
            .zip(record.iter())
            .map(|(column, raw)| (column.clone(), infer_value(raw)))
            .collect();
        records.push(row);
    }

    Ok((columns, records))
}

fn read_excel(name: &str, bytes: &[u8]) -> Result<Records, UploadError> {
    use calamine::{Data, Reader, open_workbook_auto_from_rs};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| UploadError::Spreadsheet(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| UploadError::Spreadsheet(format!("{} has no worksheets", name)))?
        .map_err(|e| UploadError::Spreadsheet(e.to_string()))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| UploadError::MissingHeader(name.to_string()))?;
    let columns = unique_columns(header.iter().map(|cell| cell.to_string()));

    let records = rows
        .map(|row| {
            columns
                .iter()
                .zip(row.iter())
                .map(|(column, cell)| {
                    let value = match cell {
                        Data::Empty => Value::Null,
                        Data::Int(i) => Value::from(*i),
                        Data::Float(f) => spreadsheet_number(*f),
                        Data::Bool(b) => Value::Bool(*b),
                        Data::String(s) => Value::String(s.clone()),
                        other => Value::String(other.to_string()),
                    };
                    (column.clone(), value)
                })
                .collect()
        })
        .collect();

    Ok((columns, records))
}

/// Rename repeated headers `a, a, a` to `a, a.1, a.2` so no column is lost
fn unique_columns(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while columns.contains(&candidate) {
            candidate = format!("{}.{}", name, n);
            n += 1;
        }
        columns.push(candidate);
    }
    columns
}

/// Type a CSV cell: integers, floats and booleans become JSON scalars,
/// blanks become null, everything else stays text.
fn infer_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return float_value(f);
        }
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(raw.to_string())
}

/// Spreadsheets store every number as a float; whole ones go out as integers
fn spreadsheet_number(f: f64) -> Value {
    // Largest magnitude below which every whole f64 is exact
    const EXACT: f64 = 9_007_199_254_740_992.0;
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= EXACT {
        Value::from(f as i64)
    } else {
        float_value(f)
    }
}

fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn to_pretty_json(records: &[Map<String, Value>]) -> Result<String, UploadError> {
    use serde::Serialize;

    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    records.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALES_CSV: &str = "region,units,price,active\nNorth,12,3.5,true\nSouth,7,4.25,false\nWest,,2,TRUE\n";

    #[test]
    fn test_detect_by_mime_then_extension() {
        assert_eq!(
            FileKind::detect("data.bin", Some("text/csv")),
            Some(FileKind::Tabular(TabularFormat::Csv))
        );
        assert_eq!(
            FileKind::detect("Report.XLSX", None),
            Some(FileKind::Tabular(TabularFormat::Excel))
        );
        assert_eq!(FileKind::detect("scan.pdf", Some("application/x-unknown")), Some(FileKind::Pdf));
        assert_eq!(FileKind::detect("photo.jpeg", None), Some(FileKind::Image));
        assert_eq!(FileKind::detect("notes.txt", None), None);
        assert_eq!(FileKind::detect("noextension", None), None);
    }

    #[test]
    fn test_csv_rows_become_records() {
        let table = normalize_tabular("sales.csv", SALES_CSV.as_bytes(), TabularFormat::Csv).unwrap();
        assert_eq!(table.rows, 3);
        assert_eq!(table.columns, vec!["region", "units", "price", "active"]);

        let parsed: Vec<Map<String, Value>> = serde_json::from_str(&table.json).unwrap();
        assert_eq!(parsed.len(), 3);
        for row in &parsed {
            assert_eq!(row.len(), 4);
            for column in &table.columns {
                assert!(row.contains_key(column));
            }
        }
        assert_eq!(parsed[0]["region"], "North");
        assert_eq!(parsed[0]["units"], 12);
        assert_eq!(parsed[0]["price"], 3.5);
        assert_eq!(parsed[0]["active"], true);
        assert_eq!(parsed[1]["active"], false);
        assert_eq!(parsed[2]["units"], Value::Null);
        assert_eq!(parsed[2]["active"], true);
    }

    #[test]
    fn test_json_reproduces_cell_values() {
        let csv_text = "name,score\nAda,91\nGrace,88.5\n";
        let table = normalize_tabular("scores.csv", csv_text.as_bytes(), TabularFormat::Csv).unwrap();
        let parsed: Vec<Map<String, Value>> = serde_json::from_str(&table.json).unwrap();

        let mut reader = csv::Reader::from_reader(csv_text.as_bytes());
        for (record, row) in reader.records().zip(parsed.iter()) {
            let record = record.unwrap();
            for (column, raw) in table.columns.iter().zip(record.iter()) {
                let rendered = match &row[column] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                assert_eq!(rendered, raw);
            }
        }
    }

    #[test]
    fn test_pretty_json_uses_four_space_indent() {
        let table = normalize_tabular("t.csv", b"a\n1\n", TabularFormat::Csv).unwrap();
        assert_eq!(table.json, "[\n    {\n        \"a\": 1\n    }\n]");
    }

    #[test]
    fn test_column_order_is_preserved() {
        let table = normalize_tabular("t.csv", b"zeta,alpha\n1,2\n", TabularFormat::Csv).unwrap();
        let zeta = table.json.find("zeta").unwrap();
        let alpha = table.json.find("alpha").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_duplicate_headers_are_renamed() {
        let table = normalize_tabular("t.csv", b"a,a,b,a\n1,2,3,4\n", TabularFormat::Csv).unwrap();
        assert_eq!(table.columns, vec!["a", "a.1", "b", "a.2"]);
    }

    #[test]
    fn test_header_only_csv_has_no_rows() {
        let table = normalize_tabular("t.csv", b"a,b\n", TabularFormat::Csv).unwrap();
        assert_eq!(table.rows, 0);
        assert_eq!(table.json, "[]");
    }

    #[test]
    fn test_ragged_csv_is_an_error() {
        let err = normalize_tabular("t.csv", b"a,b\n1,2,3\n", TabularFormat::Csv).unwrap_err();
        assert!(matches!(err, UploadError::Csv(_)));
    }

    #[test]
    fn test_empty_csv_is_missing_header() {
        let err = normalize_tabular("empty.csv", b"", TabularFormat::Csv).unwrap_err();
        assert!(matches!(err, UploadError::MissingHeader(_)));
    }

    #[test]
    fn test_excel_whole_numbers_are_integers() {
        let bytes = include_bytes!("../testdata/units.xlsx");
        let table = normalize_tabular("units.xlsx", bytes, TabularFormat::Excel).unwrap();
        assert_eq!(table.rows, 2);
        assert_eq!(table.columns, vec!["name", "units", "price"]);

        let parsed: Vec<Map<String, Value>> = serde_json::from_str(&table.json).unwrap();
        assert_eq!(parsed.len(), 2);
        for row in &parsed {
            assert_eq!(row.keys().collect::<Vec<_>>(), vec!["name", "units", "price"]);
        }
        assert_eq!(parsed[0]["name"], "ada");
        assert!(parsed[0]["units"].is_i64());
        assert_eq!(parsed[0]["units"], 3);
        assert_eq!(parsed[0]["price"], 4.5);
        assert_eq!(parsed[1]["units"], 12);
        assert_eq!(parsed[1]["price"], Value::Null);
        assert!(table.json.contains("\"units\": 3,"));
    }

    #[test]
    fn test_spreadsheet_number() {
        assert_eq!(spreadsheet_number(3.0), Value::from(3));
        assert_eq!(spreadsheet_number(-40.0), Value::from(-40));
        assert_eq!(spreadsheet_number(4.5), Value::from(4.5));
        assert_eq!(spreadsheet_number(1e300), Value::from(1e300));
        assert_eq!(spreadsheet_number(f64::NAN), Value::Null);
    }

    #[test]
    fn test_garbage_spreadsheet_is_an_error() {
        let err = normalize_tabular("bad.xlsx", b"not a workbook", TabularFormat::Excel).unwrap_err();
        assert!(matches!(err, UploadError::Spreadsheet(_)));
    }

    #[test]
    fn test_file_names_and_mime() {
        let file = UploadedFile::new("sales.csv", vec![]);
        assert_eq!(file.json_name(), "sales.json");
        assert_eq!(file.effective_mime_type(), "text/csv");

        let png = UploadedFile::new("chart.PNG", vec![]);
        assert_eq!(png.effective_mime_type(), "image/png");

        let declared = UploadedFile::new("x", vec![]).with_mime_type("application/pdf");
        assert_eq!(declared.kind().unwrap(), FileKind::Pdf);

        let unknown = UploadedFile::new("notes.txt", vec![]);
        assert!(matches!(unknown.kind(), Err(UploadError::Unsupported(_))));
    }
}
