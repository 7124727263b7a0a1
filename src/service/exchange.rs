//! CSV and JSON row codecs for import and export.

use crate::db::Record;
use crate::error::{EngineError, Result};
use crate::model::ExchangeFormat;
use serde_json::Value;

pub const CSV_MEDIA_TYPE: &str = "text/csv";
pub const JSON_MEDIA_TYPE: &str = "application/json";

impl ExchangeFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExchangeFormat::Csv { .. } => "csv",
            ExchangeFormat::Json => "json",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ExchangeFormat::Csv { .. } => CSV_MEDIA_TYPE,
            ExchangeFormat::Json => JSON_MEDIA_TYPE,
        }
    }
}

pub fn read_rows(format: ExchangeFormat, payload: &[u8]) -> Result<Vec<Record>> {
    match format {
        ExchangeFormat::Csv { delimiter } => read_csv(payload, delimiter),
        ExchangeFormat::Json => read_json(payload),
    }
}

/// CSV with a header row. Empty cells become null.
pub fn read_csv(payload: &[u8], delimiter: u8) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(payload);
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row: Record = headers
            .iter()
            .zip(record.iter())
            .map(|(name, cell)| {
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (name.to_string(), value)
            })
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// A JSON array of objects, or one object per line.
pub fn read_json(payload: &[u8]) -> Result<Vec<Record>> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| EngineError::Validation(format!("import payload is not utf-8: {}", e)))?;
    let values: Vec<Value> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text)?
    } else {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    };
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row),
            other => Err(EngineError::Validation(format!(
                "import rows must be objects, got {}",
                other
            ))),
        })
        .collect()
}

/// Header is the union of row keys in first-seen order; missing members are empty cells.
pub fn write_csv(rows: &[Record], delimiter: u8) -> Result<Vec<u8>> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    if !header.is_empty() {
        writer.write_record(&header)?;
    }
    for row in rows {
        writer.write_record(header.iter().map(|key| cell(row.get(*key))))?;
    }
    writer
        .into_inner()
        .map_err(|e| EngineError::Csv(e.into_error().into()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Compact JSON array, member order as read.
pub fn write_json(rows: Vec<Record>) -> Result<Vec<u8>> {
    let values: Vec<Value> = rows.into_iter().map(Value::Object).collect();
    Ok(serde_json::to_vec(&values)?)
}
