use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result, bail};
use log::debug;

use crate::{
    data::{FieldType, Record, Value, parse_typed_value},
    error::LoadError,
    model::FieldMapping,
};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Json,
    Delimited(u8),
}

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_input_format(path: &Path) -> InputFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => InputFormat::Delimited(DEFAULT_CSV_DELIMITER),
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => InputFormat::Delimited(DEFAULT_TSV_DELIMITER),
        _ => InputFormat::Json,
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(Box::new(BufReader::new(file)))
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let reader = open_input(path)?;
    let records = match resolve_input_format(path) {
        InputFormat::Json => read_json_records(reader)
            .with_context(|| format!("Reading JSON records from {path:?}"))?,
        InputFormat::Delimited(delimiter) => read_delimited_records(reader, delimiter)
            .with_context(|| format!("Reading delimited records from {path:?}"))?,
    };
    debug!("Read {} record(s) from {path:?}", records.len());
    Ok(records)
}

pub fn read_json_records<R: Read>(reader: R) -> Result<Vec<Record>> {
    let parsed: serde_json::Value = serde_json::from_reader(reader)?;
    let serde_json::Value::Array(items) = parsed else {
        bail!("Expected a JSON array of objects");
    };
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            serde_json::Value::Object(fields) => Ok(fields
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect()),
            other => bail!("Record {} is not an object: {other}", idx + 1),
        })
        .collect()
}

pub fn read_delimited_records<R: Read>(reader: R, delimiter: u8) -> Result<Vec<Record>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    csv_reader
        .records()
        .enumerate()
        .map(|(idx, row)| {
            let row = row.with_context(|| format!("Reading row {}", idx + 2))?;
            Ok(headers
                .iter()
                .zip(row.iter())
                .map(|(name, cell)| (name.to_string(), Value::from(cell)))
                .collect())
        })
        .collect()
}

/// Parses textual source values according to each mapping's source type.
pub fn apply_source_types(records: &mut [Record], mappings: &[FieldMapping]) -> Result<(), LoadError> {
    let typed: Vec<(&str, FieldType)> = mappings
        .iter()
        .filter(|m| m.source_type != FieldType::Any)
        .map(|m| (m.source_field.as_str(), m.source_type))
        .collect();
    for record in records.iter_mut() {
        for (field, ty) in &typed {
            if let Some(Value::String(raw)) = record.get(*field) {
                let value = parse_typed_value(raw, *ty)?;
                record.insert(field.to_string(), value);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn json_records_keep_scalar_types() {
        let input = r#"[{"id": 1, "price": 2.5, "name": "pen", "note": null}]"#;
        let records = read_json_records(input.as_bytes()).unwrap();
        assert_eq!(records[0]["id"], Value::Integer(1));
        assert_eq!(records[0]["price"], Value::Decimal(Decimal::new(25, 1)));
        assert_eq!(records[0]["note"], Value::Null);
    }

    #[test]
    fn non_array_json_is_rejected() {
        assert!(read_json_records(r#"{"id": 1}"#.as_bytes()).is_err());
    }

    #[test]
    fn csv_cells_are_typed_by_mapping() {
        let input = "id,qty,shipped\n7,3,\n";
        let mut records = read_delimited_records(input.as_bytes(), b',').unwrap();
        let mappings = vec![
            FieldMapping::new("id", "id").typed(FieldType::Integer, FieldType::Integer),
            FieldMapping::new("shipped", "shipped").typed(FieldType::Date, FieldType::Date),
        ];
        apply_source_types(&mut records, &mappings).unwrap();
        assert_eq!(records[0]["id"], Value::Integer(7));
        assert_eq!(records[0]["qty"], Value::from("3"));
        assert_eq!(records[0]["shipped"], Value::Null);
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            resolve_input_format(Path::new("rows.TSV")),
            InputFormat::Delimited(b'\t')
        );
        assert_eq!(resolve_input_format(Path::new("rows.json")), InputFormat::Json);
    }
}
