//! Dataset file parsing: format and compression detection, CSV/TSV with
//! scalar type inference, JSON arrays, and JSON Lines.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Json,
    Jsonl,
    Parquet,
}

impl FromStr for FileFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::Jsonl),
            "parquet" => Ok(Self::Parquet),
            other => Err(IngestError::FormatDetection(format!(
                "Unknown format '{other}'; expected csv, tsv, json, jsonl, or parquet"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

/// Work out format and compression from a filename's extensions.
/// Recognized-but-unsupported codecs and formats get their own errors so
/// the message names what was detected.
pub fn detect_format_and_compression(
    path: &Path,
) -> Result<(FileFormat, Compression), IngestError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mut parts: Vec<&str> = name.split('.').collect();

    let compression = match parts.last().copied() {
        Some("gz") | Some("gzip") => {
            parts.pop();
            Compression::Gzip
        }
        Some(ext @ ("zst" | "bz2" | "xz")) => {
            return Err(IngestError::UnsupportedCompression(ext.to_string()));
        }
        _ => Compression::None,
    };

    let format = match parts.last().copied() {
        Some(ext) if parts.len() > 1 => FileFormat::from_str(ext)?,
        _ => {
            return Err(IngestError::FormatDetection(format!(
                "Cannot detect format of '{name}'; pass an explicit format"
            )))
        }
    };
    if format == FileFormat::Parquet {
        return Err(IngestError::UnsupportedFormat("parquet".to_string()));
    }
    Ok((format, compression))
}

/// Parsed dataset content.
#[derive(Debug)]
pub struct ParseResult {
    pub records: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub column_names: Vec<String>,
    pub format: FileFormat,
    pub compression: Compression,
}

/// Interpret a CSV field as the narrowest scalar that fits.
fn infer_value(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    Value::String(raw.to_string())
}

fn open_reader(path: &Path, compression: Compression) -> Result<Box<dyn Read>, IngestError> {
    let file =
        File::open(path).map_err(|_| IngestError::SourceMissing(path.to_path_buf()))?;
    Ok(match compression {
        Compression::None => Box::new(file),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
    })
}

fn parse_delimited(
    reader: Box<dyn Read>,
    delimiter: u8,
) -> Result<(Vec<Map<String, Value>>, Vec<String>), IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(false)
        .from_reader(reader);
    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(str::to_string)
        .collect();
    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let mut record = Map::new();
        for (header, field) in headers.iter().zip(row.iter()) {
            record.insert(header.clone(), infer_value(field));
        }
        records.push(record);
    }
    Ok((records, headers))
}

const JSON_WRAPPER_KEYS: &[&str] = &["data", "records", "results", "rows", "items"];

fn record_array(value: Value) -> Result<Vec<Value>, IngestError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in JSON_WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return Ok(items);
                }
            }
            Err(IngestError::Parse(
                "JSON document is neither an array nor an object wrapping one".to_string(),
            ))
        }
        _ => Err(IngestError::Parse(
            "JSON document is neither an array nor an object wrapping one".to_string(),
        )),
    }
}

fn as_record(value: Value, row: usize) -> Result<Map<String, Value>, IngestError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(IngestError::Parse(format!(
            "Row {row} is not an object: {other}"
        ))),
    }
}

fn column_union(records: &[Map<String, Value>]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    names
}

/// Parse a dataset file into records. Format and compression come from the
/// filename unless `format` overrides detection (compression is still
/// detected from the extension).
pub fn parse_file(path: &Path, format: Option<FileFormat>) -> Result<ParseResult, IngestError> {
    let (detected_format, compression) = match detect_format_and_compression(path) {
        Ok(pair) => pair,
        Err(err) => match format {
            // An explicit format forgives a detection failure, but not an
            // unsupported-codec finding.
            Some(f) if matches!(err, IngestError::FormatDetection(_)) => (f, Compression::None),
            _ => return Err(err),
        },
    };
    let format = format.unwrap_or(detected_format);
    if format == FileFormat::Parquet {
        return Err(IngestError::UnsupportedFormat("parquet".to_string()));
    }
    debug!("Parsing {} as {:?}/{:?}", path.display(), format, compression);

    let reader = open_reader(path, compression)?;
    let (records, column_names) = match format {
        FileFormat::Csv => parse_delimited(reader, b',')?,
        FileFormat::Tsv => parse_delimited(reader, b'\t')?,
        FileFormat::Json => {
            let value: Value = serde_json::from_reader(reader)?;
            let items = record_array(value)?;
            let records = items
                .into_iter()
                .enumerate()
                .map(|(i, v)| as_record(v, i + 1))
                .collect::<Result<Vec<_>, _>>()?;
            let columns = column_union(&records);
            (records, columns)
        }
        FileFormat::Jsonl => {
            let buffered = BufReader::new(reader);
            let mut records = Vec::new();
            for (i, line) in buffered.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(&line)?;
                records.push(as_record(value, i + 1)?);
            }
            let columns = column_union(&records);
            (records, columns)
        }
        FileFormat::Parquet => unreachable!("rejected above"),
    };

    Ok(ParseResult {
        row_count: records.len(),
        records,
        column_names,
        format,
        compression,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;

    #[test]
    fn detection_covers_extensions_and_codecs() {
        let detect = |name: &str| detect_format_and_compression(Path::new(name));
        assert_eq!(
            detect("people.csv").expect("detect"),
            (FileFormat::Csv, Compression::None)
        );
        assert_eq!(
            detect("people.tsv.gz").expect("detect"),
            (FileFormat::Tsv, Compression::Gzip)
        );
        assert!(matches!(
            detect("people.csv.zst"),
            Err(IngestError::UnsupportedCompression(ext)) if ext == "zst"
        ));
        assert!(matches!(
            detect("people.parquet"),
            Err(IngestError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            detect("people"),
            Err(IngestError::FormatDetection(_))
        ));
    }

    #[test]
    fn csv_values_are_type_inferred() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.csv");
        fs::write(&path, "name,age,score,active,note\nada,36,9.5,true,\n").expect("write");
        let result = parse_file(&path, None).expect("parse");
        assert_eq!(result.row_count, 1);
        assert_eq!(result.column_names, vec!["name", "age", "score", "active", "note"]);
        let rec = &result.records[0];
        assert_eq!(rec["name"], Value::String("ada".into()));
        assert_eq!(rec["age"], Value::Number(36.into()));
        assert_eq!(rec["active"], Value::Bool(true));
        assert_eq!(rec["note"], Value::Null);
        assert!(rec["score"].is_f64());
    }

    #[test]
    fn gzipped_csv_is_transparently_decoded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.csv.gz");
        let file = File::create(&path).expect("create");
        let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(b"id\n1\n2\n").expect("write");
        encoder.finish().expect("finish");

        let result = parse_file(&path, None).expect("parse");
        assert_eq!(result.row_count, 2);
        assert_eq!(result.compression, Compression::Gzip);
    }

    #[test]
    fn json_wrapper_object_is_unwrapped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.json");
        fs::write(&path, r#"{"data": [{"id": 1}, {"id": 2, "name": "ada"}]}"#).expect("write");
        let result = parse_file(&path, None).expect("parse");
        assert_eq!(result.row_count, 2);
        assert_eq!(result.column_names, vec!["id", "name"]);
    }

    #[test]
    fn jsonl_skips_blank_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("people.jsonl");
        fs::write(&path, "{\"id\": 1}\n\n{\"id\": 2}\n").expect("write");
        let result = parse_file(&path, None).expect("parse");
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn explicit_format_overrides_failed_detection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("datafile");
        fs::write(&path, "id\n7\n").expect("write");
        let result = parse_file(&path, Some(FileFormat::Csv)).expect("parse");
        assert_eq!(result.row_count, 1);
    }
}
