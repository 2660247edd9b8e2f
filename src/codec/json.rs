//! JSON codec
//!
//! Exports are a single object: a `meta` header followed by one array per
//! data type, written record by record. Imports accept that shape, a bare
//! array of objects, a single object, or newline-delimited objects.

use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};

use super::{raw_from_value, RecordEncoder};
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{DataType, ExchangeFormat, RawRecord, Record, RecordError};

/// Version of the export document layout
pub const SCHEMA_VERSION: u32 = 1;

/// Streaming JSON writer
pub struct JsonEncoder<W: Write> {
    writer: W,
    section: Option<DataType>,
    first_in_section: bool,
}

impl<W: Write> JsonEncoder<W> {
    pub fn new(mut writer: W, data_types: &[DataType]) -> ExchangeResult<Self> {
        let meta = json!({
            "schema_version": SCHEMA_VERSION,
            "exported_at": Utc::now().to_rfc3339(),
            "app_version": env!("CARGO_PKG_VERSION"),
            "data_types": data_types,
        });
        writer.write_all(b"{\n\"meta\": ")?;
        serde_json::to_writer(&mut writer, &meta)?;
        Ok(Self {
            writer,
            section: None,
            first_in_section: true,
        })
    }

    fn close_section(&mut self) -> ExchangeResult<()> {
        if self.section.take().is_some() {
            if self.first_in_section {
                self.writer.write_all(b"]")?;
            } else {
                self.writer.write_all(b"\n]")?;
            }
        }
        Ok(())
    }
}

impl<W: Write + Send> RecordEncoder<W> for JsonEncoder<W> {
    fn begin_section(&mut self, data_type: DataType) -> ExchangeResult<()> {
        self.close_section()?;
        write!(self.writer, ",\n\"{}\": [", data_type)?;
        self.section = Some(data_type);
        self.first_in_section = true;
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> ExchangeResult<()> {
        if self.section != Some(record.data_type()) {
            return Err(ExchangeError::Codec(format!(
                "{} record written outside its section",
                record.data_type()
            )));
        }
        if !self.first_in_section {
            self.writer.write_all(b",")?;
        }
        self.writer.write_all(b"\n  ")?;
        serde_json::to_writer(&mut self.writer, &Value::Object(record.to_json_object()))?;
        self.first_in_section = false;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> ExchangeResult<W> {
        self.close_section()?;
        self.writer.write_all(b"\n}\n")?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

enum Source {
    Elements(std::vec::IntoIter<Value>),
    Lines { bytes: Vec<u8>, pos: usize },
}

/// JSON reader yielding one raw record per object
pub struct JsonDecoder {
    source: Source,
    index: usize,
}

impl JsonDecoder {
    pub fn new(bytes: Vec<u8>, data_type: DataType) -> ExchangeResult<Self> {
        let body = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(&bytes);
        let first = body.iter().find(|b| !b.is_ascii_whitespace()).copied();

        let source = match first {
            None => return Err(structural("empty document")),
            Some(b'[') => match serde_json::from_slice::<Value>(body) {
                Ok(Value::Array(items)) => Source::Elements(items.into_iter()),
                Ok(_) => return Err(structural("expected a JSON array")),
                Err(e) => return Err(structural(format!("invalid JSON document: {}", e))),
            },
            Some(b'{') => match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(mut map)) => match map.remove(data_type.as_str()) {
                    Some(Value::Array(items)) => Source::Elements(items.into_iter()),
                    Some(_) => {
                        return Err(structural(format!("'{}' must be an array", data_type)))
                    }
                    None if map.contains_key("meta") => {
                        return Err(structural(format!("no '{}' section found", data_type)))
                    }
                    None => Source::Elements(vec![Value::Object(map)].into_iter()),
                },
                Ok(_) => return Err(structural("expected a JSON object")),
                Err(e) if e.is_eof() => return Err(structural("truncated JSON document")),
                Err(e) => {
                    let lines = body
                        .split(|b| *b == b'\n')
                        .filter(|line| !trim_line(line).is_empty())
                        .count();
                    if lines < 2 {
                        return Err(structural(format!("invalid JSON document: {}", e)));
                    }
                    Source::Lines {
                        bytes: body.to_vec(),
                        pos: 0,
                    }
                }
            },
            Some(_) => return Err(structural("expected a JSON array or object")),
        };

        Ok(Self { source, index: 0 })
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end.max(start)]
}

fn structural(reason: impl Into<String>) -> ExchangeError {
    ExchangeError::structural(ExchangeFormat::Json, reason)
}

impl Iterator for JsonDecoder {
    type Item = Result<RawRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let value = match &mut self.source {
            Source::Elements(items) => Ok(items.next()?),
            Source::Lines { bytes, pos } => loop {
                if *pos >= bytes.len() {
                    return None;
                }
                let rest = &bytes[*pos..];
                let len = rest.iter().position(|b| *b == b'\n').map_or(rest.len(), |i| i + 1);
                let line = trim_line(&rest[..len]);
                *pos += len;
                if line.is_empty() {
                    continue;
                }
                break serde_json::from_slice::<Value>(line).map_err(|e| e.to_string());
            },
        };

        let index = self.index;
        self.index += 1;
        Some(match value {
            Ok(value) => raw_from_value(index, value),
            Err(reason) => Err(RecordError::new(index, format!("invalid JSON: {}", reason))),
        })
    }
}
