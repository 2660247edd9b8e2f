//! CSV codec
//!
//! One header row per data type. Multi-type exports precede each section
//! with a `# <data type>` marker row; the decoder understands those markers
//! and reads only the section it was asked for.

use std::io::{Cursor, Write};

use serde_json::Value;

use super::RecordEncoder;
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{normalize_field_name, DataType, ExchangeFormat, RawRecord, Record, RecordError};

/// Streaming CSV writer
pub struct CsvEncoder<W: Write> {
    writer: csv::Writer<W>,
    /// Emit `# <type>` marker rows before each header
    with_markers: bool,
    section: Option<DataType>,
}

impl<W: Write> CsvEncoder<W> {
    pub fn new(writer: W, with_markers: bool) -> Self {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(writer);
        Self {
            writer,
            with_markers,
            section: None,
        }
    }
}

impl<W: Write + Send> RecordEncoder<W> for CsvEncoder<W> {
    fn begin_section(&mut self, data_type: DataType) -> ExchangeResult<()> {
        if self.with_markers {
            self.writer.write_record([format!("# {}", data_type)])?;
        }
        self.writer.write_record(data_type.columns())?;
        self.section = Some(data_type);
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> ExchangeResult<()> {
        if self.section != Some(record.data_type()) {
            return Err(ExchangeError::Codec(format!(
                "{} record written outside its section",
                record.data_type()
            )));
        }
        let row: Vec<String> = record.cells().iter().map(|cell| cell.to_text()).collect();
        self.writer.write_record(&row)?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> ExchangeResult<W> {
        self.writer
            .into_inner()
            .map_err(|e| ExchangeError::Codec(format!("Failed to flush CSV output: {}", e.error())))
    }
}

/// Lazy CSV reader yielding one raw record per data row
pub struct CsvDecoder {
    rows: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
    headers: Vec<String>,
    index: usize,
}

impl CsvDecoder {
    pub fn new(bytes: Vec<u8>, data_type: DataType) -> ExchangeResult<Self> {
        let bytes = select_section(bytes, data_type)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(Cursor::new(bytes));

        let headers = reader
            .headers()
            .map_err(|e| ExchangeError::structural(ExchangeFormat::Csv, format!("unreadable header row: {}", e)))?
            .clone();

        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ExchangeError::structural(
                ExchangeFormat::Csv,
                "missing header row",
            ));
        }
        if headers.len() == 1 {
            let only = headers.get(0).unwrap_or_default();
            if only.contains(';') || only.contains('\t') {
                return Err(ExchangeError::structural(
                    ExchangeFormat::Csv,
                    "header row is not comma-delimited",
                ));
            }
        }

        Ok(Self {
            headers: headers.iter().map(normalize_field_name).collect(),
            rows: reader.into_records(),
            index: 0,
        })
    }
}

impl Iterator for CsvDecoder {
    type Item = Result<RawRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = self.rows.next()?;
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    let index = self.index;
                    self.index += 1;
                    return Some(Err(RecordError::new(index, format!("unreadable row: {}", e))));
                }
            };

            // Blank rows are padding, not records
            if row.iter().all(str::is_empty) {
                continue;
            }

            let mut raw = RawRecord::new(self.index);
            self.index += 1;
            for (header, value) in self.headers.iter().zip(row.iter()) {
                if !value.is_empty() && !header.is_empty() {
                    raw.fields.insert(header.clone(), Value::String(value.to_string()));
                }
            }
            return Some(Ok(raw));
        }
    }
}

/// Cut the `# <data type>` section out of a multi-section payload.
///
/// Payloads without a leading marker are returned unchanged.
fn select_section(bytes: Vec<u8>, data_type: DataType) -> ExchangeResult<Vec<u8>> {
    let starts_with_marker = bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(false, |b| *b == b'#');
    if !starts_with_marker {
        return Ok(bytes);
    }

    let mut start = None;
    let mut end = bytes.len();
    let mut offset = 0;
    for line in bytes.split_inclusive(|b| *b == b'\n') {
        let line_start = offset;
        offset += line.len();

        let text = String::from_utf8_lossy(line);
        let Some(name) = text.trim().strip_prefix('#') else {
            continue;
        };
        if start.is_some() {
            end = line_start;
            break;
        }
        if name.trim().trim_matches(',').parse::<DataType>().ok() == Some(data_type) {
            start = Some(offset);
        }
    }

    match start {
        Some(start) => Ok(bytes[start..end].to_vec()),
        None => Err(ExchangeError::structural(
            ExchangeFormat::Csv,
            format!("no '{}' section found", data_type),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryKind, CategoryRecord};

    fn decode(input: &[u8]) -> Vec<Result<RawRecord, RecordError>> {
        CsvDecoder::new(input.to_vec(), DataType::Transactions)
            .unwrap()
            .collect()
    }

    #[test]
    fn test_decode_basic() {
        let rows = decode(b"Date,Description,Amount,Type\n2025-01-02,Coffee,4.50,expense\n\n2025-01-03,Pay,1000,income\n");
        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.index, 0);
        assert_eq!(first.fields["description"], "Coffee");
        assert_eq!(rows[1].as_ref().unwrap().index, 1);
    }

    #[test]
    fn test_unreadable_row_is_record_local() {
        let mut input = b"description,amount\nfirst,1\n".to_vec();
        input.extend_from_slice(b"bad \xff\xfe row,2\n");
        input.extend_from_slice(b"third,3\n");
        let rows = decode(&input);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].as_ref().unwrap_err().index, 1);
        assert_eq!(rows[2].as_ref().unwrap().index, 2);
    }

    #[test]
    fn test_wrong_delimiter_is_structural() {
        let err = CsvDecoder::new(b"date;description;amount\n2025-01-01;x;1\n".to_vec(), DataType::Transactions)
            .err()
            .unwrap();
        assert!(matches!(err, ExchangeError::StructuralDecode { .. }));
    }

    #[test]
    fn test_empty_payload_is_structural() {
        let err = CsvDecoder::new(Vec::new(), DataType::Transactions).err().unwrap();
        assert!(matches!(err, ExchangeError::StructuralDecode { .. }));
    }

    #[test]
    fn test_encoder_writes_markers_and_decoder_selects_section() {
        let mut encoder: Box<dyn RecordEncoder<Vec<u8>>> = Box::new(CsvEncoder::new(Vec::new(), true));
        encoder.begin_section(DataType::Transactions).unwrap();
        encoder.begin_section(DataType::Categories).unwrap();
        encoder
            .write_record(&Record::Category(CategoryRecord::new("Rent", CategoryKind::Expense)))
            .unwrap();
        let bytes = encoder.finish().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("# transactions\n"));
        assert!(text.contains("# categories\nid,name,type,color,icon\n"));

        let categories: Vec<_> = CsvDecoder::new(bytes.clone(), DataType::Categories)
            .unwrap()
            .collect();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].as_ref().unwrap().fields["name"], "Rent");

        let transactions: Vec<_> = CsvDecoder::new(bytes.clone(), DataType::Transactions)
            .unwrap()
            .collect();
        assert!(transactions.is_empty());

        assert!(CsvDecoder::new(bytes, DataType::Goals).is_err());
    }

    #[test]
    fn test_record_outside_section_is_rejected() {
        let mut encoder: Box<dyn RecordEncoder<Vec<u8>>> = Box::new(CsvEncoder::new(Vec::new(), false));
        encoder.begin_section(DataType::Transactions).unwrap();
        let err = encoder
            .write_record(&Record::Category(CategoryRecord::new("Rent", CategoryKind::Expense)))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Codec(_)));
    }
}
