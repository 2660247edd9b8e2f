//! Format codecs
//!
//! Each interchange format has an encoder that turns a stream of typed
//! [`Record`]s into bytes, and (except PDF) a decoder that turns bytes into a
//! lazy stream of [`RawRecord`]s for the validator.
//!
//! Encoders are fed one section per data type: call
//! [`RecordEncoder::begin_section`], then [`RecordEncoder::write_record`] for
//! each record of that type, and [`RecordEncoder::finish`] once at the end.
//! CSV and JSON write through as records arrive; Excel and PDF buffer rows
//! until `finish` because their containers need the whole document.
//!
//! Decoders fail up front only when the payload is structurally unreadable.
//! Problems confined to one record surface as `Err(RecordError)` items of the
//! stream and decoding continues with the next record.

pub mod csv;
pub mod excel;
pub mod json;
pub mod pdf;

use std::io::Write;

use serde_json::{Map, Value};

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{DataType, ExchangeFormat, RawRecord, Record, RecordError};

pub use self::csv::{CsvDecoder, CsvEncoder};
pub use self::excel::{ExcelDecoder, ExcelEncoder};
pub use self::json::{JsonDecoder, JsonEncoder};
pub use self::pdf::PdfEncoder;

/// Lazy, forward-only sequence of decoded records
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, RecordError>> + Send>;

/// Encoder for one output format
pub trait RecordEncoder<W: Write>: Send {
    /// Start the section for `data_type`. Sections are written in call order.
    fn begin_section(&mut self, data_type: DataType) -> ExchangeResult<()>;

    /// Write one record into the current section
    fn write_record(&mut self, record: &Record) -> ExchangeResult<()>;

    /// Flush everything and hand back the underlying writer
    fn finish(self: Box<Self>) -> ExchangeResult<W>;
}

/// Build an encoder for `format`.
///
/// `data_types` lists every section the export will contain; formats use it
/// for document-level metadata.
pub fn encoder_for<W: Write + Send + 'static>(
    format: ExchangeFormat,
    writer: W,
    data_types: &[DataType],
) -> ExchangeResult<Box<dyn RecordEncoder<W>>> {
    let encoder: Box<dyn RecordEncoder<W>> = match format {
        ExchangeFormat::Csv => Box::new(CsvEncoder::new(writer, data_types.len() > 1)),
        ExchangeFormat::Json => Box::new(JsonEncoder::new(writer, data_types)?),
        ExchangeFormat::Excel => Box::new(ExcelEncoder::new(writer)),
        ExchangeFormat::Pdf => Box::new(PdfEncoder::new(writer, data_types)),
    };
    Ok(encoder)
}

/// Build a decoder over `bytes` for records of `data_type`.
///
/// Returns `StructuralDecode` when the payload cannot be read at all.
pub fn decoder_for(
    format: ExchangeFormat,
    bytes: Vec<u8>,
    data_type: DataType,
) -> ExchangeResult<RecordStream> {
    if !data_type.is_concrete() {
        return Err(ExchangeError::Validation(
            "Import requires a single concrete data type".to_string(),
        ));
    }
    match format {
        ExchangeFormat::Csv => Ok(Box::new(CsvDecoder::new(bytes, data_type)?)),
        ExchangeFormat::Json => Ok(Box::new(JsonDecoder::new(bytes, data_type)?)),
        ExchangeFormat::Excel => Ok(Box::new(ExcelDecoder::new(bytes, data_type)?)),
        ExchangeFormat::Pdf => Err(ExchangeError::Validation(
            "PDF is an export-only format".to_string(),
        )),
    }
}

/// Convert a decoded JSON value into a raw record.
///
/// Only objects describe records; anything else is rejected for this index.
pub(crate) fn raw_from_value(index: usize, value: Value) -> Result<RawRecord, RecordError> {
    match value {
        Value::Object(map) => Ok(raw_from_object(index, map)),
        other => Err(RecordError::new(
            index,
            format!("expected a JSON object, found {}", json_kind(&other)),
        )),
    }
}

pub(crate) fn raw_from_object(index: usize, map: Map<String, Value>) -> RawRecord {
    let mut raw = RawRecord::new(index);
    for (key, value) in map {
        raw.insert(&key, value);
    }
    raw
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Money, TransactionRecord, TransactionType};
    use chrono::NaiveDate;

    fn sample() -> Record {
        let mut txn = TransactionRecord::new(
            "Groceries, weekly",
            Money::from_cents(8_245),
            TransactionType::Expense,
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
        )
        .with_category("Food");
        txn.attachments = vec!["receipt.png".into(), "list.txt".into()];
        Record::Transaction(txn)
    }

    fn encode(format: ExchangeFormat, records: &[Record]) -> Vec<u8> {
        let mut encoder = encoder_for(format, Vec::new(), &[DataType::Transactions]).unwrap();
        encoder.begin_section(DataType::Transactions).unwrap();
        for record in records {
            encoder.write_record(record).unwrap();
        }
        encoder.finish().unwrap()
    }

    #[test]
    fn test_importable_formats_decode_their_own_output() {
        let record = sample();
        for format in [ExchangeFormat::Csv, ExchangeFormat::Json, ExchangeFormat::Excel] {
            let bytes = encode(format, std::slice::from_ref(&record));
            let decoded: Vec<_> = decoder_for(format, bytes, DataType::Transactions)
                .unwrap()
                .collect();
            assert_eq!(decoded.len(), 1, "{}", format);
            let raw = decoded[0].as_ref().unwrap();
            assert_eq!(raw.index, 0);
            assert!(raw.get_any(&["description"]).is_some(), "{}", format);
        }
    }

    #[test]
    fn test_pdf_cannot_be_decoded() {
        let bytes = encode(ExchangeFormat::Pdf, &[sample()]);
        assert!(bytes.starts_with(b"%PDF-"));
        let err = decoder_for(ExchangeFormat::Pdf, bytes, DataType::Transactions).err();
        assert!(err.unwrap().is_validation());
    }

    #[test]
    fn test_decoder_requires_concrete_type() {
        let err = decoder_for(ExchangeFormat::Json, b"[]".to_vec(), DataType::All).err();
        assert!(err.unwrap().is_validation());
    }

    #[test]
    fn test_raw_from_value_rejects_scalars() {
        let err = raw_from_value(4, Value::from(12)).unwrap_err();
        assert_eq!(err.index, 4);
        assert!(err.reason.contains("a number"));
    }
}
