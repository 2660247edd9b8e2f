//! Excel (.xlsx) codec
//!
//! The encoder buffers rows and builds the workbook in `finish`, one
//! worksheet per data type with a bold, frozen header row. The decoder reads
//! the worksheet named after the requested data type, falling back to the
//! first worksheet.

use std::io::{Cursor, Write};

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::{Format, Workbook};
use serde_json::Value;

use super::RecordEncoder;
use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{normalize_field_name, Cell, DataType, ExchangeFormat, RawRecord, Record, RecordError};

/// Widest column the encoder will size to
const MAX_COLUMN_WIDTH: usize = 50;

/// Buffered workbook writer
pub struct ExcelEncoder<W: Write> {
    writer: W,
    sections: Vec<(DataType, Vec<Vec<Cell>>)>,
}

impl<W: Write> ExcelEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            sections: Vec::new(),
        }
    }

    fn build_workbook(&self) -> ExchangeResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();

        for (data_type, rows) in &self.sections {
            let columns = data_type.columns();
            let sheet = workbook.add_worksheet();
            sheet.set_name(data_type.as_str()).map_err(xlsx_error)?;

            let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
            for (col, name) in columns.iter().enumerate() {
                sheet
                    .write_string_with_format(0, col_index(col)?, *name, &header_format)
                    .map_err(xlsx_error)?;
            }

            for (i, cells) in rows.iter().enumerate() {
                let row = row_index(i + 1)?;
                for (col, cell) in cells.iter().enumerate() {
                    let col_idx = col_index(col)?;
                    match cell {
                        Cell::Amount(money) => {
                            sheet
                                .write_number(row, col_idx, money.as_f64())
                                .map_err(xlsx_error)?;
                        }
                        Cell::Empty => {}
                        other => {
                            let text = other.to_text();
                            if let Some(width) = widths.get_mut(col) {
                                *width = (*width).max(text.chars().count());
                            }
                            sheet.write_string(row, col_idx, text).map_err(xlsx_error)?;
                        }
                    }
                }
            }

            for (col, width) in widths.iter().enumerate() {
                sheet
                    .set_column_width(col_index(col)?, (*width).min(MAX_COLUMN_WIDTH) as f64 + 2.0)
                    .map_err(xlsx_error)?;
            }
            sheet.set_freeze_panes(1, 0).map_err(xlsx_error)?;
        }

        // A workbook needs at least one sheet
        if self.sections.is_empty() {
            workbook.add_worksheet();
        }

        workbook.save_to_buffer().map_err(xlsx_error)
    }
}

impl<W: Write + Send> RecordEncoder<W> for ExcelEncoder<W> {
    fn begin_section(&mut self, data_type: DataType) -> ExchangeResult<()> {
        self.sections.push((data_type, Vec::new()));
        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> ExchangeResult<()> {
        match self.sections.last_mut() {
            Some((data_type, rows)) if *data_type == record.data_type() => {
                rows.push(record.cells());
                Ok(())
            }
            _ => Err(ExchangeError::Codec(format!(
                "{} record written outside its section",
                record.data_type()
            ))),
        }
    }

    fn finish(mut self: Box<Self>) -> ExchangeResult<W> {
        let bytes = self.build_workbook()?;
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

fn xlsx_error(err: rust_xlsxwriter::XlsxError) -> ExchangeError {
    ExchangeError::Codec(format!("Failed to build workbook: {}", err))
}

fn row_index(row: usize) -> ExchangeResult<u32> {
    u32::try_from(row).map_err(|_| ExchangeError::Codec("too many rows for a worksheet".into()))
}

fn col_index(col: usize) -> ExchangeResult<u16> {
    u16::try_from(col).map_err(|_| ExchangeError::Codec("too many columns for a worksheet".into()))
}

/// Worksheet reader yielding one raw record per non-blank data row
pub struct ExcelDecoder {
    range: Range<Data>,
    headers: Vec<String>,
    /// Next worksheet row to read, relative to the range start
    row: usize,
    index: usize,
}

impl ExcelDecoder {
    pub fn new(bytes: Vec<u8>, data_type: DataType) -> ExchangeResult<Self> {
        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
            .map_err(|e| structural(format!("unreadable workbook: {}", e)))?;

        // A workbook laid out by data type must carry the requested one;
        // an untyped workbook is read from its first sheet
        let names = workbook.sheet_names();
        let typed = names.iter().any(|name| name.trim().parse::<DataType>().is_ok());
        let sheet = match names
            .iter()
            .find(|name| name.trim().parse::<DataType>().ok() == Some(data_type))
        {
            Some(name) => name.clone(),
            None if typed => {
                return Err(structural(format!("workbook has no '{}' worksheet", data_type)));
            }
            None => names
                .first()
                .cloned()
                .ok_or_else(|| structural("workbook has no worksheets"))?,
        };

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| structural(format!("unreadable worksheet '{}': {}", sheet, e)))?;

        let (height, width) = range.get_size();
        if height == 0 {
            return Err(structural(format!("worksheet '{}' has no header row", sheet)));
        }
        let headers = (0..width)
            .map(|col| {
                range
                    .get((0, col))
                    .map(|cell| normalize_field_name(&cell_text(cell)))
                    .unwrap_or_default()
            })
            .collect();

        Ok(Self {
            range,
            headers,
            row: 1,
            index: 0,
        })
    }
}

fn structural(reason: impl Into<String>) -> ExchangeError {
    ExchangeError::structural(ExchangeFormat::Excel, reason)
}

impl Iterator for ExcelDecoder {
    type Item = Result<RawRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (height, _) = self.range.get_size();
        while self.row < height {
            let row = self.row;
            self.row += 1;

            let mut raw = RawRecord::new(self.index);
            let mut cell_errors = Vec::new();
            for (col, header) in self.headers.iter().enumerate() {
                let Some(cell) = self.range.get((row, col)) else {
                    continue;
                };
                match cell_value(cell) {
                    Ok(Some(value)) if !header.is_empty() => {
                        raw.fields.insert(header.clone(), value);
                    }
                    Ok(_) => {}
                    Err(reason) => cell_errors.push(format!("{}: {}", header, reason)),
                }
            }

            if raw.fields.is_empty() && cell_errors.is_empty() {
                continue;
            }

            let index = self.index;
            self.index += 1;
            if !cell_errors.is_empty() {
                return Some(Err(RecordError::new(index, cell_errors.join("; "))));
            }
            return Some(Ok(raw));
        }
        None
    }
}

fn cell_value(cell: &Data) -> Result<Option<Value>, String> {
    let value = match cell {
        Data::Empty => return Ok(None),
        Data::String(s) if s.trim().is_empty() => return Ok(None),
        Data::String(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| "not a finite number".to_string())?,
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(datetime) => Value::String(datetime.date().format("%Y-%m-%d").to_string()),
            None => return Err("unreadable date".to_string()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Error(e) => return Err(format!("cell error {:?}", e)),
    };
    Ok(Some(value))
}

fn cell_text(cell: &Data) -> String {
    match cell_value(cell) {
        Ok(Some(Value::String(s))) => s,
        Ok(Some(other)) => other.to_string(),
        _ => String::new(),
    }
}
